//! Stack programs: the code-generation pass of the compiler.
//!
//! A resolved tree is flattened into a [`StackProgram`], a sequence of [`StackOp`]s for a
//! machine with a bounded work stack, a constant pool, and an addressable spill buffer.
//! The program is emitted in a single walk whose buffer sizes come from
//! [`analyze`](crate::analysis::analyze); running past a reservation is a bug in one of
//! the two passes and panics.
//!
//! At every binary operator the emitter checks whether the right operand can be evaluated
//! on top of the left one without exceeding the stack capacity. If it cannot, the left
//! result is moved to the spill buffer first and combined from there afterwards.
//!
//! Nodes without a fixed encoding (piecewise, lambdas, unbound names, chained comparisons)
//! are kept as subtrees and evaluated by the interpreter when the program reaches them.
//!
//! [`StackProgram::run`] executes a program in Rust. The native backend lowers the same
//! program to machine code, so both agree op for op.

use crate::analysis::{analyze, analyze_stack_depth, Analysis};
use crate::eval::{
    apply_binary, apply_unary, boolean, call_user_function, checked_factorial, evaluate_with,
    observed_value, root, truth, EvalContext,
};
use crate::expr::{Expr, Function, Logical, Relational};

/// Operators applied to the top of the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    /// Normalises a value to 1.0 or 0.0
    Truth,
    Math(Function),
    Factorial,
}

impl UnaryOp {
    /// Value of the operator without diagnostics.
    pub fn apply(self, x: f64) -> f64 {
        match self {
            UnaryOp::Neg => -x,
            UnaryOp::Not => boolean(!truth(x)),
            UnaryOp::Truth => boolean(truth(x)),
            UnaryOp::Math(f) => apply_unary(f, x),
            UnaryOp::Factorial => apply_unary(Function::Factorial, x),
        }
    }
}

/// Operators combining the two topmost operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Log,
    Root,
    Compare(Relational),
    And,
    Or,
    Xor,
}

impl BinaryOp {
    pub fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => absorbing_mul(a, b),
            BinaryOp::Div => a / b,
            BinaryOp::Pow => a.powf(b),
            BinaryOp::Log => apply_binary(Function::Log, a, b),
            BinaryOp::Root => root(a, b),
            BinaryOp::Compare(op) => boolean(op.holds(a, b)),
            BinaryOp::And => boolean(truth(a) && truth(b)),
            BinaryOp::Or => boolean(truth(a) || truth(b)),
            BinaryOp::Xor => boolean(truth(a) != truth(b)),
        }
    }
}

/// Product step of a fold: a zero accumulator or a zero result absorbs the rest.
pub(crate) fn absorbing_mul(a: f64, b: f64) -> f64 {
    if a == 0.0 {
        return 0.0;
    }
    let product = a * b;
    if product == 0.0 {
        0.0
    } else {
        product
    }
}

/// One instruction of a stack program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackOp {
    /// Push `constants[i]`
    PushConst(usize),
    /// Push `values[i]`
    LoadSlot(usize),
    /// Push the observed value for slot `i` at the current time
    LoadObserved(usize),
    LoadTime,
    /// Push the interpreted value of `subtrees[i]`
    Fallback(usize),
    Unary(UnaryOp),
    /// Pop `b`, pop `a`, push `a op b`
    Binary(BinaryOp),
    /// Pop into `spill[i]`
    Spill(usize),
    /// Replace the top `b` with `spill[i] op b`
    BinarySpilled(BinaryOp, usize),
    /// Push `functions[function](spill[base..base + argc])`
    Call {
        function: usize,
        base: usize,
        argc: usize,
    },
}

/// How a node is encoded; shared by the analysis and emission passes.
pub(crate) enum Shape<'e> {
    Constant(f64),
    Slot(usize),
    Observed(usize),
    Time,
    Fallback,
    /// A single-operand sum or product: the operand itself
    Alias(&'e Expr),
    Unary(UnaryOp, &'e Expr),
    Binary(BinaryOp, &'e Expr, &'e Expr),
    /// Left fold over two or more operands
    Fold(BinaryOp, &'e [Expr]),
    Call(&'e str, &'e [Expr]),
}

pub(crate) fn shape(expr: &Expr) -> Shape<'_> {
    match expr {
        Expr::Integer(_) | Expr::Real(_) | Expr::E | Expr::Pi | Expr::True | Expr::False => {
            Shape::Constant(expr.as_constant().unwrap_or(f64::NAN))
        }
        Expr::Var(v) => match v.binding {
            Some(b) if b.has_external_data => Shape::Observed(b.index),
            Some(b) => Shape::Slot(b.index),
            // Unbound names go through the name table before the time spellings.
            None => Shape::Fallback,
        },
        Expr::Time => Shape::Time,
        Expr::Plus(c) => nary(c, 0.0, BinaryOp::Add),
        Expr::Times(c) => nary(c, 1.0, BinaryOp::Mul),
        Expr::Neg(a) => Shape::Unary(UnaryOp::Neg, a),
        Expr::Not(a) => Shape::Unary(UnaryOp::Not, a),
        Expr::Minus(a, b) => Shape::Binary(BinaryOp::Sub, a, b),
        Expr::Divide(a, b) => Shape::Binary(BinaryOp::Div, a, b),
        Expr::Power(a, b) => Shape::Binary(BinaryOp::Pow, a, b),
        Expr::Func(f, args) => match (f, args.as_slice()) {
            (Function::Factorial, [x]) => Shape::Unary(UnaryOp::Factorial, x),
            (_, [x]) => Shape::Unary(UnaryOp::Math(*f), x),
            (Function::Log, [a, b]) => Shape::Binary(BinaryOp::Log, a, b),
            (Function::Root, [a, b]) => Shape::Binary(BinaryOp::Root, a, b),
            (Function::Power, [a, b]) => Shape::Binary(BinaryOp::Pow, a, b),
            _ => Shape::Fallback,
        },
        Expr::Logical(op, c) => {
            let fold = match op {
                Logical::And => BinaryOp::And,
                Logical::Or => BinaryOp::Or,
                Logical::Xor => BinaryOp::Xor,
            };
            match c.as_slice() {
                [] => Shape::Constant(boolean(*op == Logical::And)),
                [only] => Shape::Unary(UnaryOp::Truth, only),
                _ => Shape::Fold(fold, c),
            }
        }
        Expr::Relational(op, c) => match c.as_slice() {
            [] | [_] => Shape::Constant(1.0),
            [a, b] => Shape::Binary(BinaryOp::Compare(*op), a, b),
            _ => Shape::Fallback,
        },
        Expr::Call(name, args) => Shape::Call(name, args),
        Expr::Piecewise(_) | Expr::Lambda(_, _) | Expr::Failed => Shape::Fallback,
    }
}

fn nary(children: &[Expr], identity: f64, op: BinaryOp) -> Shape<'_> {
    match children {
        [] => Shape::Constant(identity),
        [only] => Shape::Alias(only),
        _ => Shape::Fold(op, children),
    }
}

/// True if the right operand of a binary node must not be stacked on the left result.
pub(crate) fn must_spill(height_with_left: usize, rhs: &Expr, capacity: usize) -> bool {
    height_with_left + analyze_stack_depth(rhs) > capacity
}

/// A compiled formula for the bounded stack machine.
#[derive(Debug, Clone, PartialEq)]
pub struct StackProgram {
    pub(crate) source: Expr,
    pub(crate) ops: Vec<StackOp>,
    pub(crate) constants: Vec<f64>,
    pub(crate) subtrees: Vec<Expr>,
    pub(crate) functions: Vec<String>,
    pub(crate) analysis: Analysis,
    pub(crate) capacity: usize,
}

impl StackProgram {
    /// Analyses and emits `expr` for a stack of `capacity` slots.
    pub fn new(expr: &Expr, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let analysis = analyze(expr, capacity);
        emit(expr, analysis, capacity)
    }

    pub fn ops(&self) -> &[StackOp] {
        &self.ops
    }

    pub fn constants(&self) -> &[f64] {
        &self.constants
    }

    pub fn analysis(&self) -> &Analysis {
        &self.analysis
    }

    pub fn source(&self) -> &Expr {
        &self.source
    }

    /// True if `values` covers every slot the program loads directly.
    pub fn accepts(&self, values: &[f64]) -> bool {
        self.analysis.max_slot.map_or(true, |max| max < values.len())
    }

    /// Executes the program.
    ///
    /// A value vector too short for the program's slots is handed to the interpreter
    /// instead, which then looks the missing names up by name.
    pub fn run(&self, values: &[f64], time: f64, ctx: &mut EvalContext<'_>) -> f64 {
        if !self.accepts(values) {
            return evaluate_with(&self.source, values, time, ctx);
        }
        let mut stack: Vec<f64> = Vec::with_capacity(self.analysis.max_depth);
        let mut spill = vec![0.0; self.analysis.spill_slots];
        for op in &self.ops {
            match *op {
                StackOp::PushConst(i) => stack.push(self.constants[i]),
                StackOp::LoadSlot(i) => stack.push(values[i]),
                StackOp::LoadObserved(i) => {
                    let value = match ctx.data {
                        Some(data) => observed_value(data, i, time, &mut ctx.diagnostics),
                        None => values[i],
                    };
                    stack.push(value);
                }
                StackOp::LoadTime => stack.push(time),
                StackOp::Fallback(i) => {
                    stack.push(evaluate_with(&self.subtrees[i], values, time, ctx))
                }
                StackOp::Unary(op) => {
                    let x = pop(&mut stack);
                    let value = match op {
                        UnaryOp::Factorial => checked_factorial(x, &mut ctx.diagnostics),
                        _ => op.apply(x),
                    };
                    stack.push(value);
                }
                StackOp::Binary(op) => {
                    let b = pop(&mut stack);
                    let a = pop(&mut stack);
                    stack.push(op.apply(a, b));
                }
                StackOp::Spill(slot) => spill[slot] = pop(&mut stack),
                StackOp::BinarySpilled(op, slot) => {
                    let b = pop(&mut stack);
                    stack.push(op.apply(spill[slot], b));
                }
                StackOp::Call {
                    function,
                    base,
                    argc,
                } => {
                    let args = &spill[base..base + argc];
                    stack.push(call_user_function(&self.functions[function], args, time, ctx));
                }
            }
            debug_assert!(stack.len() <= self.capacity);
        }
        pop(&mut stack)
    }
}

fn pop(stack: &mut Vec<f64>) -> f64 {
    debug_assert!(!stack.is_empty(), "stack program underflow");
    stack.pop().unwrap_or(f64::NAN)
}

/// Emits the program for `expr` into buffers sized by `analysis`.
///
/// # Panics
/// If emission needs more code, constants, stack or spill space than `analysis` reserved.
pub fn emit(expr: &Expr, analysis: Analysis, capacity: usize) -> StackProgram {
    let mut emitter = Emitter {
        program: StackProgram {
            source: expr.clone(),
            ops: Vec::with_capacity(analysis.code_len),
            constants: Vec::with_capacity(analysis.constants),
            subtrees: Vec::with_capacity(analysis.subtrees),
            functions: Vec::with_capacity(analysis.calls),
            analysis,
            capacity,
        },
        height: 0,
        spill_top: 0,
    };
    emitter.emit(expr);
    assert_eq!(emitter.height, 1, "program must leave exactly one value");
    assert_eq!(
        emitter.program.ops.len(),
        analysis.code_len,
        "analysis and emission disagree on code size"
    );
    emitter.program
}

struct Emitter {
    program: StackProgram,
    height: usize,
    spill_top: usize,
}

impl Emitter {
    fn push(&mut self, op: StackOp) {
        let reserved = &self.program.analysis;
        assert!(
            self.program.ops.len() < reserved.code_len,
            "code buffer overflow: {} ops reserved",
            reserved.code_len
        );
        match op {
            StackOp::PushConst(_)
            | StackOp::LoadSlot(_)
            | StackOp::LoadObserved(_)
            | StackOp::LoadTime
            | StackOp::Fallback(_)
            | StackOp::Call { .. } => self.height += 1,
            StackOp::Binary(_) | StackOp::Spill(_) => self.height -= 1,
            StackOp::Unary(_) | StackOp::BinarySpilled(_, _) => {}
        }
        assert!(
            self.height <= self.program.capacity && self.height <= reserved.max_depth,
            "work stack overflow at height {}",
            self.height
        );
        self.program.ops.push(op);
    }

    fn spill_slot(&mut self) -> usize {
        let slot = self.spill_top;
        self.spill_top += 1;
        assert!(
            self.spill_top <= self.program.analysis.spill_slots,
            "spill buffer overflow: {} slots reserved",
            self.program.analysis.spill_slots
        );
        slot
    }

    fn emit(&mut self, expr: &Expr) {
        match shape(expr) {
            Shape::Constant(value) => {
                assert!(
                    self.program.constants.len() < self.program.analysis.constants,
                    "constant pool overflow"
                );
                self.program.constants.push(value);
                let index = self.program.constants.len() - 1;
                self.push(StackOp::PushConst(index));
            }
            Shape::Slot(index) => self.push(StackOp::LoadSlot(index)),
            Shape::Observed(index) => self.push(StackOp::LoadObserved(index)),
            Shape::Time => self.push(StackOp::LoadTime),
            Shape::Fallback => {
                self.program.subtrees.push(expr.clone());
                let index = self.program.subtrees.len() - 1;
                self.push(StackOp::Fallback(index));
            }
            Shape::Alias(only) => self.emit(only),
            Shape::Unary(op, arg) => {
                self.emit(arg);
                self.push(StackOp::Unary(op));
            }
            Shape::Binary(op, lhs, rhs) => {
                self.emit(lhs);
                self.combine(op, rhs);
            }
            Shape::Fold(op, operands) => {
                self.emit(&operands[0]);
                for rhs in &operands[1..] {
                    self.combine(op, rhs);
                }
            }
            Shape::Call(name, args) => {
                let base = self.spill_top;
                for (i, arg) in args.iter().enumerate() {
                    self.spill_top = base + i;
                    self.emit(arg);
                    let slot = self.spill_slot();
                    self.push(StackOp::Spill(slot));
                }
                self.spill_top = base;
                self.program.functions.push(name.to_string());
                let function = self.program.functions.len() - 1;
                self.push(StackOp::Call {
                    function,
                    base,
                    argc: args.len(),
                });
            }
        }
    }

    /// Combines the value on top of the stack with `rhs`.
    fn combine(&mut self, op: BinaryOp, rhs: &Expr) {
        if must_spill(self.height, rhs, self.program.capacity) {
            let slot = self.spill_slot();
            self.push(StackOp::Spill(slot));
            self.emit(rhs);
            self.spill_top -= 1;
            self.push(StackOp::BinarySpilled(op, slot));
        } else {
            self.emit(rhs);
            self.push(StackOp::Binary(op));
        }
    }
}
