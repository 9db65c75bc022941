//! Size and stack analysis: the first pass of the compiler.
//!
//! [`analyze`] walks a tree once and computes exactly how many code units, constant-pool
//! entries, fallback subtrees, call sites, work-stack slots and spill slots the emitted
//! [`StackProgram`](crate::program::StackProgram) will use. Emission allocates its buffers
//! from these numbers and treats any overrun as a bug.
//!
//! Every [`StackOp`](crate::program::StackOp) costs one code unit. Per node kind:
//!
//! | node                              | code units                  | constants |
//! |-----------------------------------|-----------------------------|-----------|
//! | literal, `e`, `pi`, `true`/`false`| 1                           | 1         |
//! | bound variable, time              | 1                           | 0         |
//! | fallback subtree                  | 1                           | 0         |
//! | unary operator or function        | operand + 1                 | 0         |
//! | binary operator, kept on stack    | left + right + 1            | 0         |
//! | binary operator, left spilled     | left + right + 2            | 0         |
//! | user call with `n` arguments      | arguments + `n` + 1         | 0         |

use std::cmp::max;

use crate::expr::Expr;
use crate::program::{must_spill, shape, Shape};

/// Buffer requirements of a compiled formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Analysis {
    /// Number of instructions
    pub code_len: usize,
    /// Constant-pool entries
    pub constants: usize,
    /// Subtrees left to the interpreter
    pub subtrees: usize,
    /// User function call sites
    pub calls: usize,
    /// Peak height of the bounded work stack
    pub max_depth: usize,
    /// Spill slots in use at the same time
    pub spill_slots: usize,
    /// Highest slot index loaded from the value vector
    pub max_slot: Option<usize>,
}

/// Computes the buffer requirements of `expr` for a work stack of `capacity` slots.
pub fn analyze(expr: &Expr, capacity: usize) -> Analysis {
    let mut analyzer = Analyzer {
        capacity: capacity.max(1),
        result: Analysis::default(),
        height: 0,
        spill_top: 0,
    };
    analyzer.visit(expr);
    analyzer.result
}

/// Work-stack slots needed to evaluate `expr` without spilling.
///
/// A leaf needs one slot. A binary node needs its left operand's depth, or one more than
/// its right operand's depth if that is larger, since the left result stays on the stack
/// while the right operand is evaluated. Call arguments are spilled one by one, so a call
/// needs as much as its deepest argument.
pub fn analyze_stack_depth(expr: &Expr) -> usize {
    match shape(expr) {
        Shape::Constant(_)
        | Shape::Slot(_)
        | Shape::Observed(_)
        | Shape::Time
        | Shape::Fallback => 1,
        Shape::Alias(inner) | Shape::Unary(_, inner) => analyze_stack_depth(inner),
        Shape::Binary(_, lhs, rhs) => max(analyze_stack_depth(lhs), 1 + analyze_stack_depth(rhs)),
        Shape::Fold(_, operands) => operands[1..]
            .iter()
            .fold(analyze_stack_depth(&operands[0]), |depth, rhs| {
                max(depth, 1 + analyze_stack_depth(rhs))
            }),
        Shape::Call(_, args) => args.iter().map(analyze_stack_depth).max().unwrap_or(1).max(1),
    }
}

struct Analyzer {
    capacity: usize,
    result: Analysis,
    height: usize,
    spill_top: usize,
}

impl Analyzer {
    fn push_value(&mut self) {
        self.result.code_len += 1;
        self.height += 1;
        self.result.max_depth = max(self.result.max_depth, self.height);
    }

    fn take_spill_slot(&mut self) {
        self.spill_top += 1;
        self.result.spill_slots = max(self.result.spill_slots, self.spill_top);
    }

    fn visit(&mut self, expr: &Expr) {
        match shape(expr) {
            Shape::Constant(_) => {
                self.result.constants += 1;
                self.push_value();
            }
            Shape::Slot(index) | Shape::Observed(index) => {
                self.result.max_slot = Some(self.result.max_slot.map_or(index, |m| max(m, index)));
                self.push_value();
            }
            Shape::Time => self.push_value(),
            Shape::Fallback => {
                self.result.subtrees += 1;
                self.push_value();
            }
            Shape::Alias(inner) => self.visit(inner),
            Shape::Unary(_, inner) => {
                self.visit(inner);
                self.result.code_len += 1;
            }
            Shape::Binary(_, lhs, rhs) => {
                self.visit(lhs);
                self.combine(rhs);
            }
            Shape::Fold(_, operands) => {
                self.visit(&operands[0]);
                for rhs in &operands[1..] {
                    self.combine(rhs);
                }
            }
            Shape::Call(_, args) => {
                let base = self.spill_top;
                for (i, arg) in args.iter().enumerate() {
                    self.spill_top = base + i;
                    self.visit(arg);
                    self.take_spill_slot();
                    self.result.code_len += 1;
                    self.height -= 1;
                }
                self.spill_top = base;
                self.result.calls += 1;
                self.push_value();
            }
        }
    }

    fn combine(&mut self, rhs: &Expr) {
        if must_spill(self.height, rhs, self.capacity) {
            self.take_spill_slot();
            self.result.code_len += 1;
            self.height -= 1;
            self.visit(rhs);
            self.spill_top -= 1;
        } else {
            self.visit(rhs);
            self.height -= 1;
        }
        self.result.code_len += 1;
    }
}
