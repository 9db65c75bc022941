//! Tree-walking interpreter.
//!
//! [`evaluate`] computes the value of a (normally resolved) tree for a value vector and a
//! simulation time. Evaluation is total: whatever cannot be computed is reported to the
//! [`Diagnostics`] sink of the [`EvalContext`] and replaced by a substitute value, so a
//! simulation never aborts inside a formula.
//!
//! The scalar helpers at the bottom of this module define the numeric semantics of every
//! named function. Compiled code calls the same helpers, which keeps the two evaluation
//! paths in agreement.

use crate::data::ObservedData;
use crate::diagnostics::{Condition, Diagnostics};
use crate::expr::{is_time_name, Expr, Function, Logical, VarRef};
use crate::functions::UserFunctions;

/// Capabilities available to an evaluation: a name table for by-name lookup, user
/// function definitions, an observed-data source, and the diagnostics sink.
///
/// All capabilities are optional. The context is passed explicitly to every evaluation
/// and lives only as long as the borrowed capabilities.
#[derive(Default)]
pub struct EvalContext<'a> {
    pub(crate) names: &'a [String],
    pub(crate) functions: Option<&'a dyn UserFunctions>,
    pub(crate) data: Option<&'a dyn ObservedData>,
    pub(crate) diagnostics: Diagnostics,
}

impl<'a> EvalContext<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names used for by-name lookup of unbound variables; position `i` reads `values[i]`.
    pub fn with_names(mut self, names: &'a [String]) -> Self {
        self.names = names;
        self
    }

    pub fn with_functions(mut self, functions: &'a dyn UserFunctions) -> Self {
        self.functions = Some(functions);
        self
    }

    pub fn with_data(mut self, data: &'a dyn ObservedData) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn diagnostics_mut(&mut self) -> &mut Diagnostics {
        &mut self.diagnostics
    }

    /// Takes the collected conditions, leaving an empty sink with the same limit.
    pub fn take_diagnostics(&mut self) -> Diagnostics {
        let empty = Diagnostics::with_limit(self.diagnostics.limit());
        std::mem::replace(&mut self.diagnostics, empty)
    }

    pub fn report(&mut self, condition: Condition) {
        self.diagnostics.report(condition);
    }
}

/// Evaluates `expr` without capabilities. Conditions are logged and discarded.
pub fn evaluate(expr: &Expr, values: &[f64], time: f64) -> f64 {
    let mut ctx = EvalContext::default();
    evaluate_with(expr, values, time, &mut ctx)
}

/// Evaluates `expr`, reporting conditions to `ctx`.
pub fn evaluate_with(expr: &Expr, values: &[f64], time: f64, ctx: &mut EvalContext<'_>) -> f64 {
    match expr {
        Expr::Integer(v) => *v as f64,
        Expr::Real(v) => *v,
        Expr::Time => time,
        Expr::E => std::f64::consts::E,
        Expr::Pi => std::f64::consts::PI,
        Expr::True => 1.0,
        Expr::False => 0.0,
        Expr::Var(v) => variable(v, values, time, ctx),
        Expr::Plus(children) => {
            let mut terms = children.iter();
            let Some(first) = terms.next() else {
                return 0.0;
            };
            let mut sum = evaluate_with(first, values, time, ctx);
            for term in terms {
                sum += evaluate_with(term, values, time, ctx);
            }
            sum
        }
        Expr::Times(children) => {
            let mut factors = children.iter();
            let Some(first) = factors.next() else {
                return 1.0;
            };
            let mut product = evaluate_with(first, values, time, ctx);
            if product == 0.0 {
                return 0.0;
            }
            for factor in factors {
                product *= evaluate_with(factor, values, time, ctx);
                if product == 0.0 {
                    return 0.0;
                }
            }
            product
        }
        Expr::Neg(a) => -evaluate_with(a, values, time, ctx),
        Expr::Minus(a, b) => {
            evaluate_with(a, values, time, ctx) - evaluate_with(b, values, time, ctx)
        }
        Expr::Divide(a, b) => {
            evaluate_with(a, values, time, ctx) / evaluate_with(b, values, time, ctx)
        }
        Expr::Power(a, b) => {
            let base = evaluate_with(a, values, time, ctx);
            base.powf(evaluate_with(b, values, time, ctx))
        }
        Expr::Call(name, args) => {
            let args: Vec<f64> = args
                .iter()
                .map(|a| evaluate_with(a, values, time, ctx))
                .collect();
            call_user_function(name, &args, time, ctx)
        }
        Expr::Func(f, args) => match args.as_slice() {
            [x] if *f == Function::Factorial => {
                let x = evaluate_with(x, values, time, ctx);
                checked_factorial(x, &mut ctx.diagnostics)
            }
            [x] => apply_unary(*f, evaluate_with(x, values, time, ctx)),
            [a, b] => {
                let a = evaluate_with(a, values, time, ctx);
                apply_binary(*f, a, evaluate_with(b, values, time, ctx))
            }
            _ => {
                ctx.report(Condition::UnsupportedNode(f.name()));
                0.0
            }
        },
        Expr::Piecewise(children) => piecewise(children, values, time, ctx),
        Expr::Logical(op, children) => {
            let mut truths = children
                .iter()
                .map(|c| truth(evaluate_with(c, values, time, ctx)))
                .collect::<Vec<_>>()
                .into_iter();
            let result = match op {
                Logical::And => truths.all(|t| t),
                Logical::Or => truths.any(|t| t),
                Logical::Xor => truths.filter(|t| *t).count() % 2 == 1,
            };
            boolean(result)
        }
        Expr::Not(a) => boolean(!truth(evaluate_with(a, values, time, ctx))),
        Expr::Relational(op, children) => {
            let operands: Vec<f64> = children
                .iter()
                .map(|c| evaluate_with(c, values, time, ctx))
                .collect();
            boolean(operands.windows(2).all(|w| op.holds(w[0], w[1])))
        }
        Expr::Lambda(_, _) | Expr::Failed => {
            ctx.report(Condition::UnsupportedNode(expr.kind()));
            0.0
        }
    }
}

fn variable(v: &VarRef, values: &[f64], time: f64, ctx: &mut EvalContext<'_>) -> f64 {
    if let Some(binding) = v.binding {
        if binding.has_external_data {
            if let Some(data) = ctx.data {
                return observed_value(data, binding.index, time, &mut ctx.diagnostics);
            }
        }
        if let Some(value) = values.get(binding.index) {
            return *value;
        }
    }
    if let Some(value) = ctx
        .names
        .iter()
        .position(|n| *n == v.name)
        .and_then(|i| values.get(i))
    {
        return *value;
    }
    if is_time_name(&v.name) {
        return time;
    }
    ctx.report(Condition::UnresolvedName(v.name.clone()));
    0.0
}

/// Walks `[value, condition]` pairs and picks the branch whose condition holds.
///
/// Exactly one true condition is expected. With none, the trailing default is used if
/// present; otherwise the condition is reported and 0.0 returned. With several, the
/// condition is reported and the first true branch wins.
fn piecewise(children: &[Expr], values: &[f64], time: f64, ctx: &mut EvalContext<'_>) -> f64 {
    let mut chosen = None;
    let mut true_branches = 0;
    for pair in children.chunks_exact(2) {
        if truth(evaluate_with(&pair[1], values, time, ctx)) {
            true_branches += 1;
            if chosen.is_none() {
                chosen = Some(evaluate_with(&pair[0], values, time, ctx));
            }
        }
    }
    match (chosen, true_branches) {
        (Some(value), 1) => value,
        (Some(value), _) => {
            ctx.report(Condition::PiecewiseBranchAmbiguous { true_branches });
            value
        }
        (None, _) => match children.len() % 2 {
            1 => evaluate_with(&children[children.len() - 1], values, time, ctx),
            _ => {
                ctx.report(Condition::PiecewiseBranchAmbiguous { true_branches: 0 });
                0.0
            }
        },
    }
}

pub(crate) fn call_user_function(
    name: &str,
    args: &[f64],
    time: f64,
    ctx: &mut EvalContext<'_>,
) -> f64 {
    let result = match ctx.functions {
        Some(functions) => functions.call(name, args, time, &mut ctx.diagnostics),
        None => None,
    };
    result.unwrap_or_else(|| {
        ctx.report(Condition::UnresolvedName(name.to_string()));
        0.0
    })
}

pub(crate) fn observed_value(
    data: &dyn ObservedData,
    index: usize,
    time: f64,
    diagnostics: &mut Diagnostics,
) -> f64 {
    match data.value(index, time) {
        Ok(value) => value,
        Err(mismatch) => {
            diagnostics.report(Condition::DiscreteDataMismatch {
                index,
                time,
                matches: mismatch.matches,
            });
            0.0
        }
    }
}

#[inline]
pub(crate) fn truth(value: f64) -> bool {
    value != 0.0
}

#[inline]
pub(crate) fn boolean(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

/// Value of a single-argument named function.
///
/// `Log` with one argument is the decimal logarithm and `Root` the square root.
pub fn apply_unary(f: Function, x: f64) -> f64 {
    match f {
        Function::Abs => x.abs(),
        Function::ArcCos => x.acos(),
        Function::ArcCosh => x.acosh(),
        Function::ArcCot => (1.0 / x).atan(),
        Function::ArcCoth => (1.0 / x).atanh(),
        Function::ArcCsc => (1.0 / x).asin(),
        Function::ArcCsch => (1.0 / x).asinh(),
        Function::ArcSec => (1.0 / x).acos(),
        Function::ArcSech => (1.0 / x).acosh(),
        Function::ArcSin => x.asin(),
        Function::ArcSinh => x.asinh(),
        Function::ArcTan => x.atan(),
        Function::ArcTanh => x.atanh(),
        Function::Ceiling => x.ceil(),
        Function::Cos => x.cos(),
        Function::Cosh => x.cosh(),
        Function::Cot => 1.0 / x.tan(),
        Function::Coth => 1.0 / x.tanh(),
        Function::Csc => 1.0 / x.sin(),
        Function::Csch => 1.0 / x.sinh(),
        Function::Exp => x.exp(),
        Function::Factorial => factorial(x),
        Function::Floor => x.floor(),
        Function::Ln => x.ln(),
        Function::Log => x.log10(),
        Function::Power => f64::NAN,
        Function::Root => x.sqrt(),
        Function::Sec => 1.0 / x.cos(),
        Function::Sech => 1.0 / x.cosh(),
        Function::Sin => x.sin(),
        Function::Sinh => x.sinh(),
        Function::Tan => x.tan(),
        Function::Tanh => x.tanh(),
    }
}

/// Value of a two-argument named function: `log(base, x)`, `root(degree, x)`, `power(a, b)`.
pub fn apply_binary(f: Function, a: f64, b: f64) -> f64 {
    match f {
        Function::Log => b.ln() / a.ln(),
        Function::Root => root(a, b),
        Function::Power => a.powf(b),
        _ => f64::NAN,
    }
}

/// `degree`-th root of `radicand`. A negative radicand has a real root only for an odd
/// integer degree; any other negative radicand gives NaN.
pub fn root(degree: f64, radicand: f64) -> f64 {
    let odd_integer = degree.fract() == 0.0 && degree.abs() % 2.0 == 1.0;
    if radicand < 0.0 && odd_integer {
        -(-radicand).powf(1.0 / degree)
    } else {
        radicand.powf(1.0 / degree)
    }
}

/// Factorial of the floored argument, computed iteratively.
pub fn factorial(x: f64) -> f64 {
    let n = x.floor();
    if n.is_nan() || n < 0.0 {
        return f64::NAN;
    }
    if n > 170.0 {
        return f64::INFINITY;
    }
    let mut product = 1.0;
    let mut k = 2.0;
    while k <= n {
        product *= k;
        k += 1.0;
    }
    product
}

/// [`factorial`] that reports a non-integer argument.
pub(crate) fn checked_factorial(x: f64, diagnostics: &mut Diagnostics) -> f64 {
    if x.fract() != 0.0 {
        diagnostics.report(Condition::NonIntegerFactorial(x));
    }
    factorial(x)
}
