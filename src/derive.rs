//! Symbolic differentiation.
//!
//! [`differentiate`] builds the raw derivative of a tree with respect to a named variable
//! and passes it through the simplifier. Subtrees that do not mention the variable are
//! replaced by a literal 0 without being visited, so differentiating a wide model by one
//! state only touches the terms that depend on it.
//!
//! Constructs without a derivative (lambdas, piecewise, factorial, logical and relational
//! operators) produce [`Expr::Failed`]. If the marker appears anywhere in the raw result
//! the whole derivative is the marker; callers check [`Expr::contains_failure`] or
//! compare against `Expr::Failed` before using it.

use crate::expr::{Expr, Function, Relational};
use crate::simplify::simplify;

/// Derivative of `expr` with respect to `var`, simplified.
pub fn differentiate(expr: &Expr, var: &str) -> Expr {
    if !expr.depends_on(var) {
        return Expr::zero();
    }
    let raw = derive(expr, var);
    if raw.contains_failure() {
        return Expr::Failed;
    }
    simplify(&raw)
}

impl Expr {
    /// Method form of [`differentiate`].
    pub fn derivative(&self, var: &str) -> Expr {
        differentiate(self, var)
    }
}

fn add(a: Expr, b: Expr) -> Expr {
    Expr::Plus(vec![a, b])
}

fn sub(a: Expr, b: Expr) -> Expr {
    Expr::minus(a, b)
}

fn mul(a: Expr, b: Expr) -> Expr {
    Expr::Times(vec![a, b])
}

fn div(a: Expr, b: Expr) -> Expr {
    Expr::divide(a, b)
}

fn square(u: &Expr) -> Expr {
    Expr::power(u.clone(), Expr::int(2))
}

fn sqrt(u: Expr) -> Expr {
    Expr::apply(Function::Root, u)
}

fn ln(u: Expr) -> Expr {
    Expr::apply(Function::Ln, u)
}

fn call(f: Function, u: &Expr) -> Expr {
    Expr::apply(f, u.clone())
}

/// `b - 1`, folded when `b` is a literal.
fn decrement(b: &Expr) -> Expr {
    match b {
        Expr::Integer(v) => Expr::Integer(v - 1),
        Expr::Real(v) => Expr::Real(v - 1.0),
        _ => sub(b.clone(), Expr::one()),
    }
}

fn derive(expr: &Expr, var: &str) -> Expr {
    if !expr.depends_on(var) {
        return Expr::zero();
    }
    match expr {
        Expr::Var(v) => {
            let external = v.binding.is_some_and(|b| b.has_external_data);
            if v.name == var && !external {
                Expr::one()
            } else {
                Expr::zero()
            }
        }
        Expr::Plus(children) => Expr::Plus(children.iter().map(|c| derive(c, var)).collect()),
        Expr::Minus(a, b) => sub(derive(a, var), derive(b, var)),
        Expr::Neg(a) => Expr::neg(derive(a, var)),
        Expr::Times(children) => derive_product(children, var),
        Expr::Divide(a, b) => {
            // a'/b - a/b^2 * b'
            let left = div(derive(a, var), (**b).clone());
            let right = mul(div((**a).clone(), square(b)), derive(b, var));
            sub(left, right)
        }
        Expr::Power(a, b) => derive_power(a, b, var),
        Expr::Call(name, args) => derive_call(name, args, var),
        Expr::Func(f, args) => derive_function(*f, args, var),
        Expr::Lambda(_, _)
        | Expr::Piecewise(_)
        | Expr::Logical(_, _)
        | Expr::Not(_)
        | Expr::Relational(_, _)
        | Expr::Failed => Expr::Failed,
        Expr::Integer(_)
        | Expr::Real(_)
        | Expr::Time
        | Expr::E
        | Expr::Pi
        | Expr::True
        | Expr::False => Expr::zero(),
    }
}

/// Product rule over a right-leaning chain of factors.
fn derive_product(children: &[Expr], var: &str) -> Expr {
    match children {
        [] => Expr::zero(),
        [only] => derive(only, var),
        [a, rest @ ..] => {
            let b = if rest.len() == 1 {
                rest[0].clone()
            } else {
                Expr::Times(rest.to_vec())
            };
            let db = derive_product(rest, var);
            add(mul(derive(a, var), b.clone()), mul(a.clone(), db))
        }
    }
}

fn derive_power(a: &Expr, b: &Expr, var: &str) -> Expr {
    let f = Expr::power(a.clone(), b.clone());
    match (a.depends_on(var), b.depends_on(var)) {
        (_, false) => {
            // b * a^(b-1) * a'
            let scaled = mul(b.clone(), Expr::power(a.clone(), decrement(b)));
            mul(scaled, derive(a, var))
        }
        (false, true) => {
            // f * ln(a) * b'
            mul(mul(f, ln(a.clone())), derive(b, var))
        }
        (true, true) => {
            // f * (b/a * a' + ln(a) * b')
            let base_term = mul(div(b.clone(), a.clone()), derive(a, var));
            let exp_term = mul(ln(a.clone()), derive(b, var));
            mul(f, add(base_term, exp_term))
        }
    }
}

fn derive_call(name: &str, args: &[Expr], var: &str) -> Expr {
    if name == var {
        return Expr::call(format!("d_{name}"), args.to_vec());
    }
    let terms: Vec<Expr> = args
        .iter()
        .enumerate()
        .filter(|(_, arg)| arg.depends_on(var))
        .map(|(i, arg)| {
            let partial = Expr::call(format!("d{}_{name}", i + 1), args.to_vec());
            mul(partial, derive(arg, var))
        })
        .collect();
    Expr::Plus(terms)
}

fn derive_function(f: Function, args: &[Expr], var: &str) -> Expr {
    match (f, args) {
        (Function::Power, [a, b]) => return derive_power(a, b, var),
        (Function::Log, [base, u]) => {
            let rewritten = div(ln(u.clone()), ln(base.clone()));
            return derive(&rewritten, var);
        }
        (Function::Root, [degree, u]) => {
            let rewritten = Expr::power(u.clone(), div(Expr::one(), degree.clone()));
            return derive(&rewritten, var);
        }
        _ => {}
    }
    let [u] = args else {
        return Expr::Failed;
    };
    let du = derive(u, var);
    let one = Expr::one;
    let outer = match f {
        Function::Abs => Expr::Piecewise(vec![
            Expr::int(-1),
            Expr::Relational(Relational::Lt, vec![u.clone(), Expr::zero()]),
            Expr::one(),
            Expr::Relational(Relational::Gt, vec![u.clone(), Expr::zero()]),
            Expr::zero(),
        ]),
        // -1/sqrt(1 - u^2)
        Function::ArcCos => Expr::neg(div(one(), sqrt(sub(one(), square(u))))),
        // 1/sqrt(u^2 - 1)
        Function::ArcCosh => div(one(), sqrt(sub(square(u), one()))),
        // -1/(1 + u^2)
        Function::ArcCot => Expr::neg(div(one(), add(one(), square(u)))),
        // 1/(1 - u^2)
        Function::ArcCoth => div(one(), sub(one(), square(u))),
        // -1/(u^2 sqrt(1 - 1/u^2))
        Function::ArcCsc => Expr::neg(div(
            one(),
            mul(square(u), sqrt(sub(one(), div(one(), square(u))))),
        )),
        // -1/(u^2 sqrt(1 + 1/u^2))
        Function::ArcCsch => Expr::neg(div(
            one(),
            mul(square(u), sqrt(add(one(), div(one(), square(u))))),
        )),
        // 1/(u^2 sqrt(1 - 1/u^2))
        Function::ArcSec => div(
            one(),
            mul(square(u), sqrt(sub(one(), div(one(), square(u))))),
        ),
        // -1/(u sqrt(1 - u^2))
        Function::ArcSech => Expr::neg(div(one(), mul(u.clone(), sqrt(sub(one(), square(u)))))),
        // 1/sqrt(1 - u^2)
        Function::ArcSin => div(one(), sqrt(sub(one(), square(u)))),
        // 1/sqrt(u^2 + 1)
        Function::ArcSinh => div(one(), sqrt(add(square(u), one()))),
        // 1/(1 + u^2)
        Function::ArcTan => div(one(), add(one(), square(u))),
        // 1/(1 - u^2)
        Function::ArcTanh => div(one(), sub(one(), square(u))),
        Function::Ceiling | Function::Floor => Expr::zero(),
        Function::Cos => Expr::neg(call(Function::Sin, u)),
        Function::Cosh => call(Function::Sinh, u),
        // -1/sin^2
        Function::Cot => Expr::neg(div(one(), square(&call(Function::Sin, u)))),
        // -1/sinh^2
        Function::Coth => Expr::neg(div(one(), square(&call(Function::Sinh, u)))),
        // -csc * cot
        Function::Csc => Expr::neg(mul(call(Function::Csc, u), call(Function::Cot, u))),
        // -csch * coth
        Function::Csch => Expr::neg(mul(call(Function::Csch, u), call(Function::Coth, u))),
        Function::Exp => call(Function::Exp, u),
        Function::Ln => div(one(), u.clone()),
        // log10: 1/(u ln 10)
        Function::Log => div(one(), mul(u.clone(), ln(Expr::int(10)))),
        // sqrt: 1/(2 sqrt(u))
        Function::Root => div(one(), mul(Expr::int(2), sqrt(u.clone()))),
        Function::Sec => mul(call(Function::Sec, u), call(Function::Tan, u)),
        // -sech * tanh
        Function::Sech => Expr::neg(mul(call(Function::Sech, u), call(Function::Tanh, u))),
        Function::Sin => call(Function::Cos, u),
        Function::Sinh => call(Function::Cosh, u),
        // 1/cos^2
        Function::Tan => div(one(), square(&call(Function::Cos, u))),
        // 1/cosh^2
        Function::Tanh => div(one(), square(&call(Function::Cosh, u))),
        Function::Factorial | Function::Power => Expr::Failed,
    };
    mul(outer, du)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::evaluate;
    use crate::resolve::resolve;
    use approx::assert_relative_eq;

    fn x() -> Expr {
        Expr::var("x")
    }

    /// Checks the symbolic derivative against a centered difference at `at`.
    fn check_derivative(expr: &Expr, at: f64) {
        let names = ["x", "y"];
        let resolved = resolve(expr, &names);
        let derivative = differentiate(&resolved, "x");
        assert!(!derivative.contains_failure(), "failed on {expr}");

        let h = 1e-6;
        let f = |v: f64| evaluate(&resolved, &[v, 0.7], 0.0);
        let numeric = (f(at + h) - f(at - h)) / (2.0 * h);
        let symbolic = evaluate(&derivative, &[at, 0.7], 0.0);
        assert_relative_eq!(symbolic, numeric, epsilon = 1e-5, max_relative = 1e-5);
    }

    #[test]
    fn test_quotient_of_variables() {
        let e = Expr::divide(x(), Expr::var("y"));
        assert_eq!(
            differentiate(&e, "x"),
            Expr::divide(Expr::one(), Expr::var("y"))
        );
    }

    #[test]
    fn test_independent_is_zero_without_recursion() {
        let e = Expr::Piecewise(vec![
            Expr::var("y"),
            Expr::Relational(Relational::Gt, vec![Expr::var("y"), Expr::zero()]),
        ]);
        assert_eq!(differentiate(&e, "x"), Expr::zero());
    }

    #[test]
    fn test_unsupported_nodes_fail() {
        let piecewise = Expr::Piecewise(vec![
            x(),
            Expr::Relational(Relational::Gt, vec![x(), Expr::zero()]),
        ]);
        assert_eq!(differentiate(&piecewise, "x"), Expr::Failed);

        let factorial = Expr::Plus(vec![
            Expr::apply(Function::Factorial, x()),
            Expr::var("y"),
        ]);
        assert_eq!(differentiate(&factorial, "x"), Expr::Failed);
    }

    #[test]
    fn test_observed_reference_is_constant() {
        let e = Expr::Times(vec![x(), x()]);
        let resolved = resolve(&e, &["x"]);
        let mut observed = resolved.clone();
        if let Expr::Times(children) = &mut observed {
            if let Expr::Var(v) = &mut children[1] {
                v.binding = v.binding.map(|mut b| {
                    b.has_external_data = true;
                    b
                });
            }
        }
        assert_eq!(differentiate(&observed, "x"), observed_factor(&observed));
    }

    fn observed_factor(e: &Expr) -> Expr {
        match e {
            Expr::Times(children) => children[1].clone(),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_user_function_calls() {
        let e = Expr::call("f", vec![x(), Expr::var("y")]);
        assert_eq!(
            differentiate(&e, "f"),
            Expr::call("d_f", vec![x(), Expr::var("y")])
        );
        assert_eq!(
            differentiate(&e, "x"),
            Expr::call("d1_f", vec![x(), Expr::var("y")])
        );
        let g = Expr::call("g", vec![x(), Expr::Times(vec![Expr::int(3), x()])]);
        assert_eq!(
            differentiate(&g, "x"),
            Expr::Plus(vec![
                Expr::call("d1_g", g.children().into_iter().cloned().collect()),
                Expr::Times(vec![
                    Expr::call("d2_g", g.children().into_iter().cloned().collect()),
                    Expr::int(3),
                ]),
            ])
        );
    }

    #[test]
    fn test_polynomials_and_products() {
        let y = Expr::var("y");
        check_derivative(&Expr::power(x(), Expr::int(3)), 1.3);
        check_derivative(
            &Expr::Times(vec![x(), y.clone(), Expr::apply(Function::Sin, x())]),
            0.4,
        );
        check_derivative(
            &Expr::divide(Expr::Plus(vec![x(), Expr::one()]), Expr::Plus(vec![x(), y])),
            0.9,
        );
    }

    #[test]
    fn test_powers() {
        check_derivative(&Expr::power(Expr::var("y"), x()), 1.1);
        check_derivative(&Expr::power(x(), x()), 1.1);
        check_derivative(&Expr::power(x(), Expr::Real(2.5)), 1.7);
        check_derivative(
            &Expr::func(Function::Power, vec![x(), Expr::var("y")]).unwrap(),
            2.1,
        );
        check_derivative(
            &Expr::func(Function::Root, vec![Expr::int(3), x()]).unwrap(),
            2.1,
        );
        check_derivative(
            &Expr::func(Function::Log, vec![Expr::int(2), x()]).unwrap(),
            2.1,
        );
    }

    #[test]
    fn test_every_function() {
        let points = [
            (Function::Abs, -0.8),
            (Function::ArcCos, 0.3),
            (Function::ArcCosh, 1.7),
            (Function::ArcCot, 0.6),
            (Function::ArcCoth, 1.9),
            (Function::ArcCsc, 1.8),
            (Function::ArcCsch, 0.7),
            (Function::ArcSec, 1.6),
            (Function::ArcSech, 0.4),
            (Function::ArcSin, -0.2),
            (Function::ArcSinh, 0.8),
            (Function::ArcTan, 1.2),
            (Function::ArcTanh, 0.3),
            (Function::Ceiling, 0.4),
            (Function::Cos, 0.9),
            (Function::Cosh, 0.9),
            (Function::Cot, 0.9),
            (Function::Coth, 0.9),
            (Function::Csc, 0.9),
            (Function::Csch, 0.9),
            (Function::Exp, 0.5),
            (Function::Floor, 0.4),
            (Function::Ln, 1.5),
            (Function::Log, 1.5),
            (Function::Root, 1.5),
            (Function::Sec, 0.5),
            (Function::Sech, 0.5),
            (Function::Sin, 0.5),
            (Function::Sinh, 0.5),
            (Function::Tan, 0.5),
            (Function::Tanh, 0.5),
        ];
        for (f, at) in points {
            let inner = Expr::Times(vec![Expr::int(2), x()]);
            check_derivative(&Expr::apply(f, inner), at / 2.0);
        }
    }

    #[test]
    fn test_result_is_fresh_and_simplified() {
        let e = Expr::Plus(vec![Expr::Times(vec![Expr::int(4), x()]), Expr::var("y")]);
        let d = differentiate(&e, "x");
        assert_eq!(d, Expr::int(4));
        assert_eq!(simplify(&d), d);
    }
}
