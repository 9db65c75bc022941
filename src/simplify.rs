//! Algebraic simplification of expression trees.
//!
//! [`simplify`] rebuilds a tree bottom-up through a small set of smart constructors
//! ([`plus`], [`minus`], [`times`], [`divide`], [`power`], [`negate`]). Each constructor
//! removes neutral and absorbing literals and pushes unary minus outward through the four
//! arithmetic operators. Sums and products leave the simplifier strictly binary.
//!
//! Identity checks only look at integer and real literal leaves; a subtree that happens
//! to evaluate to zero is not detected.

use crate::expr::Expr;

/// Returns an algebraically reduced copy of `expr`.
pub fn simplify(expr: &Expr) -> Expr {
    match expr {
        Expr::Plus(children) => fold_nary(children, Expr::zero(), plus, Expr::Plus),
        Expr::Times(children) => fold_nary(children, Expr::one(), times, Expr::Times),
        Expr::Neg(a) => negate(simplify(a)),
        Expr::Minus(a, b) => minus(simplify(a), simplify(b)),
        Expr::Divide(a, b) => divide(simplify(a), simplify(b)),
        Expr::Power(a, b) => power(simplify(a), simplify(b)),
        Expr::Not(a) => Expr::Not(Box::new(simplify(a))),
        Expr::Lambda(params, body) => Expr::Lambda(params.clone(), Box::new(simplify(body))),
        Expr::Call(name, args) => Expr::Call(name.clone(), simplify_all(args)),
        Expr::Func(f, args) => Expr::Func(*f, simplify_all(args)),
        Expr::Piecewise(children) => Expr::Piecewise(simplify_all(children)),
        Expr::Logical(op, children) => Expr::Logical(*op, simplify_all(children)),
        Expr::Relational(op, children) => Expr::Relational(*op, simplify_all(children)),
        Expr::Integer(_)
        | Expr::Real(_)
        | Expr::Var(_)
        | Expr::Time
        | Expr::E
        | Expr::Pi
        | Expr::True
        | Expr::False
        | Expr::Failed => expr.clone(),
    }
}

fn simplify_all(children: &[Expr]) -> Vec<Expr> {
    children.iter().map(simplify).collect()
}

/// Collapses an n-ary sum or product into a right-leaning binary chain.
fn fold_nary(
    children: &[Expr],
    identity: Expr,
    combine: fn(Expr, Expr) -> Expr,
    rebuild: fn(Vec<Expr>) -> Expr,
) -> Expr {
    match children {
        [] => identity,
        [only] => simplify(only),
        [a, b] => combine(simplify(a), simplify(b)),
        [first, rest @ ..] => combine(simplify(first), simplify(&rebuild(rest.to_vec()))),
    }
}

fn split_neg(e: Expr) -> Result<Expr, Expr> {
    match e {
        Expr::Neg(inner) => Ok(*inner),
        other => Err(other),
    }
}

/// Negation with double-minus cancellation.
pub fn negate(a: Expr) -> Expr {
    match a {
        Expr::Neg(inner) => *inner,
        other => Expr::Neg(Box::new(other)),
    }
}

/// Binary sum of two simplified operands.
pub fn plus(a: Expr, b: Expr) -> Expr {
    if a.is_zero() {
        return b;
    }
    if b.is_zero() {
        return a;
    }
    match (split_neg(a), split_neg(b)) {
        // (-a) + (-b) -> -(a + b)
        (Ok(a), Ok(b)) => negate(plus(a, b)),
        // (-a) + b -> b - a
        (Ok(a), Err(b)) => minus(b, a),
        // a + (-b) -> a - b
        (Err(a), Ok(b)) => minus(a, b),
        (Err(a), Err(b)) => Expr::Plus(vec![a, b]),
    }
}

/// Difference of two simplified operands.
pub fn minus(a: Expr, b: Expr) -> Expr {
    if b.is_zero() {
        return a;
    }
    if a.is_zero() {
        return negate(b);
    }
    match (split_neg(a), split_neg(b)) {
        // (-a) - (-b) -> b - a
        (Ok(a), Ok(b)) => minus(b, a),
        // (-a) - b -> -(a + b)
        (Ok(a), Err(b)) => negate(plus(a, b)),
        // a - (-b) -> a + b
        (Err(a), Ok(b)) => plus(a, b),
        (Err(a), Err(b)) => Expr::minus(a, b),
    }
}

/// Binary product of two simplified operands.
pub fn times(a: Expr, b: Expr) -> Expr {
    if a.is_zero() || b.is_zero() {
        return Expr::zero();
    }
    if a.is_one() {
        return b;
    }
    if b.is_one() {
        return a;
    }
    match (split_neg(a), split_neg(b)) {
        // (-a) * (-b) -> a * b
        (Ok(a), Ok(b)) => times(a, b),
        // (-a) * b -> -(a * b)
        (Ok(a), Err(b)) => negate(times(a, b)),
        // a * (-b) -> -(a * b)
        (Err(a), Ok(b)) => negate(times(a, b)),
        (Err(a), Err(b)) => Expr::Times(vec![a, b]),
    }
}

/// Quotient of two simplified operands.
pub fn divide(a: Expr, b: Expr) -> Expr {
    if a.is_zero() {
        return Expr::zero();
    }
    if b.is_one() {
        return a;
    }
    match (split_neg(a), split_neg(b)) {
        // (-a) / (-b) -> a / b
        (Ok(a), Ok(b)) => divide(a, b),
        // (-a) / b -> -(a / b)
        (Ok(a), Err(b)) => negate(divide(a, b)),
        // a / (-b) -> -(a / b)
        (Err(a), Ok(b)) => negate(divide(a, b)),
        (Err(a), Err(b)) => Expr::divide(a, b),
    }
}

/// Power of two simplified operands.
pub fn power(base: Expr, exponent: Expr) -> Expr {
    // x^0 wins over 0^x
    if exponent.is_zero() {
        return Expr::one();
    }
    if exponent.is_one() {
        return base;
    }
    if base.is_zero() {
        return Expr::zero();
    }
    if base.is_one() {
        return Expr::one();
    }
    Expr::power(base, exponent)
}

impl Expr {
    /// Method form of [`simplify`].
    pub fn simplify(&self) -> Expr {
        simplify(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{Function, Relational};

    fn x() -> Expr {
        Expr::var("x")
    }

    fn y() -> Expr {
        Expr::var("y")
    }

    fn neg(e: Expr) -> Expr {
        Expr::neg(e)
    }

    #[test]
    fn test_negated_product_in_unary_sum() {
        let e = Expr::Plus(vec![Expr::Times(vec![neg(x()), neg(y())])]);
        assert_eq!(simplify(&e), Expr::Times(vec![x(), y()]));
    }

    #[test]
    fn test_nary_collapse() {
        assert_eq!(simplify(&Expr::Plus(vec![])), Expr::zero());
        assert_eq!(simplify(&Expr::Times(vec![])), Expr::one());
        assert_eq!(simplify(&Expr::Times(vec![x()])), x());

        let e = Expr::Plus(vec![x(), y(), Expr::var("z")]);
        assert_eq!(
            simplify(&e),
            Expr::Plus(vec![x(), Expr::Plus(vec![y(), Expr::var("z")])])
        );
    }

    #[test]
    fn test_nary_collapse_simplifies_each_side() {
        let e = Expr::Times(vec![Expr::one(), x(), Expr::one(), y()]);
        assert_eq!(simplify(&e), Expr::Times(vec![x(), y()]));
    }

    #[test]
    fn test_identities() {
        let cases = vec![
            (Expr::Plus(vec![x(), Expr::zero()]), x()),
            (Expr::Plus(vec![Expr::Real(0.0), x()]), x()),
            (Expr::minus(x(), Expr::zero()), x()),
            (Expr::minus(Expr::zero(), x()), neg(x())),
            (Expr::Times(vec![x(), Expr::zero()]), Expr::zero()),
            (Expr::Times(vec![Expr::zero(), x()]), Expr::zero()),
            (Expr::Times(vec![x(), Expr::one()]), x()),
            (Expr::Times(vec![Expr::Real(1.0), x()]), x()),
            (Expr::divide(Expr::zero(), x()), Expr::zero()),
            (Expr::divide(x(), Expr::one()), x()),
            (Expr::power(x(), Expr::zero()), Expr::one()),
            (Expr::power(x(), Expr::one()), x()),
            (Expr::power(Expr::zero(), x()), Expr::zero()),
            (Expr::power(Expr::one(), x()), Expr::one()),
            (Expr::power(Expr::zero(), Expr::zero()), Expr::one()),
        ];
        for (input, expected) in cases {
            assert_eq!(simplify(&input), expected, "simplifying {input}");
        }
    }

    #[test]
    fn test_plus_sign_rules() {
        assert_eq!(
            simplify(&Expr::Plus(vec![neg(x()), neg(y())])),
            neg(Expr::Plus(vec![x(), y()]))
        );
        assert_eq!(
            simplify(&Expr::Plus(vec![neg(x()), y()])),
            Expr::minus(y(), x())
        );
        assert_eq!(
            simplify(&Expr::Plus(vec![x(), neg(y())])),
            Expr::minus(x(), y())
        );
    }

    #[test]
    fn test_minus_sign_rules() {
        assert_eq!(simplify(&Expr::minus(neg(x()), neg(y()))), Expr::minus(y(), x()));
        assert_eq!(
            simplify(&Expr::minus(neg(x()), y())),
            neg(Expr::Plus(vec![x(), y()]))
        );
        assert_eq!(
            simplify(&Expr::minus(x(), neg(y()))),
            Expr::Plus(vec![x(), y()])
        );
    }

    #[test]
    fn test_times_sign_rules() {
        assert_eq!(
            simplify(&Expr::Times(vec![neg(x()), neg(y())])),
            Expr::Times(vec![x(), y()])
        );
        assert_eq!(
            simplify(&Expr::Times(vec![neg(x()), y()])),
            neg(Expr::Times(vec![x(), y()]))
        );
        assert_eq!(
            simplify(&Expr::Times(vec![x(), neg(y())])),
            neg(Expr::Times(vec![x(), y()]))
        );
    }

    #[test]
    fn test_divide_sign_rules() {
        assert_eq!(simplify(&Expr::divide(neg(x()), neg(y()))), Expr::divide(x(), y()));
        assert_eq!(
            simplify(&Expr::divide(neg(x()), y())),
            neg(Expr::divide(x(), y()))
        );
        assert_eq!(
            simplify(&Expr::divide(x(), neg(y()))),
            neg(Expr::divide(x(), y()))
        );
    }

    #[test]
    fn test_double_negation() {
        assert_eq!(simplify(&neg(neg(x()))), x());
        assert_eq!(simplify(&neg(neg(neg(x())))), neg(x()));
    }

    #[test]
    fn test_bindings_survive() {
        let e = Expr::Plus(vec![Expr::bound("S", 3), Expr::zero()]);
        assert_eq!(simplify(&e), Expr::bound("S", 3));
    }

    #[test]
    fn test_other_nodes_keep_shape() {
        let e = Expr::Piecewise(vec![
            Expr::Times(vec![x(), Expr::one()]),
            Expr::Relational(Relational::Lt, vec![Expr::Plus(vec![x()]), Expr::zero()]),
        ]);
        assert_eq!(
            simplify(&e),
            Expr::Piecewise(vec![
                x(),
                Expr::Relational(Relational::Lt, vec![x(), Expr::zero()]),
            ])
        );
        let f = Expr::Func(Function::Sin, vec![neg(neg(x()))]);
        assert_eq!(simplify(&f), Expr::Func(Function::Sin, vec![x()]));
    }

    #[test]
    fn test_idempotent() {
        let trees = vec![
            Expr::Plus(vec![neg(x()), neg(y()), Expr::var("z"), Expr::zero()]),
            Expr::minus(neg(Expr::Times(vec![x(), neg(y())])), neg(neg(y()))),
            Expr::divide(
                neg(Expr::Plus(vec![x(), neg(y())])),
                neg(Expr::power(x(), Expr::one())),
            ),
            Expr::Times(vec![neg(x()), neg(y()), neg(Expr::var("z"))]),
        ];
        for tree in trees {
            let once = simplify(&tree);
            assert_eq!(simplify(&once), once, "simplifying {tree}");
        }
    }

    #[test]
    fn test_output_is_binary() {
        fn binary(e: &Expr) -> bool {
            let own = match e {
                Expr::Plus(c) | Expr::Times(c) => c.len() == 2,
                _ => true,
            };
            own && e.children().into_iter().all(binary)
        }
        let e = Expr::Plus(vec![
            Expr::Times(vec![x(), y(), x(), y()]),
            x(),
            y(),
            Expr::Times(vec![]),
        ]);
        assert!(binary(&simplify(&e)));
    }
}
