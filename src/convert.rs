//! Conversion module for transforming evalexpr AST nodes into formula trees.
//!
//! Formula text is parsed with evalexpr's operator-tree builder and mapped onto
//! [`Expr`]. The result is unresolved: every identifier becomes a named variable
//! reference and has to go through [`resolve`](crate::resolve::resolve) before it
//! can be evaluated by slot.
//!
//! The main entry points are `parse_formula` for text and `build_expr` for an
//! already-built evalexpr tree.

use evalexpr::{build_operator_tree, DefaultNumericTypes, Node, Operator, Value};

use crate::{
    errors::ConvertError,
    expr::{Expr, Function, Logical, Relational},
};

/// Parses infix formula text into an unresolved tree.
///
/// # Examples
/// ```
/// use ratelaw_jit::convert::parse_formula;
///
/// let expr = parse_formula("k1 * S / (Km + S)").unwrap();
/// assert!(expr.depends_on("Km"));
/// ```
///
/// # Errors
/// Returns a ConvertError if the text does not parse or uses an operator without a
/// counterpart in the tree (assignments, strings, modulo).
pub fn parse_formula(text: &str) -> Result<Expr, ConvertError> {
    let node = build_operator_tree::<DefaultNumericTypes>(text)?;
    build_expr(&node)
}

/// Converts an evalexpr AST node into a formula tree.
///
/// # Supported operations
/// * Arithmetic: `+`, `-`, `*`, `/`, `^` and unary minus
/// * Comparisons: `==`, `!=`, `<`, `<=`, `>`, `>=`
/// * Logic: `&&`, `||`, `!`
/// * Constants: numbers, `true`, `false`, `pi`, `exponentiale`
/// * Named functions such as `sin`, `arccosh`, `log`, `root`, `pow`, plus `sqrt`
/// * `piecewise`, `and`, `or`, `xor` and `not` calls
/// * Any other call becomes a user function call
pub fn build_expr(node: &Node) -> Result<Expr, ConvertError> {
    let children = node.children();
    match node.operator() {
        Operator::RootNode => match children {
            [single] => build_expr(single),
            _ => Err(ConvertError::RootNode(children.len())),
        },
        Operator::Add => Ok(Expr::Plus(build_all(children)?)),
        Operator::Mul => Ok(Expr::Times(build_all(children)?)),
        Operator::Sub => {
            let (lhs, rhs) = build_pair(children)?;
            Ok(Expr::minus(lhs, rhs))
        }
        Operator::Div => {
            let (lhs, rhs) = build_pair(children)?;
            Ok(Expr::divide(lhs, rhs))
        }
        Operator::Exp => {
            let (base, exponent) = build_pair(children)?;
            Ok(Expr::power(base, exponent))
        }
        Operator::Neg => Ok(Expr::neg(build_single(children)?)),
        Operator::Not => Ok(Expr::not(build_single(children)?)),
        Operator::And => Ok(Expr::logical(Logical::And, build_all(children)?)?),
        Operator::Or => Ok(Expr::logical(Logical::Or, build_all(children)?)?),
        Operator::Eq => relational(Relational::Eq, children),
        Operator::Neq => relational(Relational::Neq, children),
        Operator::Lt => relational(Relational::Lt, children),
        Operator::Leq => relational(Relational::Leq, children),
        Operator::Gt => relational(Relational::Gt, children),
        Operator::Geq => relational(Relational::Geq, children),
        Operator::Const { value } => match value {
            Value::Float(f) => Ok(Expr::Real(*f)),
            Value::Int(i) => Ok(Expr::Integer(*i)),
            Value::Boolean(true) => Ok(Expr::True),
            Value::Boolean(false) => Ok(Expr::False),
            other => Err(ConvertError::ConstOperator(format!("{other:?}"))),
        },
        Operator::VariableIdentifierRead { identifier } => Ok(match identifier.as_str() {
            "pi" => Expr::Pi,
            "exponentiale" => Expr::E,
            "true" => Expr::True,
            "false" => Expr::False,
            name => Expr::var(name),
        }),
        Operator::FunctionIdentifier { identifier } => {
            let args = call_arguments(children)?;
            call(identifier, args)
        }
        other => Err(ConvertError::UnsupportedOperator(format!("{other:?}"))),
    }
}

fn build_all(children: &[Node]) -> Result<Vec<Expr>, ConvertError> {
    children.iter().map(build_expr).collect()
}

fn build_single(children: &[Node]) -> Result<Expr, ConvertError> {
    match children {
        [child] => build_expr(child),
        _ => Err(ConvertError::RootNode(children.len())),
    }
}

fn build_pair(children: &[Node]) -> Result<(Expr, Expr), ConvertError> {
    match children {
        [lhs, rhs] => Ok((build_expr(lhs)?, build_expr(rhs)?)),
        _ => Err(ConvertError::UnsupportedOperator(format!(
            "binary operator with {} operands",
            children.len()
        ))),
    }
}

fn relational(op: Relational, children: &[Node]) -> Result<Expr, ConvertError> {
    Ok(Expr::relational(op, build_all(children)?)?)
}

/// Flattens the argument list of a call: `f(a, b)` is a function node over a tuple.
fn call_arguments(children: &[Node]) -> Result<Vec<Expr>, ConvertError> {
    let mut node = match children {
        [] => return Ok(Vec::new()),
        [single] => single,
        _ => return build_all(children),
    };
    loop {
        match (node.operator(), node.children()) {
            (Operator::RootNode, []) => return Ok(Vec::new()),
            (Operator::RootNode, [inner]) => node = inner,
            (Operator::Tuple, items) => return build_all(items),
            _ => return Ok(vec![build_expr(node)?]),
        }
    }
}

fn call(name: &str, args: Vec<Expr>) -> Result<Expr, ConvertError> {
    let expr = match name {
        "piecewise" => Expr::piecewise(args)?,
        "and" => Expr::logical(Logical::And, args)?,
        "or" => Expr::logical(Logical::Or, args)?,
        "xor" => Expr::logical(Logical::Xor, args)?,
        "not" => match <[Expr; 1]>::try_from(args) {
            Ok([arg]) => Expr::not(arg),
            Err(args) => {
                return Err(crate::errors::TreeError::MalformedTree {
                    kind: "not",
                    expected: "1 child",
                    got: args.len(),
                }
                .into())
            }
        },
        "sqrt" => Expr::func(Function::Root, args)?,
        _ => match Function::from_name(name) {
            Some(function) => Expr::func(function, args)?,
            None => Expr::call(name, args),
        },
    };
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TreeError;
    use crate::eval::evaluate;
    use crate::resolve::resolve;

    fn eval_text(text: &str, names: &[&str], values: &[f64]) -> f64 {
        let expr = parse_formula(text).unwrap();
        evaluate(&resolve(&expr, names), values, 0.0)
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval_text("2*x + y^2", &["x", "y"], &[1.0, 2.0]), 6.0);
        assert_eq!(eval_text("-(a - b) / 4", &["a", "b"], &[1.0, 9.0]), 2.0);
        assert_eq!(eval_text("1 + 2 + 3", &[], &[]), 6.0);
    }

    #[test]
    fn test_constants_and_functions() {
        let e = parse_formula("pi + exponentiale").unwrap();
        assert_eq!(e, Expr::Plus(vec![Expr::Pi, Expr::E]));
        assert!((eval_text("log(2, 8)", &[], &[]) - 3.0).abs() < 1e-12);
        assert_eq!(eval_text("root(3, -8)", &[], &[]), -2.0);
        assert_eq!(eval_text("sqrt(16)", &[], &[]), 4.0);
        assert_eq!(eval_text("pow(2, 10)", &[], &[]), 1024.0);
        assert!((eval_text("arccosh(x)", &["x"], &[1.0])).abs() < 1e-12);
    }

    #[test]
    fn test_logic_and_piecewise() {
        let text = "piecewise(1, x < 0, 2, x == 0, 3)";
        assert_eq!(eval_text(text, &["x"], &[-5.0]), 1.0);
        assert_eq!(eval_text(text, &["x"], &[0.0]), 2.0);
        assert_eq!(eval_text(text, &["x"], &[7.0]), 3.0);
        assert_eq!(eval_text("xor(true, false)", &[], &[]), 1.0);
        assert_eq!(eval_text("x > 1 && !(x > 3)", &["x"], &[2.0]), 1.0);
    }

    #[test]
    fn test_user_calls() {
        let e = parse_formula("f(x, 2) + g()").unwrap();
        assert_eq!(
            e,
            Expr::Plus(vec![
                Expr::call("f", vec![Expr::var("x"), Expr::int(2)]),
                Expr::call("g", vec![]),
            ])
        );
        assert!(e.depends_on("g"));
    }

    #[test]
    fn test_errors() {
        assert!(matches!(parse_formula("(x + 1"), Err(ConvertError::Parse(_))));
        assert!(matches!(
            parse_formula("x % 2"),
            Err(ConvertError::UnsupportedOperator(_))
        ));
        assert!(matches!(
            parse_formula("sin(1, 2)"),
            Err(ConvertError::Tree(TreeError::MalformedTree { .. }))
        ));
    }
}
