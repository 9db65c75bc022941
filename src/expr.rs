//! Expression tree for rate-law formulas.
//!
//! Every formula handled by this crate (parsed from text, produced by the simplifier or
//! the differentiator) is an [`Expr`]. A tree is an owned value: each node owns its
//! children, children keep their order, and there is no sharing between trees. Passes
//! that rewrite a tree build a new one and leave their input untouched.
//!
//! Nodes whose arity is constrained (named functions, piecewise, relational and logical
//! operators) are built through checked constructors that return a [`TreeError`] for a
//! wrong child count, so later passes can rely on the shape of what they traverse.

use std::collections::BTreeSet;
use std::fmt;

use itertools::Itertools;

use crate::errors::TreeError;

/// Names that denote simulation time when they appear as a variable.
pub const TIME_NAMES: [&str; 3] = ["time", "Time", "TIME"];

/// Returns true if `name` is one of the reserved spellings of simulation time.
pub fn is_time_name(name: &str) -> bool {
    TIME_NAMES.contains(&name)
}

/// Slot metadata attached to a variable by the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Binding {
    /// Position of the value in the runtime value vector.
    pub index: usize,
    /// The value comes from an observed-data source rather than the live value vector.
    pub has_external_data: bool,
}

/// A reference to a named quantity: species, parameter, compartment size, ...
#[derive(Debug, Clone, PartialEq)]
pub struct VarRef {
    pub name: String,
    pub binding: Option<Binding>,
}

impl VarRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            binding: None,
        }
    }

    pub fn index(&self) -> Option<usize> {
        self.binding.map(|b| b.index)
    }

    pub fn is_resolved(&self) -> bool {
        self.binding.is_some()
    }
}

/// Closed set of named mathematical functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Function {
    Abs,
    ArcCos,
    ArcCosh,
    ArcCot,
    ArcCoth,
    ArcCsc,
    ArcCsch,
    ArcSec,
    ArcSech,
    ArcSin,
    ArcSinh,
    ArcTan,
    ArcTanh,
    Ceiling,
    Cos,
    Cosh,
    Cot,
    Coth,
    Csc,
    Csch,
    Exp,
    Factorial,
    Floor,
    Ln,
    Log,
    Power,
    Root,
    Sec,
    Sech,
    Sin,
    Sinh,
    Tan,
    Tanh,
}

impl Function {
    pub const ALL: [Function; 33] = [
        Function::Abs,
        Function::ArcCos,
        Function::ArcCosh,
        Function::ArcCot,
        Function::ArcCoth,
        Function::ArcCsc,
        Function::ArcCsch,
        Function::ArcSec,
        Function::ArcSech,
        Function::ArcSin,
        Function::ArcSinh,
        Function::ArcTan,
        Function::ArcTanh,
        Function::Ceiling,
        Function::Cos,
        Function::Cosh,
        Function::Cot,
        Function::Coth,
        Function::Csc,
        Function::Csch,
        Function::Exp,
        Function::Factorial,
        Function::Floor,
        Function::Ln,
        Function::Log,
        Function::Power,
        Function::Root,
        Function::Sec,
        Function::Sech,
        Function::Sin,
        Function::Sinh,
        Function::Tan,
        Function::Tanh,
    ];

    /// Canonical lower-case name, as written in formula text.
    pub fn name(self) -> &'static str {
        match self {
            Function::Abs => "abs",
            Function::ArcCos => "arccos",
            Function::ArcCosh => "arccosh",
            Function::ArcCot => "arccot",
            Function::ArcCoth => "arccoth",
            Function::ArcCsc => "arccsc",
            Function::ArcCsch => "arccsch",
            Function::ArcSec => "arcsec",
            Function::ArcSech => "arcsech",
            Function::ArcSin => "arcsin",
            Function::ArcSinh => "arcsinh",
            Function::ArcTan => "arctan",
            Function::ArcTanh => "arctanh",
            Function::Ceiling => "ceiling",
            Function::Cos => "cos",
            Function::Cosh => "cosh",
            Function::Cot => "cot",
            Function::Coth => "coth",
            Function::Csc => "csc",
            Function::Csch => "csch",
            Function::Exp => "exp",
            Function::Factorial => "factorial",
            Function::Floor => "floor",
            Function::Ln => "ln",
            Function::Log => "log",
            Function::Power => "power",
            Function::Root => "root",
            Function::Sec => "sec",
            Function::Sech => "sech",
            Function::Sin => "sin",
            Function::Sinh => "sinh",
            Function::Tan => "tan",
            Function::Tanh => "tanh",
        }
    }

    /// Looks a function up by its canonical name or a common alias.
    pub fn from_name(name: &str) -> Option<Function> {
        let function = match name {
            "acos" => Function::ArcCos,
            "acosh" => Function::ArcCosh,
            "asin" => Function::ArcSin,
            "asinh" => Function::ArcSinh,
            "atan" => Function::ArcTan,
            "atanh" => Function::ArcTanh,
            "ceil" => Function::Ceiling,
            "pow" => Function::Power,
            _ => return Function::ALL.iter().copied().find(|f| f.name() == name),
        };
        Some(function)
    }

    /// Inclusive bounds on the number of arguments.
    pub fn arity(self) -> (usize, usize) {
        match self {
            Function::Log | Function::Root => (1, 2),
            Function::Power => (2, 2),
            _ => (1, 1),
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// N-ary boolean connectives. Negation is the unary [`Expr::Not`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Logical {
    And,
    Or,
    Xor,
}

impl Logical {
    pub fn name(self) -> &'static str {
        match self {
            Logical::And => "and",
            Logical::Or => "or",
            Logical::Xor => "xor",
        }
    }
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relational {
    Eq,
    Neq,
    Lt,
    Leq,
    Gt,
    Geq,
}

impl Relational {
    pub fn name(self) -> &'static str {
        match self {
            Relational::Eq => "eq",
            Relational::Neq => "neq",
            Relational::Lt => "lt",
            Relational::Leq => "leq",
            Relational::Gt => "gt",
            Relational::Geq => "geq",
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Relational::Eq => "==",
            Relational::Neq => "!=",
            Relational::Lt => "<",
            Relational::Leq => "<=",
            Relational::Gt => ">",
            Relational::Geq => ">=",
        }
    }

    /// Applies the comparison to a pair of values.
    pub fn holds(self, a: f64, b: f64) -> bool {
        match self {
            Relational::Eq => a == b,
            Relational::Neq => a != b,
            Relational::Lt => a < b,
            Relational::Leq => a <= b,
            Relational::Gt => a > b,
            Relational::Geq => a >= b,
        }
    }
}

/// A node of a formula tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Integer literal
    Integer(i64),
    /// Real literal
    Real(f64),
    /// Named quantity, optionally bound to a slot
    Var(VarRef),
    /// Simulation time
    Time,
    /// Euler's number
    E,
    /// The circle constant
    Pi,
    True,
    False,
    /// Sum of any number of terms; the empty sum is 0
    Plus(Vec<Expr>),
    Neg(Box<Expr>),
    Minus(Box<Expr>, Box<Expr>),
    /// Product of any number of factors; the empty product is 1
    Times(Vec<Expr>),
    Divide(Box<Expr>, Box<Expr>),
    Power(Box<Expr>, Box<Expr>),
    /// Parameter names and body of a function definition
    Lambda(Vec<String>, Box<Expr>),
    /// Call of a user-defined function by name
    Call(String, Vec<Expr>),
    /// Named function application; arity is checked by [`Expr::func`]
    Func(Function, Vec<Expr>),
    /// `[value, condition]` pairs with an optional trailing default
    Piecewise(Vec<Expr>),
    Logical(Logical, Vec<Expr>),
    Not(Box<Expr>),
    /// Chained comparison: true if every consecutive pair satisfies the relation
    Relational(Relational, Vec<Expr>),
    /// Marks an unsupported construct met during differentiation
    Failed,
}

impl Expr {
    pub fn zero() -> Expr {
        Expr::Integer(0)
    }

    pub fn one() -> Expr {
        Expr::Integer(1)
    }

    pub fn int(value: i64) -> Expr {
        Expr::Integer(value)
    }

    pub fn real(value: f64) -> Expr {
        Expr::Real(value)
    }

    /// An unresolved variable.
    pub fn var(name: impl Into<String>) -> Expr {
        Expr::Var(VarRef::new(name))
    }

    /// A variable already bound to `index`.
    pub fn bound(name: impl Into<String>, index: usize) -> Expr {
        Expr::Var(VarRef {
            name: name.into(),
            binding: Some(Binding {
                index,
                has_external_data: false,
            }),
        })
    }

    pub fn neg(arg: Expr) -> Expr {
        Expr::Neg(Box::new(arg))
    }

    pub fn minus(lhs: Expr, rhs: Expr) -> Expr {
        Expr::Minus(Box::new(lhs), Box::new(rhs))
    }

    pub fn divide(lhs: Expr, rhs: Expr) -> Expr {
        Expr::Divide(Box::new(lhs), Box::new(rhs))
    }

    pub fn power(base: Expr, exponent: Expr) -> Expr {
        Expr::Power(Box::new(base), Box::new(exponent))
    }

    pub fn not(arg: Expr) -> Expr {
        Expr::Not(Box::new(arg))
    }

    pub fn lambda<S: Into<String>>(params: impl IntoIterator<Item = S>, body: Expr) -> Expr {
        Expr::Lambda(params.into_iter().map(Into::into).collect(), Box::new(body))
    }

    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Expr {
        Expr::Call(name.into(), args)
    }

    /// Applies a named function, checking its argument count.
    pub fn func(function: Function, args: Vec<Expr>) -> Result<Expr, TreeError> {
        let (min, max) = function.arity();
        if args.len() < min || args.len() > max {
            let expected = match (min, max) {
                (1, 1) => "1",
                (2, 2) => "2",
                _ => "1 or 2",
            };
            return Err(TreeError::MalformedTree {
                kind: function.name(),
                expected,
                got: args.len(),
            });
        }
        Ok(Expr::Func(function, args))
    }

    /// Applies a single-argument function.
    ///
    /// Only for tags whose arity admits one argument; the caller guarantees this.
    pub(crate) fn apply(function: Function, arg: Expr) -> Expr {
        debug_assert!(function.arity().0 == 1);
        Expr::Func(function, vec![arg])
    }

    pub fn piecewise(children: Vec<Expr>) -> Result<Expr, TreeError> {
        if children.is_empty() {
            return Err(TreeError::MalformedTree {
                kind: "piecewise",
                expected: "at least 1",
                got: 0,
            });
        }
        Ok(Expr::Piecewise(children))
    }

    pub fn logical(op: Logical, children: Vec<Expr>) -> Result<Expr, TreeError> {
        if children.is_empty() {
            return Err(TreeError::MalformedTree {
                kind: op.name(),
                expected: "at least 1",
                got: 0,
            });
        }
        Ok(Expr::Logical(op, children))
    }

    pub fn relational(op: Relational, children: Vec<Expr>) -> Result<Expr, TreeError> {
        let valid = match op {
            Relational::Neq => children.len() == 2,
            _ => !children.is_empty(),
        };
        if !valid {
            let expected = if op == Relational::Neq { "2" } else { "at least 1" };
            return Err(TreeError::MalformedTree {
                kind: op.name(),
                expected,
                got: children.len(),
            });
        }
        Ok(Expr::Relational(op, children))
    }

    /// Short name of the node kind, used in messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Expr::Integer(_) => "integer",
            Expr::Real(_) => "real",
            Expr::Var(_) => "variable",
            Expr::Time => "time",
            Expr::E => "exponentiale",
            Expr::Pi => "pi",
            Expr::True => "true",
            Expr::False => "false",
            Expr::Plus(_) => "plus",
            Expr::Neg(_) => "negation",
            Expr::Minus(_, _) => "minus",
            Expr::Times(_) => "times",
            Expr::Divide(_, _) => "divide",
            Expr::Power(_, _) => "power",
            Expr::Lambda(_, _) => "lambda",
            Expr::Call(_, _) => "call",
            Expr::Func(f, _) => f.name(),
            Expr::Piecewise(_) => "piecewise",
            Expr::Logical(op, _) => op.name(),
            Expr::Not(_) => "not",
            Expr::Relational(op, _) => op.name(),
            Expr::Failed => "differentiation-failed",
        }
    }

    /// Direct children in order.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Integer(_)
            | Expr::Real(_)
            | Expr::Var(_)
            | Expr::Time
            | Expr::E
            | Expr::Pi
            | Expr::True
            | Expr::False
            | Expr::Failed => Vec::new(),
            Expr::Neg(a) | Expr::Not(a) | Expr::Lambda(_, a) => vec![a],
            Expr::Minus(a, b) | Expr::Divide(a, b) | Expr::Power(a, b) => vec![a, b],
            Expr::Plus(c)
            | Expr::Times(c)
            | Expr::Call(_, c)
            | Expr::Func(_, c)
            | Expr::Piecewise(c)
            | Expr::Logical(_, c)
            | Expr::Relational(_, c) => c.iter().collect(),
        }
    }

    /// Returns true if `predicate` holds for this node or any descendant.
    pub fn any<F: Fn(&Expr) -> bool + Copy>(&self, predicate: F) -> bool {
        predicate(self) || self.children().into_iter().any(|c| c.any(predicate))
    }

    /// Number of nodes in the tree.
    pub fn node_count(&self) -> usize {
        1 + self
            .children()
            .into_iter()
            .map(Expr::node_count)
            .sum::<usize>()
    }

    /// Literal integer or real zero.
    pub fn is_zero(&self) -> bool {
        match self {
            Expr::Integer(v) => *v == 0,
            Expr::Real(v) => *v == 0.0,
            _ => false,
        }
    }

    /// Literal integer or real one.
    pub fn is_one(&self) -> bool {
        match self {
            Expr::Integer(v) => *v == 1,
            Expr::Real(v) => *v == 1.0,
            _ => false,
        }
    }

    /// Numeric value of a constant leaf, if this node is one.
    pub fn as_constant(&self) -> Option<f64> {
        match self {
            Expr::Integer(v) => Some(*v as f64),
            Expr::Real(v) => Some(*v),
            Expr::E => Some(std::f64::consts::E),
            Expr::Pi => Some(std::f64::consts::PI),
            Expr::True => Some(1.0),
            Expr::False => Some(0.0),
            _ => None,
        }
    }

    /// Names of all variables in the tree, including time spellings.
    pub fn free_variables(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.collect_variables(&mut names);
        names
    }

    fn collect_variables(&self, names: &mut BTreeSet<String>) {
        if let Expr::Var(v) = self {
            names.insert(v.name.clone());
        }
        for child in self.children() {
            child.collect_variables(names);
        }
    }

    /// Returns true if the tree mentions `name` as a variable or as a called function.
    pub fn depends_on(&self, name: &str) -> bool {
        match self {
            Expr::Var(v) => v.name == name,
            Expr::Call(f, args) => f == name || args.iter().any(|a| a.depends_on(name)),
            _ => self.children().into_iter().any(|c| c.depends_on(name)),
        }
    }

    /// Returns true if the tree reads simulation time.
    pub fn contains_time(&self) -> bool {
        self.any(|e| match e {
            Expr::Time => true,
            Expr::Var(v) => v.binding.is_none() && is_time_name(&v.name),
            _ => false,
        })
    }

    /// Returns true if the tree contains a piecewise node, i.e. may be discontinuous.
    pub fn contains_piecewise(&self) -> bool {
        self.any(|e| matches!(e, Expr::Piecewise(_)))
    }

    /// Returns true if differentiation failed somewhere in this tree.
    pub fn contains_failure(&self) -> bool {
        self.any(|e| matches!(e, Expr::Failed))
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::Real(value)
    }
}

impl From<i64> for Expr {
    fn from(value: i64) -> Self {
        Expr::Integer(value)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Integer(v) => write!(f, "{v}"),
            Expr::Real(v) => write!(f, "{v:?}"),
            Expr::Var(v) => f.write_str(&v.name),
            Expr::Time => f.write_str("time"),
            Expr::E => f.write_str("exponentiale"),
            Expr::Pi => f.write_str("pi"),
            Expr::True => f.write_str("true"),
            Expr::False => f.write_str("false"),
            Expr::Plus(c) if c.is_empty() => f.write_str("0"),
            Expr::Plus(c) => write!(f, "({})", c.iter().join(" + ")),
            Expr::Neg(a) => write!(f, "-{a}"),
            Expr::Minus(a, b) => write!(f, "({a} - {b})"),
            Expr::Times(c) if c.is_empty() => f.write_str("1"),
            Expr::Times(c) => write!(f, "({})", c.iter().join(" * ")),
            Expr::Divide(a, b) => write!(f, "({a} / {b})"),
            Expr::Power(a, b) => write!(f, "({a}^{b})"),
            Expr::Lambda(params, body) => write!(f, "lambda({}: {body})", params.join(", ")),
            Expr::Call(name, args) => write!(f, "{name}({})", args.iter().join(", ")),
            Expr::Func(func, args) => write!(f, "{func}({})", args.iter().join(", ")),
            Expr::Piecewise(c) => write!(f, "piecewise({})", c.iter().join(", ")),
            Expr::Logical(Logical::And, c) => write!(f, "({})", c.iter().join(" && ")),
            Expr::Logical(Logical::Or, c) => write!(f, "({})", c.iter().join(" || ")),
            Expr::Logical(Logical::Xor, c) => write!(f, "xor({})", c.iter().join(", ")),
            Expr::Not(a) => write!(f, "!{a}"),
            Expr::Relational(op, c) => {
                let sep = format!(" {} ", op.symbol());
                write!(f, "({})", c.iter().join(&sep))
            }
            Expr::Failed => f.write_str("<differentiation failed>"),
        }
    }
}
