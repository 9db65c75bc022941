//! Binding of variable names to slots in the runtime value vector.
//!
//! Resolution walks a tree once against an ordered name list. A variable whose name is at
//! position `i` is bound to slot `i`. A variable named `<stem>_data`, where `<stem>` is in
//! the list, is an observed-data reference: it is bound to the stem's slot and flagged so
//! evaluation asks the observed-data source. Time spellings are never bound.

use std::collections::{BTreeSet, HashMap};

use crate::expr::{is_time_name, Binding, Expr, VarRef};

/// Suffix marking a variable that reads observed data for the stem name.
pub const OBSERVED_SUFFIX: &str = "_data";

/// Returns a copy of `expr` with every variable bound against `names`.
///
/// Bindings are derived from scratch: a variable that was bound before but is not in
/// `names` comes back unbound. Parameters of a lambda shadow the name list inside its body.
pub fn resolve<S: AsRef<str>>(expr: &Expr, names: &[S]) -> Expr {
    let mut table: HashMap<&str, usize> = HashMap::with_capacity(names.len());
    for (i, name) in names.iter().enumerate() {
        table.entry(name.as_ref()).or_insert(i);
    }
    let mut out = expr.clone();
    bind(&mut out, &table, &[]);
    out
}

fn lookup(name: &str, table: &HashMap<&str, usize>) -> Option<Binding> {
    if is_time_name(name) {
        return None;
    }
    if let Some(&index) = table.get(name) {
        return Some(Binding {
            index,
            has_external_data: false,
        });
    }
    let stem = name.strip_suffix(OBSERVED_SUFFIX)?;
    table.get(stem).map(|&index| Binding {
        index,
        has_external_data: true,
    })
}

fn bind(expr: &mut Expr, table: &HashMap<&str, usize>, shadowed: &[String]) {
    match expr {
        Expr::Var(VarRef { name, binding }) => {
            *binding = if shadowed.contains(name) {
                None
            } else {
                lookup(name, table)
            };
        }
        Expr::Lambda(params, body) => {
            let mut inner = shadowed.to_vec();
            inner.extend(params.iter().cloned());
            bind(body, table, &inner);
        }
        Expr::Neg(a) | Expr::Not(a) => bind(a, table, shadowed),
        Expr::Minus(a, b) | Expr::Divide(a, b) | Expr::Power(a, b) => {
            bind(a, table, shadowed);
            bind(b, table, shadowed);
        }
        Expr::Plus(c)
        | Expr::Times(c)
        | Expr::Call(_, c)
        | Expr::Func(_, c)
        | Expr::Piecewise(c)
        | Expr::Logical(_, c)
        | Expr::Relational(_, c) => {
            for child in c.iter_mut() {
                bind(child, table, shadowed);
            }
        }
        Expr::Integer(_)
        | Expr::Real(_)
        | Expr::Time
        | Expr::E
        | Expr::Pi
        | Expr::True
        | Expr::False
        | Expr::Failed => {}
    }
}

/// Set of slot indices referenced by bound variables.
pub fn collect_bound_indices(expr: &Expr) -> BTreeSet<usize> {
    let mut indices = BTreeSet::new();
    collect(expr, &mut indices);
    indices
}

fn collect(expr: &Expr, indices: &mut BTreeSet<usize>) {
    if let Expr::Var(v) = expr {
        if let Some(index) = v.index() {
            indices.insert(index);
        }
    }
    for child in expr.children() {
        collect(child, indices);
    }
}

/// Boolean mask of length `n` marking the slots the tree reads.
///
/// Indices at or past `n` are ignored.
pub fn indicator_vector(expr: &Expr, n: usize) -> Vec<bool> {
    let mut mask = vec![false; n];
    for index in collect_bound_indices(expr) {
        if let Some(flag) = mask.get_mut(index) {
            *flag = true;
        }
    }
    mask
}

/// Highest bound slot index in the tree.
pub fn max_bound_index(expr: &Expr) -> Option<usize> {
    collect_bound_indices(expr).last().copied()
}

impl Expr {
    /// Method form of [`resolve`].
    pub fn resolve<S: AsRef<str>>(&self, names: &[S]) -> Expr {
        resolve(self, names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Relational;

    fn binding_of<'a>(expr: &'a Expr, name: &str) -> Option<&'a Option<Binding>> {
        match expr {
            Expr::Var(v) if v.name == name => Some(&v.binding),
            _ => expr.children().into_iter().find_map(|c| binding_of(c, name)),
        }
    }

    #[test]
    fn test_binds_by_position() {
        let e = Expr::Times(vec![Expr::var("k1"), Expr::var("S"), Expr::var("E")]);
        let names = ["S", "E", "k1"];
        let resolved = resolve(&e, &names);

        assert_eq!(binding_of(&resolved, "S").unwrap().unwrap().index, 0);
        assert_eq!(binding_of(&resolved, "E").unwrap().unwrap().index, 1);
        assert_eq!(binding_of(&resolved, "k1").unwrap().unwrap().index, 2);
        assert_eq!(collect_bound_indices(&resolved).len(), 3);
    }

    #[test]
    fn test_unknown_and_time_stay_unbound() {
        let e = Expr::Plus(vec![Expr::var("k9"), Expr::var("time"), Expr::var("TIME")]);
        let resolved = resolve(&e, &["time", "x"]);
        assert!(resolved.children().iter().all(|c| match c {
            Expr::Var(v) => v.binding.is_none(),
            _ => false,
        }));
    }

    #[test]
    fn test_observed_suffix() {
        let e = Expr::minus(Expr::var("S1"), Expr::var("S1_data"));
        let resolved = resolve(&e, &["P", "S1"]);
        let observed = binding_of(&resolved, "S1_data").unwrap().unwrap();
        assert_eq!(observed.index, 1);
        assert!(observed.has_external_data);
        let live = binding_of(&resolved, "S1").unwrap().unwrap();
        assert!(!live.has_external_data);

        // No stem in the list, no binding.
        let orphan = resolve(&Expr::var("Q_data"), &["P"]);
        assert_eq!(orphan, Expr::var("Q_data"));
    }

    #[test]
    fn test_reresolve_drops_stale_bindings() {
        let e = Expr::Plus(vec![Expr::var("a"), Expr::var("b")]);
        let first = resolve(&e, &["a", "b"]);
        let second = resolve(&first, &["b"]);
        assert_eq!(*binding_of(&second, "a").unwrap(), None);
        assert_eq!(binding_of(&second, "b").unwrap().unwrap().index, 0);
    }

    #[test]
    fn test_lambda_params_shadow() {
        let e = Expr::lambda(["x"], Expr::Times(vec![Expr::var("x"), Expr::var("k")]));
        let resolved = resolve(&e, &["x", "k"]);
        assert_eq!(*binding_of(&resolved, "x").unwrap(), None);
        assert_eq!(binding_of(&resolved, "k").unwrap().unwrap().index, 1);
    }

    #[test]
    fn test_indicator_vector() {
        let e = Expr::Relational(
            Relational::Lt,
            vec![Expr::var("c"), Expr::var("a"), Expr::int(3)],
        );
        let resolved = resolve(&e, &["a", "b", "c"]);
        assert_eq!(indicator_vector(&resolved, 3), vec![true, false, true]);
        assert_eq!(indicator_vector(&resolved, 1), vec![true]);
        assert_eq!(max_bound_index(&resolved), Some(2));
    }

    #[test]
    fn test_duplicate_names_bind_first() {
        let resolved = resolve(&Expr::var("x"), &["x", "x"]);
        assert_eq!(resolved, Expr::bound("x", 0));
    }
}
