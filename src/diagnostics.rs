//! Conditions reported while evaluating formulas.
//!
//! Evaluation never aborts a simulation. When the interpreter or a compiled function
//! meets a condition it cannot fully honour (a name without a value, a piecewise with
//! no true branch, ...) it records a [`Condition`] in a [`Diagnostics`] sink, logs it
//! with `log::warn!`, and carries on with a substitute value.

use colored::Colorize;
use log::warn;
use thiserror::Error;

/// A non-fatal condition met during evaluation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Condition {
    /// A variable or function name had no value and evaluated to 0.0
    #[error("no value found for `{0}`, substituting 0")]
    UnresolvedName(String),
    /// Observed data had zero or several entries for the requested time
    #[error("observed data for slot {index} has {matches} entries at time {time}, substituting 0")]
    DiscreteDataMismatch {
        index: usize,
        time: f64,
        matches: usize,
    },
    /// A piecewise had no true branch (and no default) or more than one true branch
    #[error("piecewise has {true_branches} true branches where exactly one was expected")]
    PiecewiseBranchAmbiguous { true_branches: usize },
    /// Factorial of a non-integer argument; the floored value was used
    #[error("factorial of non-integer {0}, using floor")]
    NonIntegerFactorial(f64),
    /// A node that has no numeric value was evaluated
    #[error("cannot evaluate {0} node, substituting 0")]
    UnsupportedNode(&'static str),
}

/// Bounded sink for evaluation conditions.
///
/// Only the first `limit` conditions are kept; later ones are counted as suppressed
/// so that a long integration run cannot grow the sink without bound.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostics {
    conditions: Vec<Condition>,
    suppressed: usize,
    limit: usize,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::with_limit(Self::DEFAULT_LIMIT)
    }
}

impl Diagnostics {
    /// Number of conditions kept by [`Diagnostics::default`].
    pub const DEFAULT_LIMIT: usize = 256;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            conditions: Vec::new(),
            suppressed: 0,
            limit,
        }
    }

    /// Records a condition and logs it.
    pub fn report(&mut self, condition: Condition) {
        warn!("{condition}");
        if self.conditions.len() < self.limit {
            self.conditions.push(condition);
        } else {
            self.suppressed += 1;
        }
    }

    /// Moves all conditions of `other` into this sink.
    pub fn absorb(&mut self, other: Diagnostics) {
        for condition in other.conditions {
            if self.conditions.len() < self.limit {
                self.conditions.push(condition);
            } else {
                self.suppressed += 1;
            }
        }
        self.suppressed += other.suppressed;
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Number of conditions dropped after the limit was reached.
    pub fn suppressed(&self) -> usize {
        self.suppressed
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty() && self.suppressed == 0
    }

    /// Total number of reported conditions, kept or suppressed.
    pub fn len(&self) -> usize {
        self.conditions.len() + self.suppressed
    }

    pub fn clear(&mut self) {
        self.conditions.clear();
        self.suppressed = 0;
    }

    /// Returns true if any kept condition satisfies the predicate.
    pub fn any<F: Fn(&Condition) -> bool>(&self, predicate: F) -> bool {
        self.conditions.iter().any(predicate)
    }
}

impl std::fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for condition in &self.conditions {
            writeln!(f, "{}: {condition}", "warning".yellow())?;
        }
        if self.suppressed > 0 {
            writeln!(f, "{}: {} more suppressed", "warning".yellow(), self.suppressed)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_counts_suppressed() {
        let mut diagnostics = Diagnostics::with_limit(2);
        for _ in 0..5 {
            diagnostics.report(Condition::UnsupportedNode("lambda"));
        }
        assert_eq!(diagnostics.conditions().len(), 2);
        assert_eq!(diagnostics.suppressed(), 3);
        assert_eq!(diagnostics.len(), 5);

        diagnostics.clear();
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_absorb() {
        let mut outer = Diagnostics::new();
        let mut inner = Diagnostics::new();
        inner.report(Condition::NonIntegerFactorial(2.5));
        outer.absorb(inner);
        assert!(outer.any(|c| matches!(c, Condition::NonIntegerFactorial(_))));
    }

    #[test]
    fn test_display() {
        let mut diagnostics = Diagnostics::new();
        diagnostics.report(Condition::UnresolvedName("k1".to_string()));
        let text = format!("{diagnostics}");
        assert!(text.contains("k1"));
    }
}
