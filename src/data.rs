//! Observed data sources.
//!
//! A variable named `<species>_data` is resolved to the slot of `<species>` and flagged as
//! an observed-data reference. During evaluation its value is asked from an
//! [`ObservedData`] source for the current simulation time instead of read from the live
//! value vector. [`TimeSeries`] is a table-backed source with discrete or linearly
//! interpolated lookup.

use std::collections::HashMap;

use crate::errors::ModelError;

/// Lookup failure: the series had `matches` entries for the requested time instead of one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataMismatch {
    pub matches: usize,
}

/// Source of externally supplied time-series values.
pub trait ObservedData: Send + Sync {
    /// Value of the series backing slot `index` at `time`.
    fn value(&self, index: usize, time: f64) -> Result<f64, DataMismatch>;
}

/// How a [`TimeSeries`] answers a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lookup {
    /// Exactly one sample must sit at the requested time.
    #[default]
    Discrete,
    /// Linear interpolation between samples, clamped at both ends.
    Linear,
}

/// Sampled observations sharing one time axis, one column per slot.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    times: Vec<f64>,
    columns: HashMap<usize, Vec<f64>>,
    lookup: Lookup,
    tolerance: f64,
}

impl TimeSeries {
    /// Default distance within which a sample counts as taken at the requested time.
    pub const DEFAULT_TOLERANCE: f64 = 1e-9;

    pub fn new(times: Vec<f64>, lookup: Lookup) -> Self {
        Self {
            times,
            columns: HashMap::new(),
            lookup,
            tolerance: Self::DEFAULT_TOLERANCE,
        }
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Adds the samples backing slot `index`. The column must match the time axis.
    pub fn with_column(mut self, index: usize, values: Vec<f64>) -> Result<Self, ModelError> {
        if values.len() != self.times.len() {
            return Err(ModelError::InvalidInputLength {
                expected: self.times.len(),
                got: values.len(),
            });
        }
        self.columns.insert(index, values);
        Ok(self)
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn lookup(&self) -> Lookup {
        self.lookup
    }

    fn discrete(&self, column: &[f64], time: f64) -> Result<f64, DataMismatch> {
        let mut hits = self
            .times
            .iter()
            .zip(column)
            .filter(|(t, _)| (**t - time).abs() <= self.tolerance);
        match (hits.next(), hits.count()) {
            (Some((_, value)), 0) => Ok(*value),
            (Some(_), rest) => Err(DataMismatch { matches: rest + 1 }),
            (None, _) => Err(DataMismatch { matches: 0 }),
        }
    }

    fn linear(&self, column: &[f64], time: f64) -> Result<f64, DataMismatch> {
        let (Some(first), Some(last)) = (self.times.first(), self.times.last()) else {
            return Err(DataMismatch { matches: 0 });
        };
        if time.is_nan() {
            return Err(DataMismatch { matches: 0 });
        }
        if time <= *first {
            return Ok(column[0]);
        }
        if time >= *last {
            return Ok(column[column.len() - 1]);
        }
        let upper = self.times.partition_point(|t| *t <= time);
        let lower = upper - 1;
        let (t0, t1) = (self.times[lower], self.times[upper]);
        let fraction = (time - t0) / (t1 - t0);
        Ok(column[lower] + fraction * (column[upper] - column[lower]))
    }
}

impl ObservedData for TimeSeries {
    fn value(&self, index: usize, time: f64) -> Result<f64, DataMismatch> {
        let column = self
            .columns
            .get(&index)
            .ok_or(DataMismatch { matches: 0 })?;
        match self.lookup {
            Lookup::Discrete => self.discrete(column, time),
            Lookup::Linear => self.linear(column, time),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Condition;
    use crate::eval::{evaluate_with, EvalContext};
    use crate::expr::Expr;
    use crate::resolve::resolve;
    use approx::assert_relative_eq;

    fn series(lookup: Lookup) -> TimeSeries {
        TimeSeries::new(vec![0.0, 1.0, 2.0, 2.0], lookup)
            .with_column(1, vec![10.0, 20.0, 30.0, 31.0])
            .unwrap()
    }

    #[test]
    fn test_discrete_lookup() {
        let data = series(Lookup::Discrete);
        assert_eq!(data.value(1, 1.0), Ok(20.0));
        assert_eq!(data.value(1, 0.5), Err(DataMismatch { matches: 0 }));
        assert_eq!(data.value(1, 2.0), Err(DataMismatch { matches: 2 }));
        assert_eq!(data.value(0, 1.0), Err(DataMismatch { matches: 0 }));
    }

    #[test]
    fn test_linear_lookup() {
        let data = TimeSeries::new(vec![0.0, 1.0, 3.0], Lookup::Linear)
            .with_column(0, vec![0.0, 2.0, 6.0])
            .unwrap();
        assert_relative_eq!(data.value(0, 0.5).unwrap(), 1.0);
        assert_relative_eq!(data.value(0, 2.0).unwrap(), 4.0);
        assert_relative_eq!(data.value(0, 1.0).unwrap(), 2.0);
        assert_relative_eq!(data.value(0, -1.0).unwrap(), 0.0);
        assert_relative_eq!(data.value(0, 9.0).unwrap(), 6.0);
    }

    #[test]
    fn test_linear_lookup_non_finite_time() {
        let data = TimeSeries::new(vec![0.0, 1.0], Lookup::Linear)
            .with_column(0, vec![3.0, 5.0])
            .unwrap();
        assert_eq!(data.value(0, f64::NAN), Err(DataMismatch { matches: 0 }));
        assert_eq!(data.value(0, f64::INFINITY), Ok(5.0));
        assert_eq!(data.value(0, f64::NEG_INFINITY), Ok(3.0));

        let tree = resolve(&Expr::var("S_data"), &["S"]);
        let mut ctx = EvalContext::new().with_data(&data);
        evaluate_with(&tree, &[1.0], f64::NAN, &mut ctx);
        assert!(ctx
            .diagnostics()
            .any(|c| matches!(c, Condition::DiscreteDataMismatch { matches: 0, .. })));
    }

    #[test]
    fn test_column_length_checked() {
        let result = TimeSeries::new(vec![0.0, 1.0], Lookup::Discrete).with_column(0, vec![1.0]);
        assert!(result.is_err());
    }

    #[test]
    fn test_observed_reference_in_formula() {
        let names = ["P", "S1"];
        let tree = resolve(&Expr::minus(Expr::var("S1"), Expr::var("S1_data")), &names);
        let data = series(Lookup::Discrete);

        let mut ctx = EvalContext::new().with_data(&data);
        assert_eq!(evaluate_with(&tree, &[0.0, 25.0], 1.0, &mut ctx), 5.0);
        assert!(ctx.diagnostics().is_empty());

        assert_eq!(evaluate_with(&tree, &[0.0, 25.0], 2.0, &mut ctx), 25.0);
        assert_eq!(
            ctx.diagnostics().conditions(),
            &[Condition::DiscreteDataMismatch {
                index: 1,
                time: 2.0,
                matches: 2
            }]
        );
    }
}
