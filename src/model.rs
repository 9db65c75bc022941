//! Kinetic models: right-hand sides and Jacobians of a system of rate formulas.
//!
//! A [`Model`] owns one formula per state variable together with the ordered name table
//! that defines the layout of the value vector (states, derived quantities, constants).
//! Formulas are resolved against the name table, simplified and compiled once; the
//! symbolic Jacobian `d f_i / d state_j` is derived and compiled alongside.
//!
//! # Example
//!
//! ```
//! use ratelaw_jit::model::Model;
//!
//! let names = ["S", "P", "k"];
//! let mut model = Model::from_strings(&["-k * S", "k * S"], &names, &["S", "P"]).unwrap();
//!
//! let rates = model.eval(&[2.0, 0.0, 0.5], 0.0).unwrap();
//! assert_eq!(rates, vec![-1.0, 1.0]);
//!
//! let jac: Vec<Vec<f64>> = model.jacobian(&[2.0, 0.0, 0.5], 0.0).unwrap();
//! assert_eq!(jac, vec![vec![-0.5, 0.0], vec![0.5, 0.0]]);
//! ```

use itertools::Itertools;
use log::{debug, warn};
use rayon::prelude::*;

use crate::backends::matrix::Matrix;
use crate::backends::vector::Vector;
use crate::compiled::{compile_with, CompiledFunction};
use crate::config::CompilerConfig;
use crate::convert::parse_formula;
use crate::data::ObservedData;
use crate::derive::differentiate;
use crate::diagnostics::Diagnostics;
use crate::errors::ModelError;
use crate::eval::EvalContext;
use crate::expr::Expr;
use crate::functions::FunctionDefinitions;
use crate::resolve::{indicator_vector, resolve};
use crate::simplify::simplify;

/// A system of rate formulas over a shared value vector.
pub struct Model {
    names: Vec<String>,
    states: Vec<String>,
    formulas: Vec<Expr>,
    jacobian: Vec<Vec<Expr>>,
    compiled: Vec<CompiledFunction>,
    compiled_jacobian: Vec<Vec<CompiledFunction>>,
    functions: FunctionDefinitions,
    data: Option<Box<dyn ObservedData>>,
    diagnostics: Diagnostics,
}

impl Model {
    /// Builds a model with the default compiler configuration.
    ///
    /// # Arguments
    /// * `formulas` - One unresolved formula per state, in state order
    /// * `names` - Layout of the value vector
    /// * `states` - State variables; each must appear in `names`
    ///
    /// # Errors
    /// Returns a ModelError if a state is missing from `names` or the number of formulas
    /// differs from the number of states.
    pub fn new<S: AsRef<str>>(
        formulas: Vec<Expr>,
        names: &[S],
        states: &[S],
    ) -> Result<Self, ModelError> {
        Self::with_config(formulas, names, states, &CompilerConfig::default())
    }

    /// Parses formula text and builds a model.
    pub fn from_strings<S: AsRef<str>>(
        formulas: &[S],
        names: &[S],
        states: &[S],
    ) -> Result<Self, ModelError> {
        let formulas = formulas
            .iter()
            .map(|text| parse_formula(text.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(formulas, names, states)
    }

    /// Builds a model whose formulas are compiled with `config`.
    pub fn with_config<S: AsRef<str>>(
        formulas: Vec<Expr>,
        names: &[S],
        states: &[S],
        config: &CompilerConfig,
    ) -> Result<Self, ModelError> {
        let names: Vec<String> = names.iter().map(|n| n.as_ref().to_string()).collect();
        let states: Vec<String> = states.iter().map(|s| s.as_ref().to_string()).collect();

        if formulas.len() != states.len() {
            return Err(ModelError::FormulaCount {
                states: states.len(),
                formulas: formulas.len(),
            });
        }
        if let Some(missing) = states.iter().find(|s| !names.contains(*s)) {
            return Err(ModelError::StateNotFound(missing.clone()));
        }

        let formulas: Vec<Expr> = formulas
            .par_iter()
            .map(|f| simplify(&resolve(f, &names)))
            .collect();

        let jacobian: Vec<Vec<Expr>> = formulas
            .par_iter()
            .map(|f| {
                states
                    .iter()
                    .map(|s| resolve(&differentiate(f, s), &names))
                    .collect()
            })
            .collect();

        let failed = jacobian.iter().flatten().filter(|e| e.contains_failure()).count();
        if failed > 0 {
            warn!("{failed} Jacobian entries could not be differentiated and evaluate to 0");
        }

        let compiled: Vec<CompiledFunction> = formulas
            .par_iter()
            .map(|f| compile_with(f, config))
            .collect();
        let compiled_jacobian: Vec<Vec<CompiledFunction>> = jacobian
            .par_iter()
            .map(|row| row.iter().map(|e| compile_with(e, config)).collect())
            .collect();

        debug!(
            "built model with {} states over [{}]",
            states.len(),
            names.iter().join(", ")
        );

        Ok(Model {
            names,
            states,
            formulas,
            jacobian,
            compiled,
            compiled_jacobian,
            functions: FunctionDefinitions::default(),
            data: None,
            diagnostics: Diagnostics::default(),
        })
    }

    /// Attaches the model's user-defined functions.
    pub fn with_functions(mut self, functions: FunctionDefinitions) -> Self {
        self.functions = functions;
        self
    }

    /// Attaches the source for `<name>_data` references.
    pub fn with_data(mut self, data: impl ObservedData + 'static) -> Self {
        self.data = Some(Box::new(data));
        self
    }

    fn validate_input_length(&self, values: &[f64]) -> Result<(), ModelError> {
        if values.len() != self.names.len() {
            return Err(ModelError::InvalidInputLength {
                expected: self.names.len(),
                got: values.len(),
            });
        }
        Ok(())
    }

    /// Evaluates all rate formulas into `out`.
    ///
    /// # Errors
    /// Returns a ModelError if `values` does not match the name table or `out` does not
    /// have one entry per state.
    pub fn eval_into<V: Vector>(
        &mut self,
        values: &[f64],
        time: f64,
        out: &mut V,
    ) -> Result<(), ModelError> {
        self.validate_input_length(values)?;
        if out.len() != self.compiled.len() {
            return Err(ModelError::InvalidOutputLength {
                expected: self.compiled.len(),
                got: out.len(),
            });
        }

        let mut ctx = context(
            &self.names,
            &self.functions,
            self.data.as_deref(),
            &mut self.diagnostics,
        );
        for (slot, f) in out.as_mut_slice().iter_mut().zip(&mut self.compiled) {
            *slot = f.call_with(values, time, &mut ctx);
        }
        self.diagnostics = ctx.take_diagnostics();
        Ok(())
    }

    /// Evaluates all rate formulas into a new vector.
    pub fn eval(&mut self, values: &[f64], time: f64) -> Result<Vec<f64>, ModelError> {
        let mut out = vec![0.0; self.compiled.len()];
        self.eval_into(values, time, &mut out)?;
        Ok(out)
    }

    /// Evaluates the Jacobian into `out`, which must be `states x states`.
    ///
    /// Entries that could not be differentiated evaluate to 0.0 and are reported.
    pub fn jacobian_into<M: Matrix>(
        &mut self,
        values: &[f64],
        time: f64,
        out: &mut M,
    ) -> Result<(), ModelError> {
        self.validate_input_length(values)?;
        let n = self.states.len();
        let (rows, cols) = out.dims();
        if (rows, cols) != (n, n) {
            return Err(ModelError::InvalidOutputLength {
                expected: n * n,
                got: rows * cols,
            });
        }

        let mut ctx = context(
            &self.names,
            &self.functions,
            self.data.as_deref(),
            &mut self.diagnostics,
        );
        for (i, row) in self.compiled_jacobian.iter_mut().enumerate() {
            for (j, f) in row.iter_mut().enumerate() {
                out.set(i, j, f.call_with(values, time, &mut ctx));
            }
        }
        self.diagnostics = ctx.take_diagnostics();
        Ok(())
    }

    /// Evaluates the Jacobian into a new matrix.
    pub fn jacobian<M: Matrix>(&mut self, values: &[f64], time: f64) -> Result<M, ModelError> {
        let n = self.states.len();
        let mut out = M::zeros(n, n);
        self.jacobian_into(values, time, &mut out)?;
        Ok(out)
    }

    /// True if every Jacobian entry could be differentiated.
    pub fn jacobian_is_valid(&self) -> bool {
        !self.jacobian.iter().flatten().any(Expr::contains_failure)
    }

    /// True if any formula contains a piecewise definition.
    pub fn is_discontinuous(&self) -> bool {
        self.formulas.iter().any(Expr::contains_piecewise)
    }

    /// True if any formula reads the simulation time.
    pub fn depends_on_time(&self) -> bool {
        self.formulas.iter().any(Expr::contains_time)
    }

    /// Which positions of the value vector any formula reads.
    pub fn indicator(&self) -> Vec<bool> {
        let n = self.names.len();
        self.formulas
            .iter()
            .map(|f| indicator_vector(f, n))
            .fold(vec![false; n], |mut acc, used| {
                for (a, u) in acc.iter_mut().zip(used) {
                    *a |= u;
                }
                acc
            })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn states(&self) -> &[String] {
        &self.states
    }

    /// Resolved and simplified formulas, one per state.
    pub fn formulas(&self) -> &[Expr] {
        &self.formulas
    }

    /// Symbolic Jacobian; entry `[i][j]` is the derivative of formula `i` by state `j`.
    pub fn jacobian_exprs(&self) -> &[Vec<Expr>] {
        &self.jacobian
    }

    /// Conditions reported since the last call to [`Model::take_diagnostics`].
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Diagnostics {
        std::mem::take(&mut self.diagnostics)
    }
}

fn context<'a>(
    names: &'a [String],
    functions: &'a FunctionDefinitions,
    data: Option<&'a dyn ObservedData>,
    diagnostics: &mut Diagnostics,
) -> EvalContext<'a> {
    let ctx = EvalContext::new()
        .with_names(names)
        .with_functions(functions)
        .with_diagnostics(std::mem::take(diagnostics));
    match data {
        Some(data) => ctx.with_data(data),
        None => ctx,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Lookup, TimeSeries};
    use crate::diagnostics::Condition;
    use approx::assert_relative_eq;

    fn michaelis_menten() -> Model {
        Model::from_strings(
            &["-vmax * S / (km + S)", "vmax * S / (km + S)"],
            &["S", "P", "vmax", "km"],
            &["S", "P"],
        )
        .unwrap()
    }

    #[test]
    fn test_eval() {
        let mut model = michaelis_menten();
        let values = [2.0, 0.0, 3.0, 1.0];
        let rates = model.eval(&values, 0.0).unwrap();
        assert_relative_eq!(rates[0], -2.0);
        assert_relative_eq!(rates[1], 2.0);

        let mut out = [0.0; 2];
        model.eval_into(&values, 0.0, &mut out).unwrap();
        assert_eq!(out.to_vec(), rates);
        assert!(model.diagnostics().is_empty());
    }

    #[test]
    fn test_jacobian() {
        let mut model = michaelis_menten();
        let values = [2.0, 0.0, 3.0, 1.0];
        let jac: Vec<Vec<f64>> = model.jacobian(&values, 0.0).unwrap();
        // d/dS (vmax S / (km + S)) = vmax km / (km + S)^2
        let d = 3.0 * 1.0 / 9.0;
        assert_relative_eq!(jac[0][0], -d, epsilon = 1e-12);
        assert_relative_eq!(jac[1][0], d, epsilon = 1e-12);
        assert_eq!(jac[0][1], 0.0);
        assert!(model.jacobian_is_valid());
        assert!(!model.is_discontinuous());
        assert!(!model.depends_on_time());
    }

    #[test]
    fn test_validation() {
        assert!(matches!(
            Model::from_strings(&["x"], &["x"], &["y"]),
            Err(ModelError::StateNotFound(_))
        ));
        assert!(matches!(
            Model::from_strings(&["x", "x"], &["x"], &["x"]),
            Err(ModelError::FormulaCount { states: 1, formulas: 2 })
        ));
        assert!(matches!(
            Model::from_strings(&["(x + 2"], &["x"], &["x"]),
            Err(ModelError::Convert(_))
        ));

        let mut model = michaelis_menten();
        assert!(matches!(
            model.eval(&[1.0], 0.0),
            Err(ModelError::InvalidInputLength { expected: 4, got: 1 })
        ));
        let mut out = vec![0.0; 3];
        assert!(matches!(
            model.eval_into(&[1.0; 4], 0.0, &mut out),
            Err(ModelError::InvalidOutputLength { expected: 2, got: 3 })
        ));
        let mut jac: Vec<Vec<f64>> = Matrix::zeros(3, 2);
        assert!(matches!(
            model.jacobian_into(&[1.0; 4], 0.0, &mut jac),
            Err(ModelError::InvalidOutputLength { .. })
        ));
        let mut ragged = vec![vec![0.0; 2], vec![0.0; 1]];
        assert!(matches!(
            model.jacobian_into(&[1.0; 4], 0.0, &mut ragged),
            Err(ModelError::InvalidOutputLength { expected: 4, got: 2 })
        ));
    }

    #[test]
    fn test_piecewise_model() {
        let mut model = Model::from_strings(
            &["piecewise(k, time < 10, 0)", "-x^2"],
            &["x", "k"],
            &["x", "k"],
        )
        .unwrap();
        assert!(model.is_discontinuous());
        assert!(model.depends_on_time());
        assert!(!model.jacobian_is_valid());
        assert_eq!(model.eval(&[2.0, 5.0], 1.0).unwrap(), vec![5.0, -4.0]);

        // d/dk of a piecewise cannot be differentiated: evaluates to 0 with a report.
        let jac: Vec<Vec<f64>> = model.jacobian(&[2.0, 5.0], 1.0).unwrap();
        assert_eq!(jac[0][1], 0.0);
        assert!(model
            .take_diagnostics()
            .any(|c| matches!(c, Condition::UnsupportedNode(_))));
        assert!(model.diagnostics().is_empty());
    }

    #[test]
    fn test_observed_data_and_functions() {
        let data = TimeSeries::new(vec![0.0, 1.0, 2.0], Lookup::Linear)
            .with_column(1, vec![0.0, 10.0, 20.0])
            .unwrap();
        let mut functions = FunctionDefinitions::new();
        functions
            .insert(
                "scale",
                Expr::lambda(["x"], parse_formula("x * 2").unwrap()),
            )
            .unwrap();
        let mut model = Model::from_strings(&["scale(I_data) - A"], &["A", "I"], &["A"])
            .unwrap()
            .with_data(data)
            .with_functions(functions);
        assert_relative_eq!(model.eval(&[1.0, 0.0], 1.5).unwrap()[0], 29.0);
        assert_eq!(model.indicator(), vec![true, true]);
    }
}
