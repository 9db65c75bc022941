//! User-defined functions.
//!
//! Formulas may call functions that the model defines itself (`mm(S, Vmax, Km)`). The
//! interpreter and compiled code reach them through the [`UserFunctions`] capability,
//! which is handed to each evaluation inside an [`EvalContext`](crate::eval::EvalContext).
//! [`FunctionDefinitions`] is the stock implementation: a table of lambda expressions and
//! native Rust closures.

use std::collections::HashMap;

use crate::diagnostics::Diagnostics;
use crate::errors::TreeError;
use crate::eval::{evaluate_with, EvalContext};
use crate::expr::Expr;
use crate::resolve::resolve;

/// Evaluator for calls to user-defined functions.
pub trait UserFunctions: Send + Sync {
    /// Value of `name` applied to `args`, or `None` if no such function is defined.
    fn call(&self, name: &str, args: &[f64], time: f64, diagnostics: &mut Diagnostics)
        -> Option<f64>;
}

/// A function implemented in Rust.
pub type NativeFunction = Box<dyn Fn(&[f64]) -> f64 + Send + Sync>;

enum Definition {
    Lambda { params: Vec<String>, body: Expr },
    Native(NativeFunction),
}

/// Table of named function definitions.
#[derive(Default)]
pub struct FunctionDefinitions {
    definitions: HashMap<String, Definition>,
}

impl FunctionDefinitions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defines `name` by a lambda expression.
    ///
    /// The body is resolved against the parameter list, so argument `i` is read from
    /// slot `i` when the function is called.
    pub fn insert(&mut self, name: impl Into<String>, lambda: Expr) -> Result<(), TreeError> {
        let Expr::Lambda(params, body) = lambda else {
            return Err(TreeError::MalformedTree {
                kind: "function definition",
                expected: "a lambda",
                got: 0,
            });
        };
        let body = resolve(&body, &params);
        self.definitions
            .insert(name.into(), Definition::Lambda { params, body });
        Ok(())
    }

    /// Defines `name` by a Rust closure.
    pub fn insert_native<F>(&mut self, name: impl Into<String>, function: F)
    where
        F: Fn(&[f64]) -> f64 + Send + Sync + 'static,
    {
        self.definitions
            .insert(name.into(), Definition::Native(Box::new(function)));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl UserFunctions for FunctionDefinitions {
    fn call(
        &self,
        name: &str,
        args: &[f64],
        time: f64,
        diagnostics: &mut Diagnostics,
    ) -> Option<f64> {
        match self.definitions.get(name)? {
            Definition::Native(function) => Some(function(args)),
            Definition::Lambda { params, body } => {
                let mut ctx = EvalContext::new()
                    .with_names(params)
                    .with_functions(self)
                    .with_diagnostics(Diagnostics::with_limit(diagnostics.limit()));
                let value = evaluate_with(body, args, time, &mut ctx);
                diagnostics.absorb(ctx.take_diagnostics());
                Some(value)
            }
        }
    }
}

impl std::fmt::Debug for FunctionDefinitions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.definitions.keys().collect();
        names.sort();
        f.debug_struct("FunctionDefinitions")
            .field("names", &names)
            .finish()
    }
}
