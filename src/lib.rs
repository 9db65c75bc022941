//! Symbolic formula engine for kinetic simulations.
//!
//! This crate holds the rate laws of a biochemical model as expression trees and provides
//! everything a numeric integrator needs from them: algebraic simplification, symbolic
//! differentiation for Jacobians, binding of variable names to positions in a value
//! vector, a total tree-walking interpreter, and compilation to native code with
//! [Cranelift](https://github.com/bytecodealliance/wasmtime/tree/main/cranelift).
//! Formula text can be read with the [evalexpr](https://github.com/ISibboI/evalexpr)
//! parser.
//!
//! # Features
//!
//! - Simplification with sign normalisation and binary canonical form
//! - Symbolic differentiation of every supported function, with an explicit marker
//!   for what cannot be differentiated
//! - Evaluation that never aborts: problems are reported as diagnostics
//! - Native compilation with a bounded work stack and spilling, falling back to the
//!   interpreter where no backend exists
//!
//! # Example
//!
//! ```rust
//! use ratelaw_jit::prelude::*;
//!
//! let names = ["S", "vmax", "km"];
//! let rate = parse_formula("vmax * S / (km + S)").unwrap().resolve(&names);
//!
//! let values = [1.0, 2.0, 1.0];
//! assert_eq!(evaluate(&rate, &values, 0.0), 1.0);
//!
//! let mut compiled = compile(&rate);
//! assert_eq!(compiled.call(&values, 0.0), 1.0);
//!
//! // d/dS = vmax km / (km + S)^2
//! let slope = differentiate(&rate, "S");
//! assert_eq!(evaluate(&slope, &values, 0.0), 0.5);
//! ```

pub use compiled::{compile, compile_with, CompiledFunction};
pub use expr::Expr;
pub use model::Model;

pub mod prelude {
    pub use crate::backends::{matrix::Matrix, vector::Vector};
    pub use crate::compiled::{compile, compile_with, CompiledFunction};
    pub use crate::config::{Backend, CompilerConfig, OptimizationLevel};
    pub use crate::convert::parse_formula;
    pub use crate::derive::differentiate;
    pub use crate::diagnostics::{Condition, Diagnostics};
    pub use crate::eval::{evaluate, evaluate_with, EvalContext};
    pub use crate::expr::{Expr, Function, Logical, Relational};
    pub use crate::model::Model;
    pub use crate::resolve::{indicator_vector, resolve};
    pub use crate::simplify::simplify;
}

/// Size and stack analysis of formulas before code generation
pub mod analysis;
/// Buffer types accepted for values and Jacobians
pub mod backends {
    pub mod matrix;
    pub mod vector;
}
/// Native code generation using Cranelift
pub mod builder;
/// Compiled formulas and backend selection
pub mod compiled;
/// Compiler configuration
pub mod config;
/// Conversion from parsed formula text to expression trees
pub mod convert;
/// Observed time-series data
pub mod data;
/// Symbolic differentiation
pub mod derive;
/// Non-fatal conditions reported during evaluation
pub mod diagnostics;
/// Error types for the various failure modes
pub mod errors;
/// Tree-walking interpreter
pub mod eval;
/// Expression tree representation
pub mod expr;
/// User-defined functions
pub mod functions;
/// Systems of rate formulas
pub mod model;
/// Stack programs: the code-generation pass of the compiler
pub mod program;
/// Binding of variable names to value-vector slots
pub mod resolve;
/// Algebraic simplification
pub mod simplify;
/// Functions linked into JIT-compiled code
pub(crate) mod operators {
    pub(crate) mod math;
    pub(crate) mod runtime;
}
