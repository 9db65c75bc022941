//! Error types for the ratelaw-jit crate.
//!
//! This module defines the fatal failure modes of the crate. Conditions that are only
//! *reported* while evaluating (a missing value, an ambiguous piecewise, ...) are not
//! errors; they live in [`crate::diagnostics`]. The error types are:
//!
//! - `TreeError`: Ill-formed trees rejected at construction time
//! - `ConvertError`: Errors while converting parsed formula text into an expression tree
//! - `BuilderError`: Errors during JIT compilation with Cranelift
//! - `ModelError`: High-level errors when working with a set of model formulas
//!
//! Each error type implements the standard Error trait and provides detailed error messages.

use cranelift_codegen::CodegenError;
use cranelift_module::ModuleError;
use evalexpr::{DefaultNumericTypes, EvalexprError};
use thiserror::Error;

/// Errors raised when a node is constructed with children that do not match its kind.
///
/// Trees are checked when they are built, so every pass over an existing tree can
/// assume a well-formed shape.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TreeError {
    /// A node received the wrong number of children
    #[error("malformed {kind} node: expected {expected} children, got {got}")]
    MalformedTree {
        kind: &'static str,
        expected: &'static str,
        got: usize,
    },
    /// A named function is not part of the known function table
    #[error("unknown function: {0}")]
    UnknownFunction(String),
}

/// Errors that can occur while converting an evalexpr operator tree into an
/// [`Expr`](crate::expr::Expr).
#[derive(Error, Debug)]
pub enum ConvertError {
    /// Error when parsing the formula text with evalexpr
    #[error("failed to parse formula: {0}")]
    Parse(#[from] EvalexprError<DefaultNumericTypes>),
    /// Error when encountering an operator that has no counterpart in the tree
    #[error("unsupported operator: {0}")]
    UnsupportedOperator(String),
    /// Error when a constant is neither numeric nor boolean
    #[error("expected numeric or boolean constant: {0}")]
    ConstOperator(String),
    /// Error when the root node does not have exactly one child
    #[error("expected single child for root node, got {0}")]
    RootNode(usize),
    /// The converted node violates an arity contract
    #[error(transparent)]
    Tree(#[from] TreeError),
}

/// Errors that can occur during JIT compilation of expressions.
///
/// This enum represents various failure modes in the process of lowering a stack
/// program into machine code using Cranelift as the JIT compiler backend.
#[derive(Error, Debug)]
pub enum BuilderError {
    /// Error when the target machine architecture is not supported
    #[error("host machine is not supported: {0}")]
    HostMachineNotSupported(String),
    /// Error during Cranelift code generation
    #[error("codegen error: {0}")]
    CodegenError(CodegenError),
    /// Error in the Cranelift JIT module
    #[error("module error: {0}")]
    ModuleError(ModuleError),
    /// Error when defining the JIT function
    #[error("function error: {0}")]
    FunctionError(String),
    /// Error when declaring the JIT function or one of its imports
    #[error("declaration error: {0}")]
    DeclarationError(String),
    /// A Cranelift setting was rejected
    #[error("invalid compiler setting: {0}")]
    Setting(String),
}

/// High-level errors that can occur when working with a model's formulas.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Error when turning formula text into an expression tree
    #[error("failed to convert formula")]
    Convert(#[from] ConvertError),
    /// A state variable is not part of the name table
    #[error("state variable not found in name table: {0}")]
    StateNotFound(String),
    /// The number of formulas does not match the number of states
    #[error("expected one formula per state: {states} states, {formulas} formulas")]
    FormulaCount { states: usize, formulas: usize },
    /// Error when the input length is not the same as the name table
    #[error("invalid input length: expected {expected}, got {got}")]
    InvalidInputLength { expected: usize, got: usize },
    /// Error when the output buffer does not match the number of formulas
    #[error("invalid output length: expected {expected}, got {got}")]
    InvalidOutputLength { expected: usize, got: usize },
}
