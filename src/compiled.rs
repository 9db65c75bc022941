//! Compiled formulas.
//!
//! [`compile`] turns a resolved tree into a [`CompiledFunction`]. On hosts with a
//! Cranelift backend the formula runs as machine code; elsewhere, or when code
//! generation fails, the function wraps the interpreter instead. Compilation never
//! fails from the caller's point of view, it only gets slower.
//!
//! A compiled function owns its stack program (constant pool, fallback subtrees),
//! its spill buffer and its machine code, and releases them together when dropped.

use log::{debug, info, warn};

use crate::analysis::Analysis;
use crate::builder::{build_native, native_backend_available, NativeCode};
use crate::config::{Backend, CompilerConfig};
use crate::errors::BuilderError;
use crate::eval::{evaluate_with, EvalContext};
use crate::expr::Expr;
use crate::operators::runtime::Frame;
use crate::program::StackProgram;

enum Engine {
    Interpreter,
    StackMachine(StackProgram),
    Native {
        program: StackProgram,
        code: NativeCode,
    },
}

/// A formula ready for repeated evaluation.
///
/// Calls take `&mut self` because the spill buffer is reused between calls; a compiled
/// function can be moved to another thread but not shared during evaluation.
pub struct CompiledFunction {
    source: Expr,
    engine: Engine,
    spill: Vec<f64>,
}

impl std::fmt::Debug for CompiledFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledFunction")
            .field("source", &self.source.to_string())
            .field("backend", &self.backend())
            .finish()
    }
}

/// Compiles `expr` with the default configuration.
pub fn compile(expr: &Expr) -> CompiledFunction {
    compile_with(expr, &CompilerConfig::default())
}

/// Compiles `expr` for the backend selected in `config`.
///
/// A native backend that is unavailable or fails degrades to the interpreter.
pub fn compile_with(expr: &Expr, config: &CompilerConfig) -> CompiledFunction {
    match config.backend {
        Backend::Interpreter => CompiledFunction::interpreted(expr),
        Backend::StackMachine => {
            let program = StackProgram::new(expr, config.capacity());
            CompiledFunction::with_engine(expr, Engine::StackMachine(program))
        }
        Backend::Native => {
            if !native_backend_available() {
                info!("no native backend for this host, interpreting formula");
                return CompiledFunction::interpreted(expr);
            }
            match try_compile_native(expr, config) {
                Ok(function) => function,
                Err(e) => {
                    warn!("native compilation of `{expr}` failed, interpreting instead: {e}");
                    CompiledFunction::interpreted(expr)
                }
            }
        }
    }
}

/// Compiles `expr` to machine code, without falling back.
///
/// # Errors
/// Returns a BuilderError if the host has no native backend or Cranelift fails.
pub fn try_compile_native(
    expr: &Expr,
    config: &CompilerConfig,
) -> Result<CompiledFunction, BuilderError> {
    if !native_backend_available() {
        return Err(BuilderError::HostMachineNotSupported(
            target_lexicon::Triple::host().to_string(),
        ));
    }
    let program = StackProgram::new(expr, config.capacity());
    let code = build_native(&program, config)?;
    let analysis = program.analysis();
    debug!(
        "compiled `{expr}`: {} code units, {} constants, stack depth {}, \
         {} spill slots, {} fallback subtrees",
        analysis.code_len,
        analysis.constants,
        analysis.max_depth,
        analysis.spill_slots,
        analysis.subtrees
    );
    Ok(CompiledFunction::with_engine(
        expr,
        Engine::Native { program, code },
    ))
}

impl CompiledFunction {
    fn interpreted(expr: &Expr) -> Self {
        Self::with_engine(expr, Engine::Interpreter)
    }

    fn with_engine(expr: &Expr, engine: Engine) -> Self {
        let spill_slots = match &engine {
            Engine::Native { program, .. } => program.analysis().spill_slots,
            _ => 0,
        };
        CompiledFunction {
            source: expr.clone(),
            engine,
            // Never empty, so the pointer handed to machine code is always valid.
            spill: vec![0.0; spill_slots.max(1)],
        }
    }

    /// Evaluates the formula without user functions or observed data.
    pub fn call(&mut self, values: &[f64], time: f64) -> f64 {
        let mut ctx = EvalContext::new();
        self.call_with(values, time, &mut ctx)
    }

    /// Evaluates the formula; conditions are recorded in `ctx`.
    ///
    /// A `values` buffer shorter than the highest bound slot is handled by the
    /// interpreter, which reports the missing names instead of reading out of bounds.
    pub fn call_with(&mut self, values: &[f64], time: f64, ctx: &mut EvalContext<'_>) -> f64 {
        match &self.engine {
            Engine::Interpreter => evaluate_with(&self.source, values, time, ctx),
            Engine::StackMachine(program) => program.run(values, time, ctx),
            Engine::Native { program, code } => {
                if !program.accepts(values) {
                    return evaluate_with(&self.source, values, time, ctx);
                }
                let mut frame = Frame {
                    program,
                    values,
                    time,
                    ctx,
                };
                // SAFETY: `accepts` checked the value buffer, the constant pool belongs to
                // the program the code was built from, the spill buffer was sized by its
                // analysis, and the frame outlives the call.
                unsafe {
                    code.invoke(
                        values.as_ptr(),
                        time,
                        program.constants().as_ptr(),
                        self.spill.as_mut_ptr(),
                        &mut frame as *mut Frame as *mut u8,
                    )
                }
            }
        }
    }

    /// Backend the function actually runs on.
    pub fn backend(&self) -> Backend {
        match self.engine {
            Engine::Interpreter => Backend::Interpreter,
            Engine::StackMachine(_) => Backend::StackMachine,
            Engine::Native { .. } => Backend::Native,
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self.engine, Engine::Native { .. })
    }

    /// Buffer requirements of the compiled program, if there is one.
    pub fn analysis(&self) -> Option<&Analysis> {
        match &self.engine {
            Engine::Interpreter => None,
            Engine::StackMachine(program) | Engine::Native { program, .. } => {
                Some(program.analysis())
            }
        }
    }

    /// The tree this function was compiled from.
    pub fn expr(&self) -> &Expr {
        &self.source
    }
}
