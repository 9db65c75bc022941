//! Runtime helpers called from JIT-compiled code.
//!
//! Some stack operations need more than numbers: fallback subtrees are interpreted,
//! observed data is looked up, user functions are dispatched and factorials report
//! non-integer arguments. Compiled code passes an opaque pointer to a [`Frame`] to these
//! helpers, which gives them the program, the value vector, the time and the evaluation
//! context of the current call.
//!
//! The helpers never panic: an out-of-range index yields NaN and is logged.

use cranelift_codegen::ir::types::{F64, I64};
use cranelift_codegen::ir::AbiParam;
use cranelift_jit::JITBuilder;
use cranelift_module::{FuncId, Linkage, Module};
use log::error;

use crate::errors::BuilderError;
use crate::eval::{
    call_user_function, checked_factorial, evaluate_with, observed_value, EvalContext,
};
use crate::program::StackProgram;

/// Everything a runtime helper may touch during one compiled call.
pub(crate) struct Frame<'f, 'c> {
    pub program: &'f StackProgram,
    pub values: &'f [f64],
    pub time: f64,
    pub ctx: &'f mut EvalContext<'c>,
}

/// Symbols of the runtime helpers.
pub(crate) const FALLBACK: &str = "ratelaw_rt_fallback";
pub(crate) const OBSERVED: &str = "ratelaw_rt_observed";
pub(crate) const FACTORIAL: &str = "ratelaw_rt_factorial";
pub(crate) const CALL: &str = "ratelaw_rt_call";

/// # Safety
/// `frame` must point to a live `Frame` for the duration of the call.
unsafe fn frame_from<'a>(frame: *mut u8) -> &'a mut Frame<'a, 'a> {
    &mut *(frame as *mut Frame<'a, 'a>)
}

extern "C" fn rt_fallback(frame_ptr: *mut u8, index: i64) -> f64 {
    let frame = unsafe { frame_from(frame_ptr) };
    match frame.program.subtrees.get(index as usize) {
        Some(subtree) => evaluate_with(subtree, frame.values, frame.time, frame.ctx),
        None => {
            error!("compiled code referenced missing subtree {index}");
            f64::NAN
        }
    }
}

extern "C" fn rt_observed(frame_ptr: *mut u8, index: i64) -> f64 {
    let frame = unsafe { frame_from(frame_ptr) };
    let index = index as usize;
    match frame.ctx.data {
        Some(data) => observed_value(data, index, frame.time, &mut frame.ctx.diagnostics),
        None => frame.values.get(index).copied().unwrap_or(f64::NAN),
    }
}

extern "C" fn rt_factorial(frame_ptr: *mut u8, x: f64) -> f64 {
    let frame = unsafe { frame_from(frame_ptr) };
    checked_factorial(x, &mut frame.ctx.diagnostics)
}

extern "C" fn rt_call(frame_ptr: *mut u8, function: i64, args: *const f64, argc: i64) -> f64 {
    let frame = unsafe { frame_from(frame_ptr) };
    let Some(name) = frame.program.functions.get(function as usize) else {
        error!("compiled code referenced missing function {function}");
        return f64::NAN;
    };
    let args = if argc > 0 {
        unsafe { std::slice::from_raw_parts(args, argc as usize) }
    } else {
        &[]
    };
    call_user_function(name, args, frame.time, frame.ctx)
}

pub(crate) fn register_runtime_symbols(builder: &mut JITBuilder) {
    builder.symbol(FALLBACK, rt_fallback as *const u8);
    builder.symbol(OBSERVED, rt_observed as *const u8);
    builder.symbol(FACTORIAL, rt_factorial as *const u8);
    builder.symbol(CALL, rt_call as *const u8);
}

/// Declares a runtime helper in `module` with its fixed signature.
pub(crate) fn link_runtime(module: &mut dyn Module, symbol: &str) -> Result<FuncId, BuilderError> {
    let ptr = module.target_config().pointer_type();
    let mut sig = module.make_signature();
    sig.params.push(AbiParam::new(ptr));
    match symbol {
        FALLBACK | OBSERVED => sig.params.push(AbiParam::new(I64)),
        FACTORIAL => sig.params.push(AbiParam::new(F64)),
        CALL => {
            sig.params.push(AbiParam::new(I64));
            sig.params.push(AbiParam::new(ptr));
            sig.params.push(AbiParam::new(I64));
        }
        other => {
            return Err(BuilderError::DeclarationError(format!(
                "unknown runtime helper {other}"
            )))
        }
    }
    sig.returns.push(AbiParam::new(F64));

    module
        .declare_function(symbol, Linkage::Import, &sig)
        .map_err(|e| BuilderError::DeclarationError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Condition;
    use crate::expr::{Expr, Relational};
    use crate::functions::FunctionDefinitions;

    #[test]
    fn test_helpers_through_frame() {
        let tree = Expr::Plus(vec![
            Expr::Piecewise(vec![
                Expr::int(2),
                Expr::Relational(Relational::Lt, vec![Expr::Time, Expr::int(1)]),
                Expr::int(3),
            ]),
            Expr::call("f", vec![Expr::bound("x", 0)]),
        ]);
        let program = StackProgram::new(&tree, 8);
        let mut functions = FunctionDefinitions::new();
        functions.insert_native("f", |args| args[0] * 10.0);
        let mut ctx = EvalContext::new().with_functions(&functions);
        let values = [1.5];
        let mut frame = Frame {
            program: &program,
            values: &values,
            time: 0.5,
            ctx: &mut ctx,
        };
        let ptr = &mut frame as *mut Frame as *mut u8;

        assert_eq!(rt_fallback(ptr, 0), 2.0);
        assert!(rt_fallback(ptr, 7).is_nan());
        assert_eq!(rt_observed(ptr, 0), 1.5);
        let args = [4.0];
        assert_eq!(rt_call(ptr, 0, args.as_ptr(), 1), 40.0);
        assert_eq!(rt_factorial(ptr, 3.5), 6.0);
        assert!(ctx
            .diagnostics()
            .any(|c| matches!(c, Condition::NonIntegerFactorial(_))));
    }
}
