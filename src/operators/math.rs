//! Functions for linking and calling scalar math routines in JIT-compiled code.
//!
//! Named functions without a single Cranelift instruction (trigonometric, hyperbolic,
//! logarithms, roots, powers) are compiled as calls into small `extern "C"` shims. Each
//! shim forwards to the interpreter's scalar helper for the same function, so compiled
//! code and the interpreter share one definition of every function's value.
//!
//! All shims operate on 64-bit floating point numbers (f64).

use cranelift_codegen::ir::types::F64;
use cranelift_codegen::ir::AbiParam;
use cranelift_jit::JITBuilder;
use cranelift_module::{FuncId, Linkage, Module};

use crate::errors::BuilderError;
use crate::eval::{apply_binary, apply_unary};
use crate::expr::Function;
use crate::program::BinaryOp;

macro_rules! unary_shims {
    ($($tag:ident => $shim:ident),* $(,)?) => {
        $(
            extern "C" fn $shim(x: f64) -> f64 {
                apply_unary(Function::$tag, x)
            }
        )*

        fn unary_address(f: Function) -> *const u8 {
            match f {
                $(Function::$tag => $shim as *const u8,)*
            }
        }
    };
}

unary_shims! {
    Abs => ratelaw_abs,
    ArcCos => ratelaw_arccos,
    ArcCosh => ratelaw_arccosh,
    ArcCot => ratelaw_arccot,
    ArcCoth => ratelaw_arccoth,
    ArcCsc => ratelaw_arccsc,
    ArcCsch => ratelaw_arccsch,
    ArcSec => ratelaw_arcsec,
    ArcSech => ratelaw_arcsech,
    ArcSin => ratelaw_arcsin,
    ArcSinh => ratelaw_arcsinh,
    ArcTan => ratelaw_arctan,
    ArcTanh => ratelaw_arctanh,
    Ceiling => ratelaw_ceiling,
    Cos => ratelaw_cos,
    Cosh => ratelaw_cosh,
    Cot => ratelaw_cot,
    Coth => ratelaw_coth,
    Csc => ratelaw_csc,
    Csch => ratelaw_csch,
    Exp => ratelaw_exp,
    Factorial => ratelaw_factorial_unchecked,
    Floor => ratelaw_floor,
    Ln => ratelaw_ln,
    Log => ratelaw_log10,
    Power => ratelaw_power_unary,
    Root => ratelaw_sqrt,
    Sec => ratelaw_sec,
    Sech => ratelaw_sech,
    Sin => ratelaw_sin,
    Sinh => ratelaw_sinh,
    Tan => ratelaw_tan,
    Tanh => ratelaw_tanh,
}

extern "C" fn ratelaw_pow(base: f64, exponent: f64) -> f64 {
    base.powf(exponent)
}

extern "C" fn ratelaw_log(base: f64, x: f64) -> f64 {
    apply_binary(Function::Log, base, x)
}

extern "C" fn ratelaw_root(degree: f64, radicand: f64) -> f64 {
    apply_binary(Function::Root, degree, radicand)
}

/// Symbol under which the shim for a single-argument function is registered.
pub(crate) fn unary_symbol(f: Function) -> String {
    format!("ratelaw_f1_{}", f.name())
}

/// Symbol of the shim for a binary operator that has no Cranelift instruction.
pub(crate) fn binary_symbol(op: BinaryOp) -> Option<&'static str> {
    match op {
        BinaryOp::Pow => Some("ratelaw_f2_pow"),
        BinaryOp::Log => Some("ratelaw_f2_log"),
        BinaryOp::Root => Some("ratelaw_f2_root"),
        _ => None,
    }
}

/// Makes every math shim resolvable by the JIT linker.
pub(crate) fn register_math_symbols(builder: &mut JITBuilder) {
    for f in Function::ALL {
        builder.symbol(unary_symbol(f), unary_address(f));
    }
    builder.symbol("ratelaw_f2_pow", ratelaw_pow as *const u8);
    builder.symbol("ratelaw_f2_log", ratelaw_log as *const u8);
    builder.symbol("ratelaw_f2_root", ratelaw_root as *const u8);
}

/// Declares an imported `f64 -> f64` or `(f64, f64) -> f64` function.
///
/// # Arguments
/// * `module` - The Cranelift module to declare the function in
/// * `symbol` - The name registered with [`register_math_symbols`]
/// * `arity` - Number of f64 parameters
pub(crate) fn link_math(
    module: &mut dyn Module,
    symbol: &str,
    arity: usize,
) -> Result<FuncId, BuilderError> {
    let mut sig = module.make_signature();
    for _ in 0..arity {
        sig.params.push(AbiParam::new(F64));
    }
    sig.returns.push(AbiParam::new(F64));

    module
        .declare_function(symbol, Linkage::Import, &sig)
        .map_err(|e| BuilderError::DeclarationError(e.to_string()))
}
