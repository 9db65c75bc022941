//! This module lowers stack programs to native machine code.
//! It uses Cranelift as the backend compiler to generate native machine code.
//!
//! Every [`StackOp`] maps to a fixed instruction template. The bounded work stack lives
//! in SSA values; the constant pool, the spill buffer and the value vector are addressed
//! through pointer parameters. Operations without a Cranelift instruction call the shims
//! in `operators::math`, and operations that need the evaluation context call the
//! runtime helpers in `operators::runtime`.
//!
//! The main entry points are:
//! - `native_backend_available()` - Whether the host has a native backend
//! - `build_native()` - Compiles a stack program into a callable function

use std::collections::HashMap;
use std::sync::Arc;

use cranelift::prelude::*;
use cranelift_codegen::ir::FuncRef;
use cranelift_codegen::Context;
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{FuncId, Linkage, Module};
use isa::TargetIsa;
use log::debug;
use target_lexicon::{Architecture, Triple};

use crate::config::CompilerConfig;
use crate::errors::BuilderError;
use crate::expr::{Function, Relational};
use crate::operators::math::{binary_symbol, link_math, register_math_symbols, unary_symbol};
use crate::operators::runtime::{self, link_runtime, register_runtime_symbols};
use crate::program::{BinaryOp, StackOp, StackProgram, UnaryOp};

/// Machine-level signature of a compiled formula.
pub(crate) type NativeEntry = unsafe extern "C" fn(
    values: *const f64,
    time: f64,
    constants: *const f64,
    spill: *mut f64,
    frame: *mut u8,
) -> f64;

/// Finalized machine code together with the module that owns its memory.
pub(crate) struct NativeCode {
    module: Option<JITModule>,
    entry: NativeEntry,
}

// The module is only touched again when dropped, and the code is immutable.
unsafe impl Send for NativeCode {}

impl NativeCode {
    /// Runs the compiled code.
    ///
    /// # Safety
    /// `values` must cover every slot the program loads, `constants` must be the pool of
    /// the program this code was built from, `spill` must hold at least as many slots as
    /// its analysis reserved, and `frame` must point to a live runtime frame.
    pub(crate) unsafe fn invoke(
        &self,
        values: *const f64,
        time: f64,
        constants: *const f64,
        spill: *mut f64,
        frame: *mut u8,
    ) -> f64 {
        (self.entry)(values, time, constants, spill, frame)
    }
}

impl Drop for NativeCode {
    fn drop(&mut self) {
        if let Some(module) = self.module.take() {
            // SAFETY: the entry pointer is dropped together with the module.
            unsafe { module.free_memory() };
        }
    }
}

/// Returns true if formulas can be compiled to machine code on this host.
pub fn native_backend_available() -> bool {
    let triple = Triple::host();
    matches!(
        triple.architecture,
        Architecture::X86_64 | Architecture::Aarch64(_)
    ) && cranelift_native::builder().is_ok()
}

/// Creates an Instruction Set Architecture (ISA) target for code generation.
///
/// This function detects the host machine architecture and configures the Cranelift
/// flags from the compiler configuration.
///
/// # Errors
/// Returns a BuilderError if:
/// - The host machine architecture is not supported
/// - A setting is rejected or code generation configuration fails
pub(crate) fn create_isa(config: &CompilerConfig) -> Result<Arc<dyn TargetIsa>, BuilderError> {
    let mut flag_builder = settings::builder();
    let mut set = |name: &str, value: &str| {
        flag_builder
            .set(name, value)
            .map_err(|e| BuilderError::Setting(format!("{name}={value}: {e}")))
    };

    let is_x86 = matches!(Triple::host().architecture, Architecture::X86_64);
    set("use_colocated_libcalls", if is_x86 { "true" } else { "false" })?;
    // cranelift-jit rejects position-independent code.
    set("is_pic", "false")?;
    set("opt_level", config.optimization.as_setting())?;
    set("enable_verifier", if config.verify { "true" } else { "false" })?;

    let isa_builder = cranelift_native::builder()
        .map_err(|msg| BuilderError::HostMachineNotSupported(msg.to_string()))?;

    isa_builder
        .finish(settings::Flags::new(flag_builder))
        .map_err(BuilderError::CodegenError)
}

/// Creates a new JIT module and a function context with the formula signature.
///
/// All math shims and runtime helpers are registered as symbols of the module.
pub(crate) fn create_module_and_context(isa: Arc<dyn TargetIsa>) -> (JITModule, Context) {
    let mut builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());
    register_math_symbols(&mut builder);
    register_runtime_symbols(&mut builder);

    let module = JITModule::new(builder);
    let mut ctx = module.make_context();

    let ptr = module.target_config().pointer_type();
    let mut sig = module.make_signature();
    sig.params.push(AbiParam::new(ptr)); // values
    sig.params.push(AbiParam::new(types::F64)); // time
    sig.params.push(AbiParam::new(ptr)); // constants
    sig.params.push(AbiParam::new(ptr)); // spill
    sig.params.push(AbiParam::new(ptr)); // frame
    sig.returns.push(AbiParam::new(types::F64));
    ctx.func.signature = sig;

    (module, ctx)
}

/// Compiles a stack program to machine code.
///
/// # Errors
/// Returns a BuilderError if the host is unsupported or Cranelift rejects the function.
pub(crate) fn build_native(
    program: &StackProgram,
    config: &CompilerConfig,
) -> Result<NativeCode, BuilderError> {
    let isa = create_isa(config)?;
    let (mut module, mut ctx) = create_module_and_context(isa);

    let mut builder_ctx = FunctionBuilderContext::new();
    {
        let mut builder = FunctionBuilder::new(&mut ctx.func, &mut builder_ctx);
        let entry = builder.create_block();
        builder.append_block_params_for_function_params(entry);
        builder.switch_to_block(entry);
        builder.seal_block(entry);

        let params = builder.block_params(entry).to_vec();
        let mut lowering = Lowering {
            builder,
            module: &mut module,
            imports: HashMap::new(),
            values: params[0],
            time: params[1],
            constants: params[2],
            spill: params[3],
            frame: params[4],
        };
        let result = lowering.lower(program)?;
        lowering.builder.ins().return_(&[result]);
        lowering.builder.finalize();
    }

    let entry = compile_and_finalize(&mut module, &mut ctx)?;
    debug!(
        "compiled {} ops into native code ({} constants, {} spill slots)",
        program.ops.len(),
        program.constants.len(),
        program.analysis.spill_slots
    );
    Ok(NativeCode {
        module: Some(module),
        entry,
    })
}

/// Declares, defines and finalizes the function in the context.
///
/// # Errors
/// Returns a BuilderError if:
/// - Function declaration fails
/// - Function definition fails
/// - Module finalization fails
fn compile_and_finalize(
    module: &mut JITModule,
    ctx: &mut Context,
) -> Result<NativeEntry, BuilderError> {
    let func_id = module
        .declare_function("ratelaw_formula", Linkage::Local, &ctx.func.signature)
        .map_err(|msg| BuilderError::DeclarationError(msg.to_string()))?;

    module
        .define_function(func_id, ctx)
        .map_err(|msg| BuilderError::FunctionError(msg.to_string()))?;

    module.clear_context(ctx);
    module
        .finalize_definitions()
        .map_err(BuilderError::ModuleError)?;

    // SAFETY: the function was built with the NativeEntry signature in the platform's
    // default calling convention, and the pointer is kept next to its module.
    let entry = unsafe {
        std::mem::transmute::<*const u8, NativeEntry>(module.get_finalized_function(func_id))
    };
    Ok(entry)
}

fn byte_offset(index: usize) -> Result<i32, BuilderError> {
    index
        .checked_mul(8)
        .and_then(|bytes| i32::try_from(bytes).ok())
        .ok_or_else(|| {
            BuilderError::FunctionError(format!("slot {index} out of addressable range"))
        })
}

fn float_cc(op: Relational) -> FloatCC {
    match op {
        Relational::Eq => FloatCC::Equal,
        Relational::Neq => FloatCC::NotEqual,
        Relational::Lt => FloatCC::LessThan,
        Relational::Leq => FloatCC::LessThanOrEqual,
        Relational::Gt => FloatCC::GreaterThan,
        Relational::Geq => FloatCC::GreaterThanOrEqual,
    }
}

struct Lowering<'b, 'm> {
    builder: FunctionBuilder<'b>,
    module: &'m mut JITModule,
    imports: HashMap<String, FuncRef>,
    values: Value,
    time: Value,
    constants: Value,
    spill: Value,
    frame: Value,
}

impl Lowering<'_, '_> {
    fn lower(&mut self, program: &StackProgram) -> Result<Value, BuilderError> {
        let mut stack: Vec<Value> = Vec::with_capacity(program.analysis.max_depth);
        for op in &program.ops {
            match *op {
                StackOp::PushConst(i) => {
                    let value = self.load(self.constants, i)?;
                    stack.push(value);
                }
                StackOp::LoadSlot(i) => {
                    let value = self.load(self.values, i)?;
                    stack.push(value);
                }
                StackOp::LoadObserved(i) => {
                    let index = self.builder.ins().iconst(types::I64, i as i64);
                    let value = self.call_runtime(runtime::OBSERVED, &[self.frame, index])?;
                    stack.push(value);
                }
                StackOp::LoadTime => stack.push(self.time),
                StackOp::Fallback(i) => {
                    let index = self.builder.ins().iconst(types::I64, i as i64);
                    let value = self.call_runtime(runtime::FALLBACK, &[self.frame, index])?;
                    stack.push(value);
                }
                StackOp::Unary(op) => {
                    let x = pop(&mut stack)?;
                    let value = self.unary(op, x)?;
                    stack.push(value);
                }
                StackOp::Binary(op) => {
                    let b = pop(&mut stack)?;
                    let a = pop(&mut stack)?;
                    let value = self.binary(op, a, b)?;
                    stack.push(value);
                }
                StackOp::Spill(slot) => {
                    let value = pop(&mut stack)?;
                    let offset = byte_offset(slot)?;
                    self.builder
                        .ins()
                        .store(MemFlags::trusted(), value, self.spill, offset);
                }
                StackOp::BinarySpilled(op, slot) => {
                    let b = pop(&mut stack)?;
                    let a = self.load(self.spill, slot)?;
                    let value = self.binary(op, a, b)?;
                    stack.push(value);
                }
                StackOp::Call {
                    function,
                    base,
                    argc,
                } => {
                    let offset = byte_offset(base)?;
                    let args = self.builder.ins().iadd_imm(self.spill, offset as i64);
                    let function = self.builder.ins().iconst(types::I64, function as i64);
                    let argc = self.builder.ins().iconst(types::I64, argc as i64);
                    let value =
                        self.call_runtime(runtime::CALL, &[self.frame, function, args, argc])?;
                    stack.push(value);
                }
            }
            debug_assert!(stack.len() <= program.capacity);
        }
        pop(&mut stack)
    }

    fn load(&mut self, base: Value, index: usize) -> Result<Value, BuilderError> {
        let offset = byte_offset(index)?;
        Ok(self
            .builder
            .ins()
            .load(types::F64, MemFlags::trusted(), base, offset))
    }

    fn boolean(&mut self, condition: Value) -> Value {
        let one = self.builder.ins().f64const(1.0);
        let zero = self.builder.ins().f64const(0.0);
        self.builder.ins().select(condition, one, zero)
    }

    fn truth(&mut self, x: Value) -> Value {
        let zero = self.builder.ins().f64const(0.0);
        self.builder.ins().fcmp(FloatCC::NotEqual, x, zero)
    }

    fn unary(&mut self, op: UnaryOp, x: Value) -> Result<Value, BuilderError> {
        let value = match op {
            UnaryOp::Neg => self.builder.ins().fneg(x),
            UnaryOp::Truth => {
                let t = self.truth(x);
                self.boolean(t)
            }
            UnaryOp::Not => {
                let zero = self.builder.ins().f64const(0.0);
                let f = self.builder.ins().fcmp(FloatCC::Equal, x, zero);
                self.boolean(f)
            }
            UnaryOp::Math(Function::Abs) => self.builder.ins().fabs(x),
            UnaryOp::Math(Function::Floor) => self.builder.ins().floor(x),
            UnaryOp::Math(Function::Ceiling) => self.builder.ins().ceil(x),
            UnaryOp::Math(Function::Root) => self.builder.ins().sqrt(x),
            UnaryOp::Math(f) => self.call_math(&unary_symbol(f), &[x])?,
            UnaryOp::Factorial => self.call_runtime(runtime::FACTORIAL, &[self.frame, x])?,
        };
        Ok(value)
    }

    fn binary(&mut self, op: BinaryOp, a: Value, b: Value) -> Result<Value, BuilderError> {
        let value = match op {
            BinaryOp::Add => self.builder.ins().fadd(a, b),
            BinaryOp::Sub => self.builder.ins().fsub(a, b),
            BinaryOp::Mul => {
                let product = self.builder.ins().fmul(a, b);
                let zero = self.builder.ins().f64const(0.0);
                let a_zero = self.builder.ins().fcmp(FloatCC::Equal, a, zero);
                let p_zero = self.builder.ins().fcmp(FloatCC::Equal, product, zero);
                let absorbed = self.builder.ins().bor(a_zero, p_zero);
                self.builder.ins().select(absorbed, zero, product)
            }
            BinaryOp::Div => self.builder.ins().fdiv(a, b),
            BinaryOp::Pow | BinaryOp::Log | BinaryOp::Root => {
                let symbol = binary_symbol(op).ok_or_else(|| {
                    BuilderError::FunctionError(format!("no shim for {op:?}"))
                })?;
                self.call_math(symbol, &[a, b])?
            }
            BinaryOp::Compare(rel) => {
                let c = self.builder.ins().fcmp(float_cc(rel), a, b);
                self.boolean(c)
            }
            BinaryOp::And | BinaryOp::Or | BinaryOp::Xor => {
                let ta = self.truth(a);
                let tb = self.truth(b);
                let c = match op {
                    BinaryOp::And => self.builder.ins().band(ta, tb),
                    BinaryOp::Or => self.builder.ins().bor(ta, tb),
                    _ => self.builder.ins().bxor(ta, tb),
                };
                self.boolean(c)
            }
        };
        Ok(value)
    }

    fn call_math(&mut self, symbol: &str, args: &[Value]) -> Result<Value, BuilderError> {
        let func = match self.imports.get(symbol) {
            Some(func) => *func,
            None => {
                let id: FuncId = link_math(self.module, symbol, args.len())?;
                self.declare_import(symbol, id)
            }
        };
        Ok(self.emit_call(func, args))
    }

    fn call_runtime(&mut self, symbol: &str, args: &[Value]) -> Result<Value, BuilderError> {
        let func = match self.imports.get(symbol) {
            Some(func) => *func,
            None => {
                let id = link_runtime(self.module, symbol)?;
                self.declare_import(symbol, id)
            }
        };
        Ok(self.emit_call(func, args))
    }

    fn declare_import(&mut self, symbol: &str, id: FuncId) -> FuncRef {
        let func = self.module.declare_func_in_func(id, self.builder.func);
        self.imports.insert(symbol.to_string(), func);
        func
    }

    fn emit_call(&mut self, func: FuncRef, args: &[Value]) -> Value {
        let call = self.builder.ins().call(func, args);
        self.builder.inst_results(call)[0]
    }
}

fn pop(stack: &mut Vec<Value>) -> Result<Value, BuilderError> {
    stack
        .pop()
        .ok_or_else(|| BuilderError::FunctionError("stack program underflow".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::EvalContext;
    use crate::expr::Expr;
    use crate::operators::runtime::Frame;

    fn run_native(tree: &Expr, values: &[f64], time: f64, capacity: usize) -> f64 {
        let program = StackProgram::new(tree, capacity);
        let code = build_native(&program, &CompilerConfig::default()).unwrap();
        let mut spill = vec![0.0; program.analysis.spill_slots.max(1)];
        let mut ctx = EvalContext::new();
        let mut frame = Frame {
            program: &program,
            values,
            time,
            ctx: &mut ctx,
        };
        unsafe {
            code.invoke(
                values.as_ptr(),
                time,
                program.constants.as_ptr(),
                spill.as_mut_ptr(),
                &mut frame as *mut Frame as *mut u8,
            )
        }
    }

    #[test]
    fn test_native_arithmetic() {
        if !native_backend_available() {
            return;
        }
        let tree = Expr::Plus(vec![
            Expr::bound("x", 0),
            Expr::Times(vec![Expr::bound("y", 1), Expr::bound("z", 2)]),
        ]);
        assert_eq!(run_native(&tree, &[1.0, 2.0, 3.0], 0.0, 8), 7.0);
    }

    #[test]
    fn test_native_spills() {
        if !native_backend_available() {
            return;
        }
        let mut tree = Expr::bound("x", 0);
        for i in 0..10 {
            tree = Expr::minus(
                Expr::apply(Function::Sin, Expr::Real(i as f64)),
                Expr::divide(tree, Expr::Time),
            );
        }
        let expected = crate::eval::evaluate(&tree, &[0.3], 1.5);
        let got = run_native(&tree, &[0.3], 1.5, 2);
        assert!((expected - got).abs() < 1e-12, "{expected} != {got}");
    }

    #[test]
    fn test_byte_offset_bounds() {
        assert_eq!(byte_offset(3).unwrap(), 24);
        assert!(byte_offset(usize::MAX / 2).is_err());
    }
}
