//! Compiler configuration.

/// Which backend a compiled function runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// Cranelift machine code; falls back to [`Backend::Interpreter`] on unsupported hosts
    #[default]
    Native,
    /// The stack program executed in Rust, without machine code
    StackMachine,
    /// The tree-walking interpreter
    Interpreter,
}

/// Cranelift optimisation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptimizationLevel {
    None,
    #[default]
    Speed,
    SpeedAndSize,
}

impl OptimizationLevel {
    /// Value of Cranelift's `opt_level` setting.
    pub fn as_setting(self) -> &'static str {
        match self {
            OptimizationLevel::None => "none",
            OptimizationLevel::Speed => "speed",
            OptimizationLevel::SpeedAndSize => "speed_and_size",
        }
    }
}

/// Configuration for compiling a formula.
#[derive(Debug, Clone, PartialEq)]
pub struct CompilerConfig {
    pub backend: Backend,
    pub optimization: OptimizationLevel,
    /// Run the Cranelift IR verifier; on by default in debug builds
    pub verify: bool,
    /// Capacity of the bounded work stack; deeper operands are spilled
    pub stack_depth: usize,
}

impl CompilerConfig {
    /// Capacity of the bounded work stack used by default.
    pub const DEFAULT_STACK_DEPTH: usize = 8;

    pub fn interpreter() -> Self {
        Self {
            backend: Backend::Interpreter,
            ..Self::default()
        }
    }

    pub fn stack_machine() -> Self {
        Self {
            backend: Backend::StackMachine,
            ..Self::default()
        }
    }

    pub fn with_stack_depth(mut self, depth: usize) -> Self {
        self.stack_depth = depth;
        self
    }

    pub fn with_optimization(mut self, level: OptimizationLevel) -> Self {
        self.optimization = level;
        self
    }

    /// Stack capacity actually used; a program always needs at least one slot.
    pub(crate) fn capacity(&self) -> usize {
        self.stack_depth.max(1)
    }
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Native,
            optimization: OptimizationLevel::Speed,
            verify: cfg!(debug_assertions),
            stack_depth: Self::DEFAULT_STACK_DEPTH,
        }
    }
}
