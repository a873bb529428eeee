//! Error taxonomy for the Scratch 3 runtime.
//!
//! Three tiers: script exceptions (kind + message, fatal to the owning
//! script and — per the reference engine's own behavior — to the whole
//! run), VM panics (irrecoverable engine invariant violations), and
//! compiler/link failures.

use thiserror::Error;

/// The kind of a script-level exception.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptException {
    #[error("out of memory: {message}")]
    OutOfMemory { message: String },

    #[error("stack overflow: {message}")]
    StackOverflow { message: String },

    #[error("stack underflow: {message}")]
    StackUnderflow { message: String },

    #[error("access violation: {message}")]
    AccessViolation { message: String },

    #[error("variable not found: {message}")]
    VariableNotFound { message: String },

    #[error("illegal operation: {message}")]
    IllegalOperation { message: String },

    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("unsupported operation: {message}")]
    UnsupportedOperation { message: String },

    #[error("not implemented: {message}")]
    NotImplemented { message: String },

    #[error("VM error: {message}")]
    VMError { message: String },
}

impl ScriptException {
    pub fn out_of_memory<S: Into<String>>(message: S) -> Self {
        Self::OutOfMemory { message: message.into() }
    }

    pub fn stack_overflow<S: Into<String>>(message: S) -> Self {
        Self::StackOverflow { message: message.into() }
    }

    pub fn stack_underflow<S: Into<String>>(message: S) -> Self {
        Self::StackUnderflow { message: message.into() }
    }

    pub fn access_violation<S: Into<String>>(message: S) -> Self {
        Self::AccessViolation { message: message.into() }
    }

    pub fn variable_not_found<S: Into<String>>(message: S) -> Self {
        Self::VariableNotFound { message: message.into() }
    }

    pub fn illegal_operation<S: Into<String>>(message: S) -> Self {
        Self::IllegalOperation { message: message.into() }
    }

    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        Self::InvalidArgument { message: message.into() }
    }

    pub fn unsupported_operation<S: Into<String>>(message: S) -> Self {
        Self::UnsupportedOperation { message: message.into() }
    }

    pub fn not_implemented<S: Into<String>>(message: S) -> Self {
        Self::NotImplemented { message: message.into() }
    }

    pub fn vm_error<S: Into<String>>(message: S) -> Self {
        Self::VMError { message: message.into() }
    }

    /// The short kind name used in the `kind: message` diagnostic.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::OutOfMemory { .. } => "OutOfMemory",
            Self::StackOverflow { .. } => "StackOverflow",
            Self::StackUnderflow { .. } => "StackUnderflow",
            Self::AccessViolation { .. } => "AccessViolation",
            Self::VariableNotFound { .. } => "VariableNotFound",
            Self::IllegalOperation { .. } => "IllegalOperation",
            Self::InvalidArgument { .. } => "InvalidArgument",
            Self::UnsupportedOperation { .. } => "UnsupportedOperation",
            Self::NotImplemented { .. } => "NotImplemented",
            Self::VMError { .. } => "VMError",
        }
    }
}

/// Irrecoverable engine-level fault. Unwinds to the
/// handler installed at `VMStart` and aborts the run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VmPanic {
    #[error("bytecode invariant violated: {reason}")]
    InvalidBytecode { reason: String },

    #[error("scheduler state inconsistent: {reason}")]
    SchedulerInconsistent { reason: String },

    #[error("failed to create script fiber: {reason}")]
    FiberCreationFailed { reason: String },

    #[error("too many sprite instances: {abstract_sprite} exceeded capacity {capacity}")]
    TooManySprites { abstract_sprite: String, capacity: usize },

    #[error("too many scripts: exceeded capacity {capacity}")]
    TooManyScripts { capacity: usize },
}

/// Failures that abort compilation before any bytecode is produced.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("unknown opcode: {name}")]
    UnknownOpcode { name: String },

    #[error("duplicate procedure definition: {name}")]
    DuplicateProcedure { name: String },

    #[error("unresolved symbol: {name}")]
    UnresolvedSymbol { name: String },

    #[error("missing resource: {name}")]
    MissingResource { name: String },

    #[error("undefined static variable: {name}")]
    UndefinedStaticVariable { name: String },
}

pub type ScriptResult<T> = Result<T, ScriptException>;
pub type VmResult<T> = Result<T, VmPanic>;
pub type CompileResult<T> = Result<T, CompileError>;
