//! VM error types

use thiserror::Error;

/// VM execution errors
#[derive(Debug, Error)]
pub enum VmError {
    /// Type error (e.g., coercing a BigInt to a Number)
    #[error("TypeError: {0}")]
    TypeError(String),

    /// Range error (e.g., invalid buffer length)
    #[error("RangeError: {0}")]
    RangeError(String),

    /// Syntax error (e.g., a string that is not a BigInt literal)
    #[error("SyntaxError: {0}")]
    SyntaxError(String),

    /// Defining a property on a typed array index that is out of range
    #[error("TypeError: Invalid typed array index")]
    InvalidTypedArrayIndex,

    /// Descriptor conflicts with the existing property
    #[error("TypeError: Cannot redefine property: {0}")]
    RedefineDisallowed(String),

    /// Operation needs memory the buffer no longer has
    #[error("TypeError: Cannot perform operation on a detached ArrayBuffer")]
    Detached,

    /// Backing store allocation failed for a script-visible constructor
    #[error("RangeError: Array buffer allocation failed")]
    ArrayBufferAllocationFailed,
}

impl VmError {
    /// Create a type error
    pub fn type_error(msg: impl Into<String>) -> Self {
        Self::TypeError(msg.into())
    }

    /// Create a range error
    pub fn range_error(msg: impl Into<String>) -> Self {
        Self::RangeError(msg.into())
    }

    /// Create a syntax error
    pub fn syntax_error(msg: impl Into<String>) -> Self {
        Self::SyntaxError(msg.into())
    }

    /// Whether script would observe this as a `TypeError`
    pub fn is_type_error(&self) -> bool {
        matches!(
            self,
            Self::TypeError(_)
                | Self::InvalidTypedArrayIndex
                | Self::RedefineDisallowed(_)
                | Self::Detached
        )
    }
}

/// Result type for VM operations
pub type VmResult<T> = std::result::Result<T, VmError>;

/// How a failed `[[DefineOwnProperty]]` is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShouldThrow {
    /// Strict callers: the failure is an error
    Throw,
    /// Sloppy callers: the failure is `Ok(false)`
    DontThrow,
}

impl ShouldThrow {
    /// Report `error` according to the caller's mode
    pub fn fail(self, error: VmError) -> VmResult<bool> {
        match self {
            Self::Throw => Err(error),
            Self::DontThrow => Ok(false),
        }
    }
}
