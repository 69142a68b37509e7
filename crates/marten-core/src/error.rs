//! Interpreter errors
//!
//! Two worlds are kept apart: [`VmError::Language`] carries a guest-level
//! thrown value that handler tables may catch, while every other variant is
//! an engine condition that bypasses guest handlers entirely (an interceptor
//! may convert one into a guest exception first; interruption never is).

use marten_bytecode::BytecodeError;
use thiserror::Error;

use crate::value::Value;

/// A guest-level exception in flight
#[derive(Debug, Clone)]
pub struct ThrownValue {
    /// The thrown guest value
    pub value: Value,
    /// Bci of the throwing instruction
    pub bci: u32,
}

/// Errors surfaced by the interpreter core
#[derive(Debug, Error)]
pub enum VmError {
    /// Malformed bytecode
    #[error(transparent)]
    Bytecode(#[from] BytecodeError),

    /// Guest exception that escaped the root without a matching handler
    #[error("uncaught guest exception at bci {}", .0.bci)]
    Language(Box<ThrownValue>),

    /// Cooperative interruption observed at a safepoint
    #[error("execution interrupted")]
    Interrupted,

    /// Local accessed outside its live range
    #[error("local {local} is not in scope at bci {bci}")]
    LocalOutOfScope {
        /// Logical local index
        local: u16,
        /// Bci of the access
        bci: u32,
    },

    /// Materialized-frame access against the wrong root's frame
    #[error("frame belongs to root {actual}, access requires root {expected}")]
    FrameMismatch {
        /// Root the access was compiled against
        expected: u16,
        /// Root that owns the frame
        actual: u16,
    },

    /// Read of a cleared or never-written local under error semantics
    #[error("illegal read of local {local} at bci {bci}")]
    IllegalLocal {
        /// Frame slot that was read
        local: u16,
        /// Bci of the read
        bci: u32,
    },

    /// Invariant violation inside the engine
    #[error("internal error: {0}")]
    Internal(String),
}

impl VmError {
    /// Wrap a guest value thrown at `bci`
    pub fn thrown(value: Value, bci: u32) -> Self {
        Self::Language(Box::new(ThrownValue { value, bci }))
    }

    /// Internal invariant violation
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether this error is a guest exception that handler tables may catch
    pub fn is_language(&self) -> bool {
        matches!(self, Self::Language(_))
    }
}

/// Result type for interpreter operations
pub type VmResult<T> = Result<T, VmError>;
