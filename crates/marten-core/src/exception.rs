//! Instrumentation and interception hooks
//!
//! Both traits are seams for the embedder: probes observe execution at
//! tagged sites (and may redirect control on exceptional unwind), and
//! interceptors get one look at every exception before handler resolution.

use std::fmt;

use crate::error::{ThrownValue, VmError};
use crate::value::Value;

/// What a probe decides about an exception unwinding through its site
#[derive(Debug)]
pub enum ProbeResolution {
    /// Keep unwinding; resolution continues with the next handler entry
    Rethrow,
    /// Discard the exception and continue executing at the given bci
    ReenterAt(u32),
    /// Discard the exception, write this value onto the operand stack at
    /// the handler entry's sp (typed store, so primitives stay unboxed),
    /// and continue at the entry's handler bci
    SubstituteReturn(Value),
    /// Discard the exception and complete the activation with this value
    Unwind(Value),
}

/// Observer attached to tagged instruction sites
pub trait TagProbe: fmt::Debug + Send + Sync {
    /// Execution reached a `tag.probe` site
    fn on_enter(&self, node: u16, bci: u32);

    /// A guest exception is unwinding through a tagged range
    fn on_exceptional(&self, node: u16, bci: u32, thrown: &ThrownValue) -> ProbeResolution {
        let _ = (node, bci, thrown);
        ProbeResolution::Rethrow
    }
}

/// One chance to translate exceptions before handler resolution.
///
/// The default implementation passes everything through unchanged.
/// Interruption is never offered for interception.
pub trait ExceptionInterceptor: Send + Sync {
    /// An engine-internal condition surfaced during dispatch. Returning a
    /// [`VmError::Language`] converts it into a guest exception that
    /// handler tables may catch.
    fn intercept_internal(&self, error: VmError) -> VmError {
        error
    }

    /// A guest exception about to enter handler resolution
    fn intercept_language(&self, thrown: ThrownValue) -> ThrownValue {
        thrown
    }
}

/// Interceptor that changes nothing
#[derive(Debug, Default)]
pub struct PassthroughInterceptor;

impl ExceptionInterceptor for PassthroughInterceptor {}
