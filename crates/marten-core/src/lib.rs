//! Adaptive interpreter core for Marten bytecode
//!
//! Execution starts in a profile-free uncached tier and promotes itself to
//! a cached tier that quickens instructions in place, eliminates boxing
//! through per-local cached tags, profiles branches and loops, and hands
//! hot loops to an embedder-supplied compiler for on-stack replacement.
//! All adaptive state hangs off a [`Root`]; the bytecode template itself
//! (from `marten-bytecode`) stays immutable, which is what makes structural
//! invalidation a cheap rebuild.
//!
//! ```
//! use std::sync::Arc;
//! use marten_bytecode::{BytecodeBuilder, Opcode};
//! use marten_core::{Execution, InterpreterConfig, Root, Value};
//!
//! let mut b = BytecodeBuilder::new(0);
//! b.emit_load_int(2);
//! b.emit_load_int(3);
//! b.emit_binary(Opcode::Add);
//! b.emit_return();
//! let root = Root::new(b.build().unwrap(), Arc::new(InterpreterConfig::new()));
//! let result = root.call(&[]).unwrap();
//! assert_eq!(result.into_return(), Some(Value::Int(5)));
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod continuation;
mod dispatch;
pub mod error;
pub mod exception;
pub mod frame;
pub mod local_tags;
pub mod osr;
pub mod profile;
mod quicken;
pub mod root;
pub mod state;
pub mod tier;
pub mod value;

pub use config::{IllegalLocalSemantics, InterpreterConfig};
pub use continuation::{Continuation, MaterializedFrame};
pub use error::{ThrownValue, VmError, VmResult};
pub use exception::{ExceptionInterceptor, PassthroughInterceptor, ProbeResolution, TagProbe};
pub use frame::Frame;
pub use local_tags::{LocalTag, LocalTagTable};
pub use osr::{CompiledLoop, OsrCompiler};
pub use root::{Execution, Root};
pub use tier::{CachedAux, Tier, TierCode, TierManager};
pub use value::{HostObject, ObjectRef, Value};
