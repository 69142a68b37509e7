//! Bytecode representation for the Marten interpreter core
//!
//! This crate defines the executable form consumed by `marten-core`: a flat
//! stream of 16-bit code units with fixed-offset immediates, plus the side
//! tables an activation needs (constants, exception handlers, local
//! descriptors, source ranges). The code stream is built once from a
//! [`BytecodeBuilder`], validated, and kept as an immutable
//! [`CodeDescriptor`] template; execution materializes [`BytecodeUnit`]s
//! whose opcodes may be rewritten in place to same-length specialized
//! siblings while other threads execute them.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod builder;
pub mod constant;
pub mod error;
pub mod handler;
pub mod local_table;
pub mod opcode;
pub mod source_info;
pub mod unit;
pub mod validate;

pub use builder::{BytecodeBuilder, CodeDescriptor, Label};
pub use constant::{Constant, ConstantPool};
pub use error::{BytecodeError, Result};
pub use handler::{HandlerEntry, HandlerKind, HandlerTable};
pub use local_table::{LocalDescriptor, LocalDescriptorTable};
pub use opcode::{Immediate, ImmediateKind, OPCODE_COUNT, Opcode};
pub use source_info::{SourceEntry, SourceInfoTable};
pub use unit::BytecodeUnit;
