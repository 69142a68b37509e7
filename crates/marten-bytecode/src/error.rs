//! Bytecode errors

use thiserror::Error;

/// Errors raised while constructing or validating bytecode
///
/// Every variant that concerns the instruction stream carries the offending
/// bci so producers can report a precise location.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BytecodeError {
    /// Reserved or out-of-range opcode value
    #[error("invalid opcode {raw:#06x} at bci {bci}")]
    InvalidOpcode {
        /// Raw code unit found where an opcode was expected
        raw: u16,
        /// Offending bytecode index
        bci: u32,
    },

    /// Instruction extends past the end of the unit
    #[error("truncated instruction at bci {bci}")]
    TruncatedInstruction {
        /// Offending bytecode index
        bci: u32,
    },

    /// Index-like immediate out of bounds for its target table
    #[error("{kind} immediate {value} out of bounds (limit {limit}) at bci {bci}")]
    ImmediateOutOfBounds {
        /// Human-readable immediate kind
        kind: &'static str,
        /// Decoded immediate value
        value: u32,
        /// Exclusive bound the value must stay under
        limit: u32,
        /// Offending bytecode index
        bci: u32,
    },

    /// Branch target does not land on an instruction start
    #[error("branch target {target} at bci {bci} is not an instruction boundary")]
    MisalignedBranchTarget {
        /// Decoded target bci
        target: u32,
        /// Offending bytecode index
        bci: u32,
    },

    /// Handler table entry with an inverted or out-of-range guard
    #[error("handler {index} has invalid range [{start}, {end}) for unit of length {len}")]
    InvalidHandlerRange {
        /// Handler table index
        index: usize,
        /// Guard range start
        start: u32,
        /// Guard range end (exclusive)
        end: u32,
        /// Unit length in code units
        len: u32,
    },

    /// Local descriptor referencing a slot outside the frame
    #[error("local descriptor {index} references frame slot {frame_index} (max {max_locals})")]
    InvalidLocalDescriptor {
        /// Descriptor table index
        index: usize,
        /// Referenced frame slot
        frame_index: u16,
        /// Number of local slots in the frame
        max_locals: u16,
    },

    /// Attempted rewrite that would change an instruction's encoded length
    #[error("rewrite at bci {bci} would change length ({from} -> {to} units)")]
    LengthChangingRewrite {
        /// Site of the attempted rewrite
        bci: u32,
        /// Length of the currently encoded instruction
        from: u32,
        /// Length of the proposed replacement
        to: u32,
    },

    /// Rewrite target outside the same quickening family
    #[error("rewrite at bci {bci} crosses instruction families")]
    ForeignRewrite {
        /// Site of the attempted rewrite
        bci: u32,
    },

    /// Builder misuse (unbound label, stack underflow during emission, ...)
    #[error("builder error: {0}")]
    Builder(String),
}

/// Result type for bytecode operations
pub type Result<T> = std::result::Result<T, BytecodeError>;
