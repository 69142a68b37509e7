//! The bytecode unit: a fixed-length, shared, mutably-aliased code array
//!
//! Content is addressed in 16-bit code units. Concurrent dispatch loops read
//! the array while the quickening engine rewrites opcodes in place, so every
//! slot is an [`AtomicU16`]: an opcode replacement is a single release store
//! and readers pair it with an acquire load. All rewrites funnel through
//! [`BytecodeUnit::rewrite_opcode`], which enforces the two invariants that
//! make lock-free rewriting sound: the replacement has the same encoded
//! length, and it stays within the same quickening family (whose rewrite
//! lattice converges to the boxed generic form).

use std::sync::atomic::{AtomicU16, Ordering};

use crate::error::{BytecodeError, Result};
use crate::opcode::{ImmediateKind, Opcode};

/// Mutable-content, immutable-length instruction stream
pub struct BytecodeUnit {
    code: Box<[AtomicU16]>,
}

impl BytecodeUnit {
    /// Create a unit from raw code units
    pub fn from_words(words: &[u16]) -> Self {
        let code = words.iter().map(|&w| AtomicU16::new(w)).collect();
        Self { code }
    }

    /// Length in code units
    #[inline]
    pub fn len(&self) -> u32 {
        self.code.len() as u32
    }

    /// Whether the unit contains no instructions
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Read the opcode at `bci` with acquire ordering.
    ///
    /// The acquire pairs with the release in [`Self::rewrite_opcode`] so a
    /// reader that observes a rewritten opcode also observes any operand
    /// units written before it.
    #[inline]
    pub fn opcode_at(&self, bci: u32) -> Option<Opcode> {
        let raw = self.code.get(bci as usize)?.load(Ordering::Acquire);
        Opcode::from_raw(raw)
    }

    /// Read a raw code unit (immediate data)
    #[inline]
    pub fn unit_at(&self, index: u32) -> u16 {
        self.code[index as usize].load(Ordering::Relaxed)
    }

    /// Read a 16-bit immediate at an absolute unit index
    #[inline]
    pub fn read_u16(&self, index: u32) -> u16 {
        self.unit_at(index)
    }

    /// Read a 32-bit immediate (two units, low unit first)
    #[inline]
    pub fn read_u32(&self, index: u32) -> u32 {
        let lo = self.unit_at(index) as u32;
        let hi = self.unit_at(index + 1) as u32;
        lo | (hi << 16)
    }

    /// Read a signed 32-bit immediate
    #[inline]
    pub fn read_i32(&self, index: u32) -> i32 {
        self.read_u32(index) as i32
    }

    /// Read a 64-bit immediate (four units, low unit first)
    #[inline]
    pub fn read_u64(&self, index: u32) -> u64 {
        let lo = self.read_u32(index) as u64;
        let hi = self.read_u32(index + 2) as u64;
        lo | (hi << 32)
    }

    /// Read a signed 64-bit immediate
    #[inline]
    pub fn read_i64(&self, index: u32) -> i64 {
        self.read_u64(index) as i64
    }

    /// Read a 32-bit float immediate
    #[inline]
    pub fn read_f32(&self, index: u32) -> f32 {
        f32::from_bits(self.read_u32(index))
    }

    /// Read a 64-bit float immediate
    #[inline]
    pub fn read_f64(&self, index: u32) -> f64 {
        f64::from_bits(self.read_u64(index))
    }

    /// Replace the opcode at `bci` with a same-length sibling.
    ///
    /// Release store; racing writers are benign because all legal rewrites
    /// of a site commute up the family lattice. Returns an error if the
    /// replacement would change the instruction's encoded length or leave
    /// its quickening family.
    pub fn rewrite_opcode(&self, bci: u32, replacement: Opcode) -> Result<()> {
        let raw = self.code[bci as usize].load(Ordering::Acquire);
        let current = Opcode::from_raw(raw).ok_or(BytecodeError::InvalidOpcode { raw, bci })?;
        if current.len() != replacement.len() {
            return Err(BytecodeError::LengthChangingRewrite {
                bci,
                from: current.len(),
                to: replacement.len(),
            });
        }
        if current.generic() != replacement.generic() {
            return Err(BytecodeError::ForeignRewrite { bci });
        }
        self.code[bci as usize].store(replacement.to_raw(), Ordering::Release);
        Ok(())
    }

    /// Rewrite an operand unit ahead of an opcode rewrite.
    ///
    /// Must happen-before the opcode store; the release here plus the
    /// acquire in [`Self::opcode_at`] guarantees no thread observes the new
    /// opcode with stale operand data.
    pub fn rewrite_operand(&self, index: u32, value: u16) {
        self.code[index as usize].store(value, Ordering::Release);
    }

    /// Copy the current content into a plain word vector
    pub fn snapshot(&self) -> Vec<u16> {
        self.code
            .iter()
            .map(|w| w.load(Ordering::Acquire))
            .collect()
    }

    /// Walk the unit by instruction length from offset 0, returning every
    /// instruction start. Fails if the walk does not consume the array
    /// exactly (overlap or gap) or hits an invalid opcode.
    pub fn instruction_starts(&self) -> Result<Vec<u32>> {
        let mut starts = Vec::new();
        let mut bci = 0u32;
        let len = self.len();
        while bci < len {
            let raw = self.unit_at(bci);
            let op = Opcode::from_raw(raw).ok_or(BytecodeError::InvalidOpcode { raw, bci })?;
            if bci + op.len() > len {
                return Err(BytecodeError::TruncatedInstruction { bci });
            }
            starts.push(bci);
            bci += op.len();
        }
        debug_assert_eq!(bci, len);
        Ok(starts)
    }

    /// Human-readable disassembly for diagnostics
    pub fn dump(&self) -> String {
        use std::fmt::Write as _;

        let mut out = String::new();
        let Ok(starts) = self.instruction_starts() else {
            return "<malformed unit>".to_string();
        };
        for bci in starts {
            let op = self.opcode_at(bci).expect("validated walk");
            let _ = write!(out, "{bci:4}: {}", op.name());
            for imm in op.immediates() {
                let at = bci + imm.offset;
                let _ = match imm.kind {
                    ImmediateKind::BranchTarget => write!(out, " ->{}", self.read_u32(at)),
                    ImmediateKind::ImmInt => write!(out, " {}", self.read_i32(at)),
                    ImmediateKind::ImmFloat => write!(out, " {}", self.read_f32(at)),
                    ImmediateKind::ImmLong => write!(out, " {}", self.read_i64(at)),
                    ImmediateKind::ImmDouble => write!(out, " {}", self.read_f64(at)),
                    ImmediateKind::ImmByte => write!(out, " {}", self.read_u16(at) as i8),
                    ImmediateKind::ImmShort => write!(out, " {}", self.read_u16(at) as i16),
                    ImmediateKind::ImmBool => write!(out, " {}", self.read_u16(at) != 0),
                    _ => write!(out, " #{}", self.read_u16(at)),
                };
            }
            out.push('\n');
        }
        out
    }
}

impl std::fmt::Debug for BytecodeUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BytecodeUnit")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_unit() -> BytecodeUnit {
        // load.const #0; load.const #1; add; return
        BytecodeUnit::from_words(&[
            Opcode::LoadConst.to_raw(),
            0,
            Opcode::LoadConst.to_raw(),
            1,
            Opcode::Add.to_raw(),
            Opcode::Return.to_raw(),
        ])
    }

    #[test]
    fn walk_consumes_exactly() {
        let unit = add_unit();
        assert_eq!(unit.instruction_starts().unwrap(), vec![0, 2, 4, 5]);
    }

    #[test]
    fn truncated_instruction_detected() {
        let unit = BytecodeUnit::from_words(&[Opcode::LoadInt.to_raw(), 7]);
        assert!(matches!(
            unit.instruction_starts(),
            Err(BytecodeError::TruncatedInstruction { bci: 0 })
        ));
    }

    #[test]
    fn rewrite_within_family() {
        let unit = add_unit();
        unit.rewrite_opcode(4, Opcode::AddInt).unwrap();
        assert_eq!(unit.opcode_at(4), Some(Opcode::AddInt));
        // generalizing afterwards is fine too
        unit.rewrite_opcode(4, Opcode::AddBoxed).unwrap();
        assert_eq!(unit.opcode_at(4), Some(Opcode::AddBoxed));
    }

    #[test]
    fn rewrite_rejects_foreign_family() {
        let unit = add_unit();
        assert!(matches!(
            unit.rewrite_opcode(4, Opcode::Sub),
            Err(BytecodeError::ForeignRewrite { bci: 4 })
        ));
    }

    #[test]
    fn rewrite_rejects_length_change() {
        let unit = add_unit();
        assert!(matches!(
            unit.rewrite_opcode(4, Opcode::Add.boxed_form().unwrap()),
            Ok(())
        ));
        let err = unit.rewrite_opcode(0, Opcode::LoadInt).unwrap_err();
        assert!(matches!(err, BytecodeError::LengthChangingRewrite { .. }));
    }

    #[test]
    fn operand_rewrite_pairs_with_opcode_rewrite() {
        // branch.false at bci 2 with a placeholder target
        let unit = BytecodeUnit::from_words(&[
            Opcode::LoadBool.to_raw(),
            1,
            Opcode::BranchFalse.to_raw(),
            0,
            0,
            0,
            Opcode::LoadNull.to_raw(),
            Opcode::Return.to_raw(),
        ]);
        // operands first, then the opcode swap within the family
        unit.rewrite_operand(3, 7);
        unit.rewrite_operand(4, 0);
        unit.rewrite_opcode(2, Opcode::BranchFalseBool).unwrap();
        assert_eq!(unit.opcode_at(2), Some(Opcode::BranchFalseBool));
        assert_eq!(unit.read_u32(3), 7);
        assert_eq!(unit.instruction_starts().unwrap(), vec![0, 2, 6, 7]);
    }

    #[test]
    fn multi_unit_immediates() {
        let bits = (-5i64) as u64;
        let unit = BytecodeUnit::from_words(&[
            Opcode::LoadLong.to_raw(),
            (bits & 0xFFFF) as u16,
            ((bits >> 16) & 0xFFFF) as u16,
            ((bits >> 32) & 0xFFFF) as u16,
            ((bits >> 48) & 0xFFFF) as u16,
            Opcode::Return.to_raw(),
        ]);
        assert_eq!(unit.read_i64(1), -5);
    }
}
