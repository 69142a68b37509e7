//! Instruction encoding
//!
//! Instructions are laid out in a flat stream of 16-bit code units. The
//! opcode occupies exactly one unit; immediates follow at statically fixed
//! offsets with widths determined by their kind. A quickened opcode is
//! always a same-length sibling of its generic form, so any reference
//! computed from an instruction's base offset stays valid after rewriting.

use serde::{Deserialize, Serialize};

/// Kind of an instruction immediate
///
/// Index-like kinds are validated against the bounds of their target table;
/// literal kinds carry an inline value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImmediateKind {
    /// Absolute bytecode index of a branch target (2 units)
    BranchTarget,
    /// Statically known operand stack height (1 unit)
    StackPointer,
    /// Frame slot offset of a local (1 unit)
    FrameIndex,
    /// Logical index into the local descriptor table (1 unit)
    LocalIndex,
    /// Index identifying the sibling root declaring a materialized local (1 unit)
    LocalRoot,
    /// Index into the constant pool (1 unit)
    ConstantIndex,
    /// Index into the branch profile array (1 unit)
    BranchProfile,
    /// Index into the loop counter array (1 unit)
    LoopCounter,
    /// Index identifying an instrumentation probe node (1 unit)
    TagNode,
    /// Inline boolean literal (1 unit)
    ImmBool,
    /// Inline byte literal (1 unit)
    ImmByte,
    /// Inline char literal (1 unit)
    ImmChar,
    /// Inline short literal (1 unit)
    ImmShort,
    /// Inline 32-bit integer literal (2 units)
    ImmInt,
    /// Inline 32-bit float literal (2 units)
    ImmFloat,
    /// Inline 64-bit integer literal (4 units)
    ImmLong,
    /// Inline 64-bit float literal (4 units)
    ImmDouble,
}

impl ImmediateKind {
    /// Encoded width in 16-bit code units
    pub const fn width(self) -> u32 {
        match self {
            Self::BranchTarget | Self::ImmInt | Self::ImmFloat => 2,
            Self::ImmLong | Self::ImmDouble => 4,
            _ => 1,
        }
    }

    /// Whether this kind references an external table (and must be
    /// bounds-checked by the validator) rather than carrying a literal.
    pub const fn is_index_like(self) -> bool {
        matches!(
            self,
            Self::BranchTarget
                | Self::FrameIndex
                | Self::LocalIndex
                | Self::LocalRoot
                | Self::ConstantIndex
                | Self::BranchProfile
                | Self::LoopCounter
                | Self::TagNode
        )
    }
}

/// A single immediate: its kind plus the fixed offset (in code units) from
/// the instruction base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Immediate {
    /// Immediate kind
    pub kind: ImmediateKind,
    /// Offset from the instruction base, in code units
    pub offset: u32,
}

impl Immediate {
    const fn new(kind: ImmediateKind, offset: u32) -> Self {
        Self { kind, offset }
    }
}

macro_rules! imms {
    ($($kind:ident @ $off:expr),* $(,)?) => {{
        const IMMS: &[Immediate] = &[$(Immediate::new(ImmediateKind::$kind, $off)),*];
        IMMS
    }};
}

/// Bytecode opcodes
///
/// Opcode `0` is reserved as invalid. Quickened siblings (`*Int`, `*Boxed`,
/// ...) follow their generic form and share its encoded length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum Opcode {
    /// No operation
    Nop = 1,

    // ==================== Inline literals ====================
    /// Push null
    LoadNull = 2,
    /// Push inline boolean
    LoadBool = 3,
    /// Push inline byte
    LoadByte = 4,
    /// Push inline char
    LoadChar = 5,
    /// Push inline short (widened to int)
    LoadShort = 6,
    /// Push inline 32-bit integer
    LoadInt = 7,
    /// Push inline 32-bit float
    LoadFloat = 8,
    /// Push inline 64-bit integer
    LoadLong = 9,
    /// Push inline 64-bit float
    LoadDouble = 10,
    /// Push a constant-pool entry
    LoadConst = 11,

    // ==================== Stack ====================
    /// Discard the top of stack
    Pop = 12,
    /// Duplicate the top of stack
    Dup = 13,

    // ==================== Locals ====================
    /// Push a local (generic, boxed read)
    LoadLocal = 14,
    /// Push a local cached as boolean
    LoadLocalBool = 15,
    /// Push a local cached as int
    LoadLocalInt = 16,
    /// Push a local cached as long
    LoadLocalLong = 17,
    /// Push a local cached as double
    LoadLocalDouble = 18,
    /// Push a local known to hold boxed values
    LoadLocalBoxed = 19,
    /// Pop into a local (generic)
    StoreLocal = 20,
    /// Pop a boolean into a local
    StoreLocalBool = 21,
    /// Pop an int into a local
    StoreLocalInt = 22,
    /// Pop a long into a local
    StoreLocalLong = 23,
    /// Pop a double into a local
    StoreLocalDouble = 24,
    /// Pop a boxed value into a local
    StoreLocalBoxed = 25,
    /// Reset a local slot to Illegal (block-scope exit)
    ClearLocal = 26,
    /// Push a materialized local of a sibling root
    LoadLocalMat = 27,
    /// Pop into a materialized local of a sibling root
    StoreLocalMat = 28,

    // ==================== Arithmetic ====================
    /// Addition (generic)
    Add = 29,
    /// Addition specialized for two ints
    AddInt = 30,
    /// Addition specialized for two longs
    AddLong = 31,
    /// Addition specialized for two doubles
    AddDouble = 32,
    /// Addition, terminal boxed form
    AddBoxed = 33,
    /// Subtraction (generic)
    Sub = 34,
    /// Subtraction specialized for two ints
    SubInt = 35,
    /// Subtraction specialized for two longs
    SubLong = 36,
    /// Subtraction specialized for two doubles
    SubDouble = 37,
    /// Subtraction, terminal boxed form
    SubBoxed = 38,
    /// Multiplication (generic)
    Mul = 39,
    /// Multiplication specialized for two ints
    MulInt = 40,
    /// Multiplication specialized for two longs
    MulLong = 41,
    /// Multiplication specialized for two doubles
    MulDouble = 42,
    /// Multiplication, terminal boxed form
    MulBoxed = 43,
    /// Division (generic)
    Div = 44,
    /// Division specialized for two ints
    DivInt = 45,
    /// Division specialized for two longs
    DivLong = 46,
    /// Division specialized for two doubles
    DivDouble = 47,
    /// Division, terminal boxed form
    DivBoxed = 48,
    /// Arithmetic negation
    Neg = 49,
    /// Boolean negation
    Not = 50,

    // ==================== Comparison ====================
    /// Less-than (generic)
    Lt = 51,
    /// Less-than specialized for two ints
    LtInt = 52,
    /// Less-than, terminal boxed form
    LtBoxed = 53,
    /// Less-or-equal (generic)
    Le = 54,
    /// Less-or-equal specialized for two ints
    LeInt = 55,
    /// Less-or-equal, terminal boxed form
    LeBoxed = 56,
    /// Greater-than (generic)
    Gt = 57,
    /// Greater-than specialized for two ints
    GtInt = 58,
    /// Greater-than, terminal boxed form
    GtBoxed = 59,
    /// Greater-or-equal (generic)
    Ge = 60,
    /// Greater-or-equal specialized for two ints
    GeInt = 61,
    /// Greater-or-equal, terminal boxed form
    GeBoxed = 62,
    /// Equality (generic)
    Eq = 63,
    /// Equality specialized for two ints
    EqInt = 64,
    /// Equality, terminal boxed form
    EqBoxed = 65,

    // ==================== Control flow ====================
    /// Unconditional forward jump
    Branch = 66,
    /// Loop back-edge: safepoint poll, loop counter, OSR candidate
    BranchBackward = 67,
    /// Conditional jump when the condition is falsy (generic)
    BranchFalse = 68,
    /// Conditional jump specialized for boolean conditions
    BranchFalseBool = 69,

    // ==================== Terminal ====================
    /// Return the top of stack
    Return = 70,
    /// Suspend the activation, yielding the top of stack
    Yield = 71,
    /// Throw the top of stack as a language exception
    Throw = 72,

    // ==================== Instrumentation ====================
    /// Notify the registered probe that execution reached this site
    TagProbe = 73,
}

/// Number of defined opcodes; raw values are valid in `1..=OPCODE_COUNT`.
pub const OPCODE_COUNT: u16 = 73;

impl Opcode {
    /// Convert from a raw code unit
    pub fn from_raw(raw: u16) -> Option<Self> {
        if raw == 0 || raw > OPCODE_COUNT {
            return None;
        }
        // SAFETY-free decode: discriminants are dense in 1..=OPCODE_COUNT
        // and checked above, but spell the match out to stay `deny(unsafe)`.
        Some(match raw {
            1 => Self::Nop,
            2 => Self::LoadNull,
            3 => Self::LoadBool,
            4 => Self::LoadByte,
            5 => Self::LoadChar,
            6 => Self::LoadShort,
            7 => Self::LoadInt,
            8 => Self::LoadFloat,
            9 => Self::LoadLong,
            10 => Self::LoadDouble,
            11 => Self::LoadConst,
            12 => Self::Pop,
            13 => Self::Dup,
            14 => Self::LoadLocal,
            15 => Self::LoadLocalBool,
            16 => Self::LoadLocalInt,
            17 => Self::LoadLocalLong,
            18 => Self::LoadLocalDouble,
            19 => Self::LoadLocalBoxed,
            20 => Self::StoreLocal,
            21 => Self::StoreLocalBool,
            22 => Self::StoreLocalInt,
            23 => Self::StoreLocalLong,
            24 => Self::StoreLocalDouble,
            25 => Self::StoreLocalBoxed,
            26 => Self::ClearLocal,
            27 => Self::LoadLocalMat,
            28 => Self::StoreLocalMat,
            29 => Self::Add,
            30 => Self::AddInt,
            31 => Self::AddLong,
            32 => Self::AddDouble,
            33 => Self::AddBoxed,
            34 => Self::Sub,
            35 => Self::SubInt,
            36 => Self::SubLong,
            37 => Self::SubDouble,
            38 => Self::SubBoxed,
            39 => Self::Mul,
            40 => Self::MulInt,
            41 => Self::MulLong,
            42 => Self::MulDouble,
            43 => Self::MulBoxed,
            44 => Self::Div,
            45 => Self::DivInt,
            46 => Self::DivLong,
            47 => Self::DivDouble,
            48 => Self::DivBoxed,
            49 => Self::Neg,
            50 => Self::Not,
            51 => Self::Lt,
            52 => Self::LtInt,
            53 => Self::LtBoxed,
            54 => Self::Le,
            55 => Self::LeInt,
            56 => Self::LeBoxed,
            57 => Self::Gt,
            58 => Self::GtInt,
            59 => Self::GtBoxed,
            60 => Self::Ge,
            61 => Self::GeInt,
            62 => Self::GeBoxed,
            63 => Self::Eq,
            64 => Self::EqInt,
            65 => Self::EqBoxed,
            66 => Self::Branch,
            67 => Self::BranchBackward,
            68 => Self::BranchFalse,
            69 => Self::BranchFalseBool,
            70 => Self::Return,
            71 => Self::Yield,
            72 => Self::Throw,
            73 => Self::TagProbe,
            _ => unreachable!(),
        })
    }

    /// Convert to a raw code unit
    #[inline]
    pub const fn to_raw(self) -> u16 {
        self as u16
    }

    /// Immediate layout for this opcode
    pub const fn immediates(self) -> &'static [Immediate] {
        match self {
            Self::LoadBool => imms![ImmBool @ 1],
            Self::LoadByte => imms![ImmByte @ 1],
            Self::LoadChar => imms![ImmChar @ 1],
            Self::LoadShort => imms![ImmShort @ 1],
            Self::LoadInt => imms![ImmInt @ 1],
            Self::LoadFloat => imms![ImmFloat @ 1],
            Self::LoadLong => imms![ImmLong @ 1],
            Self::LoadDouble => imms![ImmDouble @ 1],
            Self::LoadConst => imms![ConstantIndex @ 1],
            Self::LoadLocal
            | Self::LoadLocalBool
            | Self::LoadLocalInt
            | Self::LoadLocalLong
            | Self::LoadLocalDouble
            | Self::LoadLocalBoxed
            | Self::StoreLocal
            | Self::StoreLocalBool
            | Self::StoreLocalInt
            | Self::StoreLocalLong
            | Self::StoreLocalDouble
            | Self::StoreLocalBoxed
            | Self::ClearLocal => imms![FrameIndex @ 1],
            Self::LoadLocalMat | Self::StoreLocalMat => {
                imms![LocalRoot @ 1, LocalIndex @ 2]
            }
            Self::Branch => imms![BranchTarget @ 1],
            Self::BranchBackward => imms![BranchTarget @ 1, LoopCounter @ 3],
            Self::BranchFalse | Self::BranchFalseBool => {
                imms![BranchTarget @ 1, BranchProfile @ 3]
            }
            Self::Yield => imms![StackPointer @ 1],
            Self::TagProbe => imms![TagNode @ 1],
            _ => &[],
        }
    }

    /// Total encoded length in code units (opcode + immediates)
    pub const fn len(self) -> u32 {
        let imms = self.immediates();
        let mut total = 1;
        let mut i = 0;
        while i < imms.len() {
            total += imms[i].kind.width();
            i += 1;
        }
        total
    }

    /// The generic form of this opcode (`self` if already generic)
    pub const fn generic(self) -> Self {
        match self {
            Self::LoadLocalBool
            | Self::LoadLocalInt
            | Self::LoadLocalLong
            | Self::LoadLocalDouble
            | Self::LoadLocalBoxed => Self::LoadLocal,
            Self::StoreLocalBool
            | Self::StoreLocalInt
            | Self::StoreLocalLong
            | Self::StoreLocalDouble
            | Self::StoreLocalBoxed => Self::StoreLocal,
            Self::AddInt | Self::AddLong | Self::AddDouble | Self::AddBoxed => Self::Add,
            Self::SubInt | Self::SubLong | Self::SubDouble | Self::SubBoxed => Self::Sub,
            Self::MulInt | Self::MulLong | Self::MulDouble | Self::MulBoxed => Self::Mul,
            Self::DivInt | Self::DivLong | Self::DivDouble | Self::DivBoxed => Self::Div,
            Self::LtInt | Self::LtBoxed => Self::Lt,
            Self::LeInt | Self::LeBoxed => Self::Le,
            Self::GtInt | Self::GtBoxed => Self::Gt,
            Self::GeInt | Self::GeBoxed => Self::Ge,
            Self::EqInt | Self::EqBoxed => Self::Eq,
            Self::BranchFalseBool => Self::BranchFalse,
            other => other,
        }
    }

    /// The terminal fully-boxed sibling of this opcode's family, if the
    /// family quickens at all. This is the fixed point every legal rewrite
    /// sequence converges to.
    pub const fn boxed_form(self) -> Option<Self> {
        Some(match self.generic() {
            Self::LoadLocal => Self::LoadLocalBoxed,
            Self::StoreLocal => Self::StoreLocalBoxed,
            Self::Add => Self::AddBoxed,
            Self::Sub => Self::SubBoxed,
            Self::Mul => Self::MulBoxed,
            Self::Div => Self::DivBoxed,
            Self::Lt => Self::LtBoxed,
            Self::Le => Self::LeBoxed,
            Self::Gt => Self::GtBoxed,
            Self::Ge => Self::GeBoxed,
            Self::Eq => Self::EqBoxed,
            Self::BranchFalse => Self::BranchFalseBool,
            _ => return None,
        })
    }

    /// Whether this opcode is a quickened sibling rather than a generic form
    #[inline]
    pub fn is_quickened(self) -> bool {
        self.generic() != self
    }

    /// All defined opcodes, for exhaustive table checks
    pub fn all() -> impl Iterator<Item = Opcode> {
        (1..=OPCODE_COUNT).filter_map(Opcode::from_raw)
    }

    /// Instruction mnemonic
    pub const fn name(self) -> &'static str {
        match self {
            Self::Nop => "nop",
            Self::LoadNull => "load.null",
            Self::LoadBool => "load.bool",
            Self::LoadByte => "load.byte",
            Self::LoadChar => "load.char",
            Self::LoadShort => "load.short",
            Self::LoadInt => "load.int",
            Self::LoadFloat => "load.float",
            Self::LoadLong => "load.long",
            Self::LoadDouble => "load.double",
            Self::LoadConst => "load.const",
            Self::Pop => "pop",
            Self::Dup => "dup",
            Self::LoadLocal => "load.local",
            Self::LoadLocalBool => "load.local$bool",
            Self::LoadLocalInt => "load.local$int",
            Self::LoadLocalLong => "load.local$long",
            Self::LoadLocalDouble => "load.local$double",
            Self::LoadLocalBoxed => "load.local$boxed",
            Self::StoreLocal => "store.local",
            Self::StoreLocalBool => "store.local$bool",
            Self::StoreLocalInt => "store.local$int",
            Self::StoreLocalLong => "store.local$long",
            Self::StoreLocalDouble => "store.local$double",
            Self::StoreLocalBoxed => "store.local$boxed",
            Self::ClearLocal => "clear.local",
            Self::LoadLocalMat => "load.local.mat",
            Self::StoreLocalMat => "store.local.mat",
            Self::Add => "add",
            Self::AddInt => "add$int",
            Self::AddLong => "add$long",
            Self::AddDouble => "add$double",
            Self::AddBoxed => "add$boxed",
            Self::Sub => "sub",
            Self::SubInt => "sub$int",
            Self::SubLong => "sub$long",
            Self::SubDouble => "sub$double",
            Self::SubBoxed => "sub$boxed",
            Self::Mul => "mul",
            Self::MulInt => "mul$int",
            Self::MulLong => "mul$long",
            Self::MulDouble => "mul$double",
            Self::MulBoxed => "mul$boxed",
            Self::Div => "div",
            Self::DivInt => "div$int",
            Self::DivLong => "div$long",
            Self::DivDouble => "div$double",
            Self::DivBoxed => "div$boxed",
            Self::Neg => "neg",
            Self::Not => "not",
            Self::Lt => "lt",
            Self::LtInt => "lt$int",
            Self::LtBoxed => "lt$boxed",
            Self::Le => "le",
            Self::LeInt => "le$int",
            Self::LeBoxed => "le$boxed",
            Self::Gt => "gt",
            Self::GtInt => "gt$int",
            Self::GtBoxed => "gt$boxed",
            Self::Ge => "ge",
            Self::GeInt => "ge$int",
            Self::GeBoxed => "ge$boxed",
            Self::Eq => "eq",
            Self::EqInt => "eq$int",
            Self::EqBoxed => "eq$boxed",
            Self::Branch => "branch",
            Self::BranchBackward => "branch.backward",
            Self::BranchFalse => "branch.false",
            Self::BranchFalseBool => "branch.false$bool",
            Self::Return => "return",
            Self::Yield => "yield",
            Self::Throw => "throw",
            Self::TagProbe => "tag.probe",
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_roundtrip() {
        for op in Opcode::all() {
            assert_eq!(Opcode::from_raw(op.to_raw()), Some(op));
        }
        assert_eq!(Opcode::from_raw(0), None);
        assert_eq!(Opcode::from_raw(OPCODE_COUNT + 1), None);
    }

    #[test]
    fn quickened_siblings_share_length() {
        for op in Opcode::all() {
            assert_eq!(
                op.len(),
                op.generic().len(),
                "{} must encode like its generic form {}",
                op,
                op.generic()
            );
            if let Some(boxed) = op.boxed_form() {
                assert_eq!(op.len(), boxed.len());
            }
        }
    }

    #[test]
    fn boxed_form_is_fixed_point() {
        for op in Opcode::all() {
            if let Some(boxed) = op.boxed_form() {
                assert_eq!(boxed.boxed_form(), Some(boxed));
            }
        }
    }

    #[test]
    fn immediate_offsets_are_packed() {
        // Immediates must tile the instruction after the opcode unit with
        // no overlap and no gap.
        for op in Opcode::all() {
            let mut expected = 1;
            for imm in op.immediates() {
                assert_eq!(imm.offset, expected, "{}", op);
                expected += imm.kind.width();
            }
            assert_eq!(op.len(), expected, "{}", op);
        }
    }

    #[test]
    fn names_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for op in Opcode::all() {
            assert!(seen.insert(op.name()), "duplicate mnemonic {}", op.name());
        }
    }
}
