//! USSE instruction and operand types
//!
//! Defines the decoded instruction model shared by the analyzer and the
//! code generation backends.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

bitflags! {
    /// Source/destination modifier flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RegisterFlags: u8 {
        const ABSOLUTE = 0x01;
        const NEGATIVE = 0x02;
        /// General purpose internal register, not advanced by external repeats
        const GPI = 0x04;
    }
}

//=============================================================================
// PREDICATES
//=============================================================================

/// 3-bit predicate encoding
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub enum ExtPredicate {
    #[default]
    None = 0,
    P0 = 1,
    P1 = 2,
    P2 = 3,
    P3 = 4,
    NegP0 = 5,
    NegP1 = 6,
    /// Per-instance predicate
    Pn = 7,
}

impl From<u8> for ExtPredicate {
    fn from(v: u8) -> Self {
        match v & 7 {
            0 => ExtPredicate::None,
            1 => ExtPredicate::P0,
            2 => ExtPredicate::P1,
            3 => ExtPredicate::P2,
            4 => ExtPredicate::P3,
            5 => ExtPredicate::NegP0,
            6 => ExtPredicate::NegP1,
            _ => ExtPredicate::Pn,
        }
    }
}

impl ExtPredicate {
    /// Predicate register this condition reads, if any
    pub fn register(self) -> Option<u8> {
        match self {
            Self::P0 | Self::NegP0 => Some(0),
            Self::P1 | Self::NegP1 => Some(1),
            Self::P2 => Some(2),
            Self::P3 => Some(3),
            Self::None | Self::Pn => None,
        }
    }

    pub fn is_negated(self) -> bool {
        matches!(self, Self::NegP0 | Self::NegP1)
    }

    /// True if a write to predicate register `index` changes this condition
    pub fn aliases(self, index: u8) -> bool {
        self.register() == Some(index)
    }
}

/// 2-bit predicate encoding used by the short instruction forms
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ShortPredicate {
    #[default]
    None = 0,
    P0 = 1,
    P1 = 2,
    NegP0 = 3,
}

impl From<u8> for ShortPredicate {
    fn from(v: u8) -> Self {
        match v & 3 {
            0 => ShortPredicate::None,
            1 => ShortPredicate::P0,
            2 => ShortPredicate::P1,
            _ => ShortPredicate::NegP0,
        }
    }
}

impl From<ShortPredicate> for ExtPredicate {
    fn from(p: ShortPredicate) -> Self {
        match p {
            ShortPredicate::None => ExtPredicate::None,
            ShortPredicate::P0 => ExtPredicate::P0,
            ShortPredicate::P1 => ExtPredicate::P1,
            ShortPredicate::NegP0 => ExtPredicate::NegP0,
        }
    }
}

//=============================================================================
// OPERANDS
//=============================================================================

/// Register bank an operand lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RegisterBank {
    #[default]
    Temp,
    PrimAttr,
    Output,
    SecAttr,
    FpInternal,
    Special,
    Global,
    FpConstant,
    Immediate,
    Index,
    Indexed1,
    Indexed2,
    Predicate,
    Invalid,
}

impl RegisterBank {
    /// Banks scaled by the SLMSI repeat multiplier
    pub fn uses_repeat_multiplier(self) -> bool {
        matches!(
            self,
            Self::Temp | Self::PrimAttr | Self::Output | Self::SecAttr | Self::Predicate
        )
    }

    pub fn prefix(self) -> &'static str {
        match self {
            Self::Temp => "r",
            Self::PrimAttr => "pa",
            Self::Output => "o",
            Self::SecAttr => "sa",
            Self::FpInternal => "i",
            Self::Special => "s",
            Self::Global => "g",
            Self::FpConstant => "c",
            Self::Immediate => "#",
            Self::Index => "idx",
            Self::Indexed1 => "x1_",
            Self::Indexed2 => "x2_",
            Self::Predicate => "p",
            Self::Invalid => "?",
        }
    }
}

/// Operand data type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DataType {
    Int8,
    Int16,
    Int32,
    /// 10-bit fixed point color
    C10,
    F16,
    #[default]
    F32,
    Uint8,
    Uint16,
    Uint32,
    /// 8-bit offset format
    O8,
    Unknown,
}

impl DataType {
    /// Decode the hardware data type field, which follows this enum's order
    pub fn from_index(index: u32) -> Self {
        match index {
            0 => Self::Int8,
            1 => Self::Int16,
            2 => Self::Int32,
            3 => Self::C10,
            4 => Self::F16,
            5 => Self::F32,
            6 => Self::Uint8,
            7 => Self::Uint16,
            8 => Self::Uint32,
            9 => Self::O8,
            _ => Self::Unknown,
        }
    }

    /// 32-bit type of the same kind, used for internal registers
    pub fn widened(self) -> Self {
        match self {
            Self::F16 => Self::F32,
            Self::Int8 | Self::Int16 => Self::Int32,
            Self::Uint8 | Self::Uint16 | Self::O8 => Self::Uint32,
            other => other,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::F16 | Self::F32)
    }

    pub fn is_signed_integer(self) -> bool {
        matches!(self, Self::Int8 | Self::Int16 | Self::Int32)
    }

    pub fn is_unsigned_integer(self) -> bool {
        matches!(self, Self::Uint8 | Self::Uint16 | Self::Uint32 | Self::O8)
    }

    pub fn is_integer(self) -> bool {
        self.is_signed_integer() || self.is_unsigned_integer()
    }

    /// Size in bytes of one component
    pub fn size(self) -> u32 {
        match self {
            Self::Int8 | Self::Uint8 | Self::O8 => 1,
            Self::Int16 | Self::Uint16 | Self::F16 => 2,
            // Stored unpacked, one per 32-bit slot
            Self::C10 => 4,
            Self::Int32 | Self::Uint32 | Self::F32 => 4,
            Self::Unknown => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Int8 => "s8",
            Self::Int16 => "s16",
            Self::Int32 => "s32",
            Self::C10 => "c10",
            Self::F16 => "f16",
            Self::F32 => "f32",
            Self::Uint8 => "u8",
            Self::Uint16 => "u16",
            Self::Uint32 => "u32",
            Self::O8 => "o8",
            Self::Unknown => "unk",
        }
    }
}

/// One channel selector of a swizzle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SwizzleChannel {
    #[default]
    X,
    Y,
    Z,
    W,
    Zero,
    One,
    Two,
    Half,
    Undefined,
}

impl SwizzleChannel {
    /// Decode the 3-bit hardware channel encoding
    pub fn from_bits(bits: u32) -> Self {
        match bits & 7 {
            0 => Self::X,
            1 => Self::Y,
            2 => Self::Z,
            3 => Self::W,
            4 => Self::Zero,
            5 => Self::One,
            6 => Self::Two,
            _ => Self::Half,
        }
    }

    /// Register component this channel reads, or None for constant channels
    pub fn component(self) -> Option<u32> {
        match self {
            Self::X => Some(0),
            Self::Y => Some(1),
            Self::Z => Some(2),
            Self::W => Some(3),
            _ => None,
        }
    }

    /// Constant value of a constant channel
    pub fn constant(self) -> Option<f32> {
        match self {
            Self::Zero => Some(0.0),
            Self::One => Some(1.0),
            Self::Two => Some(2.0),
            Self::Half => Some(0.5),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Self::X => 'x',
            Self::Y => 'y',
            Self::Z => 'z',
            Self::W => 'w',
            Self::Zero => '0',
            Self::One => '1',
            Self::Two => '2',
            Self::Half => 'h',
            Self::Undefined => '?',
        }
    }
}

pub type Swizzle4 = [SwizzleChannel; 4];

pub const SWIZZLE_XYZW: Swizzle4 = [
    SwizzleChannel::X,
    SwizzleChannel::Y,
    SwizzleChannel::Z,
    SwizzleChannel::W,
];

pub const SWIZZLE_XXXX: Swizzle4 = [SwizzleChannel::X; 4];

pub const SWIZZLE_UNDEFINED: Swizzle4 = [SwizzleChannel::Undefined; 4];

/// Operand slot, selecting the row of the repeat tables
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OperandSlot {
    #[default]
    Src0 = 0,
    Src1 = 1,
    Src2 = 2,
    Dest = 3,
}

/// A decoded register operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Operand {
    /// Register number in 32-bit slots
    pub num: u32,
    pub bank: RegisterBank,
    pub flags: RegisterFlags,
    pub swizzle: Swizzle4,
    pub data_type: DataType,
    pub slot: OperandSlot,
}

impl Operand {
    pub fn new(slot: OperandSlot) -> Self {
        Self {
            num: 0,
            bank: RegisterBank::Invalid,
            flags: RegisterFlags::empty(),
            swizzle: SWIZZLE_XYZW,
            data_type: DataType::F32,
            slot,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.bank != RegisterBank::Invalid
    }
}

impl Default for Operand {
    fn default() -> Self {
        Self::new(OperandSlot::Src0)
    }
}

//=============================================================================
// INSTRUCTIONS
//=============================================================================

/// Classified opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Opcode {
    /// Unknown or reserved encoding
    #[default]
    Illegal,

    // Data movement
    Vmov,
    Vmovc,
    Vmovcu8,
    Vpck,
    Vldst,

    // Vector float ALU
    Vmad,
    Vf16mad,
    Vdp,
    Vf16dp,
    Vmul,
    Vadd,
    Vsub,
    Vfrc,
    Vdsx,
    Vdsy,
    Vmin,
    Vmax,
    Vf16mul,
    Vf16add,
    Vf16sub,
    Vf16frc,
    Vf16dsx,
    Vf16dsy,
    Vf16min,
    Vf16max,
    Vrcp,
    Vrsq,
    Vlog,
    Vexp,
    Vdual,
    Sop2,

    // Dual-issue sub-operations
    Vssq,
    Frsq,
    Frcp,
    Fmad,
    Fadd,
    Fmul,
    Fsubflr,
    Fexp,
    Flog,

    // Integer ALU
    Iadd8,
    Isub8,
    Imul8,
    Iaddu8,
    Isubu8,
    Imulu8,
    Fpmul8,
    Fpadd8,
    Fpsub8,
    Iadd16,
    Isub16,
    Imul16,
    Iaddu16,
    Isubu16,
    Imulu16,
    Iadd32,
    Isub32,
    Iaddu32,
    Isubu32,

    // Bitwise
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Rol,
    Asr,

    // Test
    Vtst,
    Vtstmsk,

    // Texture
    Smp,

    // Flow control and special
    Br,
    Kill,
    Smlsi,
    Nop,
    Phas,
    Spec,
}

impl Opcode {
    /// Subtract opcodes compare their operands directly in test instructions
    pub fn is_sub(self) -> bool {
        matches!(
            self,
            Self::Vsub
                | Self::Vf16sub
                | Self::Isub8
                | Self::Isubu8
                | Self::Isub16
                | Self::Isubu16
                | Self::Isub32
                | Self::Isubu32
                | Self::Fpsub8
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Illegal => "ILLEGAL",
            Self::Vmov => "VMOV",
            Self::Vmovc => "VMOVC",
            Self::Vmovcu8 => "VMOVCU8",
            Self::Vpck => "VPCK",
            Self::Vldst => "VLDST",
            Self::Vmad => "VMAD",
            Self::Vf16mad => "VF16MAD",
            Self::Vdp => "VDP",
            Self::Vf16dp => "VF16DP",
            Self::Vmul => "VMUL",
            Self::Vadd => "VADD",
            Self::Vsub => "VSUB",
            Self::Vfrc => "VFRC",
            Self::Vdsx => "VDSX",
            Self::Vdsy => "VDSY",
            Self::Vmin => "VMIN",
            Self::Vmax => "VMAX",
            Self::Vf16mul => "VF16MUL",
            Self::Vf16add => "VF16ADD",
            Self::Vf16sub => "VF16SUB",
            Self::Vf16frc => "VF16FRC",
            Self::Vf16dsx => "VF16DSX",
            Self::Vf16dsy => "VF16DSY",
            Self::Vf16min => "VF16MIN",
            Self::Vf16max => "VF16MAX",
            Self::Vrcp => "VRCP",
            Self::Vrsq => "VRSQ",
            Self::Vlog => "VLOG",
            Self::Vexp => "VEXP",
            Self::Vdual => "VDUAL",
            Self::Sop2 => "SOP2",
            Self::Vssq => "VSSQ",
            Self::Frsq => "FRSQ",
            Self::Frcp => "FRCP",
            Self::Fmad => "FMAD",
            Self::Fadd => "FADD",
            Self::Fmul => "FMUL",
            Self::Fsubflr => "FSUBFLR",
            Self::Fexp => "FEXP",
            Self::Flog => "FLOG",
            Self::Iadd8 => "IADD8",
            Self::Isub8 => "ISUB8",
            Self::Imul8 => "IMUL8",
            Self::Iaddu8 => "IADDU8",
            Self::Isubu8 => "ISUBU8",
            Self::Imulu8 => "IMULU8",
            Self::Fpmul8 => "FPMUL8",
            Self::Fpadd8 => "FPADD8",
            Self::Fpsub8 => "FPSUB8",
            Self::Iadd16 => "IADD16",
            Self::Isub16 => "ISUB16",
            Self::Imul16 => "IMUL16",
            Self::Iaddu16 => "IADDU16",
            Self::Isubu16 => "ISUBU16",
            Self::Imulu16 => "IMULU16",
            Self::Iadd32 => "IADD32",
            Self::Isub32 => "ISUB32",
            Self::Iaddu32 => "IADDU32",
            Self::Isubu32 => "ISUBU32",
            Self::And => "AND",
            Self::Or => "OR",
            Self::Xor => "XOR",
            Self::Shl => "SHL",
            Self::Shr => "SHR",
            Self::Rol => "ROL",
            Self::Asr => "ASR",
            Self::Vtst => "VTST",
            Self::Vtstmsk => "VTSTMSK",
            Self::Smp => "SMP",
            Self::Br => "BR",
            Self::Kill => "KILL",
            Self::Smlsi => "SMLSI",
            Self::Nop => "NOP",
            Self::Phas => "PHAS",
            Self::Spec => "SPEC",
        }
    }
}

/// How successive repeat iterations advance operand registers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RepeatMode {
    /// Per-iteration increments come from the last SMLSI
    #[default]
    Slmsi,
    Internal,
    External,
    Both,
}

impl From<u32> for RepeatMode {
    fn from(v: u32) -> Self {
        match v & 3 {
            0 => Self::Slmsi,
            1 => Self::Internal,
            2 => Self::External,
            _ => Self::Both,
        }
    }
}

/// VMOV move flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MoveType {
    Unconditional,
    Conditional,
    ConditionalU8,
}

/// Conditional move comparison of src0 against zero
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareMethod {
    NotEqualZero,
    EqualZero,
    LessThanZero,
    LessEqualZero,
}

impl From<u32> for CompareMethod {
    fn from(v: u32) -> Self {
        match v & 3 {
            0 => Self::NotEqualZero,
            1 => Self::EqualZero,
            2 => Self::LessThanZero,
            _ => Self::LessEqualZero,
        }
    }
}

/// Comparison performed by test instructions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestCondition {
    NotEqual,
    Equal,
    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,
    Always,
}

impl TestCondition {
    /// Combine the hardware zero/sign test fields
    pub fn from_fields(zero_test: u32, sign_test: u32) -> Self {
        let include_equal = zero_test == 1;
        match (include_equal, sign_test & 3) {
            (false, 0) => Self::NotEqual,
            (false, 1) => Self::LessThan,
            (false, 2) => Self::GreaterThan,
            (true, 0) => Self::Equal,
            (true, 1) => Self::LessEqual,
            (true, 2) => Self::GreaterEqual,
            _ => Self::Always,
        }
    }
}

/// Complex (transcendental) function selected by VCOMP
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComplexOp {
    Rcp,
    Rsq,
    Log,
    Exp,
}

/// SOP2 blend-style colour operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sop2Op {
    Add,
    Sub,
    Min,
    Max,
}

impl Sop2Op {
    pub fn from_bits(bits: u32) -> Self {
        match bits & 3 {
            0 => Self::Add,
            1 => Self::Sub,
            2 => Self::Min,
            _ => Self::Max,
        }
    }
}

/// SOP2 factor selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sop2Select {
    Zero,
    Src1Color,
    Src2Color,
    Src1Alpha,
    Src2Alpha,
    /// Saturate and scale selectors have no emission rule
    Unsupported(u8),
}

impl Sop2Select {
    pub fn color(bits: u32) -> Self {
        match bits {
            0 => Self::Zero,
            1 => Self::Src1Color,
            2 => Self::Src2Color,
            3 => Self::Src1Alpha,
            4 => Self::Src2Alpha,
            other => Self::Unsupported(other as u8),
        }
    }

    pub fn alpha(bits: u32) -> Self {
        match bits {
            0 => Self::Zero,
            1 => Self::Src1Alpha,
            2 => Self::Src2Alpha,
            other => Self::Unsupported(other as u8),
        }
    }
}

/// Blend factors and complement modifiers of one SOP2
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Sop2Detail {
    pub color_op: Sop2Op,
    pub alpha_op: Sop2Op,
    pub color_sel: [Sop2Select; 2],
    pub alpha_sel: [Sop2Select; 2],
    /// Complement (1 - x) of the selected colour factors
    pub color_complement: [bool; 2],
    pub alpha_complement: [bool; 2],
    /// Complement src1 colour and alpha before the factors are applied
    pub src1_color_complement: bool,
    pub src1_alpha_complement: bool,
}

/// One half of a dual-issue instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DualOp {
    pub opcode: Opcode,
    pub dest: Operand,
    pub srcs: [Operand; 3],
    pub src_count: u8,
    pub write_mask: u8,
    pub source_mask: u8,
}

/// Family-specific decoded fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InstructionDetail {
    #[default]
    None,
    Move {
        move_type: MoveType,
        compare: CompareMethod,
    },
    Pack {
        /// Normalise between integer range and [0, 1] or [-1, 1]
        scale: bool,
    },
    Dot {
        /// Components reduced per dot product
        components: u8,
        /// Write mask rotates one channel per repeat
        rotate_mask: bool,
    },
    Complex {
        op: ComplexOp,
        source_mask: u8,
    },
    Test {
        /// ALU operation whose result is compared against zero
        alu_op: Opcode,
        condition: TestCondition,
        source_mask: u8,
    },
    Sop2(Sop2Detail),
    Bitwise {
        /// Inline immediate for src2, already inverted if requested
        immediate: Option<u32>,
        /// Complement src2 after loading it
        invert: bool,
        /// Rotate amount applied to src2 before the operation
        src2_rotate: u8,
    },
    Sample {
        dim: u8,
        lod_mode: u8,
        sb_mode: u8,
    },
    Branch {
        /// Signed relative word offset
        offset: i32,
        exception: bool,
    },
    RepeatSetup {
        /// Increments for src0, src1, src2, dest
        increments: [u8; 4],
        /// Increment is a packed swizzle of 2-bit steps rather than a stride
        swizzle_mode: [bool; 4],
    },
    LoadStore {
        /// Number of 32-bit values fetched
        count: u8,
        /// Buffer index register number
        buffer: u8,
        /// Word offset into the buffer
        base: u32,
        /// Offset comes from a register instead of an immediate
        register_indexed: bool,
        is_load: bool,
    },
    Dual([DualOp; 2]),
}

/// A decoded USSE instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instruction {
    pub raw: u64,
    pub opcode: Opcode,
    pub pred: ExtPredicate,
    pub dest: Operand,
    pub src0: Operand,
    pub src1: Operand,
    pub src2: Operand,
    pub dest_mask: u8,
    /// Extra iterations; the instruction runs `repeat_count + 1` times
    pub repeat_count: u8,
    pub repeat_mode: RepeatMode,
    pub detail: InstructionDetail,
}

impl Instruction {
    pub fn new(raw: u64, opcode: Opcode) -> Self {
        Self {
            raw,
            opcode,
            pred: ExtPredicate::None,
            dest: Operand::new(OperandSlot::Dest),
            src0: Operand::new(OperandSlot::Src0),
            src1: Operand::new(OperandSlot::Src1),
            src2: Operand::new(OperandSlot::Src2),
            dest_mask: 0,
            repeat_count: 0,
            repeat_mode: RepeatMode::Slmsi,
            detail: InstructionDetail::None,
        }
    }

    /// Sentinel for encodings no pattern matches
    pub fn illegal(raw: u64) -> Self {
        Self::new(raw, Opcode::Illegal)
    }

    pub fn is_illegal(&self) -> bool {
        self.opcode == Opcode::Illegal
    }

    pub fn iterations(&self) -> u32 {
        self.repeat_count as u32 + 1
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.flags.contains(RegisterFlags::NEGATIVE) {
            write!(f, "-")?;
        }
        if self.flags.contains(RegisterFlags::ABSOLUTE) {
            write!(f, "|")?;
        }
        write!(f, "{}{}", self.bank.prefix(), self.num)?;
        if self.swizzle != SWIZZLE_XYZW {
            write!(f, ".")?;
            for ch in self.swizzle {
                write!(f, "{}", ch.as_char())?;
            }
        }
        if self.flags.contains(RegisterFlags::ABSOLUTE) {
            write!(f, "|")?;
        }
        Ok(())
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}: ", self.raw)?;
        if self.pred != ExtPredicate::None {
            write!(f, "{:?} ", self.pred)?;
        }
        write!(f, "{}", self.opcode.name())?;
        if self.repeat_count > 0 {
            write!(f, ".rpt{}", self.iterations())?;
        }
        for op in [&self.dest, &self.src0, &self.src1, &self.src2] {
            if op.is_valid() {
                write!(f, " {}", op)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicate_aliasing() {
        assert!(ExtPredicate::P0.aliases(0));
        assert!(ExtPredicate::NegP0.aliases(0));
        assert!(ExtPredicate::NegP1.aliases(1));
        assert!(!ExtPredicate::P2.aliases(0));
        assert!(!ExtPredicate::None.aliases(0));
        assert_eq!(ExtPredicate::from(ShortPredicate::NegP0), ExtPredicate::NegP0);
    }

    #[test]
    fn test_swizzle_channel_bits() {
        assert_eq!(SwizzleChannel::from_bits(3), SwizzleChannel::W);
        assert_eq!(SwizzleChannel::from_bits(7), SwizzleChannel::Half);
        assert_eq!(SwizzleChannel::Half.constant(), Some(0.5));
        assert_eq!(SwizzleChannel::Z.component(), Some(2));
    }

    #[test]
    fn test_test_condition_fields() {
        assert_eq!(TestCondition::from_fields(0, 0), TestCondition::NotEqual);
        assert_eq!(TestCondition::from_fields(1, 1), TestCondition::LessEqual);
        assert_eq!(TestCondition::from_fields(2, 2), TestCondition::GreaterThan);
        assert_eq!(TestCondition::from_fields(1, 3), TestCondition::Always);
    }

    #[test]
    fn test_instruction_display() {
        let mut inst = Instruction::new(0x1234, Opcode::Vmov);
        inst.dest.bank = RegisterBank::Output;
        inst.dest.num = 0;
        inst.src1.bank = RegisterBank::PrimAttr;
        inst.src1.num = 4;
        inst.src1.swizzle = SWIZZLE_XXXX;
        let text = format!("{}", inst);
        assert!(text.contains("VMOV o0 pa4.xxxx"));
    }
}
