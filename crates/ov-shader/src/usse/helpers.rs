//! Operand field decoding shared by the instruction families

use super::types::SwizzleChannel::{self, Half as H, One as C1, Two as C2, W, X, Y, Z, Zero as C0};
use super::types::*;

/// Swizzle table width selected by the instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwizzleWidth {
    Scalar,
    Vec3,
    Vec4,
}

type Swizzle3 = [SwizzleChannel; 3];

const fn v3(s: Swizzle3) -> Swizzle4 {
    [s[0], s[1], s[2], X]
}

static VEC4_STD: [Swizzle4; 16] = [
    [X, X, X, X], [Y, Y, Y, Y], [Z, Z, Z, Z], [W, W, W, W],
    [X, Y, Z, W], [Y, Z, W, W], [X, Y, Z, Z], [X, X, Y, Z],
    [X, Y, X, Y], [X, Y, W, Z], [Z, X, Y, W], [Z, W, Z, W],
    [Y, Z, X, Z], [X, X, Y, Y], [X, Z, W, W], [X, Y, Z, C1],
];

static VEC4_EXT: [Swizzle4; 16] = [
    [Y, Z, X, W], [Z, W, X, Y], [X, Z, W, Y], [Y, Y, W, W],
    [W, Y, Z, W], [W, Z, W, Z], [X, Y, Z, X], [Z, Z, W, W],
    [X, W, Z, X], [Y, Y, Y, X], [Y, Y, Y, Z], [X, Z, Y, W],
    [X, X, X, Y], [Z, Y, X, W], [Y, Y, Z, Z], [Z, Z, Z, Y],
];

static VEC3_STD: [Swizzle4; 16] = [
    v3([X, X, X]), v3([Y, Y, Y]), v3([Z, Z, Z]), v3([W, W, W]),
    v3([X, Y, Z]), v3([Y, Z, W]), v3([X, X, Y]), v3([X, Y, X]),
    v3([Y, Y, X]), v3([Y, Y, Z]), v3([Z, X, Y]), v3([X, Z, Y]),
    v3([Y, Z, X]), v3([Z, Y, X]), v3([Z, Z, Y]), v3([X, Y, C1]),
];

static VEC3_EXT: [Swizzle4; 16] = [
    v3([X, Y, Y]), v3([Y, X, Y]), v3([X, X, Z]), v3([Y, X, X]),
    v3([X, Y, C0]), v3([X, C1, C0]), v3([C0, C0, C0]), v3([C1, C1, C1]),
    v3([H, H, H]), v3([C2, C2, C2]), v3([X, C0, C0]), SWIZZLE_UNDEFINED,
    SWIZZLE_UNDEFINED, SWIZZLE_UNDEFINED, SWIZZLE_UNDEFINED, SWIZZLE_UNDEFINED,
];

static SCALAR_STD: [Swizzle4; 16] = [
    [X, X, X, X], [Y, Y, Y, Y], [Z, Z, Z, Z], [W, W, W, W],
    [C0, C0, C0, C0], [C1, C1, C1, C1], [C2, C2, C2, C2], [H, H, H, H],
    SWIZZLE_UNDEFINED, SWIZZLE_UNDEFINED, SWIZZLE_UNDEFINED, SWIZZLE_UNDEFINED,
    SWIZZLE_UNDEFINED, SWIZZLE_UNDEFINED, SWIZZLE_UNDEFINED, SWIZZLE_UNDEFINED,
];

static DUAL_VEC4_STD: [Swizzle4; 16] = [
    [X, X, X, X], [Y, Y, Y, Y], [Z, Z, Z, Z], [W, W, W, W],
    [X, Y, Z, W], [Y, Z, W, W], [X, Y, Z, Z], [X, X, Y, Z],
    [X, Y, X, Y], [X, Y, W, Z], [Z, X, Y, W], [Z, W, Z, W],
    [C0, C0, C0, C0], [H, H, H, H], [C1, C1, C1, C1], [C2, C2, C2, C2],
];

static DUAL_VEC4_EXT: [Swizzle4; 16] = [
    [Y, Z, X, W], [Z, W, X, Y], [X, Z, W, Y], [Y, Y, W, W],
    [W, Y, Z, W], [W, Z, W, Z], [X, Y, Z, X], [Z, Z, W, W],
    [X, W, Z, X], [Y, Y, Y, X], [Y, Y, Y, Z], [Z, W, Z, W],
    [Y, Z, X, Z], [X, X, Y, Y], [X, Z, W, W], [X, Y, Z, C1],
];

static DUAL_VEC3_STD: [Swizzle4; 16] = [
    v3([X, X, X]), v3([Y, Y, Y]), v3([Z, Z, Z]), v3([W, W, W]),
    v3([X, Y, Z]), v3([Y, Z, W]), v3([X, X, Y]), v3([X, Y, X]),
    v3([Y, Y, X]), v3([Y, Y, Z]), v3([Z, X, Y]), v3([X, Z, Y]),
    v3([C0, C0, C0]), v3([H, H, H]), v3([C1, C1, C1]), v3([C2, C2, C2]),
];

static DUAL_VEC3_EXT: [Swizzle4; 16] = [
    v3([X, Y, Y]), v3([Y, X, Y]), v3([X, X, Z]), v3([Y, X, X]),
    v3([X, Y, C0]), v3([X, C1, C0]), v3([X, Z, Y]), v3([Y, Z, X]),
    v3([Z, Y, X]), v3([Z, Z, Y]), v3([X, Y, C1]), SWIZZLE_UNDEFINED,
    SWIZZLE_UNDEFINED, SWIZZLE_UNDEFINED, SWIZZLE_UNDEFINED, SWIZZLE_UNDEFINED,
];

/// VMAD2 per-source swizzle tables
pub static VMAD2_SRC0_SWIZZLE: [Swizzle4; 8] = [
    [X, X, X, X], [Y, Y, Y, Y], [Z, Z, Z, Z], [W, W, W, W],
    [X, Y, Z, W], [Y, Z, X, W], [X, Y, W, W], [Z, W, X, Y],
];

pub static VMAD2_SRC1_SWIZZLE: [Swizzle4; 8] = [
    [X, X, X, X], [Y, Y, Y, Y], [Z, Z, Z, Z], [W, W, W, W],
    [X, Y, Z, W], [X, Y, Y, Z], [Y, Y, W, W], [W, Y, Z, W],
];

pub static VMAD2_SRC2_SWIZZLE: [Swizzle4; 8] = [
    [X, X, X, X], [Y, Y, Y, Y], [Z, Z, Z, Z], [W, W, W, W],
    [X, Y, Z, W], [X, Z, W, W], [X, X, Y, Z], [X, Y, Z, Z],
];

/// Three bits per channel, x in the low bits
pub fn decode_swizzle4(encoded: u32) -> Swizzle4 {
    [
        SwizzleChannel::from_bits(encoded),
        SwizzleChannel::from_bits(encoded >> 3),
        SwizzleChannel::from_bits(encoded >> 6),
        SwizzleChannel::from_bits(encoded >> 9),
    ]
}

pub fn decode_vec34_swizzle(swizzle: u32, extended: bool, width: SwizzleWidth) -> Swizzle4 {
    let index = (swizzle & 0xF) as usize;
    match (width, extended) {
        (SwizzleWidth::Scalar, true) => SWIZZLE_UNDEFINED,
        (SwizzleWidth::Scalar, false) => SCALAR_STD[index],
        (SwizzleWidth::Vec3, true) => VEC3_EXT[index],
        (SwizzleWidth::Vec3, false) => VEC3_STD[index],
        (SwizzleWidth::Vec4, true) => VEC4_EXT[index],
        (SwizzleWidth::Vec4, false) => VEC4_STD[index],
    }
}

/// VDUAL has its own swizzle tables
pub fn decode_dual_swizzle(swizzle: u32, extended: bool, vec4: bool) -> Swizzle4 {
    let index = (swizzle & 0xF) as usize;
    match (vec4, extended) {
        (true, true) => DUAL_VEC4_EXT[index],
        (true, false) => DUAL_VEC4_STD[index],
        (false, true) => DUAL_VEC3_EXT[index],
        (false, false) => DUAL_VEC3_STD[index],
    }
}

pub fn decode_modifier(modifier: u32) -> RegisterFlags {
    match modifier & 3 {
        1 => RegisterFlags::NEGATIVE,
        2 => RegisterFlags::ABSOLUTE,
        3 => RegisterFlags::NEGATIVE | RegisterFlags::ABSOLUTE,
        _ => RegisterFlags::empty(),
    }
}

/// Expand the two-slot write mask used by 64-bit register moves
pub fn decode_write_mask(bank: RegisterBank, mask: u32, f16: bool) -> u8 {
    let mask = (mask & 0xF) as u8;
    let packable = matches!(
        bank,
        RegisterBank::PrimAttr
            | RegisterBank::SecAttr
            | RegisterBank::Output
            | RegisterBank::FpInternal
            | RegisterBank::Temp
    );

    if bank == RegisterBank::FpInternal || (f16 && !packable) {
        return mask;
    }

    if f16 {
        let mut expanded = 0;
        if mask & 0b0001 != 0 {
            expanded |= 0b0011;
        }
        if mask & 0b0100 != 0 {
            expanded |= 0b1100;
        }
        expanded
    } else {
        mask & 0b0011
    }
}

//=============================================================================
// REGISTER BANKS
//=============================================================================

fn dest_bank(sel: u32, ext: bool) -> RegisterBank {
    match (sel & 3, ext) {
        (3, _) => RegisterBank::Indexed1,
        (0, true) => RegisterBank::SecAttr,
        (1, true) => RegisterBank::Special,
        (2, true) => RegisterBank::Index,
        (0, false) => RegisterBank::Temp,
        (1, false) => RegisterBank::Output,
        _ => RegisterBank::PrimAttr,
    }
}

fn src0_bank(sel: u32, ext: bool) -> RegisterBank {
    match (sel & 1, ext) {
        (0, true) => RegisterBank::Output,
        (_, true) => RegisterBank::SecAttr,
        (0, false) => RegisterBank::Temp,
        _ => RegisterBank::PrimAttr,
    }
}

fn src12_bank(sel: u32, ext: bool) -> RegisterBank {
    match (sel & 3, ext) {
        (0, true) => RegisterBank::Indexed1,
        (1, true) => RegisterBank::Special,
        (2, true) => RegisterBank::Immediate,
        (3, true) => RegisterBank::Indexed2,
        (0, false) => RegisterBank::Temp,
        (1, false) => RegisterBank::Output,
        (2, false) => RegisterBank::PrimAttr,
        _ => RegisterBank::SecAttr,
    }
}

/// Register decoding knobs shared by all operands of one instruction
#[derive(Debug, Clone, Copy)]
pub struct RegisterEncoding {
    /// Register numbers count 64-bit pairs and must be doubled
    pub double: bool,
    /// Width of the register number field
    pub bits: u8,
    pub secondary: bool,
}

impl RegisterEncoding {
    pub fn new(double: bool, bits: u8, secondary: bool) -> Self {
        Self {
            double,
            bits,
            secondary,
        }
    }

    fn finalize(&self, op: &mut Operand) {
        if self.double && !matches!(op.bank, RegisterBank::Special | RegisterBank::Immediate) {
            op.num = (op.num << 1) & 0xFF;
        }

        // The top temporaries alias the internal registers
        let temps = if self.double { 8 } else { 4 };
        let limit = (1u32 << self.bits).saturating_sub(temps);
        if op.bank == RegisterBank::Temp && op.num >= limit {
            op.num -= limit;
            if self.double {
                op.num >>= 1;
            }
            op.bank = RegisterBank::FpInternal;
        }

        if op.bank == RegisterBank::Special {
            if op.num & 0x40 != 0 {
                op.num &= !0x40;
                op.bank = RegisterBank::Global;
            } else {
                op.bank = RegisterBank::FpConstant;
            }
        }

        // Secondary programs compute into SA; internals and constants stay put
        if self.secondary
            && !matches!(
                op.bank,
                RegisterBank::FpInternal | RegisterBank::FpConstant | RegisterBank::Immediate
            )
        {
            op.bank = RegisterBank::SecAttr;
        }
    }

    fn operand(&self, slot: OperandSlot, num: u32, bank: RegisterBank) -> Operand {
        let mut op = Operand::new(slot);
        op.num = num;
        op.bank = bank;
        self.finalize(&mut op);
        op
    }

    pub fn dest(&self, num: u32, sel: u32, ext: bool) -> Operand {
        self.operand(OperandSlot::Dest, num, dest_bank(sel, ext))
    }

    pub fn src0(&self, num: u32, sel: u32, ext: bool) -> Operand {
        self.operand(OperandSlot::Src0, num, src0_bank(sel, ext))
    }

    pub fn src12(&self, slot: OperandSlot, num: u32, sel: u32, ext: bool) -> Operand {
        self.operand(slot, num, src12_bank(sel, ext))
    }
}

/// Internal register operand addressed directly by number
pub fn internal_operand(slot: OperandSlot, num: u32) -> Operand {
    let mut op = Operand::new(slot);
    op.num = num;
    op.bank = RegisterBank::FpInternal;
    op
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swizzle4_decode() {
        // x=w(3), y=z(2), z=y(1), w=x(0)
        let swz = decode_swizzle4(3 | (2 << 3) | (1 << 6));
        assert_eq!(swz, [W, Z, Y, X]);
    }

    #[test]
    fn test_vec34_tables() {
        assert_eq!(decode_vec34_swizzle(4, false, SwizzleWidth::Vec4), SWIZZLE_XYZW);
        assert_eq!(decode_vec34_swizzle(15, false, SwizzleWidth::Vec4), [X, Y, Z, C1]);
        assert_eq!(decode_vec34_swizzle(1, true, SwizzleWidth::Vec4), [Z, W, X, Y]);
        // vec3 tables pad the missing channel with x
        assert_eq!(decode_vec34_swizzle(4, false, SwizzleWidth::Vec3), [X, Y, Z, X]);
        assert_eq!(decode_vec34_swizzle(8, true, SwizzleWidth::Vec3), [H, H, H, X]);
        assert_eq!(decode_vec34_swizzle(12, true, SwizzleWidth::Vec3), SWIZZLE_UNDEFINED);
        assert_eq!(decode_vec34_swizzle(5, false, SwizzleWidth::Scalar), [C1; 4]);
        assert_eq!(decode_vec34_swizzle(0, true, SwizzleWidth::Scalar), SWIZZLE_UNDEFINED);
    }

    #[test]
    fn test_dual_tables() {
        assert_eq!(decode_dual_swizzle(13, false, true), [H; 4]);
        assert_eq!(decode_dual_swizzle(15, true, true), [X, Y, Z, C1]);
        assert_eq!(decode_dual_swizzle(6, true, false), [X, Z, Y, X]);
    }

    #[test]
    fn test_write_mask() {
        assert_eq!(decode_write_mask(RegisterBank::Temp, 0b0101, true), 0b1111);
        assert_eq!(decode_write_mask(RegisterBank::Temp, 0b0100, true), 0b1100);
        assert_eq!(decode_write_mask(RegisterBank::Temp, 0b1111, false), 0b0011);
        assert_eq!(decode_write_mask(RegisterBank::FpInternal, 0b1010, false), 0b1010);
        assert_eq!(decode_write_mask(RegisterBank::Indexed1, 0b1010, true), 0b1010);
    }

    #[test]
    fn test_internal_aliasing() {
        let enc = RegisterEncoding::new(false, 7, false);
        // 128 - 4 = 124 is the first internal register
        let op = enc.dest(125, 0, false);
        assert_eq!(op.bank, RegisterBank::FpInternal);
        assert_eq!(op.num, 1);

        let enc = RegisterEncoding::new(true, 7, false);
        // doubled 62 -> 124, limit 120, (124 - 120) / 2
        let op = enc.src12(OperandSlot::Src1, 62, 0, false);
        assert_eq!(op.bank, RegisterBank::FpInternal);
        assert_eq!(op.num, 2);
    }

    #[test]
    fn test_special_banks() {
        let enc = RegisterEncoding::new(false, 7, false);
        let op = enc.src12(OperandSlot::Src2, 0x45, 1, true);
        assert_eq!(op.bank, RegisterBank::Global);
        assert_eq!(op.num, 5);

        let op = enc.src12(OperandSlot::Src2, 0x05, 1, true);
        assert_eq!(op.bank, RegisterBank::FpConstant);

        let op = enc.src12(OperandSlot::Src2, 9, 2, true);
        assert_eq!(op.bank, RegisterBank::Immediate);
        assert_eq!(op.num, 9);
    }

    #[test]
    fn test_secondary_redirect() {
        let enc = RegisterEncoding::new(false, 7, true);
        assert_eq!(enc.dest(3, 1, false).bank, RegisterBank::SecAttr);
        assert_eq!(enc.src12(OperandSlot::Src1, 3, 2, true).bank, RegisterBank::Immediate);
        assert_eq!(enc.dest(126, 0, false).bank, RegisterBank::FpInternal);
    }
}
