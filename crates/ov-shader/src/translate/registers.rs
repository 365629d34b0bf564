//! Operand addressing
//!
//! Maps a decoded operand, shifted by its repeat offset, onto register file
//! slots and moves typed lanes in and out of them. Every slot holds 32 raw
//! bits: 16-bit and 8-bit data share a slot and are reached through
//! unpack/pack or shift/mask sequences.

use super::Translator;
use crate::backend::{
    BinaryOp, PackOp, RegisterFile, ScalarKind, ShaderBackend, Slot, UnaryOp, Value, PREDICATE_COUNT,
};
use crate::usse::{DataType, Operand, OperandSlot, RegisterBank, RegisterFlags, SwizzleChannel, SWIZZLE_XYZW};

/// Values of the FP constant bank the translator knows
const FP_CONSTANTS: [f32; 2] = [0.0, 1.0];

/// An operand at one repeat iteration
#[derive(Debug, Clone, Copy)]
pub(super) struct RegRef {
    pub op: Operand,
    /// Repeat offset, in the operand's register units
    pub shift: i32,
}

impl RegRef {
    pub fn new(op: Operand) -> Self {
        Self { op, shift: 0 }
    }

    /// A plain register window of `data_type` starting at `num`
    pub fn window(bank: RegisterBank, num: u32, data_type: DataType) -> Self {
        let mut op = Operand::new(OperandSlot::Dest);
        op.bank = bank;
        op.num = num;
        op.data_type = data_type;
        op.swizzle = SWIZZLE_XYZW;
        Self::new(op)
    }

    pub fn with_type(mut self, data_type: DataType) -> Self {
        self.op.data_type = data_type;
        self
    }

    pub fn kind(&self) -> ScalarKind {
        scalar_kind(self.op.data_type)
    }
}

/// Part of a 32-bit slot one lane occupies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Part {
    Whole,
    Half(u32),
    Byte(u32),
}

impl Part {
    fn width(self) -> u32 {
        match self {
            Part::Whole => 32,
            Part::Half(_) => 16,
            Part::Byte(_) => 8,
        }
    }

    fn shift(self) -> u32 {
        match self {
            Part::Whole => 0,
            Part::Half(i) => i * 16,
            Part::Byte(i) => i * 8,
        }
    }
}

/// Where one component of an operand lives
enum Place {
    Slot {
        file: RegisterFile,
        slot: Slot,
        part: Part,
        data_type: DataType,
    },
    Predicate(u32),
    Immediate(u32),
    Constant(f32),
    Zero,
}

/// Backend kind an operand of `data_type` computes in
pub(super) fn scalar_kind(data_type: DataType) -> ScalarKind {
    if data_type.is_signed_integer() {
        ScalarKind::Int
    } else if data_type.is_unsigned_integer() {
        ScalarKind::Uint
    } else {
        ScalarKind::Float
    }
}

fn register_file(bank: RegisterBank) -> Option<RegisterFile> {
    match bank {
        RegisterBank::Temp => Some(RegisterFile::Temp),
        RegisterBank::PrimAttr => Some(RegisterFile::PrimAttr),
        RegisterBank::Output => Some(RegisterFile::Output),
        RegisterBank::SecAttr => Some(RegisterFile::SecAttr),
        RegisterBank::FpInternal => Some(RegisterFile::Internal),
        RegisterBank::Index => Some(RegisterFile::Index),
        _ => None,
    }
}

/// Slot offset and part of component `component` of a packed vector
fn layout(data_type: DataType, component: u32) -> (u32, Part) {
    match data_type.size() {
        1 => (component / 4, Part::Byte(component % 4)),
        2 => (component / 2, Part::Half(component % 2)),
        _ => (component, Part::Whole),
    }
}

impl<B: ShaderBackend> Translator<'_, B> {
    //=========================================================================
    // CONSTANTS
    //=========================================================================

    pub(super) fn typed_constant(&mut self, kind: ScalarKind, value: f32) -> Value {
        match kind {
            ScalarKind::Float => self.backend.constant_f32(value),
            ScalarKind::Int => self.backend.constant_i32(value as i32),
            ScalarKind::Uint => self.backend.constant_u32(value.max(0.0) as u32),
            ScalarKind::Bool => self.backend.constant_bool(value != 0.0),
        }
    }

    /// Convert `value` into `kind`, numerically for booleans and by bits otherwise
    pub(super) fn coerce(&mut self, value: Value, kind: ScalarKind) -> Value {
        if value.kind() == kind {
            value
        } else if value.kind() == ScalarKind::Bool || kind == ScalarKind::Bool {
            self.backend.convert(value, kind)
        } else {
            self.backend.bitcast(value, kind)
        }
    }

    //=========================================================================
    // LOADS
    //=========================================================================

    /// Lane `lane` of a source operand, after swizzle and modifiers
    pub(super) fn load_lane(&mut self, r: &RegRef, lane: usize) -> Value {
        let kind = r.kind();
        let channel = r.op.swizzle[lane & 3];
        let value = match channel.component() {
            Some(component) => self.load_component(r, component),
            None if channel == SwizzleChannel::Undefined => self.typed_constant(kind, 0.0),
            None => {
                let constant = channel.constant().unwrap_or(0.0);
                self.typed_constant(kind, constant)
            }
        };
        self.apply_modifiers(r.op.flags, value)
    }

    pub(super) fn apply_modifiers(&mut self, flags: RegisterFlags, mut value: Value) -> Value {
        if flags.contains(RegisterFlags::ABSOLUTE) {
            value = self.backend.unary(UnaryOp::Abs, value);
        }
        if flags.contains(RegisterFlags::NEGATIVE) {
            value = self.backend.unary(UnaryOp::Negate, value);
        }
        value
    }

    /// Component `component` of an operand, without swizzle or modifiers
    pub(super) fn load_component(&mut self, r: &RegRef, component: u32) -> Value {
        let kind = r.kind();
        match self.place(r, component) {
            Place::Slot {
                file,
                slot,
                part,
                data_type,
            } => {
                let raw = self.backend.load_register(file, slot);
                self.extract_part(raw, data_type, part)
            }
            Place::Predicate(index) => {
                let flag = self.backend.load_predicate(index);
                self.backend.convert(flag, kind)
            }
            Place::Immediate(num) => match kind {
                ScalarKind::Int => self.backend.constant_i32(num as i32),
                ScalarKind::Uint => self.backend.constant_u32(num),
                _ => self.backend.constant_f32(num as f32),
            },
            Place::Constant(value) => self.typed_constant(kind, value),
            Place::Zero => self.typed_constant(kind, 0.0),
        }
    }

    fn extract_part(&mut self, raw: Value, data_type: DataType, part: Part) -> Value {
        let kind = scalar_kind(data_type);
        if part == Part::Whole {
            return self.backend.bitcast(raw, kind);
        }
        let bits = self.backend.bitcast(raw, ScalarKind::Uint);
        if data_type == DataType::F16 {
            let halves = self.backend.unpack(PackOp::Half2x16, bits);
            return self.backend.extract(halves, part.shift() / 16);
        }
        let width = part.width();
        if kind == ScalarKind::Int {
            // Move the field to the top, then sign-extend it back down
            let signed = self.backend.bitcast(bits, ScalarKind::Int);
            let up = self.backend.constant_i32((32 - width - part.shift()) as i32);
            let down = self.backend.constant_i32((32 - width) as i32);
            let high = self.backend.binary(BinaryOp::Shl, signed, up);
            return self.backend.binary(BinaryOp::Sar, high, down);
        }
        let shift = self.backend.constant_u32(part.shift());
        let mask = self.backend.constant_u32((1u32 << width) - 1);
        let moved = self.backend.binary(BinaryOp::Shr, bits, shift);
        self.backend.binary(BinaryOp::And, moved, mask)
    }

    //=========================================================================
    // STORES
    //=========================================================================

    /// Write component `component` of a destination operand
    pub(super) fn store_component(&mut self, r: &RegRef, component: u32, value: Value) {
        match self.place(r, component) {
            Place::Slot {
                file,
                slot,
                part,
                data_type,
            } => {
                let kind = scalar_kind(data_type);
                let value = self.coerce(value, kind);
                if part == Part::Whole {
                    self.backend.store_register(file, slot, value);
                    return;
                }
                let bits = self.part_bits(value, data_type, part);
                let old = self.backend.load_register(file, slot);
                let old = self.backend.bitcast(old, ScalarKind::Uint);
                let keep = self
                    .backend
                    .constant_u32(!(((1u32 << part.width()) - 1) << part.shift()));
                let kept = self.backend.binary(BinaryOp::And, old, keep);
                let merged = self.backend.binary(BinaryOp::Or, kept, bits);
                self.backend.store_register(file, slot, merged);
            }
            Place::Predicate(index) => {
                let flag = self.coerce(value, ScalarKind::Bool);
                self.backend.store_predicate(index, flag);
            }
            Place::Immediate(_) | Place::Constant(_) | Place::Zero => {
                self.degrade(format!("{} cannot be written", r.op));
            }
        }
    }

    /// `value` encoded into its bit field of a slot, other bits zero
    fn part_bits(&mut self, value: Value, data_type: DataType, part: Part) -> Value {
        let field = if data_type == DataType::F16 {
            let zero = self.backend.constant_f32(0.0);
            let pair = self.backend.construct(&[value, zero]);
            self.backend.pack(PackOp::Half2x16, pair)
        } else {
            let bits = self.backend.bitcast(value, ScalarKind::Uint);
            let mask = self.backend.constant_u32((1u32 << part.width()) - 1);
            self.backend.binary(BinaryOp::And, bits, mask)
        };
        if part.shift() == 0 {
            return field;
        }
        let shift = self.backend.constant_u32(part.shift());
        self.backend.binary(BinaryOp::Shl, field, shift)
    }

    //=========================================================================
    // ADDRESSING
    //=========================================================================

    fn place(&mut self, r: &RegRef, component: u32) -> Place {
        let op = &r.op;
        match op.bank {
            RegisterBank::Immediate => Place::Immediate(op.num),
            RegisterBank::FpConstant => match FP_CONSTANTS.get(op.num as usize) {
                Some(&value) => Place::Constant(value),
                None => {
                    self.degrade(format!("unknown FP constant c{}", op.num));
                    Place::Zero
                }
            },
            RegisterBank::Predicate => {
                let index = op.num as i32 + r.shift;
                if (0..PREDICATE_COUNT as i32).contains(&index) {
                    Place::Predicate(index as u32)
                } else {
                    self.degrade(format!("predicate p{} out of range", index));
                    Place::Predicate(0)
                }
            }
            RegisterBank::Index => {
                let slot = self.fixed_slot(RegisterFile::Index, op.num as i32 - 1 + r.shift);
                Place::Slot {
                    file: RegisterFile::Index,
                    slot,
                    part: Part::Whole,
                    data_type: op.data_type.widened(),
                }
            }
            RegisterBank::FpInternal => {
                let index = (op.num as i32 + r.shift) * 4 + component as i32;
                let slot = self.fixed_slot(RegisterFile::Internal, index);
                Place::Slot {
                    file: RegisterFile::Internal,
                    slot,
                    part: Part::Whole,
                    data_type: op.data_type.widened(),
                }
            }
            RegisterBank::Indexed1 | RegisterBank::Indexed2 => self.indexed_place(r, component),
            bank => match register_file(bank) {
                Some(file) => {
                    let data_type = self.known_type(op.data_type);
                    let (delta, part) = layout(data_type, component);
                    let slot = self.fixed_slot(file, op.num as i32 + r.shift + delta as i32);
                    Place::Slot {
                        file,
                        slot,
                        part,
                        data_type,
                    }
                }
                None => {
                    self.degrade(format!("register bank {:?} is not supported", bank));
                    Place::Zero
                }
            },
        }
    }

    /// Address a register relative to one of the two index registers
    fn indexed_place(&mut self, r: &RegRef, component: u32) -> Place {
        let op = &r.op;
        let file = match (op.num >> 5) & 3 {
            0 => RegisterFile::Temp,
            1 => RegisterFile::Output,
            2 => RegisterFile::PrimAttr,
            _ => RegisterFile::SecAttr,
        };
        let which = if op.bank == RegisterBank::Indexed1 { 0 } else { 1 };
        let data_type = self.known_type(op.data_type);
        let (delta, part) = layout(data_type, component);
        let bias = (op.num & 31) as i32 + r.shift + delta as i32;

        let raw = self.backend.load_register(RegisterFile::Index, Slot::Fixed(which));
        let index = self.backend.bitcast(raw, ScalarKind::Int);
        let two = self.backend.constant_i32(2);
        let base = self.backend.binary(BinaryOp::Mul, index, two);
        let bias = self.backend.constant_i32(bias);
        let unclamped = self.backend.binary(BinaryOp::Add, base, bias);
        let low = self.backend.constant_i32(0);
        let high = self.backend.constant_i32(file.size() as i32 - 1);
        let clamped = self.backend.binary(BinaryOp::Max, unclamped, low);
        let clamped = self.backend.binary(BinaryOp::Min, clamped, high);
        Place::Slot {
            file,
            slot: Slot::Dynamic(clamped),
            part,
            data_type,
        }
    }

    fn fixed_slot(&mut self, file: RegisterFile, index: i32) -> Slot {
        let last = file.size() as i32 - 1;
        if !(0..=last).contains(&index) {
            self.degrade(format!("{}[{}] is outside the register file", file.name(), index));
        }
        Slot::Fixed(index.clamp(0, last) as u32)
    }

    fn known_type(&mut self, data_type: DataType) -> DataType {
        if data_type == DataType::Unknown {
            self.degrade("operand of unknown type treated as f32");
            DataType::F32
        } else {
            data_type
        }
    }
}
