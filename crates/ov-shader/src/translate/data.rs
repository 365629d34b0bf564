//! Data movement: VMOV, VPCK and VLDST

use super::{mask_components, Step, Translator};
use crate::backend::{BinaryOp, CompareOp, ScalarKind, ShaderBackend, Slot, Value};
use crate::usse::{CompareMethod, DataType, InstructionDetail, MoveType};

fn is_float_like(data_type: DataType) -> bool {
    matches!(data_type, DataType::F16 | DataType::F32 | DataType::C10)
}

/// Divisors mapping an integer format onto [0, 1] or [-1, 1], as (positive, negative)
fn norm_divisors(data_type: DataType) -> (f32, f32) {
    match data_type {
        DataType::Uint8 | DataType::O8 => (255.0, 255.0),
        DataType::Uint16 => (65535.0, 65535.0),
        DataType::Uint32 => (4294967295.0, 4294967295.0),
        DataType::Int8 => (127.0, 128.0),
        DataType::Int16 => (32767.0, 32768.0),
        DataType::Int32 => (2147483647.0, 2147483648.0),
        _ => (1.0, 1.0),
    }
}

/// Representable range of an integer format, as floats
fn int_range(data_type: DataType) -> (f32, f32) {
    match data_type {
        DataType::Uint8 | DataType::O8 => (0.0, 255.0),
        DataType::Uint16 => (0.0, 65535.0),
        DataType::Uint32 => (0.0, 4294967295.0),
        DataType::Int8 => (-128.0, 127.0),
        DataType::Int16 => (-32768.0, 32767.0),
        DataType::Int32 => (-2147483648.0, 2147483647.0),
        _ => (f32::MIN, f32::MAX),
    }
}

fn compare_op(method: CompareMethod) -> CompareOp {
    match method {
        CompareMethod::NotEqualZero => CompareOp::NotEqual,
        CompareMethod::EqualZero => CompareOp::Equal,
        CompareMethod::LessThanZero => CompareOp::Less,
        CompareMethod::LessEqualZero => CompareOp::LessEqual,
    }
}

impl<B: ShaderBackend> Translator<'_, B> {
    pub(super) fn emit_vmov(&mut self, step: Step<'_>) {
        let inst = step.inst;
        let InstructionDetail::Move { move_type, compare } = inst.detail else {
            return;
        };
        let dest = self.at(step, &inst.dest);
        let src1 = self.at(step, &inst.src1);

        let mut results = Vec::with_capacity(4);
        for component in mask_components(inst.dest_mask) {
            let lane = component as usize;
            let value = self.load_lane(&src1, lane);
            let value = if move_type == MoveType::Unconditional {
                value
            } else {
                let src0 = self.at(step, &inst.src0);
                let src2 = self.at(step, &inst.src2);
                let test = self.load_lane(&src0, lane);
                let zero = self.typed_constant(src0.kind(), 0.0);
                let cond = self.backend.compare(compare_op(compare), test, zero);
                let other = self.load_lane(&src2, lane);
                let other = self.coerce(other, value.kind());
                self.backend.select(cond, value, other)
            };
            results.push((component, value));
        }
        for (component, value) in results {
            self.store_component(&dest, component, value);
        }
    }

    //=========================================================================
    // PACK
    //=========================================================================

    pub(super) fn emit_vpck(&mut self, step: Step<'_>) {
        let inst = step.inst;
        let InstructionDetail::Pack { scale } = inst.detail else {
            return;
        };
        let src_type = inst.src1.data_type;
        let dest_type = inst.dest.data_type;
        let dest = self.at(step, &inst.dest);
        let src1 = self.at(step, &inst.src1);
        let src2 = self.at(step, &inst.src2);
        let paired = src_type == DataType::F32 && inst.src2.is_valid();

        let mut results = Vec::with_capacity(4);
        for component in mask_components(inst.dest_mask) {
            let lane = component as usize;
            let value = if paired {
                // Lanes x and y come from src1, z and w from src2
                let channel = inst.src1.swizzle[lane];
                let raw = match channel.component() {
                    Some(c) if c < 2 => self.load_component(&src1, c),
                    Some(c) => self.load_component(&src2, c - 2),
                    None => self.typed_constant(ScalarKind::Float, channel.constant().unwrap_or(0.0)),
                };
                self.apply_modifiers(inst.src1.flags, raw)
            } else {
                self.load_lane(&src1, lane)
            };
            let value = self.pack_convert(value, src_type, dest_type, scale);
            results.push((component, value));
        }
        for (component, value) in results {
            self.store_component(&dest, component, value);
        }
    }

    fn pack_convert(&mut self, value: Value, from: DataType, to: DataType, scale: bool) -> Value {
        match (is_float_like(from), is_float_like(to)) {
            (true, true) => value,
            (false, true) => {
                let float = self.backend.convert(value, ScalarKind::Float);
                if !scale {
                    return float;
                }
                self.normalize(float, from)
            }
            (true, false) => {
                let float = if scale { self.denormalize(value, to) } else { value };
                let (low, high) = int_range(to);
                let low = self.backend.constant_f32(low);
                let high = self.backend.constant_f32(high);
                let clamped = self.backend.binary(BinaryOp::Max, float, low);
                let clamped = self.backend.binary(BinaryOp::Min, clamped, high);
                let kind = if to.is_signed_integer() {
                    ScalarKind::Int
                } else {
                    ScalarKind::Uint
                };
                self.backend.convert(clamped, kind)
            }
            // Integer to integer keeps the bits; the store truncates to the field
            (false, false) => {
                let kind = if to.is_signed_integer() {
                    ScalarKind::Int
                } else {
                    ScalarKind::Uint
                };
                self.coerce(value, kind)
            }
        }
    }

    /// Integer range to [0, 1] or [-1, 1]
    fn normalize(&mut self, float: Value, from: DataType) -> Value {
        let (positive, negative) = norm_divisors(from);
        let positive = self.backend.constant_f32(positive);
        if !from.is_signed_integer() {
            return self.backend.binary(BinaryOp::Div, float, positive);
        }
        let negative = self.backend.constant_f32(negative);
        let zero = self.backend.constant_f32(0.0);
        let is_negative = self.backend.compare(CompareOp::Less, float, zero);
        let divisor = self.backend.select(is_negative, negative, positive);
        self.backend.binary(BinaryOp::Div, float, divisor)
    }

    /// [0, 1] or [-1, 1] back to the integer range of `to`
    fn denormalize(&mut self, float: Value, to: DataType) -> Value {
        let (positive, negative) = norm_divisors(to);
        let positive = self.backend.constant_f32(positive);
        if !to.is_signed_integer() {
            return self.backend.binary(BinaryOp::Mul, float, positive);
        }
        let negative = self.backend.constant_f32(negative);
        let zero = self.backend.constant_f32(0.0);
        let is_negative = self.backend.compare(CompareOp::Less, float, zero);
        let factor = self.backend.select(is_negative, negative, positive);
        self.backend.binary(BinaryOp::Mul, float, factor)
    }

    //=========================================================================
    // LOAD / STORE
    //=========================================================================

    pub(super) fn emit_vldst(&mut self, step: Step<'_>) {
        let inst = step.inst;
        let InstructionDetail::LoadStore {
            count,
            buffer,
            base,
            register_indexed,
            is_load,
        } = inst.detail
        else {
            return;
        };
        if !is_load {
            self.degrade("buffer stores are not supported");
            return;
        }
        let Some(binding) = self
            .input
            .buffer_at_register(buffer as u32)
            .filter(|&b| self.input.uniform_buffer(b).is_some())
        else {
            self.degrade(format!("load from unknown buffer at sa{}", buffer));
            return;
        };

        // Offset register counts elements of the fetched type
        let unit: i32 = match inst.dest.data_type {
            DataType::F16 => 2,
            DataType::C10 => 1,
            _ => 4,
        };
        let dynamic_base = if register_indexed {
            let src1 = self.at(step, &inst.src1);
            let raw = self.load_lane(&src1, 0);
            let elements = self.coerce(raw, ScalarKind::Int);
            let unit = self.backend.constant_i32(unit);
            let bytes = self.backend.binary(BinaryOp::Mul, elements, unit);
            let two = self.backend.constant_i32(2);
            Some(self.backend.binary(BinaryOp::Sar, bytes, two))
        } else {
            None
        };

        let dest = self.at(step, &inst.dest).with_type(DataType::F32);
        let mut values = Vec::with_capacity(count as usize);
        for i in 0..count as u32 {
            let slot = match dynamic_base {
                Some(start) => {
                    let delta = self.backend.constant_i32(i as i32);
                    Slot::Dynamic(self.backend.binary(BinaryOp::Add, start, delta))
                }
                None => Slot::Fixed(base + i),
            };
            values.push(self.backend.buffer_load(binding, slot));
        }
        for (i, value) in values.into_iter().enumerate() {
            self.store_component(&dest, i as u32, value);
        }
    }
}
