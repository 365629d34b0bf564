//! Bitwise ALU: AND, OR, XOR, shifts and rotates on 32-bit lanes

use super::{Step, Translator};
use crate::backend::{BinaryOp, ScalarKind, ShaderBackend, UnaryOp, Value};
use crate::usse::{InstructionDetail, Opcode};

impl<B: ShaderBackend> Translator<'_, B> {
    /// Apply a bitwise opcode to two `Uint` values
    pub(super) fn bitwise(&mut self, opcode: Opcode, a: Value, b: Value) -> Value {
        match opcode {
            Opcode::And => self.backend.binary(BinaryOp::And, a, b),
            Opcode::Or => self.backend.binary(BinaryOp::Or, a, b),
            Opcode::Xor => self.backend.binary(BinaryOp::Xor, a, b),
            Opcode::Shl => self.backend.binary(BinaryOp::Shl, a, b),
            Opcode::Shr => self.backend.binary(BinaryOp::Shr, a, b),
            Opcode::Asr => {
                let signed = self.backend.bitcast(a, ScalarKind::Int);
                let amount = self.backend.bitcast(b, ScalarKind::Int);
                let shifted = self.backend.binary(BinaryOp::Sar, signed, amount);
                self.backend.bitcast(shifted, ScalarKind::Uint)
            }
            Opcode::Rol => self.rotate_left(a, b),
            other => {
                self.degrade(format!("{} is not a bitwise operation", other.name()));
                a
            }
        }
    }

    fn rotate_left(&mut self, value: Value, amount: Value) -> Value {
        let mask = self.backend.constant_u32(31);
        let amount = self.backend.binary(BinaryOp::And, amount, mask);
        let width = self.backend.constant_u32(32);
        let back = self.backend.binary(BinaryOp::Sub, width, amount);
        let back = self.backend.binary(BinaryOp::And, back, mask);
        let high = self.backend.binary(BinaryOp::Shl, value, amount);
        let low = self.backend.binary(BinaryOp::Shr, value, back);
        self.backend.binary(BinaryOp::Or, high, low)
    }

    pub(super) fn emit_vbw(&mut self, step: Step<'_>) {
        let inst = step.inst;
        let InstructionDetail::Bitwise {
            immediate,
            invert,
            src2_rotate,
        } = inst.detail
        else {
            return;
        };
        let dest = self.at(step, &inst.dest);
        let src1 = self.at(step, &inst.src1);

        let a = self.load_lane(&src1, 0);
        let a = self.coerce(a, ScalarKind::Uint);
        let mut b = match immediate {
            Some(value) => self.backend.constant_u32(value),
            None => {
                let src2 = self.at(step, &inst.src2);
                let loaded = self.load_lane(&src2, 0);
                let loaded = self.coerce(loaded, ScalarKind::Uint);
                if invert {
                    self.backend.unary(UnaryOp::Not, loaded)
                } else {
                    loaded
                }
            }
        };
        if src2_rotate != 0 {
            let amount = self.backend.constant_u32(src2_rotate as u32);
            b = self.rotate_left(b, amount);
        }
        let result = self.bitwise(inst.opcode, a, b);
        self.store_component(&dest, 0, result);
    }
}

#[cfg(test)]
mod tests {
    use super::super::harness::{stores, temp, translate};
    use super::*;
    use crate::usse::{DataType, Instruction, OperandSlot};

    fn vbw(opcode: Opcode, immediate: Option<u32>, invert: bool, src2_rotate: u8) -> Instruction {
        let mut inst = Instruction::new(0, opcode);
        inst.dest = temp(OperandSlot::Dest, 2, DataType::Uint32);
        inst.src1 = temp(OperandSlot::Src1, 0, DataType::Uint32);
        inst.src2 = temp(OperandSlot::Src2, 1, DataType::Uint32);
        inst.dest_mask = 0b0001;
        inst.detail = InstructionDetail::Bitwise {
            immediate,
            invert,
            src2_rotate,
        };
        inst
    }

    #[test]
    fn test_vbw_immediate_operand() {
        let body = translate(&[vbw(Opcode::And, Some(0xFF00), false, 0)]);
        assert!(body.contains(" & 65280u;"), "{}", body);
        // src2 is not read when an immediate replaces it
        assert!(!body.contains("r[1]"), "{}", body);
        assert_eq!(stores(&body), vec!["r[2]"]);
    }

    #[test]
    fn test_vbw_inverts_src2() {
        let body = translate(&[vbw(Opcode::Or, None, true, 0)]);
        assert!(body.contains("= r[1];"), "{}", body);
        assert!(body.contains("= ~t"), "{}", body);
        assert!(body.contains(" | t"), "{}", body);
        assert_eq!(stores(&body), vec!["r[2]"]);
    }

    #[test]
    fn test_vbw_rotates_src2() {
        let body = translate(&[vbw(Opcode::Xor, None, false, 8)]);
        assert!(body.contains("8u & 31u;"), "{}", body);
        assert!(body.contains("= 32u - t"), "{}", body);
        assert!(body.contains(" << t"), "{}", body);
        assert!(body.contains(" >> t"), "{}", body);
        assert!(body.contains(" ^ t"), "{}", body);
        assert!(!body.contains("~"), "{}", body);
    }

    #[test]
    fn test_vbw_plain_shift() {
        let body = translate(&[vbw(Opcode::Shl, None, false, 0)]);
        assert!(body.contains(" << t"), "{}", body);
        assert!(!body.contains("31u"), "{}", body);
    }
}
