//! Test instructions: VTST writes a predicate, VTSTMSK a per-lane mask

use super::registers::RegRef;
use super::{Step, Translator};
use crate::backend::{BinaryOp, CompareOp, ScalarKind, ShaderBackend, UnaryOp, Value};
use crate::usse::{DataType, InstructionDetail, Opcode, TestCondition};

fn compare_op(condition: TestCondition) -> Option<CompareOp> {
    match condition {
        TestCondition::NotEqual => Some(CompareOp::NotEqual),
        TestCondition::Equal => Some(CompareOp::Equal),
        TestCondition::LessThan => Some(CompareOp::Less),
        TestCondition::LessEqual => Some(CompareOp::LessEqual),
        TestCondition::GreaterThan => Some(CompareOp::Greater),
        TestCondition::GreaterEqual => Some(CompareOp::GreaterEqual),
        TestCondition::Always => None,
    }
}

impl<B: ShaderBackend> Translator<'_, B> {
    /// Boolean outcome of a test on one lane
    fn test_lane(&mut self, alu_op: Opcode, condition: TestCondition, src1: &RegRef, src2: &RegRef, lane: usize) -> Value {
        let Some(compare) = compare_op(condition) else {
            return self.backend.constant_bool(true);
        };
        let a = self.load_lane(src1, lane);
        let b = self.load_lane(src2, lane);
        if alu_op.is_sub() {
            let b = self.coerce(b, a.kind());
            return self.backend.compare(compare, a, b);
        }
        let result = self.test_alu(alu_op, a, b, src1, src2);
        let zero = self.typed_constant(result.kind(), 0.0);
        self.backend.compare(compare, result, zero)
    }

    fn test_alu(&mut self, alu_op: Opcode, a: Value, b: Value, src1: &RegRef, src2: &RegRef) -> Value {
        use Opcode as O;
        let b = self.coerce(b, a.kind());
        match alu_op {
            O::Vadd | O::Vf16add | O::Iadd8 | O::Iaddu8 | O::Iadd16 | O::Iaddu16 | O::Iadd32 | O::Iaddu32
            | O::Fpadd8 => self.backend.binary(BinaryOp::Add, a, b),
            O::Vmul | O::Vf16mul | O::Imul8 | O::Imulu8 | O::Imul16 | O::Imulu16 => {
                self.backend.binary(BinaryOp::Mul, a, b)
            }
            // Fixed point multiply of two [0, 255] values
            O::Fpmul8 => {
                let product = self.backend.binary(BinaryOp::Mul, a, b);
                let scale = self.typed_constant(a.kind(), 255.0);
                self.backend.binary(BinaryOp::Div, product, scale)
            }
            O::Vmin | O::Vf16min => self.backend.binary(BinaryOp::Min, a, b),
            O::Vmax | O::Vf16max => self.backend.binary(BinaryOp::Max, a, b),
            O::Vfrc | O::Vf16frc => {
                let floor = self.backend.unary(UnaryOp::Floor, b);
                self.backend.binary(BinaryOp::Sub, a, floor)
            }
            O::Vrcp => {
                let one = self.backend.constant_f32(1.0);
                self.backend.binary(BinaryOp::Div, one, a)
            }
            O::Vrsq => self.backend.unary(UnaryOp::InverseSqrt, a),
            O::Vlog => self.backend.unary(UnaryOp::Log2, a),
            O::Vexp => self.backend.unary(UnaryOp::Exp2, a),
            O::Vdp | O::Vf16dp => {
                let lhs: Vec<Value> = (0..4).map(|l| self.load_lane(src1, l)).collect();
                let rhs: Vec<Value> = (0..4).map(|l| self.load_lane(src2, l)).collect();
                let lhs = self.backend.construct(&lhs);
                let rhs = self.backend.construct(&rhs);
                self.backend.binary(BinaryOp::Dot, lhs, rhs)
            }
            O::Vdsx | O::Vf16dsx | O::Vdsy | O::Vf16dsy if self.backend.stage().is_fragment() => {
                let op = if matches!(alu_op, O::Vdsx | O::Vf16dsx) {
                    UnaryOp::DerivX
                } else {
                    UnaryOp::DerivY
                };
                self.backend.unary(op, a)
            }
            O::And | O::Or | O::Xor | O::Shl | O::Shr | O::Asr | O::Rol => {
                let a = self.coerce(a, ScalarKind::Uint);
                let b = self.coerce(b, ScalarKind::Uint);
                self.bitwise(alu_op, a, b)
            }
            other => {
                self.degrade(format!("test on {} is not supported", other.name()));
                a
            }
        }
    }

    pub(super) fn emit_vtst(&mut self, step: Step<'_>) {
        let inst = step.inst;
        let InstructionDetail::Test {
            alu_op,
            condition,
            source_mask,
        } = inst.detail
        else {
            return;
        };
        let dest = self.at(step, &inst.dest);
        let src1 = self.at(step, &inst.src1);
        let src2 = self.at(step, &inst.src2);
        let lane = (source_mask.trailing_zeros() as usize).min(3);
        let result = self.test_lane(alu_op, condition, &src1, &src2, lane);
        self.store_component(&dest, 0, result);
    }

    pub(super) fn emit_vtstmsk(&mut self, step: Step<'_>) {
        let inst = step.inst;
        let InstructionDetail::Test { alu_op, condition, .. } = inst.detail else {
            return;
        };
        let dest = self.at(step, &inst.dest);
        let src1 = self.at(step, &inst.src1);
        let src2 = self.at(step, &inst.src2);

        let (set, clear) = match inst.dest.data_type {
            DataType::Uint8 => (self.backend.constant_u32(0xFF), self.backend.constant_u32(0)),
            _ => (self.backend.constant_f32(1.0), self.backend.constant_f32(0.0)),
        };
        let mut results = Vec::with_capacity(4);
        for lane in 0..4 {
            let passed = self.test_lane(alu_op, condition, &src1, &src2, lane);
            results.push(self.backend.select(passed, set, clear));
        }
        for (component, value) in results.into_iter().enumerate() {
            self.store_component(&dest, component as u32, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::harness::{operand, stores, temp, translate};
    use super::*;
    use crate::usse::{Instruction, OperandSlot, RegisterBank};

    fn comparison(opcode: Opcode, condition: TestCondition) -> Instruction {
        let mut inst = Instruction::new(0, opcode);
        inst.src1 = temp(OperandSlot::Src1, 0, DataType::F32);
        inst.src2 = temp(OperandSlot::Src2, 1, DataType::F32);
        inst.detail = InstructionDetail::Test {
            alu_op: Opcode::Vsub,
            condition,
            source_mask: 0b0001,
        };
        inst
    }

    #[test]
    fn test_condition_mapping() {
        assert_eq!(compare_op(TestCondition::LessEqual), Some(CompareOp::LessEqual));
        assert_eq!(compare_op(TestCondition::Always), None);
    }

    #[test]
    fn test_vtst_writes_predicate() {
        let mut inst = comparison(Opcode::Vtst, TestCondition::GreaterThan);
        inst.dest = operand(OperandSlot::Dest, RegisterBank::Predicate, 1, DataType::F32);
        let body = translate(&[inst]);
        assert!(body.contains(" > t"), "{}", body);
        assert_eq!(stores(&body), vec!["p[1]"]);
    }

    #[test]
    fn test_vtst_always_sets_predicate() {
        let mut inst = comparison(Opcode::Vtst, TestCondition::Always);
        inst.dest = operand(OperandSlot::Dest, RegisterBank::Predicate, 2, DataType::F32);
        let body = translate(&[inst]);
        assert!(body.contains("p[2] = true;"), "{}", body);
    }

    #[test]
    fn test_vtstmsk_byte_mask() {
        let mut inst = comparison(Opcode::Vtstmsk, TestCondition::Equal);
        inst.dest = temp(OperandSlot::Dest, 4, DataType::Uint8);
        let body = translate(&[inst]);
        assert_eq!(body.matches(" ? 255u : 0u;").count(), 4, "{}", body);
        // All four bytes land in one slot
        assert_eq!(stores(&body), vec!["r[4]"; 4]);
    }

    #[test]
    fn test_vtstmsk_float_mask() {
        let mut inst = comparison(Opcode::Vtstmsk, TestCondition::LessThan);
        inst.dest = temp(OperandSlot::Dest, 4, DataType::F32);
        let body = translate(&[inst]);
        assert_eq!(body.matches(" ? 1.0 : 0.0;").count(), 4, "{}", body);
        assert_eq!(stores(&body), vec!["r[4]", "r[5]", "r[6]", "r[7]"]);
    }
}
