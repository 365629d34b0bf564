//! Float ALU: multiply-add, dot products, the NMAD family, complex
//! functions, dual issue and SOP2 blending

use super::registers::RegRef;
use super::{mask_components, Step, Translator};
use crate::backend::{BinaryOp, ScalarKind, ShaderBackend, UnaryOp, Value};
use crate::usse::{ComplexOp, DualOp, InstructionDetail, Opcode, Sop2Op, Sop2Select};

/// Rotate a write mask one channel up, w wrapping to x
fn rotate_mask(mask: u8) -> u8 {
    ((mask << 1) | (mask >> 3)) & 0xF
}

fn lane_of(source_mask: u8) -> usize {
    (source_mask.trailing_zeros() as usize).min(3)
}

impl<B: ShaderBackend> Translator<'_, B> {
    fn store_all(&mut self, dest: &RegRef, results: Vec<(u32, Value)>) {
        for (component, value) in results {
            self.store_component(dest, component, value);
        }
    }

    fn broadcast(&mut self, dest: &RegRef, mask: u8, value: Value) {
        for component in mask_components(mask) {
            self.store_component(dest, component, value);
        }
    }

    fn mad(&mut self, a: Value, b: Value, c: Value) -> Value {
        let product = self.backend.binary(BinaryOp::Mul, a, b);
        self.backend.binary(BinaryOp::Add, product, c)
    }

    /// Dot product over the first `lanes` lanes of two operands
    fn dot(&mut self, lhs: &RegRef, rhs: &RegRef, lanes: usize) -> Value {
        let a: Vec<Value> = (0..lanes).map(|l| self.load_lane(lhs, l)).collect();
        let b: Vec<Value> = (0..lanes).map(|l| self.load_lane(rhs, l)).collect();
        if lanes == 1 {
            return self.backend.binary(BinaryOp::Mul, a[0], b[0]);
        }
        let a = self.backend.construct(&a);
        let b = self.backend.construct(&b);
        self.backend.binary(BinaryOp::Dot, a, b)
    }

    /// Derivatives only exist in fragment programs
    fn derivative(&mut self, op: UnaryOp, value: Value) -> Value {
        if self.backend.stage().is_fragment() {
            self.backend.unary(op, value)
        } else {
            self.degrade("derivative in a vertex program yields zero");
            self.backend.constant_f32(0.0)
        }
    }

    fn complex(&mut self, op: ComplexOp, value: Value) -> Value {
        match op {
            ComplexOp::Rcp => {
                let one = self.backend.constant_f32(1.0);
                self.backend.binary(BinaryOp::Div, one, value)
            }
            ComplexOp::Rsq => self.backend.unary(UnaryOp::InverseSqrt, value),
            ComplexOp::Log => self.backend.unary(UnaryOp::Log2, value),
            ComplexOp::Exp => self.backend.unary(UnaryOp::Exp2, value),
        }
    }

    /// `a - floor(b)`, which is `fract(a)` when both name the same register
    fn subtract_floor(&mut self, a: Value, b: Value, same: bool) -> Value {
        if same {
            return self.backend.unary(UnaryOp::Fract, a);
        }
        let floor = self.backend.unary(UnaryOp::Floor, b);
        self.backend.binary(BinaryOp::Sub, a, floor)
    }

    //=========================================================================
    // VMAD / VDP / NMAD
    //=========================================================================

    pub(super) fn emit_vmad(&mut self, step: Step<'_>) {
        let inst = step.inst;
        let dest = self.at(step, &inst.dest);
        let src0 = self.at(step, &inst.src0);
        let src1 = self.at(step, &inst.src1);
        let src2 = self.at(step, &inst.src2);

        let mut results = Vec::with_capacity(4);
        for component in mask_components(inst.dest_mask) {
            let lane = component as usize;
            let a = self.load_lane(&src0, lane);
            let b = self.load_lane(&src1, lane);
            let c = self.load_lane(&src2, lane);
            results.push((component, self.mad(a, b, c)));
        }
        self.store_all(&dest, results);
    }

    pub(super) fn emit_vdp(&mut self, step: Step<'_>) {
        let inst = step.inst;
        let (components, rotate) = match inst.detail {
            InstructionDetail::Dot {
                components,
                rotate_mask,
            } => (components as usize, rotate_mask),
            _ => (4, false),
        };
        let mut mask = inst.dest_mask;
        if rotate {
            for _ in 0..step.iteration {
                mask = rotate_mask(mask);
            }
        }
        let dest = self.at(step, &inst.dest);
        let src1 = self.at(step, &inst.src1);
        let src2 = self.at(step, &inst.src2);
        let value = self.dot(&src1, &src2, components);
        self.broadcast(&dest, mask, value);
    }

    pub(super) fn emit_nmad(&mut self, step: Step<'_>) {
        use Opcode as O;
        let inst = step.inst;
        let dest = self.at(step, &inst.dest);
        let src1 = self.at(step, &inst.src1);
        let src2 = self.at(step, &inst.src2);
        let same = inst.src1.bank == inst.src2.bank && inst.src1.num == inst.src2.num && src1.shift == src2.shift;

        let mut results = Vec::with_capacity(4);
        for component in mask_components(inst.dest_mask) {
            let lane = component as usize;
            let a = self.load_lane(&src1, lane);
            let value = match inst.opcode {
                O::Vdsx | O::Vf16dsx => self.derivative(UnaryOp::DerivX, a),
                O::Vdsy | O::Vf16dsy => self.derivative(UnaryOp::DerivY, a),
                opcode => {
                    let b = self.load_lane(&src2, lane);
                    match opcode {
                        O::Vmul | O::Vf16mul => self.backend.binary(BinaryOp::Mul, a, b),
                        O::Vadd | O::Vf16add => self.backend.binary(BinaryOp::Add, a, b),
                        O::Vsub | O::Vf16sub => self.backend.binary(BinaryOp::Sub, a, b),
                        O::Vmin | O::Vf16min => self.backend.binary(BinaryOp::Min, a, b),
                        O::Vmax | O::Vf16max => self.backend.binary(BinaryOp::Max, a, b),
                        O::Vfrc | O::Vf16frc => self.subtract_floor(a, b, same),
                        other => {
                            self.degrade(format!("{} is not an NMAD operation", other.name()));
                            a
                        }
                    }
                }
            };
            results.push((component, value));
        }
        self.store_all(&dest, results);
    }

    //=========================================================================
    // VCOMP
    //=========================================================================

    pub(super) fn emit_vcomp(&mut self, step: Step<'_>) {
        let inst = step.inst;
        let InstructionDetail::Complex { op, source_mask } = inst.detail else {
            return;
        };
        let dest = self.at(step, &inst.dest);
        let src1 = self.at(step, &inst.src1);
        let value = self.load_lane(&src1, lane_of(source_mask));
        let value = self.coerce(value, ScalarKind::Float);
        let result = self.complex(op, value);
        self.broadcast(&dest, inst.dest_mask, result);
    }

    //=========================================================================
    // VDUAL
    //=========================================================================

    pub(super) fn emit_vdual(&mut self, step: Step<'_>) {
        let InstructionDetail::Dual(ops) = step.inst.detail else {
            return;
        };
        // Both halves read their sources before either result lands
        let first = self.dual_results(step, &ops[0]);
        let second = self.dual_results(step, &ops[1]);
        for (op, results) in [(&ops[0], first), (&ops[1], second)] {
            let dest = self.at(step, &op.dest);
            self.store_all(&dest, results);
        }
    }

    fn dual_results(&mut self, step: Step<'_>, op: &DualOp) -> Vec<(u32, Value)> {
        use Opcode as O;
        let count = (op.src_count as usize).min(3);
        if count == 0 {
            self.degrade(format!("dual {} without sources", op.opcode.name()));
            return Vec::new();
        }
        let srcs: Vec<RegRef> = op.srcs[..count].iter().map(|s| self.at(step, s)).collect();
        let source = |i: usize| srcs[i.min(count - 1)];

        match op.opcode {
            O::Vmad | O::Vmul | O::Vadd | O::Vmov => {
                let mut results = Vec::with_capacity(4);
                for component in mask_components(op.write_mask) {
                    let lane = component as usize;
                    let a = self.load_lane(&source(0), lane);
                    let value = match op.opcode {
                        O::Vmov => a,
                        O::Vmad => {
                            let b = self.load_lane(&source(1), lane);
                            let c = self.load_lane(&source(2), lane);
                            self.mad(a, b, c)
                        }
                        O::Vmul => {
                            let b = self.load_lane(&source(1), lane);
                            self.backend.binary(BinaryOp::Mul, a, b)
                        }
                        _ => {
                            let b = self.load_lane(&source(1), lane);
                            self.backend.binary(BinaryOp::Add, a, b)
                        }
                    };
                    results.push((component, value));
                }
                results
            }
            O::Vdp | O::Vssq => {
                let lanes = if op.source_mask & 0b1000 != 0 { 4 } else { 3 };
                let rhs = if op.opcode == O::Vssq { source(0) } else { source(1) };
                let value = self.dot(&source(0), &rhs, lanes);
                mask_components(op.write_mask).map(|c| (c, value)).collect()
            }
            O::Frsq | O::Frcp | O::Fexp | O::Flog => {
                let a = self.load_lane(&source(0), 0);
                let complex = match op.opcode {
                    O::Frsq => ComplexOp::Rsq,
                    O::Frcp => ComplexOp::Rcp,
                    O::Fexp => ComplexOp::Exp,
                    _ => ComplexOp::Log,
                };
                let value = self.complex(complex, a);
                mask_components(op.write_mask).map(|c| (c, value)).collect()
            }
            O::Fmad | O::Fadd | O::Fmul | O::Fsubflr => {
                let a = self.load_lane(&source(0), 0);
                let b = self.load_lane(&source(1), 0);
                let value = match op.opcode {
                    O::Fmad => {
                        let c = self.load_lane(&source(2), 0);
                        self.mad(a, b, c)
                    }
                    O::Fadd => self.backend.binary(BinaryOp::Add, a, b),
                    O::Fmul => self.backend.binary(BinaryOp::Mul, a, b),
                    _ => self.subtract_floor(a, b, false),
                };
                mask_components(op.write_mask).map(|c| (c, value)).collect()
            }
            other => {
                self.degrade(format!("dual {} has no translation", other.name()));
                Vec::new()
            }
        }
    }

    //=========================================================================
    // SOP2
    //=========================================================================

    pub(super) fn emit_sop2(&mut self, step: Step<'_>) {
        let inst = step.inst;
        let InstructionDetail::Sop2(detail) = inst.detail else {
            return;
        };
        let dest = self.at(step, &inst.dest);
        let src1 = self.at(step, &inst.src1);
        let src2 = self.at(step, &inst.src2);

        let mut s1 = [self.backend.constant_f32(0.0); 4];
        let mut s2 = s1;
        for lane in 0..4 {
            s1[lane] = self.unorm_lane(&src1, lane);
            s2[lane] = self.unorm_lane(&src2, lane);
        }
        for (lane, value) in s1.iter_mut().enumerate() {
            let complement = if lane == 3 {
                detail.src1_alpha_complement
            } else {
                detail.src1_color_complement
            };
            if complement {
                *value = self.one_minus(*value);
            }
        }

        let mut results = Vec::with_capacity(4);
        for component in mask_components(inst.dest_mask) {
            let lane = component as usize;
            let (op, selectors, complements) = if lane == 3 {
                (detail.alpha_op, detail.alpha_sel, detail.alpha_complement)
            } else {
                (detail.color_op, detail.color_sel, detail.color_complement)
            };
            let mut factors = [s1[lane]; 2];
            for (i, factor) in factors.iter_mut().enumerate() {
                *factor = match selectors[i] {
                    Sop2Select::Zero => self.backend.constant_f32(0.0),
                    Sop2Select::Src1Color => s1[lane],
                    Sop2Select::Src2Color => s2[lane],
                    Sop2Select::Src1Alpha => s1[3],
                    Sop2Select::Src2Alpha => s2[3],
                    Sop2Select::Unsupported(bits) => {
                        self.degrade(format!("SOP2 selector {} is not supported", bits));
                        self.backend.constant_f32(0.0)
                    }
                };
                if complements[i] {
                    *factor = self.one_minus(*factor);
                }
            }
            let lhs = self.backend.binary(BinaryOp::Mul, factors[0], s1[lane]);
            let rhs = self.backend.binary(BinaryOp::Mul, factors[1], s2[lane]);
            let blended = match op {
                Sop2Op::Add => self.backend.binary(BinaryOp::Add, lhs, rhs),
                Sop2Op::Sub => self.backend.binary(BinaryOp::Sub, lhs, rhs),
                Sop2Op::Min => self.backend.binary(BinaryOp::Min, lhs, rhs),
                Sop2Op::Max => self.backend.binary(BinaryOp::Max, lhs, rhs),
            };
            results.push((component, self.unorm_to_u8(blended)));
        }
        self.store_all(&dest, results);
    }

    fn one_minus(&mut self, value: Value) -> Value {
        let one = self.backend.constant_f32(1.0);
        self.backend.binary(BinaryOp::Sub, one, value)
    }

    /// A u8 lane as a float in [0, 1]
    fn unorm_lane(&mut self, r: &RegRef, lane: usize) -> Value {
        let raw = self.load_lane(r, lane);
        let float = self.backend.convert(raw, ScalarKind::Float);
        let scale = self.backend.constant_f32(255.0);
        self.backend.binary(BinaryOp::Div, float, scale)
    }

    fn unorm_to_u8(&mut self, value: Value) -> Value {
        let zero = self.backend.constant_f32(0.0);
        let one = self.backend.constant_f32(1.0);
        let clamped = self.backend.binary(BinaryOp::Max, value, zero);
        let clamped = self.backend.binary(BinaryOp::Min, clamped, one);
        let scale = self.backend.constant_f32(255.0);
        let scaled = self.backend.binary(BinaryOp::Mul, clamped, scale);
        self.backend.convert(scaled, ScalarKind::Uint)
    }
}

#[cfg(test)]
mod tests {
    use super::super::harness::{stores, temp, translate};
    use super::*;
    use crate::usse::{DataType, Instruction, OperandSlot, Sop2Detail};

    fn vcomp(opcode: Opcode, op: ComplexOp) -> Instruction {
        let mut inst = Instruction::new(0, opcode);
        inst.dest = temp(OperandSlot::Dest, 5, DataType::F32);
        inst.src1 = temp(OperandSlot::Src1, 3, DataType::F32);
        inst.dest_mask = 0b0011;
        inst.detail = InstructionDetail::Complex { op, source_mask: 0b0001 };
        inst
    }

    /// `src * src_alpha + dst * (1 - src_alpha)` on the colour lanes
    fn alpha_blend(src1_color_complement: bool) -> Instruction {
        let mut inst = Instruction::new(0, Opcode::Sop2);
        inst.dest = temp(OperandSlot::Dest, 2, DataType::Uint8);
        inst.src1 = temp(OperandSlot::Src1, 0, DataType::Uint8);
        inst.src2 = temp(OperandSlot::Src2, 1, DataType::Uint8);
        inst.dest_mask = 0b0001;
        inst.detail = InstructionDetail::Sop2(Sop2Detail {
            color_op: Sop2Op::Add,
            alpha_op: Sop2Op::Add,
            color_sel: [Sop2Select::Src1Alpha, Sop2Select::Src1Alpha],
            alpha_sel: [Sop2Select::Zero, Sop2Select::Zero],
            color_complement: [false, true],
            alpha_complement: [false, false],
            src1_color_complement,
            src1_alpha_complement: false,
        });
        inst
    }

    #[test]
    fn test_rotate_mask() {
        assert_eq!(rotate_mask(0b0001), 0b0010);
        assert_eq!(rotate_mask(0b1000), 0b0001);
        assert_eq!(rotate_mask(0b1001), 0b0011);
    }

    #[test]
    fn test_lane_of_source_mask() {
        assert_eq!(lane_of(0b0100), 2);
        assert_eq!(lane_of(0), 3);
    }

    #[test]
    fn test_vcomp_log2_broadcasts() {
        let body = translate(&[vcomp(Opcode::Vlog, ComplexOp::Log)]);
        assert_eq!(body.matches("log2(").count(), 1, "{}", body);
        assert!(body.contains("= r[3];"), "{}", body);
        assert_eq!(stores(&body), vec!["r[5]", "r[6]"]);
    }

    #[test]
    fn test_vcomp_exp2() {
        let body = translate(&[vcomp(Opcode::Vexp, ComplexOp::Exp)]);
        assert!(body.contains("exp2("), "{}", body);
        assert!(!body.contains("log2("), "{}", body);
        assert_eq!(stores(&body), vec!["r[5]", "r[6]"]);
    }

    #[test]
    fn test_vcomp_reciprocal() {
        let body = translate(&[vcomp(Opcode::Vrcp, ComplexOp::Rcp)]);
        assert!(body.contains("= 1.0 / t"), "{}", body);
    }

    #[test]
    fn test_sop2_alpha_blend_factors() {
        let body = translate(&[alpha_blend(false)]);
        // Every source lane is read as unorm
        assert_eq!(body.matches(" / 255.0;").count(), 8, "{}", body);
        // Only the second colour factor is complemented
        assert_eq!(body.matches("= 1.0 - t").count(), 1, "{}", body);
        assert!(body.contains(" + t"), "{}", body);
        assert!(body.contains(", 0.0);"), "{}", body);
        assert!(body.contains(", 1.0);"), "{}", body);
        assert!(body.contains(" * 255.0;"), "{}", body);
        assert!(body.contains("= uint(t"), "{}", body);
        assert_eq!(stores(&body), vec!["r[2]"]);
    }

    #[test]
    fn test_sop2_complements_src1_colour() {
        let body = translate(&[alpha_blend(true)]);
        // Three colour lanes of src1 plus the second factor
        assert_eq!(body.matches("= 1.0 - t").count(), 4, "{}", body);
    }
}
