//! USSE to backend translation
//!
//! Walks the block tree of a program and drives a [`ShaderBackend`] with the
//! semantics of every instruction it covers. Instruction families live in
//! their own submodules; the prologue and epilogue that move data between
//! the stage interface and the register files live in [`interface`].

mod alu;
mod bitwise;
mod compare;
mod data;
pub mod interface;
mod registers;
mod texture;

use crate::analyzer::{BlockTree, Node, NodeId};
use crate::backend::{ShaderBackend, UnaryOp, Value};
use crate::program_input::ProgramInput;
use crate::usse::{decode_with, family_multiplier, DecodeContext, ExtPredicate, Instruction, InstructionDetail, Opcode, Operand, RepeatSession};
use ov_core::Diagnostics;
use registers::RegRef;
use tracing::trace;

/// Per-compile translation state
pub struct Translator<'a, B: ShaderBackend> {
    backend: B,
    input: &'a ProgramInput,
    repeat: RepeatSession,
    diagnostics: Diagnostics,
    /// Instruction being translated, for diagnostics
    offset: usize,
    secondary: bool,
}

/// One iteration of a possibly repeated instruction
#[derive(Clone, Copy)]
struct Step<'i> {
    pub inst: &'i Instruction,
    pub iteration: u32,
}

impl<'a, B: ShaderBackend> Translator<'a, B> {
    pub fn new(backend: B, input: &'a ProgramInput) -> Self {
        Self {
            backend,
            input,
            repeat: RepeatSession::new(),
            diagnostics: Diagnostics::new(),
            offset: 0,
            secondary: false,
        }
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn diagnostics_mut(&mut self) -> &mut Diagnostics {
        &mut self.diagnostics
    }

    pub fn finish(self) -> (B, Diagnostics) {
        (self.backend, self.diagnostics)
    }

    /// Translate one instruction stream along its block tree
    ///
    /// Repeat increments set by SMLSI stay in effect across blocks and are
    /// only reset when a new program starts.
    pub fn translate_program(&mut self, words: &[u64], tree: &BlockTree, secondary: bool) {
        self.secondary = secondary;
        self.repeat.reset();
        let length = words.len().min(tree.length() as usize);
        self.emit_node(&words[..length], tree, tree.root());
    }

    fn degrade(&mut self, message: impl Into<String>) {
        let offset = self.offset;
        self.diagnostics.degrade(Some(offset), message);
    }

    //=========================================================================
    // CONTROL FLOW
    //=========================================================================

    fn emit_node(&mut self, words: &[u64], tree: &BlockTree, id: NodeId) {
        match *tree.node(id) {
            Node::Block { .. } => {
                for &child in tree.children(id) {
                    self.emit_node(words, tree, child);
                }
            }
            Node::Code { offset, size, pred } => {
                let guarded = pred != ExtPredicate::None;
                if guarded {
                    let cond = self.predicate_value(pred);
                    self.backend.begin_if(cond);
                }
                let end = (offset + size) as usize;
                for index in offset as usize..end.min(words.len()) {
                    self.emit_word(words[index], index);
                }
                if guarded {
                    self.backend.end_if();
                }
            }
            Node::Conditional {
                condition,
                if_block,
                else_block,
                ..
            } => {
                // The body is what runs when the branch over it is not taken
                let taken = self.predicate_value(condition);
                let cond = self.backend.unary(UnaryOp::Not, taken);
                self.backend.begin_if(cond);
                self.emit_node(words, tree, if_block);
                if let Some(else_block) = else_block {
                    self.backend.begin_else();
                    self.emit_node(words, tree, else_block);
                }
                self.backend.end_if();
            }
            Node::Loop { content, .. } => {
                self.backend.begin_loop();
                self.emit_node(words, tree, content);
                self.backend.end_loop();
            }
            Node::Break { pred, negated, .. } => {
                self.guarded(pred, negated, |backend| backend.emit_break());
            }
            Node::Continue { pred, .. } => {
                self.guarded(pred, false, |backend| backend.emit_continue());
            }
        }
    }

    fn guarded(&mut self, pred: ExtPredicate, negated: bool, emit: impl FnOnce(&mut B)) {
        if pred == ExtPredicate::None && !negated {
            emit(&mut self.backend);
            return;
        }
        let mut cond = self.predicate_value(pred);
        if negated {
            cond = self.backend.unary(UnaryOp::Not, cond);
        }
        self.backend.begin_if(cond);
        emit(&mut self.backend);
        self.backend.end_if();
    }

    /// Boolean value of a predicate condition
    fn predicate_value(&mut self, pred: ExtPredicate) -> Value {
        match pred.register() {
            Some(index) => {
                let value = self.backend.load_predicate(index as u32);
                if pred.is_negated() {
                    self.backend.unary(UnaryOp::Not, value)
                } else {
                    value
                }
            }
            None => {
                if pred == ExtPredicate::Pn {
                    self.degrade("per-instance predicate treated as true");
                }
                self.backend.constant_bool(true)
            }
        }
    }

    //=========================================================================
    // INSTRUCTIONS
    //=========================================================================

    fn emit_word(&mut self, word: u64, index: usize) {
        self.offset = index;
        let inst = decode_with(
            word,
            DecodeContext {
                secondary_program: self.secondary,
            },
        );
        trace!("{:>4}: {}", index, inst);

        match inst.opcode {
            Opcode::Illegal => {
                self.degrade(format!("illegal instruction 0x{:016x} skipped", word));
            }
            // Branches are already part of the block tree
            Opcode::Br | Opcode::Nop | Opcode::Phas | Opcode::Spec => {}
            Opcode::Smlsi => {
                if let InstructionDetail::RepeatSetup {
                    increments,
                    swizzle_mode,
                } = inst.detail
                {
                    self.repeat.apply_smlsi(increments, swizzle_mode);
                }
            }
            Opcode::Kill => self.backend.discard(),
            _ => self.emit_repeated(&inst),
        }
    }

    fn emit_repeated(&mut self, inst: &Instruction) {
        if let Some(multiplier) =
            family_multiplier(inst.opcode, inst.dest.data_type.is_float(), inst.src1.data_type.is_float())
        {
            self.repeat.set_multiplier(multiplier);
        }
        for iteration in 0..inst.iterations() {
            if inst.iterations() > 1 {
                self.backend
                    .comment(&format!("{} repeat {}", inst.opcode.name(), iteration));
            }
            self.emit_step(Step { inst, iteration });
        }
        self.repeat.reset_multiplier();
    }

    fn emit_step(&mut self, step: Step<'_>) {
        use Opcode as O;
        match step.inst.opcode {
            O::Vmov | O::Vmovc | O::Vmovcu8 => self.emit_vmov(step),
            O::Vpck => self.emit_vpck(step),
            O::Vldst => self.emit_vldst(step),
            O::Vmad | O::Vf16mad => self.emit_vmad(step),
            O::Vdp | O::Vf16dp => self.emit_vdp(step),
            O::Vmul | O::Vf16mul | O::Vadd | O::Vf16add | O::Vsub | O::Vf16sub | O::Vmin | O::Vf16min | O::Vmax
            | O::Vf16max | O::Vfrc | O::Vf16frc | O::Vdsx | O::Vf16dsx | O::Vdsy | O::Vf16dsy => self.emit_nmad(step),
            O::Vrcp | O::Vrsq | O::Vlog | O::Vexp => self.emit_vcomp(step),
            O::Vdual => self.emit_vdual(step),
            O::Sop2 => self.emit_sop2(step),
            O::Vtst => self.emit_vtst(step),
            O::Vtstmsk => self.emit_vtstmsk(step),
            O::And | O::Or | O::Xor | O::Shl | O::Shr | O::Rol | O::Asr => self.emit_vbw(step),
            O::Smp => self.emit_smp(step),
            other => self.degrade(format!("{} has no translation", other.name())),
        }
    }

    /// `op` advanced to the iteration of `step`
    fn at(&self, step: Step<'_>, op: &Operand) -> RegRef {
        RegRef {
            op: *op,
            shift: self.repeat.offset(op, step.inst.repeat_mode, step.iteration),
        }
    }
}

/// Components selected by a write mask
fn mask_components(mask: u8) -> impl Iterator<Item = u32> {
    (0..4u32).filter(move |c| mask & (1 << c) != 0)
}

/// Drives single instructions through a [`GlslBackend`](crate::backend::GlslBackend)
#[cfg(test)]
pub(super) mod harness {
    use super::Translator;
    use crate::backend::{GlslBackend, ShaderBackend, ShaderCode, ShaderInterface, ShaderStage};
    use crate::program_input::ProgramInput;
    use crate::usse::{DataType, Instruction, Operand, OperandSlot, RegisterBank};
    use ov_core::{Diagnostics, FeatureFlags, OutputConfig};

    pub fn operand(slot: OperandSlot, bank: RegisterBank, num: u32, data_type: DataType) -> Operand {
        let mut op = Operand::new(slot);
        op.bank = bank;
        op.num = num;
        op.data_type = data_type;
        op
    }

    pub fn temp(slot: OperandSlot, num: u32, data_type: DataType) -> Operand {
        operand(slot, RegisterBank::Temp, num, data_type)
    }

    /// Main body of the program `program` translates to, with its diagnostics
    pub fn translate_with(
        interface: &ShaderInterface,
        input: &ProgramInput,
        program: &[Instruction],
    ) -> (String, Diagnostics) {
        let backend = GlslBackend::new(interface, &FeatureFlags::default(), &OutputConfig::default());
        let mut translator = Translator::new(backend, input);
        for inst in program {
            translator.emit_repeated(inst);
        }
        let (backend, diagnostics) = translator.finish();
        let ShaderCode::Glsl(text) = backend.finish() else {
            panic!("GLSL backend produced SPIR-V");
        };
        let body = match text.split_once("void main() {") {
            Some((_, body)) => body.to_string(),
            None => text,
        };
        (body, diagnostics)
    }

    /// Vertex-stage body of `program`, which must translate cleanly
    pub fn translate(program: &[Instruction]) -> String {
        let interface = ShaderInterface::new(ShaderStage::VERTEX);
        let (body, diagnostics) = translate_with(&interface, &ProgramInput::default(), program);
        assert!(!diagnostics.is_degraded(), "{:?}", diagnostics.entries());
        body
    }

    /// Register stores of the body, as `file[slot]` in emission order
    pub fn stores(body: &str) -> Vec<String> {
        body.lines()
            .map(str::trim)
            .filter_map(|line| {
                let (target, _) = line.split_once(" = ")?;
                (!target.contains(' ')).then(|| target.to_string())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::harness::{stores, temp, translate};
    use crate::usse::{DataType, Instruction, Opcode, OperandSlot, RepeatMode};

    fn vmad(dest: u32, mask: u8) -> Instruction {
        let mut inst = Instruction::new(0, Opcode::Vmad);
        inst.dest = temp(OperandSlot::Dest, dest, DataType::F32);
        inst.src0 = temp(OperandSlot::Src0, 0, DataType::F32);
        inst.src1 = temp(OperandSlot::Src1, 1, DataType::F32);
        inst.src2 = temp(OperandSlot::Src2, 2, DataType::F32);
        inst.dest_mask = mask;
        inst
    }

    #[test]
    fn test_external_repeat_unrolls_by_vector() {
        let mut inst = vmad(8, 0b0001);
        inst.repeat_count = 3;
        inst.repeat_mode = RepeatMode::External;
        let body = translate(&[inst]);

        assert_eq!(stores(&body), vec!["r[8]", "r[12]", "r[16]", "r[20]"]);
        for iteration in 0..4 {
            assert!(body.contains(&format!("// VMAD repeat {}", iteration)), "{}", body);
        }
        // The last iteration reads its sources one vector per step further on
        assert!(body.contains("= r[12];"), "{}", body);
        assert!(body.contains("= r[14];"), "{}", body);
    }

    #[test]
    fn test_single_issue_has_no_repeat_comment() {
        let body = translate(&[vmad(4, 0b0011)]);
        assert_eq!(stores(&body), vec!["r[4]", "r[5]"]);
        assert!(!body.contains("repeat"), "{}", body);
    }
}
