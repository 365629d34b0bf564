//! Texture sampling

use super::registers::RegRef;
use super::{Step, Translator};
use crate::backend::{ScalarKind, ShaderBackend, Value};
use crate::usse::{DataType, InstructionDetail};

/// Level of detail taken from src2
const LOD_MODE_REPLACE: u8 = 2;

/// Sample-buffer mode whose result lands one vector after the destination
const SB_MODE_SECOND_HALF: u8 = 3;

impl<B: ShaderBackend> Translator<'_, B> {
    pub(super) fn emit_smp(&mut self, step: Step<'_>) {
        let inst = step.inst;
        let InstructionDetail::Sample { lod_mode, sb_mode, .. } = inst.detail else {
            return;
        };

        // src1 names either the state register of a dependent sampler or the sampler itself
        let key = inst.src1.num;
        let sampler = self
            .input
            .samplers
            .iter()
            .find(|s| s.dependent && s.offset == key)
            .or_else(|| self.input.sampler(key))
            .map(|s| (s.index, s.is_cube));
        let Some((index, cube)) = sampler else {
            self.degrade(format!("sample from unknown sampler {}", key));
            return;
        };

        let coords = self.at(step, &inst.src0);
        let lanes = if cube { 3 } else { 2 };
        let components: Vec<_> = (0..lanes).map(|l| self.load_lane(&coords, l)).collect();
        let components: Vec<_> = components
            .into_iter()
            .map(|c| self.coerce(c, ScalarKind::Float))
            .collect();
        let coord = self.backend.construct(&components);

        let lod = match lod_mode {
            0 => None,
            LOD_MODE_REPLACE => {
                let src2 = self.at(step, &inst.src2).with_type(DataType::F32);
                let level = self.load_lane(&src2, 0);
                Some(level)
            }
            other => {
                self.degrade(format!("sampler lod mode {} is sampled without bias", other));
                None
            }
        };
        let texel = self.backend.sample(index, coord, lod, false);

        let data_type = match inst.dest.data_type {
            DataType::F16 => DataType::F16,
            DataType::F32 => DataType::F32,
            other => {
                self.degrade(format!("sample into {} stored as f32", other.name()));
                DataType::F32
            }
        };
        let mut dest = self.at(step, &inst.dest).with_type(data_type);
        if sb_mode == SB_MODE_SECOND_HALF {
            dest.shift += 4;
        }
        self.store_texel(&dest, texel);
    }

    /// Store the four lanes of a sampled texel
    pub(super) fn store_texel(&mut self, dest: &RegRef, texel: Value) {
        let lanes: Vec<_> = (0..4).map(|c| self.backend.extract(texel, c)).collect();
        for (component, value) in lanes.into_iter().enumerate() {
            self.store_component(dest, component as u32, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::harness::{stores, temp, translate_with};
    use super::*;
    use crate::backend::{SamplerDecl, ShaderInterface, ShaderStage};
    use crate::program_input::{ProgramInput, Sampler};
    use crate::usse::{Instruction, Opcode, OperandSlot};

    fn sampled(sb_mode: u8, stage: ShaderStage) -> (String, bool) {
        let mut interface = ShaderInterface::new(stage);
        interface.samplers.push(SamplerDecl {
            index: 0,
            name: "tex0".to_string(),
            cube: false,
        });
        let input = ProgramInput {
            samplers: vec![Sampler {
                name: "tex0".to_string(),
                index: 0,
                is_cube: false,
                dependent: false,
                offset: 0,
            }],
            ..ProgramInput::default()
        };
        let mut inst = Instruction::new(0, Opcode::Smp);
        inst.dest = temp(OperandSlot::Dest, 0, DataType::F32);
        inst.src0 = temp(OperandSlot::Src0, 8, DataType::F32);
        inst.src1 = temp(OperandSlot::Src1, 0, DataType::F32);
        inst.detail = InstructionDetail::Sample {
            dim: 2,
            lod_mode: 0,
            sb_mode,
        };
        let (body, diagnostics) = translate_with(&interface, &input, &[inst]);
        (body, diagnostics.is_degraded())
    }

    #[test]
    fn test_sample_second_half_shifts_destination() {
        let (body, degraded) = sampled(SB_MODE_SECOND_HALF, ShaderStage::VERTEX);
        assert!(!degraded);
        assert!(body.contains("textureLod(tex0, "), "{}", body);
        assert_eq!(stores(&body), vec!["r[4]", "r[5]", "r[6]", "r[7]"]);
    }

    #[test]
    fn test_sample_into_destination() {
        let (body, degraded) = sampled(0, ShaderStage::FRAGMENT);
        assert!(!degraded);
        assert!(body.contains("= vec2(t"), "{}", body);
        assert!(body.contains("= texture(tex0, t"), "{}", body);
        assert!(body.contains("= r[8];") && body.contains("= r[9];"), "{}", body);
        assert_eq!(stores(&body), vec!["r[0]", "r[1]", "r[2]", "r[3]"]);
    }

    #[test]
    fn test_unknown_sampler_degrades() {
        let mut inst = Instruction::new(0, Opcode::Smp);
        inst.src1 = temp(OperandSlot::Src1, 3, DataType::F32);
        inst.detail = InstructionDetail::Sample {
            dim: 2,
            lod_mode: 0,
            sb_mode: 0,
        };
        let interface = ShaderInterface::new(ShaderStage::FRAGMENT);
        let (body, diagnostics) = translate_with(&interface, &ProgramInput::default(), &[inst]);
        assert!(diagnostics.is_degraded());
        assert!(stores(&body).is_empty());
    }
}
