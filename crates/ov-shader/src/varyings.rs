//! Stage interface between vertex and fragment programs
//!
//! Vertex programs write their outputs consecutively into the O bank, in a
//! fixed order. Fragment programs receive iterated varyings and the result
//! of non-dependent texture queries in PA registers, described by the
//! attribute descriptors of the varyings block.

use crate::gxp::{AttributeDescriptor, GxpProgram, ParameterCategory, ParameterType};
use crate::usse::{DataType, RegisterBank};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

/// Named varying slot shared by both stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Varying {
    Position,
    Color0,
    Color1,
    Fog,
    TexCoord(u8),
    SpriteCoord,
}

impl Varying {
    /// Interface variable name, also the link key between stages
    pub fn name(self) -> String {
        match self {
            Self::Position => "v_Position".to_string(),
            Self::Color0 => "v_Color0".to_string(),
            Self::Color1 => "v_Color1".to_string(),
            Self::Fog => "v_Fog".to_string(),
            Self::TexCoord(i) => format!("v_TexCoord{}", i),
            Self::SpriteCoord => "v_SpriteCoord".to_string(),
        }
    }

    /// Interface location; position is a builtin
    pub fn location(self) -> Option<u32> {
        match self {
            Self::Position => None,
            Self::Color0 => Some(0),
            Self::Color1 => Some(1),
            Self::Fog => Some(2),
            Self::TexCoord(i) => Some(3 + i as u32),
            Self::SpriteCoord => Some(13),
        }
    }

    fn from_id(id: u32) -> Option<Self> {
        if id & 0x4000_0000 != 0 {
            return Some(Self::SpriteCoord);
        }
        match id {
            0xD000 => Some(Self::Position),
            0xC000 => Some(Self::Fog),
            0xA000 => Some(Self::Color0),
            0xB000 => Some(Self::Color1),
            0x0000..=0x9000 if id % 0x1000 == 0 => Some(Self::TexCoord((id / 0x1000) as u8)),
            _ => None,
        }
    }
}

/// One vertex program output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexOutput {
    pub varying: Varying,
    /// First O register
    pub register: u32,
    pub components: u32,
}

/// Outputs of a vertex program, in register order
pub fn vertex_outputs(program: &GxpProgram) -> Vec<VertexOutput> {
    if !program.is_vertex() {
        return Vec::new();
    }
    let vo1 = program.varyings.vertex_outputs1;
    let vo2 = program.varyings.vertex_outputs2;

    let mut slots = vec![(Varying::Position, 4)];
    if vo1 & 0x800 != 0 {
        slots.push((Varying::Color0, 4));
    }
    if vo1 & 0x400 != 0 {
        slots.push((Varying::Color1, 4));
    }
    if vo1 & 0x200 != 0 {
        slots.push((Varying::Fog, 2));
    }
    for i in 0..10u8 {
        let info = (vo2 >> (i as u32 * 3)) & 0b111;
        if info != 0 {
            slots.push((Varying::TexCoord(i), texcoord_components(info)));
        }
    }

    let mut register = 0;
    slots
        .into_iter()
        .map(|(varying, components)| {
            let output = VertexOutput {
                varying,
                register,
                components,
            };
            register += components;
            output
        })
        .collect()
}

fn texcoord_components(info: u32) -> u32 {
    let mut count = 0;
    if info & 0b001 != 0 {
        count += 2;
    }
    if info & 0b010 != 0 {
        count += 1;
    }
    if info & 0b100 != 0 {
        count += 1;
    }
    count
}

/// An iterated varying copied into PA registers before the program runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentInput {
    pub varying: Varying,
    pub register: u32,
    pub components: u32,
    pub data_type: DataType,
}

/// How a texture query builds its coordinate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryProjection {
    /// `.xy`
    None,
    /// `.xy / .z`
    Z,
    /// `.xy / .w`
    W,
}

/// A texture sample the hardware performs before the program runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextureQuery {
    pub coord_index: u8,
    pub sampler_index: u32,
    pub dest_register: u32,
    pub store_type: DataType,
    pub projection: QueryProjection,
}

/// Fragment program interface
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentInterface {
    pub inputs: Vec<FragmentInput>,
    pub texture_queries: Vec<TextureQuery>,
}

impl FragmentInterface {
    /// Interface variable for texcoord `index`, if an iterator declares it
    pub fn texcoord(&self, index: u8) -> Option<&FragmentInput> {
        self.inputs.iter().find(|i| i.varying == Varying::TexCoord(index))
    }
}

/// Walk the attribute descriptors of a fragment program
pub fn fragment_interface(program: &GxpProgram) -> FragmentInterface {
    let mut interface = FragmentInterface::default();
    if !program.is_fragment() {
        return interface;
    }

    let mut pa_offset = 0u32;
    for descriptor in &program.fragment_descriptors {
        let id = descriptor.attribute_info & 0x4000_F000;
        if id != 0xF000 {
            match Varying::from_id(id) {
                Some(varying) => {
                    let input = FragmentInput {
                        varying,
                        register: pa_offset,
                        components: ((descriptor.attribute_info >> 22) & 3) + 1,
                        data_type: iterator_type(descriptor, varying),
                    };
                    debug!(
                        "Iterator: pa{} = ({:?}{}) {}",
                        pa_offset,
                        input.data_type,
                        input.components,
                        varying.name()
                    );
                    interface.inputs.push(input);
                }
                None => warn!("Unknown iterator id 0x{:X}", id),
            }
            pa_offset += ((descriptor.size >> 4) & 3) + 1;
        }

        let coord_index = descriptor.attribute_info & 0x40F;
        if coord_index != 0xF {
            let query = texture_query(program, descriptor, (coord_index & 0xF) as u8, pa_offset);
            trace!("pa{} = texture query {:?}", pa_offset, query);
            interface.texture_queries.push(query);
            pa_offset += ((descriptor.size >> 6) & 3) + 1;
        }
    }
    interface
}

fn iterator_type(descriptor: &AttributeDescriptor, varying: Varying) -> DataType {
    let is_color = matches!(varying, Varying::Color0 | Varying::Color1);
    match descriptor.attribute_info & 0x3010_0000 {
        0x2000_0000 => DataType::F16,
        // Fixed point iterators are carried as float
        0x1000_0000 => DataType::F32,
        0x0010_0000 if is_color => DataType::F32,
        0x0010_0000 => DataType::Uint8,
        _ if is_color => DataType::Uint8,
        _ => DataType::F32,
    }
}

fn texture_query(program: &GxpProgram, descriptor: &AttributeDescriptor, coord_index: u8, dest: u32) -> TextureQuery {
    let sampler_index = program
        .parameters
        .iter()
        .find(|p| p.category == ParameterCategory::Sampler && p.resource_index as u32 == descriptor.resource_index)
        .map_or(0, |p| p.resource_index as u32);

    let store_type = match (descriptor.component_info >> 4) & 3 {
        0 => DataType::Uint8,
        2 => DataType::F16,
        3 => DataType::F32,
        other => {
            warn!("Unsupported texture query component type {}", other);
            DataType::F16
        }
    };
    let projection = match descriptor.attribute_info & 0x300 {
        0x300 => QueryProjection::Z,
        0x200 => QueryProjection::W,
        _ => QueryProjection::None,
    };

    TextureQuery {
        coord_index,
        sampler_index,
        dest_register: dest,
        store_type,
        projection,
    }
}

/// Where a fragment program leaves its colour, and in which format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentOutput {
    pub bank: RegisterBank,
    pub data_type: DataType,
}

pub fn fragment_output(program: &GxpProgram) -> FragmentOutput {
    FragmentOutput {
        bank: if program.native_color {
            RegisterBank::Output
        } else {
            RegisterBank::PrimAttr
        },
        data_type: ParameterType::from(program.varyings.output_param_type).data_type(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gxp::{Parameter, ProgramType, Varyings};

    fn program(program_type: ProgramType, varyings: Varyings) -> GxpProgram {
        GxpProgram {
            major_version: 1,
            minor_version: 4,
            program_type,
            native_color: false,
            reg_format: false,
            primary_reg_count: 0,
            secondary_reg_count: 0,
            default_uniform_buffer_count: 0,
            parameters: Vec::new(),
            containers: Vec::new(),
            literals: Vec::new(),
            dependent_samplers: Vec::new(),
            uniform_buffer_infos: Vec::new(),
            varyings,
            fragment_descriptors: Vec::new(),
            primary_program: Vec::new(),
            secondary_program: Vec::new(),
        }
    }

    #[test]
    fn test_position_only() {
        let outputs = vertex_outputs(&program(ProgramType::Vertex, Varyings::default()));
        assert_eq!(
            outputs,
            vec![VertexOutput {
                varying: Varying::Position,
                register: 0,
                components: 4
            }]
        );
    }

    #[test]
    fn test_output_order_and_registers() {
        let varyings = Varyings {
            vertex_outputs1: 0x800 | 0x200,
            // texcoord0 xy, texcoord2 xyzw
            vertex_outputs2: 0b001 | (0b111 << 6),
            ..Varyings::default()
        };
        let outputs = vertex_outputs(&program(ProgramType::Vertex, varyings));
        let layout: Vec<(Varying, u32, u32)> = outputs.iter().map(|o| (o.varying, o.register, o.components)).collect();
        assert_eq!(
            layout,
            vec![
                (Varying::Position, 0, 4),
                (Varying::Color0, 4, 4),
                (Varying::Fog, 8, 2),
                (Varying::TexCoord(0), 10, 2),
                (Varying::TexCoord(2), 12, 4),
            ]
        );
    }

    #[test]
    fn test_fragment_iterators_and_queries() {
        let mut p = program(ProgramType::Fragment, Varyings::default());
        p.parameters.push(Parameter {
            name: "tex".to_string(),
            category: ParameterCategory::Sampler,
            param_type: ParameterType::F32,
            component_count: 0,
            container_index: 0,
            semantic: 0,
            array_size: 0,
            resource_index: 2,
        });
        // texcoord0 iterator, two components over one register pair
        p.fragment_descriptors.push(AttributeDescriptor {
            attribute_info: (1 << 22) | 0xF,
            resource_index: 0,
            size: 1 << 4,
            component_info: 0,
        });
        // colour0 iterator as u8 plus a query of texcoord0 through sampler 2
        p.fragment_descriptors.push(AttributeDescriptor {
            attribute_info: 0xA000 | (3 << 22) | 0x100,
            resource_index: 2,
            size: 0,
            component_info: 2 << 4,
        });
        let interface = fragment_interface(&p);

        assert_eq!(interface.inputs.len(), 2);
        assert_eq!(interface.inputs[0].register, 0);
        assert_eq!(interface.inputs[0].components, 2);
        assert_eq!(interface.inputs[1].varying, Varying::Color0);
        assert_eq!(interface.inputs[1].register, 2);
        assert_eq!(interface.inputs[1].data_type, DataType::Uint8);

        let query = interface.texture_queries[0];
        assert_eq!(query.coord_index, 0);
        assert_eq!(query.sampler_index, 2);
        assert_eq!(query.dest_register, 3);
        assert_eq!(query.store_type, DataType::F16);
        assert_eq!(query.projection, QueryProjection::None);
        assert!(interface.texcoord(0).is_some());
    }

    #[test]
    fn test_fragment_output_bank() {
        let mut p = program(ProgramType::Fragment, Varyings::default());
        assert_eq!(fragment_output(&p).bank, RegisterBank::PrimAttr);
        p.native_color = true;
        p.varyings.output_param_type = 1;
        let out = fragment_output(&p);
        assert_eq!(out.bank, RegisterBank::Output);
        assert_eq!(out.data_type, DataType::F16);
    }
}
