//! Stage interface
//!
//! Before the first instruction runs, the hardware has already filled the
//! PA bank with attributes or iterated varyings, the SA bank with uniforms
//! and literals, and performed the texture queries of a fragment program.
//! The prologue reproduces that from the interface variables; the epilogue
//! copies the O bank (or the colour registers) back out.

use super::registers::{scalar_kind, RegRef};
use super::Translator;
use crate::backend::{
    BinaryOp, BufferDecl, Builtin, InterfaceDecl, PackOp, RegisterFile, SamplerDecl, ScalarKind, ShaderBackend,
    ShaderInterface, ShaderStage, Slot, Value,
};
use crate::program_input::{InputSource, ProgramInput};
use crate::usse::{DataType, RegisterBank};
use crate::varyings::{FragmentInput, FragmentInterface, FragmentOutput, QueryProjection, TextureQuery, Varying, VertexOutput};
use tracing::debug;

/// Name of the fragment colour output
pub const COLOR_OUTPUT: &str = "out_color";

/// Components written to vertex outputs a program leaves short
const OUTPUT_DEFAULT: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// What an interface input feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputRole {
    /// Element `element` of attribute `input`
    Attribute { input: usize, element: u32 },
    VertexId { input: usize },
    InstanceId { input: usize },
    Varying(FragmentInput),
    /// A texture coordinate only read by texture queries
    QueryCoord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputRole {
    Vertex(VertexOutput),
    Color(FragmentOutput),
}

/// The declared interface of a stage and how it maps onto register banks
#[derive(Debug, Clone)]
pub struct StageLayout {
    pub interface: ShaderInterface,
    inputs: Vec<InputRole>,
    outputs: Vec<OutputRole>,
    texture_queries: Vec<TextureQuery>,
    /// Interface input carrying each texture coordinate
    texcoords: Vec<(u8, usize)>,
}

fn attribute_kind(data_type: DataType) -> ScalarKind {
    match data_type {
        DataType::C10 | DataType::Unknown => ScalarKind::Float,
        other => scalar_kind(other),
    }
}

impl StageLayout {
    pub fn new(
        stage: ShaderStage,
        input: &ProgramInput,
        vertex_outputs: &[VertexOutput],
        fragment: &FragmentInterface,
        fragment_output: FragmentOutput,
    ) -> Self {
        let mut layout = Self {
            interface: ShaderInterface::new(stage),
            inputs: Vec::new(),
            outputs: Vec::new(),
            texture_queries: Vec::new(),
            texcoords: Vec::new(),
        };

        if stage.is_fragment() {
            layout.declare_fragment(fragment, fragment_output);
        } else {
            layout.declare_vertex(input, vertex_outputs);
        }

        layout.interface.buffers = input
            .uniform_buffers
            .iter()
            .map(|b| BufferDecl {
                binding: b.index,
                size: b.size,
            })
            .collect();
        layout.interface.samplers = input
            .samplers
            .iter()
            .map(|s| SamplerDecl {
                index: s.index,
                name: s.name.clone(),
                cube: s.is_cube,
            })
            .collect();
        layout
    }

    fn push_input(&mut self, decl: InterfaceDecl, role: InputRole) -> usize {
        self.interface.inputs.push(decl);
        self.inputs.push(role);
        self.inputs.len() - 1
    }

    fn declare_vertex(&mut self, input: &ProgramInput, vertex_outputs: &[VertexOutput]) {
        let mut location = 0;
        for (index, parameter) in input.inputs.iter().enumerate() {
            match &parameter.source {
                InputSource::Attribute { name, .. } => {
                    let elements = parameter.array_size.max(1);
                    for element in 0..elements {
                        let name = if elements > 1 {
                            format!("{}_{}", name, element)
                        } else {
                            name.clone()
                        };
                        let mut decl = InterfaceDecl::located(name, location, parameter.component_count.clamp(1, 4) as u8);
                        decl.kind = attribute_kind(parameter.data_type);
                        self.push_input(decl, InputRole::Attribute { input: index, element });
                        location += 1;
                    }
                }
                InputSource::VertexId => {
                    self.push_input(
                        InterfaceDecl::builtin("vertex_id", Builtin::VertexIndex),
                        InputRole::VertexId { input: index },
                    );
                }
                InputSource::InstanceId => {
                    self.push_input(
                        InterfaceDecl::builtin("instance_id", Builtin::InstanceIndex),
                        InputRole::InstanceId { input: index },
                    );
                }
                _ => {}
            }
        }

        for output in vertex_outputs {
            let decl = match output.varying.location() {
                Some(location) => InterfaceDecl::located(output.varying.name(), location, 4),
                None => InterfaceDecl::builtin(output.varying.name(), Builtin::Position),
            };
            self.interface.outputs.push(decl);
            self.outputs.push(OutputRole::Vertex(*output));
        }
    }

    fn declare_fragment(&mut self, fragment: &FragmentInterface, output: FragmentOutput) {
        for input in &fragment.inputs {
            let decl = match input.varying.location() {
                Some(location) => InterfaceDecl::located(input.varying.name(), location, 4),
                None => InterfaceDecl::builtin(input.varying.name(), Builtin::FragCoord),
            };
            let index = self.push_input(decl, InputRole::Varying(*input));
            if let Varying::TexCoord(coord) = input.varying {
                self.texcoords.push((coord, index));
            }
        }

        for query in &fragment.texture_queries {
            if self.texcoord(query.coord_index).is_none() {
                let varying = Varying::TexCoord(query.coord_index);
                let location = varying.location().unwrap_or_default();
                let index = self.push_input(
                    InterfaceDecl::located(varying.name(), location, 4),
                    InputRole::QueryCoord,
                );
                self.texcoords.push((query.coord_index, index));
            }
            self.texture_queries.push(*query);
        }

        self.interface.outputs.push(InterfaceDecl::located(COLOR_OUTPUT, 0, 4));
        self.outputs.push(OutputRole::Color(output));
    }

    fn texcoord(&self, coord: u8) -> Option<usize> {
        self.texcoords.iter().find(|(c, _)| *c == coord).map(|(_, i)| *i)
    }
}

impl<B: ShaderBackend> Translator<'_, B> {
    //=========================================================================
    // PROLOGUE
    //=========================================================================

    /// Fill the PA and SA banks the way the hardware does before a program starts
    pub fn emit_prologue(&mut self, layout: &StageLayout) {
        self.offset = 0;
        let input_table = self.input;
        for (index, role) in layout.inputs.iter().enumerate() {
            let decl = &layout.interface.inputs[index];
            match *role {
                InputRole::Attribute { input, element } => self.load_attribute(index, decl, input, element),
                InputRole::VertexId { input } | InputRole::InstanceId { input } => {
                    let id = self.backend.load_input(index, 0);
                    let parameter = &input_table.inputs[input];
                    let dest = RegRef::window(RegisterBank::PrimAttr, parameter.offset, parameter.data_type);
                    let kind = attribute_kind(parameter.data_type);
                    let id = if kind == ScalarKind::Float {
                        self.backend.convert(id, kind)
                    } else {
                        self.coerce(id, kind)
                    };
                    self.store_component(&dest, 0, id);
                }
                InputRole::Varying(varying) => self.load_varying(index, varying),
                InputRole::QueryCoord => {}
            }
        }

        self.load_secondary_attributes();

        for query in &layout.texture_queries {
            self.emit_texture_query(layout, query);
        }
    }

    fn load_attribute(&mut self, index: usize, decl: &InterfaceDecl, input: usize, element: u32) {
        let input_table = self.input;
        let parameter = &input_table.inputs[input];
        let register = parameter.offset + element * parameter.element_slots();
        let data_type = parameter.data_type;
        let dest = RegRef::window(RegisterBank::PrimAttr, register, data_type);
        let components = decl.components as u32;
        let values: Vec<Value> = (0..components).map(|c| self.backend.load_input(index, c)).collect();
        for (component, value) in values.into_iter().enumerate() {
            self.store_component(&dest, component as u32, value);
        }
    }

    fn load_varying(&mut self, index: usize, varying: FragmentInput) {
        let values: Vec<Value> = (0..varying.components.min(4))
            .map(|c| self.backend.load_input(index, c))
            .collect();
        let dest = RegRef::window(RegisterBank::PrimAttr, varying.register, varying.data_type);
        for (component, value) in values.into_iter().enumerate() {
            let value = match varying.data_type {
                // Colour iterators deliver [0, 1]; the registers hold bytes
                DataType::Uint8 => {
                    let scale = self.backend.constant_f32(255.0);
                    let scaled = self.backend.binary(BinaryOp::Mul, value, scale);
                    self.backend.convert(scaled, ScalarKind::Uint)
                }
                _ => value,
            };
            self.store_component(&dest, component as u32, value);
        }
    }

    /// Uniforms, buffer bases, dependent sampler state and literals
    fn load_secondary_attributes(&mut self) {
        let input = self.input;
        for parameter in &input.inputs {
            if parameter.bank != RegisterBank::SecAttr {
                continue;
            }
            match parameter.source {
                InputSource::Uniform {
                    ref name,
                    index,
                    container_index,
                } => {
                    let Some(binding) = input.buffer_for_container(container_index) else {
                        self.degrade(format!("uniform {} has no buffer", name));
                        continue;
                    };
                    debug!("sa{} <- {} (buffer {} + {})", parameter.offset, name, binding, index);
                    for s in 0..parameter.slot_count() {
                        let value = self.backend.buffer_load(binding, Slot::Fixed(index + s));
                        self.store_secondary(parameter.offset + s, value);
                    }
                }
                InputSource::UniformBuffer { base, .. } => {
                    let value = self.backend.constant_u32(base);
                    self.store_secondary(parameter.offset, value);
                }
                InputSource::DependentSampler { index, .. } => {
                    let value = self.backend.constant_u32(index);
                    self.store_secondary(parameter.offset, value);
                }
                InputSource::Literal { value } => {
                    let value = self.backend.constant_f32(value);
                    self.store_secondary(parameter.offset, value);
                }
                _ => {}
            }
        }
    }

    fn store_secondary(&mut self, register: u32, value: Value) {
        if register >= RegisterFile::SecAttr.size() {
            self.degrade(format!("sa{} is outside the register file", register));
            return;
        }
        self.backend
            .store_register(RegisterFile::SecAttr, Slot::Fixed(register), value);
    }

    fn emit_texture_query(&mut self, layout: &StageLayout, query: &TextureQuery) {
        let Some(coord_input) = layout.texcoord(query.coord_index) else {
            self.degrade(format!("texture query reads undeclared texcoord {}", query.coord_index));
            return;
        };
        let Some(sampler) = layout.interface.sampler(query.sampler_index) else {
            self.degrade(format!("texture query uses unknown sampler {}", query.sampler_index));
            return;
        };
        let cube = sampler.cube;

        let (lanes, projective): (&[u32], bool) = match (cube, query.projection) {
            (true, _) => (&[0, 1, 2][..], false),
            (false, QueryProjection::None) => (&[0, 1][..], false),
            (false, QueryProjection::Z) => (&[0, 1, 2][..], true),
            (false, QueryProjection::W) => (&[0, 1, 3][..], true),
        };
        let components: Vec<Value> = lanes
            .iter()
            .map(|&lane| self.backend.load_input(coord_input, lane))
            .collect();
        let coord = self.backend.construct(&components);
        let texel = self.backend.sample(query.sampler_index, coord, None, projective);

        match query.store_type {
            DataType::Uint8 => {
                let packed = self.backend.pack(PackOp::Unorm4x8, texel);
                self.backend
                    .store_register(RegisterFile::PrimAttr, Slot::Fixed(query.dest_register), packed);
            }
            DataType::F16 => {
                let dest = RegRef::window(RegisterBank::PrimAttr, query.dest_register, DataType::F16);
                self.store_texel(&dest, texel);
            }
            other => {
                if other != DataType::F32 {
                    self.degrade(format!("texture query into {} stored as f32", other.name()));
                }
                let dest = RegRef::window(RegisterBank::PrimAttr, query.dest_register, DataType::F32);
                self.store_texel(&dest, texel);
            }
        }
    }

    //=========================================================================
    // EPILOGUE
    //=========================================================================

    /// Copy the program's results out of the register banks
    pub fn emit_epilogue(&mut self, layout: &StageLayout) {
        for (index, role) in layout.outputs.iter().enumerate() {
            match *role {
                OutputRole::Vertex(output) => {
                    for component in 0..4u32 {
                        let value = if component < output.components {
                            let slot = output.register + component;
                            if slot >= RegisterFile::Output.size() {
                                self.degrade(format!("o{} is outside the register file", slot));
                                self.backend.constant_f32(OUTPUT_DEFAULT[component as usize])
                            } else {
                                self.backend.load_register(RegisterFile::Output, Slot::Fixed(slot))
                            }
                        } else {
                            self.backend.constant_f32(OUTPUT_DEFAULT[component as usize])
                        };
                        self.backend.store_output(index, component, value);
                    }
                }
                OutputRole::Color(output) => self.emit_color(index, output),
            }
        }
    }

    fn emit_color(&mut self, index: usize, output: FragmentOutput) {
        let colors: Vec<Value> = match output.data_type {
            DataType::F16 => {
                let source = RegRef::window(output.bank, 0, DataType::F16);
                (0..4).map(|c| self.load_component(&source, c)).collect()
            }
            DataType::Uint8 | DataType::Int8 | DataType::O8 => {
                let source = RegRef::window(output.bank, 0, DataType::Uint32);
                let packed = self.load_component(&source, 0);
                let unpacked = self.backend.unpack(PackOp::Unorm4x8, packed);
                (0..4).map(|c| self.backend.extract(unpacked, c)).collect()
            }
            other => {
                if !matches!(other, DataType::F32 | DataType::C10) {
                    self.degrade(format!("colour output {} read as f32", other.name()));
                }
                let source = RegRef::window(output.bank, 0, DataType::F32);
                (0..4).map(|c| self.load_component(&source, c)).collect()
            }
        };
        for (component, value) in colors.into_iter().enumerate() {
            self.backend.store_output(index, component as u32, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program_input::{GenericType, Input, Sampler, UniformBuffer};

    fn attribute(name: &str, offset: u32, components: u32, array_size: u32) -> Input {
        Input {
            data_type: DataType::F32,
            bank: RegisterBank::PrimAttr,
            offset,
            component_count: components,
            array_size,
            generic_type: GenericType::Vector,
            source: InputSource::Attribute {
                name: name.to_string(),
                index: 0,
                semantic: 0,
            },
        }
    }

    fn color_output() -> FragmentOutput {
        FragmentOutput {
            bank: RegisterBank::PrimAttr,
            data_type: DataType::F16,
        }
    }

    #[test]
    fn test_vertex_layout() {
        let input = ProgramInput {
            inputs: vec![attribute("aPosition", 0, 4, 1), attribute("aWeights", 4, 2, 3)],
            uniform_buffers: vec![UniformBuffer {
                index: 0,
                container_index: 14,
                reg_start_offset: 0,
                reg_block_size: 16,
                size: 16,
                register_backed: true,
            }],
            samplers: Vec::new(),
        };
        let outputs = [
            VertexOutput {
                varying: Varying::Position,
                register: 0,
                components: 4,
            },
            VertexOutput {
                varying: Varying::TexCoord(0),
                register: 4,
                components: 2,
            },
        ];
        let layout = StageLayout::new(
            ShaderStage::VERTEX,
            &input,
            &outputs,
            &FragmentInterface::default(),
            color_output(),
        );

        let names: Vec<_> = layout.interface.inputs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["aPosition", "aWeights_0", "aWeights_1", "aWeights_2"]);
        assert_eq!(layout.interface.inputs[3].location, Some(3));
        assert_eq!(layout.interface.inputs[1].components, 2);
        assert_eq!(layout.interface.outputs[0].builtin, Some(Builtin::Position));
        assert_eq!(layout.interface.outputs[1].location, Some(3));
        assert_eq!(layout.interface.buffers, [BufferDecl { binding: 0, size: 16 }]);
    }

    #[test]
    fn test_fragment_layout_declares_query_coords() {
        let fragment = FragmentInterface {
            inputs: vec![FragmentInput {
                varying: Varying::Color0,
                register: 0,
                components: 4,
                data_type: DataType::Uint8,
            }],
            texture_queries: vec![TextureQuery {
                coord_index: 1,
                sampler_index: 0,
                dest_register: 1,
                store_type: DataType::F16,
                projection: QueryProjection::None,
            }],
        };
        let input = ProgramInput {
            samplers: vec![Sampler {
                name: "tex".to_string(),
                index: 0,
                is_cube: false,
                dependent: false,
                offset: 0,
            }],
            ..ProgramInput::default()
        };
        let layout = StageLayout::new(ShaderStage::FRAGMENT, &input, &[], &fragment, color_output());

        assert_eq!(layout.interface.inputs.len(), 2);
        assert_eq!(layout.interface.inputs[1].name, "v_TexCoord1");
        assert_eq!(layout.texcoord(1), Some(1));
        assert_eq!(layout.interface.outputs[0].name, COLOR_OUTPUT);
        assert_eq!(layout.interface.samplers.len(), 1);
    }

    #[test]
    fn test_integer_attributes_keep_their_kind() {
        assert_eq!(attribute_kind(DataType::Int16), ScalarKind::Int);
        assert_eq!(attribute_kind(DataType::Uint8), ScalarKind::Uint);
        assert_eq!(attribute_kind(DataType::C10), ScalarKind::Float);
    }
}
