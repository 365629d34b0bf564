//! Program input extraction
//!
//! Turns the GXP parameter tables into the bindings the host needs:
//! attribute and uniform register windows, uniform buffers, samplers and
//! the literal pool.

use crate::gxp::{GxpProgram, Parameter, ParameterCategory, ParameterType};
use crate::usse::{decode_with, DataType, DecodeContext, InstructionDetail, Opcode, RegisterBank};
use ov_core::{Diagnostic, Diagnostics, GxpError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, error, trace, warn};

/// Host uniform buffer binding slots
pub const MAX_UNIFORM_BUFFERS: u32 = 15;

/// Size given to buffers whose accesses cannot be bounded, in floats
pub const MAX_UNIFORM_BUFFER_F32: u32 = 16384;

/// Container holding the literal pool
pub const LITERAL_CONTAINER: u16 = 16;

/// Container holding buffer bases and dependent sampler state
pub const DATA_CONTAINER: u16 = 19;

const SEMANTIC_MASK: u16 = 0x0FC0;
const SEMANTIC_INDEX: u16 = 0x03C0;
const SEMANTIC_INSTANCE: u16 = 0x0400;

/// Shape of an input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GenericType {
    Scalar,
    Vector,
    Array,
}

impl GenericType {
    fn of(parameter: &Parameter) -> Self {
        if parameter.array_size > 1 {
            Self::Array
        } else if parameter.component_count > 1 {
            Self::Vector
        } else {
            Self::Scalar
        }
    }
}

/// Where an input's value comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InputSource {
    Attribute { name: String, index: u32, semantic: u16 },
    Uniform { name: String, index: u32, container_index: u16 },
    /// Base address of a uniform buffer, for load/store instructions
    UniformBuffer { index: u32, base: u32 },
    Literal { value: f32 },
    DependentSampler { index: u32, layout_channel: u8 },
    VertexId,
    InstanceId,
}

/// A register window the program expects to be filled on entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Input {
    pub data_type: DataType,
    pub bank: RegisterBank,
    /// First register, in 32-bit slots
    pub offset: u32,
    pub component_count: u32,
    pub array_size: u32,
    pub generic_type: GenericType,
    pub source: InputSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniformBuffer {
    /// Host binding slot
    pub index: u32,
    /// Declared container, or resource index for explicit buffers
    pub container_index: u32,
    /// First register of the SA window mirroring this buffer
    pub reg_start_offset: u32,
    pub reg_block_size: u32,
    /// Size in floats, a multiple of 4
    pub size: u32,
    /// The buffer is declared through uniform parameters in a register container
    pub register_backed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sampler {
    pub name: String,
    pub index: u32,
    pub is_cube: bool,
    pub dependent: bool,
    /// SA register holding the sampler state of a dependent sampler
    pub offset: u32,
}

impl Input {
    /// 32-bit registers one array element of an attribute occupies
    pub fn element_slots(&self) -> u32 {
        (self.component_count * self.data_type.size()).div_ceil(4).max(1)
    }

    /// 32-bit registers a uniform spans in its buffer and SA window
    pub fn slot_count(&self) -> u32 {
        uniform_slots(self.data_type, self.component_count, self.array_size)
    }
}

/// Everything the host has to bind before running a program
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgramInput {
    pub inputs: Vec<Input>,
    pub uniform_buffers: Vec<UniformBuffer>,
    pub samplers: Vec<Sampler>,
}

impl ProgramInput {
    /// Extract the inputs of a parsed program, recording problems in `diagnostics`
    pub fn from_gxp(program: &GxpProgram, diagnostics: &mut Diagnostics) -> Self {
        let mut input = ProgramInput::default();
        let mut buffers: BTreeMap<i32, UniformBuffer> = BTreeMap::new();

        for parameter in &program.parameters {
            match parameter.category {
                ParameterCategory::Attribute => input.add_attribute(program, parameter),
                ParameterCategory::Uniform => input.add_uniform(program, parameter, &mut buffers),
                ParameterCategory::Sampler => input.samplers.push(Sampler {
                    name: parameter_name(&parameter.name),
                    index: parameter.resource_index as u32,
                    is_cube: parameter.is_sampler_cube(),
                    dependent: false,
                    offset: 0,
                }),
                ParameterCategory::AuxiliarySurface => {
                    error!("Auxiliary surface {} is not supported", parameter.name);
                    diagnostics.push(Diagnostic::warning(
                        None,
                        format!("auxiliary surface {} skipped", parameter.name),
                    ));
                }
                ParameterCategory::UniformBuffer => {
                    let size = if parameter.array_size == 0 {
                        MAX_UNIFORM_BUFFER_F32
                    } else {
                        parameter.array_size.div_ceil(4)
                    };
                    buffers
                        .entry(parameter.resource_index)
                        .and_modify(|b| b.size = b.size.max(size))
                        .or_insert(UniformBuffer {
                            index: binding_slot(parameter.resource_index),
                            container_index: parameter.resource_index as u32,
                            reg_start_offset: 0,
                            reg_block_size: 0,
                            size,
                            register_backed: false,
                        });
                }
                ParameterCategory::Unknown(category) => {
                    error!("Unknown parameter category {} for {}", category, parameter.name);
                    diagnostics.push(Diagnostic::warning(
                        None,
                        format!("parameter {} has unknown category {}", parameter.name, category),
                    ));
                }
            }
        }

        input.add_buffer_bases(program, &buffers, diagnostics);
        input.uniform_buffers = buffers.into_values().collect();
        input.add_dependent_samplers(program, diagnostics);
        input.add_literals(program);

        for buffer in &mut input.uniform_buffers {
            buffer.size = buffer.size.next_multiple_of(4);
        }
        input
    }

    //=========================================================================
    // PARAMETERS
    //=========================================================================

    fn add_attribute(&mut self, program: &GxpProgram, parameter: &Parameter) {
        let offset = register_offset(program, parameter);
        let name = parameter_name(&parameter.name);
        log_parameter(parameter, offset, &name, 'p');

        let source = match parameter.semantic & SEMANTIC_MASK {
            SEMANTIC_INDEX => InputSource::VertexId,
            SEMANTIC_INSTANCE => InputSource::InstanceId,
            _ => InputSource::Attribute {
                name,
                index: parameter.resource_index as u32,
                semantic: parameter.semantic,
            },
        };
        self.inputs.push(Input {
            data_type: parameter.param_type.data_type(),
            bank: RegisterBank::PrimAttr,
            offset,
            component_count: parameter.component_count as u32,
            array_size: parameter.array_size,
            generic_type: GenericType::of(parameter),
            source,
        });
    }

    fn add_uniform(&mut self, program: &GxpProgram, parameter: &Parameter, buffers: &mut BTreeMap<i32, UniformBuffer>) {
        let offset = register_offset(program, parameter);
        let name = parameter_name(&parameter.name);
        log_parameter(parameter, offset, &name, 's');

        let container = program.container(parameter.container_index as u16);
        let reg_block_size = container.map_or(0, |c| c.max_resource_index as u32);
        let data_type = parameter.param_type.data_type();

        let size_f32 = uniform_slots(data_type, parameter.component_count as u32, parameter.array_size);
        let resource = parameter.resource_index.max(0) as u32;

        buffers
            .entry(parameter.container_index as i32)
            .and_modify(|b| {
                b.size = b.size.max(resource + size_f32);
                b.reg_start_offset = b.reg_start_offset.min(resource);
            })
            .or_insert(UniformBuffer {
                index: binding_slot(parameter.container_index as i32),
                container_index: parameter.container_index as u32,
                reg_start_offset: resource,
                reg_block_size,
                size: resource + size_f32,
                register_backed: true,
            });

        self.inputs.push(Input {
            data_type,
            bank: RegisterBank::SecAttr,
            offset,
            component_count: parameter.component_count as u32,
            array_size: parameter.array_size,
            generic_type: GenericType::of(parameter),
            source: InputSource::Uniform {
                name,
                index: resource,
                container_index: parameter.container_index as u16,
            },
        });
    }

    //=========================================================================
    // TABLES
    //=========================================================================

    /// SA registers that receive the base of each uniform buffer
    fn add_buffer_bases(&mut self, program: &GxpProgram, buffers: &BTreeMap<i32, UniformBuffer>, diagnostics: &mut Diagnostics) {
        let base = program.container(DATA_CONTAINER).map_or(0, |c| c.base_sa_offset as u32);

        for info in &program.uniform_buffer_infos {
            let Some(buffer) = buffers.get(&(info.reside_buffer as i32)) else {
                warn!("Uniform buffer info refers to undeclared buffer {}", info.reside_buffer);
                diagnostics.push(Diagnostic::warning(
                    None,
                    format!("buffer info for undeclared buffer {}", info.reside_buffer),
                ));
                continue;
            };
            self.inputs.push(Input {
                data_type: DataType::Uint32,
                bank: RegisterBank::SecAttr,
                offset: base + info.base_offset as u32,
                component_count: 1,
                array_size: 1,
                generic_type: GenericType::Scalar,
                source: InputSource::UniformBuffer {
                    index: buffer.index,
                    base: buffer.reg_block_size,
                },
            });
        }
    }

    fn add_dependent_samplers(&mut self, program: &GxpProgram, diagnostics: &mut Diagnostics) {
        let Some(container) = program.container(DATA_CONTAINER) else {
            return;
        };

        for dependent in &program.dependent_samplers {
            let index = (dependent.resource_index_layout_offset / 4) as u32;
            let offset = container.base_sa_offset as u32 + dependent.sa_offset as u32;
            let Some(sampler) = self.samplers.iter_mut().find(|s| s.index == index) else {
                warn!("Dependent sampler {} has no declared sampler", index);
                diagnostics.push(Diagnostic::warning(None, format!("dependent sampler {} not declared", index)));
                continue;
            };
            sampler.dependent = true;
            sampler.offset = offset;

            self.inputs.push(Input {
                data_type: DataType::Uint32,
                bank: RegisterBank::SecAttr,
                offset,
                component_count: 1,
                array_size: 1,
                generic_type: GenericType::Scalar,
                source: InputSource::DependentSampler {
                    index,
                    layout_channel: (dependent.resource_index_layout_offset % 4) as u8,
                },
            });
        }
    }

    fn add_literals(&mut self, program: &GxpProgram) {
        if program.literals.is_empty() {
            return;
        }
        let Some(container) = program
            .container(LITERAL_CONTAINER)
            .or_else(|| program.container(DATA_CONTAINER))
        else {
            warn!("Container for literals not found, skipping {} literals", program.literals.len());
            return;
        };

        for literal in &program.literals {
            let offset = container.base_sa_offset as u32 + literal.sa_offset;
            trace!("[LITERAL + {}] sa{} = {}", literal.sa_offset, offset, literal.value);
            self.inputs.push(Input {
                data_type: DataType::F32,
                bank: RegisterBank::SecAttr,
                offset,
                component_count: 1,
                array_size: 1,
                generic_type: GenericType::Scalar,
                source: InputSource::Literal { value: literal.value },
            });
        }
    }

    //=========================================================================
    // BUFFER BOUNDS
    //=========================================================================

    /// Widen buffers to cover what the program's load/store instructions touch
    pub fn scan_buffer_accesses(&mut self, program: &GxpProgram) {
        let streams = [
            (&program.primary_program, DecodeContext { secondary_program: false }),
            (&program.secondary_program, DecodeContext { secondary_program: true }),
        ];
        for (words, ctx) in streams {
            for &word in words.iter() {
                let inst = decode_with(word, ctx);
                if inst.opcode != Opcode::Vldst {
                    continue;
                }
                if let InstructionDetail::LoadStore {
                    count,
                    buffer,
                    base,
                    register_indexed,
                    ..
                } = inst.detail
                {
                    self.widen_buffer(buffer as u32, base + count as u32, register_indexed);
                }
            }
        }
    }

    fn widen_buffer(&mut self, base_register: u32, end: u32, unbounded: bool) {
        let Some(index) = self.buffer_at_register(base_register) else {
            return;
        };
        let Some(buffer) = self.uniform_buffers.iter_mut().find(|b| b.index == index) else {
            return;
        };
        let needed = if unbounded {
            MAX_UNIFORM_BUFFER_F32
        } else {
            end.next_multiple_of(4)
        };
        if needed > buffer.size {
            debug!("Widening uniform buffer {} from {} to {} floats", index, buffer.size, needed);
            buffer.size = needed;
        }
    }

    /// Binding slot of the buffer whose base lives in SA register `register`
    pub fn buffer_at_register(&self, register: u32) -> Option<u32> {
        self.inputs.iter().find_map(|input| match input.source {
            InputSource::UniformBuffer { index, .. } if input.offset == register => Some(index),
            _ => None,
        })
    }

    pub fn uniform_buffer(&self, index: u32) -> Option<&UniformBuffer> {
        self.uniform_buffers.iter().find(|b| b.index == index)
    }

    pub fn sampler(&self, index: u32) -> Option<&Sampler> {
        self.samplers.iter().find(|s| s.index == index)
    }

    /// Tables plus the bytecode buffer scan, with the problems met on the way
    pub fn extract(program: &GxpProgram) -> (Self, Diagnostics) {
        let mut diagnostics = Diagnostics::new();
        let mut input = Self::from_gxp(program, &mut diagnostics);
        input.scan_buffer_accesses(program);
        (input, diagnostics)
    }

    /// Binding of the buffer mirroring the uniforms of `container`
    pub fn buffer_for_container(&self, container: u16) -> Option<u32> {
        self.uniform_buffers
            .iter()
            .find(|b| b.register_backed && b.container_index == container as u32)
            .map(|b| b.index)
    }
}

//=============================================================================
// ENTRY POINTS
//=============================================================================

/// Extract the program input of a GXP blob
///
/// A blob that cannot be parsed yields an empty input.
pub fn extract_program_input(binary: &[u8]) -> ProgramInput {
    extract_program_input_checked(binary).unwrap_or_else(|e| {
        warn!("Cannot extract program input: {}", e);
        ProgramInput::default()
    })
}

/// Extract the program input, failing on a malformed container
///
/// Skipped parameters are reported through `tracing`.
pub fn extract_program_input_checked(binary: &[u8]) -> Result<ProgramInput, GxpError> {
    let program = GxpProgram::parse(binary)?;
    let (input, diagnostics) = ProgramInput::extract(&program);
    for diagnostic in diagnostics.entries() {
        warn!("{}", diagnostic);
    }
    Ok(input)
}

//=============================================================================
// HELPERS
//=============================================================================

fn binding_slot(key: i32) -> u32 {
    (key + 1).rem_euclid(MAX_UNIFORM_BUFFERS as i32) as u32
}

/// Floats a uniform occupies; array elements of float vectors align to 8 bytes
fn uniform_slots(data_type: DataType, component_count: u32, array_size: u32) -> u32 {
    let mut vector_size = component_count * data_type.size();
    if array_size != 1 {
        let align = if data_type.is_float() && component_count != 1 { 8 } else { 4 };
        vector_size = vector_size.next_multiple_of(align);
    }
    (array_size * vector_size).div_ceil(4)
}

fn register_offset(program: &GxpProgram, parameter: &Parameter) -> u32 {
    let base = program
        .container(parameter.container_index as u16)
        .map_or(0, |c| c.base_sa_offset as i64);
    (base + parameter.resource_index as i64).max(0) as u32
}

fn log_parameter(parameter: &Parameter, offset: u32, name: &str, bank: char) {
    let type_name = match parameter.param_type {
        ParameterType::F32 => "float",
        ParameterType::F16 => "half",
        ParameterType::C10 => "fixed",
        ParameterType::U32 => "uint",
        ParameterType::S32 => "int",
        ParameterType::U16 => "ushort",
        ParameterType::S16 => "short",
        ParameterType::U8 => "uchar",
        ParameterType::S8 => "char",
        ParameterType::Unknown(_) => "unknown",
    };
    if parameter.array_size > 1 {
        debug!(
            "[container {} + {}] {}a{} = ({}{}) {}[{}]",
            parameter.container_index,
            parameter.resource_index,
            bank,
            offset,
            type_name,
            parameter.component_count,
            name,
            parameter.array_size
        );
    } else {
        debug!(
            "[container {} + {}] {}a{} = ({}{}) {}",
            parameter.container_index, parameter.resource_index, bank, offset, type_name, parameter.component_count, name
        );
    }
}

/// Make a parameter name usable as a host identifier
///
/// Struct fields join with `_`, and an indexed struct folds its index into
/// the name: `abc[5].var[2]` becomes `abc_5_var[2]`.
pub fn parameter_name(raw: &str) -> String {
    let Some(dot) = raw.find('.') else {
        return raw.to_string();
    };
    let (head, tail) = raw.split_at(dot);
    let head = head.replace('[', "_").replace(']', "");
    format!("{}{}", head, tail.replace('.', "_"))
}
