//! GXP program container parser
//!
//! A GXP blob holds a fixed header followed by tables the header points at
//! through self-relative offsets. Everything is little-endian and every
//! table is bounds-checked against the blob before it is read.

use crate::usse::DataType;
use ov_core::GxpError;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// "GXP\0"
pub const GXP_MAGIC: [u8; 4] = *b"GXP\0";

/// Size of the fixed program header
pub const HEADER_SIZE: usize = 0x98;

/// Header field offsets
pub mod field {
    pub const MAGIC: usize = 0x00;
    pub const MAJOR_VERSION: usize = 0x04;
    pub const MINOR_VERSION: usize = 0x05;
    pub const SIZE: usize = 0x08;
    pub const TYPE: usize = 0x14;
    pub const PARAMETER_COUNT: usize = 0x24;
    pub const PARAMETERS_OFFSET: usize = 0x28;
    pub const VARYINGS_OFFSET: usize = 0x2C;
    pub const PRIMARY_REG_COUNT: usize = 0x30;
    pub const SECONDARY_REG_COUNT: usize = 0x32;
    pub const PRIMARY_INSTR_COUNT: usize = 0x3C;
    pub const PRIMARY_PROGRAM_OFFSET: usize = 0x40;
    pub const SECONDARY_PROGRAM_OFFSET: usize = 0x48;
    pub const SECONDARY_PROGRAM_OFFSET_END: usize = 0x4C;
    pub const DEFAULT_UNIFORM_BUFFER_COUNT: usize = 0x64;
    pub const LITERALS_COUNT: usize = 0x70;
    pub const LITERALS_OFFSET: usize = 0x74;
    pub const UNIFORM_BUFFER_COUNT: usize = 0x78;
    pub const UNIFORM_BUFFER_OFFSET: usize = 0x7C;
    pub const DEPENDENT_SAMPLER_COUNT: usize = 0x80;
    pub const DEPENDENT_SAMPLER_OFFSET: usize = 0x84;
    pub const CONTAINER_COUNT: usize = 0x90;
    pub const CONTAINER_OFFSET: usize = 0x94;
}

const PARAMETER_SIZE: usize = 16;
const CONTAINER_SIZE: usize = 8;
const LITERAL_SIZE: usize = 8;
const DEPENDENT_SAMPLER_SIZE: usize = 4;
const UNIFORM_BUFFER_INFO_SIZE: usize = 8;
const VARYINGS_SIZE: usize = 24;
const ATTRIBUTE_DESCRIPTOR_SIZE: usize = 16;

/// Shader stage a program runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProgramType {
    Vertex,
    Fragment,
}

/// GXM parameter category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterCategory {
    Attribute,
    Uniform,
    Sampler,
    AuxiliarySurface,
    UniformBuffer,
    Unknown(u8),
}

impl From<u8> for ParameterCategory {
    fn from(v: u8) -> Self {
        match v {
            0 => Self::Attribute,
            1 => Self::Uniform,
            2 => Self::Sampler,
            3 => Self::AuxiliarySurface,
            4 => Self::UniformBuffer,
            other => Self::Unknown(other),
        }
    }
}

/// GXM parameter component type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterType {
    F32,
    F16,
    C10,
    U32,
    S32,
    U16,
    S16,
    U8,
    S8,
    Unknown(u8),
}

impl From<u8> for ParameterType {
    fn from(v: u8) -> Self {
        match v {
            0 => Self::F32,
            1 => Self::F16,
            2 => Self::C10,
            3 => Self::U32,
            4 => Self::S32,
            5 => Self::U16,
            6 => Self::S16,
            7 => Self::U8,
            8 => Self::S8,
            other => Self::Unknown(other),
        }
    }
}

impl ParameterType {
    /// Register store type of this parameter type
    pub fn data_type(self) -> DataType {
        match self {
            Self::F32 => DataType::F32,
            Self::F16 => DataType::F16,
            Self::C10 => DataType::C10,
            Self::U32 => DataType::Uint32,
            Self::S32 => DataType::Int32,
            Self::U16 => DataType::Uint16,
            Self::S16 => DataType::Int16,
            Self::U8 => DataType::Uint8,
            Self::S8 => DataType::Int8,
            Self::Unknown(_) => DataType::Unknown,
        }
    }
}

/// One entry of the parameter table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub category: ParameterCategory,
    pub param_type: ParameterType,
    pub component_count: u8,
    pub container_index: u8,
    pub semantic: u16,
    pub array_size: u32,
    pub resource_index: i32,
}

impl Parameter {
    pub fn is_sampler_cube(&self) -> bool {
        (self.semantic >> 12) & 1 != 0
    }
}

/// Register window of one parameter container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Container {
    pub index: u16,
    pub base_sa_offset: u16,
    /// Block size, in 32-bit registers
    pub max_resource_index: u16,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Literal {
    pub sa_offset: u32,
    pub value: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependentSampler {
    pub resource_index_layout_offset: u16,
    pub sa_offset: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformBufferInfo {
    pub reside_buffer: u16,
    pub base_offset: u16,
    pub ldst_base_value: u32,
}

/// Vertex outputs / fragment inputs block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Varyings {
    pub output_param_type: u8,
    pub output_comp_count: u8,
    pub varyings_count: u16,
    pub vertex_outputs1: u32,
    pub vertex_outputs2: u32,
}

/// Fragment iterator descriptor, one per varying a fragment program reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeDescriptor {
    pub attribute_info: u32,
    pub resource_index: u32,
    pub size: u32,
    pub component_info: u32,
}

/// A parsed GXP program
#[derive(Debug, Clone)]
pub struct GxpProgram {
    pub major_version: u8,
    pub minor_version: u8,
    pub program_type: ProgramType,
    pub native_color: bool,
    pub reg_format: bool,
    pub primary_reg_count: u16,
    pub secondary_reg_count: u16,
    pub default_uniform_buffer_count: u32,
    pub parameters: Vec<Parameter>,
    pub containers: Vec<Container>,
    pub literals: Vec<Literal>,
    pub dependent_samplers: Vec<DependentSampler>,
    pub uniform_buffer_infos: Vec<UniformBufferInfo>,
    pub varyings: Varyings,
    pub fragment_descriptors: Vec<AttributeDescriptor>,
    pub primary_program: Vec<u64>,
    pub secondary_program: Vec<u64>,
}

//=============================================================================
// LITTLE-ENDIAN READERS
//=============================================================================

fn bytes<'a>(data: &'a [u8], offset: usize, len: usize, table: &'static str) -> Result<&'a [u8], GxpError> {
    offset
        .checked_add(len)
        .and_then(|end| data.get(offset..end))
        .ok_or(GxpError::TableOutOfBounds {
            table,
            offset,
            size: data.len(),
        })
}

fn read_u8(data: &[u8], offset: usize, table: &'static str) -> Result<u8, GxpError> {
    Ok(bytes(data, offset, 1, table)?[0])
}

fn read_u16(data: &[u8], offset: usize, table: &'static str) -> Result<u16, GxpError> {
    let b = bytes(data, offset, 2, table)?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

fn read_u32(data: &[u8], offset: usize, table: &'static str) -> Result<u32, GxpError> {
    let b = bytes(data, offset, 4, table)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn read_i32(data: &[u8], offset: usize, table: &'static str) -> Result<i32, GxpError> {
    read_u32(data, offset, table).map(|v| v as i32)
}

fn read_u64(data: &[u8], offset: usize, table: &'static str) -> Result<u64, GxpError> {
    let b = bytes(data, offset, 8, table)?;
    let mut word = [0u8; 8];
    word.copy_from_slice(b);
    Ok(u64::from_le_bytes(word))
}

/// Resolve a self-relative offset stored at `field`
fn relative(data: &[u8], field: usize, table: &'static str) -> Result<usize, GxpError> {
    let rel = read_u32(data, field, table)? as usize;
    field.checked_add(rel).ok_or(GxpError::TableOutOfBounds {
        table,
        offset: field,
        size: data.len(),
    })
}

/// Start of a table of `count` entries, checked to lie inside the blob
fn table(data: &[u8], field: usize, count: usize, entry: usize, name: &'static str) -> Result<usize, GxpError> {
    if count == 0 {
        return Ok(0);
    }
    let start = relative(data, field, name)?;
    let len = count.checked_mul(entry).ok_or(GxpError::TableOutOfBounds {
        table: name,
        offset: start,
        size: data.len(),
    })?;
    bytes(data, start, len, name)?;
    Ok(start)
}

fn read_cstr(data: &[u8], offset: usize) -> Result<String, GxpError> {
    let tail = data.get(offset..).ok_or(GxpError::TableOutOfBounds {
        table: "parameter name",
        offset,
        size: data.len(),
    })?;
    let len = tail
        .iter()
        .position(|&b| b == 0)
        .ok_or(GxpError::UnterminatedString(offset))?;
    Ok(String::from_utf8_lossy(&tail[..len]).into_owned())
}

//=============================================================================
// PARSING
//=============================================================================

impl GxpProgram {
    /// Parse a program blob
    pub fn parse(data: &[u8]) -> Result<Self, GxpError> {
        if data.len() < HEADER_SIZE {
            return Err(GxpError::TooSmall {
                size: data.len(),
                needed: HEADER_SIZE,
            });
        }
        if data[..4] != GXP_MAGIC {
            return Err(GxpError::InvalidMagic(read_u32(data, field::MAGIC, "header")?));
        }

        let declared = read_u32(data, field::SIZE, "header")? as usize;
        if declared > data.len() {
            return Err(GxpError::TooSmall {
                size: data.len(),
                needed: declared,
            });
        }

        let type_bits = read_u8(data, field::TYPE, "header")?;
        let program_type = if type_bits & 1 != 0 {
            ProgramType::Fragment
        } else {
            ProgramType::Vertex
        };

        let varyings = parse_varyings(data)?;
        let fragment_descriptors = if program_type == ProgramType::Fragment {
            parse_fragment_descriptors(data, &varyings)?
        } else {
            Vec::new()
        };

        let program = Self {
            major_version: read_u8(data, field::MAJOR_VERSION, "header")?,
            minor_version: read_u8(data, field::MINOR_VERSION, "header")?,
            program_type,
            native_color: (type_bits >> 6) & 1 != 0,
            reg_format: (type_bits >> 7) & 1 != 0,
            primary_reg_count: read_u16(data, field::PRIMARY_REG_COUNT, "header")?,
            secondary_reg_count: read_u16(data, field::SECONDARY_REG_COUNT, "header")?,
            default_uniform_buffer_count: read_u32(data, field::DEFAULT_UNIFORM_BUFFER_COUNT, "header")?,
            parameters: parse_parameters(data)?,
            containers: parse_containers(data)?,
            literals: parse_literals(data)?,
            dependent_samplers: parse_dependent_samplers(data)?,
            uniform_buffer_infos: parse_uniform_buffer_infos(data)?,
            varyings,
            fragment_descriptors,
            primary_program: parse_primary_program(data)?,
            secondary_program: parse_secondary_program(data)?,
        };

        debug!(
            "GXP {}.{} {:?}: {} parameters, {} containers, {} + {} instructions",
            program.major_version,
            program.minor_version,
            program.program_type,
            program.parameters.len(),
            program.containers.len(),
            program.primary_program.len(),
            program.secondary_program.len()
        );
        Ok(program)
    }

    pub fn is_vertex(&self) -> bool {
        self.program_type == ProgramType::Vertex
    }

    pub fn is_fragment(&self) -> bool {
        self.program_type == ProgramType::Fragment
    }

    pub fn container(&self, index: u16) -> Option<&Container> {
        self.containers.iter().find(|c| c.index == index)
    }
}

fn parse_parameters(data: &[u8]) -> Result<Vec<Parameter>, GxpError> {
    let count = read_u32(data, field::PARAMETER_COUNT, "header")? as usize;
    let start = table(data, field::PARAMETERS_OFFSET, count, PARAMETER_SIZE, "parameters")?;

    (0..count)
        .map(|i| {
            let base = start + i * PARAMETER_SIZE;
            let name_offset = read_i32(data, base, "parameters")?;
            let bits = read_u16(data, base + 4, "parameters")?;
            let name_at = (base as i64 + name_offset as i64).max(0) as usize;
            let parameter = Parameter {
                name: read_cstr(data, name_at)?,
                category: ParameterCategory::from((bits & 0xF) as u8),
                param_type: ParameterType::from(((bits >> 4) & 0xF) as u8),
                component_count: ((bits >> 8) & 0xF) as u8,
                container_index: ((bits >> 12) & 0xF) as u8,
                semantic: read_u16(data, base + 6, "parameters")?,
                array_size: read_u32(data, base + 8, "parameters")?,
                resource_index: read_i32(data, base + 12, "parameters")?,
            };
            trace!("parameter {:?}", parameter);
            Ok(parameter)
        })
        .collect()
}

fn parse_containers(data: &[u8]) -> Result<Vec<Container>, GxpError> {
    let count = read_u32(data, field::CONTAINER_COUNT, "header")? as usize;
    let start = table(data, field::CONTAINER_OFFSET, count, CONTAINER_SIZE, "containers")?;

    (0..count)
        .map(|i| {
            let base = start + i * CONTAINER_SIZE;
            Ok(Container {
                index: read_u16(data, base, "containers")?,
                base_sa_offset: read_u16(data, base + 4, "containers")?,
                max_resource_index: read_u16(data, base + 6, "containers")?,
            })
        })
        .collect()
}

fn parse_literals(data: &[u8]) -> Result<Vec<Literal>, GxpError> {
    let count = read_u32(data, field::LITERALS_COUNT, "header")? as usize;
    let start = table(data, field::LITERALS_OFFSET, count, LITERAL_SIZE, "literals")?;

    (0..count)
        .map(|i| {
            let base = start + i * LITERAL_SIZE;
            Ok(Literal {
                sa_offset: read_u32(data, base, "literals")?,
                value: f32::from_bits(read_u32(data, base + 4, "literals")?),
            })
        })
        .collect()
}

fn parse_dependent_samplers(data: &[u8]) -> Result<Vec<DependentSampler>, GxpError> {
    let count = read_u32(data, field::DEPENDENT_SAMPLER_COUNT, "header")? as usize;
    let start = table(
        data,
        field::DEPENDENT_SAMPLER_OFFSET,
        count,
        DEPENDENT_SAMPLER_SIZE,
        "dependent samplers",
    )?;

    (0..count)
        .map(|i| {
            let base = start + i * DEPENDENT_SAMPLER_SIZE;
            Ok(DependentSampler {
                resource_index_layout_offset: read_u16(data, base, "dependent samplers")?,
                sa_offset: read_u16(data, base + 2, "dependent samplers")?,
            })
        })
        .collect()
}

fn parse_uniform_buffer_infos(data: &[u8]) -> Result<Vec<UniformBufferInfo>, GxpError> {
    let count = read_u32(data, field::UNIFORM_BUFFER_COUNT, "header")? as usize;
    let start = table(
        data,
        field::UNIFORM_BUFFER_OFFSET,
        count,
        UNIFORM_BUFFER_INFO_SIZE,
        "uniform buffers",
    )?;

    (0..count)
        .map(|i| {
            let base = start + i * UNIFORM_BUFFER_INFO_SIZE;
            Ok(UniformBufferInfo {
                reside_buffer: read_u16(data, base, "uniform buffers")?,
                base_offset: read_u16(data, base + 2, "uniform buffers")?,
                ldst_base_value: read_u32(data, base + 4, "uniform buffers")?,
            })
        })
        .collect()
}

fn parse_varyings(data: &[u8]) -> Result<Varyings, GxpError> {
    if read_u32(data, field::VARYINGS_OFFSET, "header")? == 0 {
        return Ok(Varyings::default());
    }
    let start = table(data, field::VARYINGS_OFFSET, 1, VARYINGS_SIZE, "varyings")?;
    Ok(Varyings {
        output_param_type: read_u8(data, start + 10, "varyings")?,
        output_comp_count: read_u8(data, start + 11, "varyings")?,
        varyings_count: read_u16(data, start + 12, "varyings")?,
        vertex_outputs1: read_u32(data, start + 16, "varyings")?,
        vertex_outputs2: read_u32(data, start + 20, "varyings")?,
    })
}

fn parse_fragment_descriptors(data: &[u8], varyings: &Varyings) -> Result<Vec<AttributeDescriptor>, GxpError> {
    let count = varyings.varyings_count as usize;
    if count == 0 || varyings.vertex_outputs1 == 0 {
        return Ok(Vec::new());
    }
    // In fragment programs the first vertex output word is a relative offset
    let field_at = relative(data, field::VARYINGS_OFFSET, "varyings")? + 16;
    let start = table(data, field_at, count, ATTRIBUTE_DESCRIPTOR_SIZE, "fragment descriptors")?;

    (0..count)
        .map(|i| {
            let base = start + i * ATTRIBUTE_DESCRIPTOR_SIZE;
            Ok(AttributeDescriptor {
                attribute_info: read_u32(data, base, "fragment descriptors")?,
                resource_index: read_u32(data, base + 4, "fragment descriptors")?,
                size: read_u32(data, base + 8, "fragment descriptors")?,
                component_info: read_u32(data, base + 12, "fragment descriptors")?,
            })
        })
        .collect()
}

fn read_words(data: &[u8], start: usize, count: usize, name: &'static str) -> Result<Vec<u64>, GxpError> {
    bytes(data, start, count.saturating_mul(8), name)?;
    (0..count).map(|i| read_u64(data, start + i * 8, name)).collect()
}

fn parse_primary_program(data: &[u8]) -> Result<Vec<u64>, GxpError> {
    let count = read_u32(data, field::PRIMARY_INSTR_COUNT, "header")? as usize;
    if count == 0 {
        return Ok(Vec::new());
    }
    let start = relative(data, field::PRIMARY_PROGRAM_OFFSET, "primary program")?;
    read_words(data, start, count, "primary program")
}

fn parse_secondary_program(data: &[u8]) -> Result<Vec<u64>, GxpError> {
    let start = relative(data, field::SECONDARY_PROGRAM_OFFSET, "secondary program")?;
    let end = relative(data, field::SECONDARY_PROGRAM_OFFSET_END, "secondary program")?;
    if end <= start {
        return Ok(Vec::new());
    }
    read_words(data, start, (end - start) / 8, "secondary program")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> Vec<u8> {
        let mut data = vec![0u8; HEADER_SIZE];
        data[..4].copy_from_slice(&GXP_MAGIC);
        data[field::MAJOR_VERSION] = 1;
        data[field::MINOR_VERSION] = 4;
        data[field::SIZE..field::SIZE + 4].copy_from_slice(&(HEADER_SIZE as u32).to_le_bytes());
        data
    }

    #[test]
    fn test_empty_program() {
        let program = GxpProgram::parse(&header()).unwrap();
        assert!(program.is_vertex());
        assert_eq!((program.major_version, program.minor_version), (1, 4));
        assert!(program.parameters.is_empty());
        assert!(program.primary_program.is_empty());
        assert!(program.secondary_program.is_empty());
    }

    #[test]
    fn test_bad_magic() {
        let mut data = header();
        data[0] = b'X';
        assert!(matches!(GxpProgram::parse(&data), Err(GxpError::InvalidMagic(_))));
    }

    #[test]
    fn test_truncated_header() {
        let err = GxpProgram::parse(&[0u8; 16]).unwrap_err();
        assert_eq!(
            err,
            GxpError::TooSmall {
                size: 16,
                needed: HEADER_SIZE
            }
        );
    }

    #[test]
    fn test_table_out_of_bounds() {
        let mut data = header();
        data[field::CONTAINER_COUNT..field::CONTAINER_COUNT + 4].copy_from_slice(&4u32.to_le_bytes());
        data[field::CONTAINER_OFFSET..field::CONTAINER_OFFSET + 4].copy_from_slice(&8u32.to_le_bytes());
        let err = GxpProgram::parse(&data).unwrap_err();
        assert!(matches!(err, GxpError::TableOutOfBounds { table: "containers", .. }));
    }

    #[test]
    fn test_fragment_type_bits() {
        let mut data = header();
        data[field::TYPE] = 0b0100_0001;
        let program = GxpProgram::parse(&data).unwrap();
        assert!(program.is_fragment());
        assert!(program.native_color);
        assert!(!program.reg_format);
    }

    #[test]
    fn test_unterminated_name() {
        let mut data = header();
        let param_at = data.len();
        data.extend_from_slice(&[0u8; PARAMETER_SIZE]);
        // Name points at the trailing byte, which is not a terminator
        data.push(b'a');
        let name_offset = (data.len() - 1 - param_at) as i32;
        data[param_at..param_at + 4].copy_from_slice(&name_offset.to_le_bytes());
        data[field::PARAMETER_COUNT..field::PARAMETER_COUNT + 4].copy_from_slice(&1u32.to_le_bytes());
        let rel = (param_at - field::PARAMETERS_OFFSET) as u32;
        data[field::PARAMETERS_OFFSET..field::PARAMETERS_OFFSET + 4].copy_from_slice(&rel.to_le_bytes());

        assert!(matches!(GxpProgram::parse(&data), Err(GxpError::UnterminatedString(_))));
    }

    #[test]
    fn test_parameter_type_mapping() {
        assert_eq!(ParameterType::from(4).data_type(), DataType::Int32);
        assert_eq!(ParameterType::from(7).data_type(), DataType::Uint8);
        assert_eq!(ParameterCategory::from(9), ParameterCategory::Unknown(9));
    }
}
