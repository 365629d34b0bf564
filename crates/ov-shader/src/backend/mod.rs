//! Code generation backends
//!
//! The translator drives a [`ShaderBackend`] with scalar and small-vector
//! operations over abstract [`Value`]s. Register banks, interface variables,
//! uniform buffers and samplers are declared up front in a
//! [`ShaderInterface`], so a backend only has to know how to spell each
//! operation in its target language.

pub mod glsl;
pub mod spirv;
mod spirv_builder;

pub use glsl::GlslBackend;
pub use spirv::SpirvBackend;

use bitflags::bitflags;

bitflags! {
    /// Shader stage flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStage: u8 {
        const VERTEX = 0x01;
        const FRAGMENT = 0x02;
    }
}

impl ShaderStage {
    pub fn is_fragment(self) -> bool {
        self.contains(ShaderStage::FRAGMENT)
    }
}

/// SPIR-V module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpirVModule {
    pub bytecode: Vec<u32>,
    pub stage: ShaderStage,
}

impl SpirVModule {
    pub fn new(stage: ShaderStage) -> Self {
        Self {
            bytecode: Vec::new(),
            stage,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.bytecode)
    }
}

/// Output of a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShaderCode {
    SpirV(SpirVModule),
    Glsl(String),
}

impl ShaderCode {
    /// Serialized form written to disk
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            ShaderCode::SpirV(module) => module.as_bytes().to_vec(),
            ShaderCode::Glsl(source) => source.as_bytes().to_vec(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            ShaderCode::SpirV(module) => module.bytecode.is_empty(),
            ShaderCode::Glsl(source) => source.is_empty(),
        }
    }
}

//=============================================================================
// VALUES
//=============================================================================

/// Scalar kind of a backend value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScalarKind {
    Float,
    Int,
    Uint,
    Bool,
}

/// Type of a backend value: a scalar or a vector of up to 4 components
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueType {
    pub kind: ScalarKind,
    pub components: u8,
}

impl ValueType {
    pub const FLOAT: ValueType = ValueType::scalar(ScalarKind::Float);
    pub const INT: ValueType = ValueType::scalar(ScalarKind::Int);
    pub const UINT: ValueType = ValueType::scalar(ScalarKind::Uint);
    pub const BOOL: ValueType = ValueType::scalar(ScalarKind::Bool);

    pub const fn scalar(kind: ScalarKind) -> Self {
        Self {
            kind,
            components: 1,
        }
    }

    pub const fn vector(kind: ScalarKind, components: u8) -> Self {
        Self { kind, components }
    }

    pub fn is_scalar(self) -> bool {
        self.components == 1
    }

    pub fn element(self) -> Self {
        Self::scalar(self.kind)
    }
}

/// Handle to a value produced by a backend
///
/// `id` is backend-defined: a SPIR-V result id or an expression index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Value {
    pub id: u32,
    pub ty: ValueType,
}

impl Value {
    pub fn kind(&self) -> ScalarKind {
        self.ty.kind
    }
}

/// 32-bit slot index into a register file or uniform buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Fixed(u32),
    /// Run-time index, an `Int` value
    Dynamic(Value),
}

/// Register files backing the USSE banks, addressed in 32-bit slots
///
/// Every slot holds raw float bits. Integer and packed data go through
/// bitcasts at the translator level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RegisterFile {
    Temp,
    PrimAttr,
    Output,
    SecAttr,
    Internal,
    Index,
}

impl RegisterFile {
    pub const ALL: [RegisterFile; 6] = [
        RegisterFile::Temp,
        RegisterFile::PrimAttr,
        RegisterFile::Output,
        RegisterFile::SecAttr,
        RegisterFile::Internal,
        RegisterFile::Index,
    ];

    /// Number of 32-bit slots
    pub fn size(self) -> u32 {
        match self {
            RegisterFile::Temp => 128,
            RegisterFile::PrimAttr => 128,
            RegisterFile::Output => 128,
            RegisterFile::SecAttr => 512,
            // Four 128-bit internal registers
            RegisterFile::Internal => 16,
            RegisterFile::Index => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RegisterFile::Temp => "r",
            RegisterFile::PrimAttr => "pa",
            RegisterFile::Output => "o",
            RegisterFile::SecAttr => "sa",
            RegisterFile::Internal => "fpi",
            RegisterFile::Index => "idx",
        }
    }
}

/// Number of predicate registers
pub const PREDICATE_COUNT: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Abs,
    /// Bitwise complement on integers, logical not on booleans
    Not,
    Floor,
    Fract,
    InverseSqrt,
    Exp2,
    Log2,
    DerivX,
    DerivY,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
    /// Bitwise on integers, logical on booleans
    And,
    Or,
    Xor,
    Shl,
    /// Logical right shift
    Shr,
    /// Arithmetic right shift
    Sar,
    /// Dot product of two float vectors
    Dot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackOp {
    /// vec2 <-> two IEEE halves in one uint
    Half2x16,
    /// vec4 in [0, 1] <-> four bytes in one uint
    Unorm4x8,
}

impl PackOp {
    pub fn components(self) -> u8 {
        match self {
            PackOp::Half2x16 => 2,
            PackOp::Unorm4x8 => 4,
        }
    }
}

//=============================================================================
// INTERFACE
//=============================================================================

/// Builtin variables used by the recompiled programs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Position,
    VertexIndex,
    InstanceIndex,
    FragCoord,
}

/// A stage input or output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceDecl {
    pub name: String,
    pub location: Option<u32>,
    pub builtin: Option<Builtin>,
    pub kind: ScalarKind,
    pub components: u8,
}

impl InterfaceDecl {
    pub fn located(name: impl Into<String>, location: u32, components: u8) -> Self {
        Self {
            name: name.into(),
            location: Some(location),
            builtin: None,
            kind: ScalarKind::Float,
            components,
        }
    }

    pub fn builtin(name: impl Into<String>, builtin: Builtin) -> Self {
        let (kind, components) = match builtin {
            Builtin::Position | Builtin::FragCoord => (ScalarKind::Float, 4),
            Builtin::VertexIndex | Builtin::InstanceIndex => (ScalarKind::Int, 1),
        };
        Self {
            name: name.into(),
            location: None,
            builtin: Some(builtin),
            kind,
            components,
        }
    }

    pub fn value_type(&self) -> ValueType {
        ValueType::vector(self.kind, self.components)
    }
}

/// A uniform buffer of vec4s
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDecl {
    pub binding: u32,
    /// Size in 32-bit floats
    pub size: u32,
}

impl BufferDecl {
    pub fn vec4_count(&self) -> u32 {
        self.size.div_ceil(4).max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplerDecl {
    pub index: u32,
    pub name: String,
    pub cube: bool,
}

/// Everything a backend declares before the first instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderInterface {
    pub stage: ShaderStage,
    pub inputs: Vec<InterfaceDecl>,
    pub outputs: Vec<InterfaceDecl>,
    pub buffers: Vec<BufferDecl>,
    pub samplers: Vec<SamplerDecl>,
}

impl ShaderInterface {
    pub fn new(stage: ShaderStage) -> Self {
        Self {
            stage,
            inputs: Vec::new(),
            outputs: Vec::new(),
            buffers: Vec::new(),
            samplers: Vec::new(),
        }
    }

    pub fn has_buffer(&self, binding: u32) -> bool {
        self.buffers.iter().any(|b| b.binding == binding)
    }

    pub fn sampler(&self, index: u32) -> Option<&SamplerDecl> {
        self.samplers.iter().find(|s| s.index == index)
    }
}

//=============================================================================
// BACKEND TRAIT
//=============================================================================

/// Target-language emitter driven by the translator
///
/// Inputs and outputs are addressed by their position in the
/// [`ShaderInterface`] the backend was created with.
pub trait ShaderBackend {
    fn stage(&self) -> ShaderStage;

    fn constant_f32(&mut self, value: f32) -> Value;
    fn constant_i32(&mut self, value: i32) -> Value;
    fn constant_u32(&mut self, value: u32) -> Value;
    fn constant_bool(&mut self, value: bool) -> Value;

    fn unary(&mut self, op: UnaryOp, value: Value) -> Value;
    /// Both operands share a type; `Dot` yields a scalar
    fn binary(&mut self, op: BinaryOp, lhs: Value, rhs: Value) -> Value;
    fn compare(&mut self, op: CompareOp, lhs: Value, rhs: Value) -> Value;
    fn select(&mut self, cond: Value, if_true: Value, if_false: Value) -> Value;
    /// Numeric conversion between float and integer kinds
    fn convert(&mut self, value: Value, kind: ScalarKind) -> Value;
    /// Reinterpret the bits of a 32-bit value
    fn bitcast(&mut self, value: Value, kind: ScalarKind) -> Value;
    fn pack(&mut self, op: PackOp, value: Value) -> Value;
    fn unpack(&mut self, op: PackOp, value: Value) -> Value;
    fn construct(&mut self, components: &[Value]) -> Value;
    fn extract(&mut self, value: Value, index: u32) -> Value;

    /// Raw bits of one register slot, as a float
    fn load_register(&mut self, file: RegisterFile, slot: Slot) -> Value;
    fn store_register(&mut self, file: RegisterFile, slot: Slot, value: Value);
    fn load_predicate(&mut self, index: u32) -> Value;
    fn store_predicate(&mut self, index: u32, value: Value);

    /// Component `component` of interface input `input`
    fn load_input(&mut self, input: usize, component: u32) -> Value;
    fn store_output(&mut self, output: usize, component: u32, value: Value);
    /// One float of a uniform buffer
    fn buffer_load(&mut self, binding: u32, slot: Slot) -> Value;
    /// Sample a vec4; `lod` selects explicit level of detail
    fn sample(&mut self, sampler: u32, coord: Value, lod: Option<Value>, projective: bool) -> Value;
    fn discard(&mut self);

    fn begin_if(&mut self, cond: Value);
    fn begin_else(&mut self);
    fn end_if(&mut self);
    fn begin_loop(&mut self);
    fn end_loop(&mut self);
    fn emit_break(&mut self);
    fn emit_continue(&mut self);

    fn comment(&mut self, text: &str);

    fn finish(self) -> ShaderCode
    where
        Self: Sized;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spirv_module_bytes() {
        let mut module = SpirVModule::new(ShaderStage::VERTEX);
        module.bytecode = vec![0x0723_0203, 1];
        let bytes = module.as_bytes();
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[..4], &0x0723_0203u32.to_ne_bytes());
    }

    #[test]
    fn test_buffer_vec4_count() {
        assert_eq!(BufferDecl { binding: 0, size: 16 }.vec4_count(), 4);
        assert_eq!(BufferDecl { binding: 0, size: 17 }.vec4_count(), 5);
        assert_eq!(BufferDecl { binding: 0, size: 0 }.vec4_count(), 1);
    }

    #[test]
    fn test_builtin_decl_types() {
        let id = InterfaceDecl::builtin("vertex_id", Builtin::VertexIndex);
        assert_eq!(id.value_type(), ValueType::INT);
        let pos = InterfaceDecl::builtin("position", Builtin::Position);
        assert_eq!(pos.value_type(), ValueType::vector(ScalarKind::Float, 4));
    }
}
