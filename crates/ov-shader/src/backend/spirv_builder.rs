//! SPIR-V word-level module builder
//!
//! Keeps one word vector per logical module section and assembles them in
//! the order the SPIR-V specification requires. Types and scalar constants
//! are deduplicated so every request for the same type yields the same id.

use std::collections::HashMap;

/// SPIR-V magic number
pub const SPIRV_MAGIC: u32 = 0x07230203;

/// SPIR-V generator ID (our tool)
const SPIRV_GENERATOR: u32 = 0x00080001;

// SPIR-V opcodes
pub const OP_NAME: u16 = 5;
pub const OP_EXT_INST_IMPORT: u16 = 11;
pub const OP_EXT_INST: u16 = 12;
pub const OP_MEMORY_MODEL: u16 = 14;
pub const OP_ENTRY_POINT: u16 = 15;
pub const OP_EXECUTION_MODE: u16 = 16;
pub const OP_CAPABILITY: u16 = 17;
pub const OP_TYPE_VOID: u16 = 19;
pub const OP_TYPE_BOOL: u16 = 20;
pub const OP_TYPE_INT: u16 = 21;
pub const OP_TYPE_FLOAT: u16 = 22;
pub const OP_TYPE_VECTOR: u16 = 23;
pub const OP_TYPE_IMAGE: u16 = 25;
pub const OP_TYPE_SAMPLED_IMAGE: u16 = 27;
pub const OP_TYPE_ARRAY: u16 = 28;
pub const OP_TYPE_STRUCT: u16 = 30;
pub const OP_TYPE_POINTER: u16 = 32;
pub const OP_TYPE_FUNCTION: u16 = 33;
pub const OP_CONSTANT_TRUE: u16 = 41;
pub const OP_CONSTANT_FALSE: u16 = 42;
pub const OP_CONSTANT: u16 = 43;
pub const OP_CONSTANT_NULL: u16 = 46;
pub const OP_FUNCTION: u16 = 54;
pub const OP_FUNCTION_END: u16 = 56;
pub const OP_VARIABLE: u16 = 59;
pub const OP_LOAD: u16 = 61;
pub const OP_STORE: u16 = 62;
pub const OP_ACCESS_CHAIN: u16 = 65;
pub const OP_DECORATE: u16 = 71;
pub const OP_MEMBER_DECORATE: u16 = 72;
pub const OP_COMPOSITE_CONSTRUCT: u16 = 80;
pub const OP_COMPOSITE_EXTRACT: u16 = 81;
pub const OP_IMAGE_SAMPLE_IMPLICIT_LOD: u16 = 87;
pub const OP_IMAGE_SAMPLE_EXPLICIT_LOD: u16 = 88;
pub const OP_IMAGE_SAMPLE_PROJ_IMPLICIT_LOD: u16 = 91;
pub const OP_IMAGE_SAMPLE_PROJ_EXPLICIT_LOD: u16 = 92;
pub const OP_CONVERT_F_TO_U: u16 = 109;
pub const OP_CONVERT_F_TO_S: u16 = 110;
pub const OP_CONVERT_S_TO_F: u16 = 111;
pub const OP_CONVERT_U_TO_F: u16 = 112;
pub const OP_BITCAST: u16 = 124;
pub const OP_SNEGATE: u16 = 126;
pub const OP_FNEGATE: u16 = 127;
pub const OP_IADD: u16 = 128;
pub const OP_FADD: u16 = 129;
pub const OP_ISUB: u16 = 130;
pub const OP_FSUB: u16 = 131;
pub const OP_IMUL: u16 = 132;
pub const OP_FMUL: u16 = 133;
pub const OP_UDIV: u16 = 134;
pub const OP_SDIV: u16 = 135;
pub const OP_FDIV: u16 = 136;
pub const OP_DOT: u16 = 148;
pub const OP_LOGICAL_EQUAL: u16 = 164;
pub const OP_LOGICAL_NOT_EQUAL: u16 = 165;
pub const OP_LOGICAL_OR: u16 = 166;
pub const OP_LOGICAL_AND: u16 = 167;
pub const OP_LOGICAL_NOT: u16 = 168;
pub const OP_SELECT: u16 = 169;
pub const OP_IEQUAL: u16 = 170;
pub const OP_INOT_EQUAL: u16 = 171;
pub const OP_UGREATER_THAN: u16 = 172;
pub const OP_SGREATER_THAN: u16 = 173;
pub const OP_UGREATER_THAN_EQUAL: u16 = 174;
pub const OP_SGREATER_THAN_EQUAL: u16 = 175;
pub const OP_ULESS_THAN: u16 = 176;
pub const OP_SLESS_THAN: u16 = 177;
pub const OP_ULESS_THAN_EQUAL: u16 = 178;
pub const OP_SLESS_THAN_EQUAL: u16 = 179;
pub const OP_FORD_EQUAL: u16 = 180;
pub const OP_FORD_NOT_EQUAL: u16 = 182;
pub const OP_FORD_LESS_THAN: u16 = 184;
pub const OP_FORD_GREATER_THAN: u16 = 186;
pub const OP_FORD_LESS_THAN_EQUAL: u16 = 188;
pub const OP_FORD_GREATER_THAN_EQUAL: u16 = 190;
pub const OP_SHIFT_RIGHT_LOGICAL: u16 = 194;
pub const OP_SHIFT_RIGHT_ARITHMETIC: u16 = 195;
pub const OP_SHIFT_LEFT_LOGICAL: u16 = 196;
pub const OP_BITWISE_OR: u16 = 197;
pub const OP_BITWISE_XOR: u16 = 198;
pub const OP_BITWISE_AND: u16 = 199;
pub const OP_NOT: u16 = 200;
pub const OP_DPDX: u16 = 207;
pub const OP_DPDY: u16 = 208;
pub const OP_LOOP_MERGE: u16 = 246;
pub const OP_SELECTION_MERGE: u16 = 247;
pub const OP_LABEL: u16 = 248;
pub const OP_BRANCH: u16 = 249;
pub const OP_BRANCH_CONDITIONAL: u16 = 250;
pub const OP_KILL: u16 = 252;
pub const OP_RETURN: u16 = 253;

// GLSL.std.450 instructions
pub const GLSL_FABS: u32 = 4;
pub const GLSL_SABS: u32 = 5;
pub const GLSL_FLOOR: u32 = 8;
pub const GLSL_FRACT: u32 = 10;
pub const GLSL_EXP2: u32 = 29;
pub const GLSL_LOG2: u32 = 30;
pub const GLSL_INVERSE_SQRT: u32 = 32;
pub const GLSL_FMIN: u32 = 37;
pub const GLSL_UMIN: u32 = 38;
pub const GLSL_SMIN: u32 = 39;
pub const GLSL_FMAX: u32 = 40;
pub const GLSL_UMAX: u32 = 41;
pub const GLSL_SMAX: u32 = 42;
pub const GLSL_PACK_UNORM4X8: u32 = 55;
pub const GLSL_PACK_HALF2X16: u32 = 58;
pub const GLSL_UNPACK_HALF2X16: u32 = 62;
pub const GLSL_UNPACK_UNORM4X8: u32 = 64;

// Capability values
pub const CAP_SHADER: u32 = 1;

// Execution model values
pub const EXEC_MODEL_VERTEX: u32 = 0;
pub const EXEC_MODEL_FRAGMENT: u32 = 4;

// Execution mode values
pub const EXEC_MODE_ORIGIN_UPPER_LEFT: u32 = 7;

// Storage class values
pub const STORAGE_UNIFORM_CONSTANT: u32 = 0;
pub const STORAGE_INPUT: u32 = 1;
pub const STORAGE_UNIFORM: u32 = 2;
pub const STORAGE_OUTPUT: u32 = 3;
pub const STORAGE_PRIVATE: u32 = 6;

// Decoration values
pub const DECORATION_BLOCK: u32 = 2;
pub const DECORATION_ARRAY_STRIDE: u32 = 6;
pub const DECORATION_BUILTIN: u32 = 11;
pub const DECORATION_LOCATION: u32 = 30;
pub const DECORATION_BINDING: u32 = 33;
pub const DECORATION_DESCRIPTOR_SET: u32 = 34;
pub const DECORATION_OFFSET: u32 = 35;

// BuiltIn values
pub const BUILTIN_POSITION: u32 = 0;
pub const BUILTIN_VERTEX_ID: u32 = 5;
pub const BUILTIN_INSTANCE_ID: u32 = 6;
pub const BUILTIN_FRAG_COORD: u32 = 15;
pub const BUILTIN_VERTEX_INDEX: u32 = 42;
pub const BUILTIN_INSTANCE_INDEX: u32 = 43;

// Image dimensions
pub const DIM_2D: u32 = 1;
pub const DIM_CUBE: u32 = 3;

// Image operands
pub const IMAGE_OPERAND_LOD: u32 = 0x2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum TypeKey {
    Void,
    Bool,
    Int { signed: bool },
    Float,
    Vector { element: u32, count: u32 },
    Array { element: u32, length: u32 },
    Pointer { storage: u32, base: u32 },
    Function { ret: u32 },
    Image { dim: u32 },
    SampledImage { image: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ConstKey {
    Scalar { ty: u32, bits: u32 },
    Bool(bool),
    Null(u32),
}

/// SPIR-V code builder
pub struct SpirVBuilder {
    /// Current ID bound
    id_bound: u32,
    capabilities: Vec<u32>,
    ext_inst_imports: Vec<u32>,
    memory_model: Vec<u32>,
    entry_points: Vec<u32>,
    execution_modes: Vec<u32>,
    debug_names: Vec<u32>,
    /// Annotations (decorations)
    annotations: Vec<u32>,
    /// Types, constants, global variables
    types_constants: Vec<u32>,
    functions: Vec<u32>,
    /// GLSL.std.450 import ID
    glsl_ext_id: u32,
    types: HashMap<TypeKey, u32>,
    constants: HashMap<ConstKey, u32>,
}

impl Default for SpirVBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SpirVBuilder {
    pub fn new() -> Self {
        Self {
            id_bound: 1,
            capabilities: Vec::new(),
            ext_inst_imports: Vec::new(),
            memory_model: Vec::new(),
            entry_points: Vec::new(),
            execution_modes: Vec::new(),
            debug_names: Vec::new(),
            annotations: Vec::new(),
            types_constants: Vec::new(),
            functions: Vec::new(),
            glsl_ext_id: 0,
            types: HashMap::new(),
            constants: HashMap::new(),
        }
    }

    /// Allocate a new ID
    pub fn alloc_id(&mut self) -> u32 {
        let id = self.id_bound;
        self.id_bound += 1;
        id
    }

    /// Encode an instruction word
    fn encode_word(opcode: u16, word_count: u16) -> u32 {
        ((word_count as u32) << 16) | (opcode as u32)
    }

    /// Nul-terminated UTF-8 literal padded to whole words
    pub fn encode_string(text: &str) -> Vec<u32> {
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(0);
        while bytes.len() % 4 != 0 {
            bytes.push(0);
        }
        bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    fn push(section: &mut Vec<u32>, opcode: u16, operands: &[u32]) {
        section.push(Self::encode_word(opcode, operands.len() as u16 + 1));
        section.extend_from_slice(operands);
    }

    //=========================================================================
    // MODULE HEADER SECTIONS
    //=========================================================================

    pub fn add_capability(&mut self, cap: u32) {
        Self::push(&mut self.capabilities, OP_CAPABILITY, &[cap]);
    }

    /// Add GLSL.std.450 import
    pub fn add_glsl_import(&mut self) -> u32 {
        let id = self.alloc_id();
        self.glsl_ext_id = id;
        let mut operands = vec![id];
        operands.extend(Self::encode_string("GLSL.std.450"));
        Self::push(&mut self.ext_inst_imports, OP_EXT_INST_IMPORT, &operands);
        id
    }

    pub fn add_memory_model(&mut self) {
        // Logical addressing, GLSL450 memory model
        Self::push(&mut self.memory_model, OP_MEMORY_MODEL, &[1, 1]);
    }

    pub fn add_entry_point(&mut self, model: u32, function: u32, name: &str, interface: &[u32]) {
        let mut operands = vec![model, function];
        operands.extend(Self::encode_string(name));
        operands.extend_from_slice(interface);
        Self::push(&mut self.entry_points, OP_ENTRY_POINT, &operands);
    }

    pub fn add_execution_mode(&mut self, function: u32, mode: u32) {
        Self::push(&mut self.execution_modes, OP_EXECUTION_MODE, &[function, mode]);
    }

    pub fn add_name(&mut self, target: u32, name: &str) {
        let mut operands = vec![target];
        operands.extend(Self::encode_string(name));
        Self::push(&mut self.debug_names, OP_NAME, &operands);
    }

    pub fn decorate(&mut self, target: u32, decoration: u32, extra: &[u32]) {
        let mut operands = vec![target, decoration];
        operands.extend_from_slice(extra);
        Self::push(&mut self.annotations, OP_DECORATE, &operands);
    }

    pub fn member_decorate(&mut self, target: u32, member: u32, decoration: u32, extra: &[u32]) {
        let mut operands = vec![target, member, decoration];
        operands.extend_from_slice(extra);
        Self::push(&mut self.annotations, OP_MEMBER_DECORATE, &operands);
    }

    //=========================================================================
    // TYPES AND CONSTANTS
    //=========================================================================

    fn cached_type(&mut self, key: TypeKey) -> u32 {
        if let Some(&id) = self.types.get(&key) {
            return id;
        }
        let id = self.alloc_id();
        let (opcode, operands): (u16, Vec<u32>) = match key {
            TypeKey::Void => (OP_TYPE_VOID, vec![id]),
            TypeKey::Bool => (OP_TYPE_BOOL, vec![id]),
            TypeKey::Int { signed } => (OP_TYPE_INT, vec![id, 32, signed as u32]),
            TypeKey::Float => (OP_TYPE_FLOAT, vec![id, 32]),
            TypeKey::Vector { element, count } => (OP_TYPE_VECTOR, vec![id, element, count]),
            TypeKey::Array { element, length } => (OP_TYPE_ARRAY, vec![id, element, length]),
            TypeKey::Pointer { storage, base } => (OP_TYPE_POINTER, vec![id, storage, base]),
            TypeKey::Function { ret } => (OP_TYPE_FUNCTION, vec![id, ret]),
            TypeKey::Image { dim } => {
                let float = self.type_float();
                // Sampled float image: depth 0, arrayed 0, MS 0, sampled 1, format Unknown
                (OP_TYPE_IMAGE, vec![id, float, dim, 0, 0, 0, 1, 0])
            }
            TypeKey::SampledImage { image } => (OP_TYPE_SAMPLED_IMAGE, vec![id, image]),
        };
        Self::push(&mut self.types_constants, opcode, &operands);
        self.types.insert(key, id);
        id
    }

    pub fn type_void(&mut self) -> u32 {
        self.cached_type(TypeKey::Void)
    }

    pub fn type_bool(&mut self) -> u32 {
        self.cached_type(TypeKey::Bool)
    }

    pub fn type_int(&mut self, signed: bool) -> u32 {
        self.cached_type(TypeKey::Int { signed })
    }

    pub fn type_float(&mut self) -> u32 {
        self.cached_type(TypeKey::Float)
    }

    pub fn type_vector(&mut self, element: u32, count: u32) -> u32 {
        self.cached_type(TypeKey::Vector { element, count })
    }

    /// Array of `length` elements; the length becomes a uint constant
    pub fn type_array(&mut self, element: u32, length: u32) -> u32 {
        let length = self.constant_uint(length);
        self.cached_type(TypeKey::Array { element, length })
    }

    pub fn type_pointer(&mut self, storage: u32, base: u32) -> u32 {
        self.cached_type(TypeKey::Pointer { storage, base })
    }

    pub fn type_function(&mut self, ret: u32) -> u32 {
        self.cached_type(TypeKey::Function { ret })
    }

    pub fn type_image(&mut self, dim: u32) -> u32 {
        self.cached_type(TypeKey::Image { dim })
    }

    pub fn type_sampled_image(&mut self, image: u32) -> u32 {
        self.cached_type(TypeKey::SampledImage { image })
    }

    /// Struct types are never shared, each carries its own decorations
    pub fn type_struct(&mut self, members: &[u32]) -> u32 {
        let id = self.alloc_id();
        let mut operands = vec![id];
        operands.extend_from_slice(members);
        Self::push(&mut self.types_constants, OP_TYPE_STRUCT, &operands);
        id
    }

    /// 32-bit scalar constant of type `ty` with raw `bits`
    pub fn constant_bits(&mut self, ty: u32, bits: u32) -> u32 {
        let key = ConstKey::Scalar { ty, bits };
        if let Some(&id) = self.constants.get(&key) {
            return id;
        }
        let id = self.alloc_id();
        Self::push(&mut self.types_constants, OP_CONSTANT, &[ty, id, bits]);
        self.constants.insert(key, id);
        id
    }

    pub fn constant_float(&mut self, value: f32) -> u32 {
        let ty = self.type_float();
        self.constant_bits(ty, value.to_bits())
    }

    pub fn constant_int(&mut self, value: i32) -> u32 {
        let ty = self.type_int(true);
        self.constant_bits(ty, value as u32)
    }

    pub fn constant_uint(&mut self, value: u32) -> u32 {
        let ty = self.type_int(false);
        self.constant_bits(ty, value)
    }

    pub fn constant_bool(&mut self, value: bool) -> u32 {
        let key = ConstKey::Bool(value);
        if let Some(&id) = self.constants.get(&key) {
            return id;
        }
        let ty = self.type_bool();
        let id = self.alloc_id();
        let opcode = if value { OP_CONSTANT_TRUE } else { OP_CONSTANT_FALSE };
        Self::push(&mut self.types_constants, opcode, &[ty, id]);
        self.constants.insert(key, id);
        id
    }

    pub fn constant_null(&mut self, ty: u32) -> u32 {
        let key = ConstKey::Null(ty);
        if let Some(&id) = self.constants.get(&key) {
            return id;
        }
        let id = self.alloc_id();
        Self::push(&mut self.types_constants, OP_CONSTANT_NULL, &[ty, id]);
        self.constants.insert(key, id);
        id
    }

    /// Global variable of pointer type `ptr_type`
    pub fn add_variable(&mut self, ptr_type: u32, storage: u32, initializer: Option<u32>) -> u32 {
        let id = self.alloc_id();
        let mut operands = vec![ptr_type, id, storage];
        operands.extend(initializer);
        Self::push(&mut self.types_constants, OP_VARIABLE, &operands);
        id
    }

    //=========================================================================
    // FUNCTION BODY
    //=========================================================================

    /// Instruction with a result id, appended to the function section
    pub fn emit(&mut self, opcode: u16, result_type: u32, operands: &[u32]) -> u32 {
        let id = self.alloc_id();
        let mut words = Vec::with_capacity(operands.len() + 2);
        words.push(result_type);
        words.push(id);
        words.extend_from_slice(operands);
        Self::push(&mut self.functions, opcode, &words);
        id
    }

    /// Instruction without a result id
    pub fn emit_void(&mut self, opcode: u16, operands: &[u32]) {
        Self::push(&mut self.functions, opcode, operands);
    }

    /// GLSL.std.450 extended instruction
    pub fn ext_inst(&mut self, result_type: u32, instruction: u32, operands: &[u32]) -> u32 {
        let mut words = vec![self.glsl_ext_id, instruction];
        words.extend_from_slice(operands);
        self.emit(OP_EXT_INST, result_type, &words)
    }

    pub fn emit_label(&mut self, label: u32) {
        self.emit_void(OP_LABEL, &[label]);
    }

    /// Assemble the module with the given header version word
    pub fn build(self, version: u32) -> Vec<u32> {
        let mut spirv = Vec::with_capacity(
            5 + self.capabilities.len()
                + self.ext_inst_imports.len()
                + self.memory_model.len()
                + self.entry_points.len()
                + self.execution_modes.len()
                + self.debug_names.len()
                + self.annotations.len()
                + self.types_constants.len()
                + self.functions.len(),
        );

        // Header
        spirv.push(SPIRV_MAGIC);
        spirv.push(version);
        spirv.push(SPIRV_GENERATOR);
        spirv.push(self.id_bound);
        spirv.push(0); // Reserved

        // Sections in order
        spirv.extend(&self.capabilities);
        spirv.extend(&self.ext_inst_imports);
        spirv.extend(&self.memory_model);
        spirv.extend(&self.entry_points);
        spirv.extend(&self.execution_modes);
        spirv.extend(&self.debug_names);
        spirv.extend(&self.annotations);
        spirv.extend(&self.types_constants);
        spirv.extend(&self.functions);

        spirv
    }
}
