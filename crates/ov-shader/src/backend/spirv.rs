//! SPIR-V backend
//!
//! Register banks become `Private` float arrays, predicates a `Private` bool
//! array. Uniform buffers are `vec4` arrays wrapped in a `Block` struct in
//! descriptor set 0; samplers are combined image samplers in set 1. Control
//! flow is emitted as structured selections and loops.

use super::spirv_builder::*;
use super::{
    BinaryOp, Builtin, CompareOp, PackOp, RegisterFile, ScalarKind, ShaderBackend, ShaderCode,
    ShaderInterface, ShaderStage, Slot, SpirVModule, UnaryOp, Value, ValueType, PREDICATE_COUNT,
};
use ov_core::{FeatureFlags, OutputConfig};
use std::collections::HashSet;

const UNIFORM_BUFFER_SET: u32 = 0;
const SAMPLER_SET: u32 = 1;

#[derive(Debug, Clone, Copy)]
struct Variable {
    id: u32,
    ty: ValueType,
}

#[derive(Debug, Clone, Copy)]
struct SamplerVar {
    index: u32,
    id: u32,
    sampled_type: u32,
}

#[derive(Debug, Clone, Copy)]
enum Frame {
    If {
        else_label: u32,
        merge: u32,
        in_else: bool,
    },
    Loop {
        header: u32,
        continue_label: u32,
        merge: u32,
    },
}

/// SPIR-V generator for one recompiled program
pub struct SpirvBackend {
    builder: SpirVBuilder,
    stage: ShaderStage,
    version: u32,
    debug_names: bool,
    function: u32,
    registers: [u32; RegisterFile::ALL.len()],
    predicates: u32,
    inputs: Vec<Variable>,
    outputs: Vec<Variable>,
    buffers: Vec<(u32, u32)>,
    samplers: Vec<SamplerVar>,
    frames: Vec<Frame>,
    /// The current block ended in a branch, kill or return
    terminated: bool,
}

impl SpirvBackend {
    pub fn new(interface: &ShaderInterface, features: &FeatureFlags, output: &OutputConfig) -> Self {
        let mut backend = Self {
            builder: SpirVBuilder::new(),
            stage: interface.stage,
            version: features.spirv_version.word(),
            debug_names: output.emit_debug_names,
            function: 0,
            registers: [0; RegisterFile::ALL.len()],
            predicates: 0,
            inputs: Vec::new(),
            outputs: Vec::new(),
            buffers: Vec::new(),
            samplers: Vec::new(),
            frames: Vec::new(),
            terminated: false,
        };

        backend.builder.add_capability(CAP_SHADER);
        backend.builder.add_glsl_import();
        backend.builder.add_memory_model();

        backend.declare_registers();
        backend.declare_interface(interface, features.use_legacy_vertex_id);
        backend.declare_buffers(interface);
        backend.declare_samplers(interface);
        backend.begin_function();
        backend
    }

    fn name(&mut self, id: u32, name: &str) {
        if self.debug_names {
            self.builder.add_name(id, name);
        }
    }

    fn type_id(&mut self, ty: ValueType) -> u32 {
        let element = match ty.kind {
            ScalarKind::Float => self.builder.type_float(),
            ScalarKind::Int => self.builder.type_int(true),
            ScalarKind::Uint => self.builder.type_int(false),
            ScalarKind::Bool => self.builder.type_bool(),
        };
        if ty.is_scalar() {
            element
        } else {
            self.builder.type_vector(element, ty.components as u32)
        }
    }

    //=========================================================================
    // DECLARATIONS
    //=========================================================================

    fn private_array(&mut self, element: u32, length: u32) -> u32 {
        let array = self.builder.type_array(element, length);
        let ptr = self.builder.type_pointer(STORAGE_PRIVATE, array);
        let init = self.builder.constant_null(array);
        self.builder.add_variable(ptr, STORAGE_PRIVATE, Some(init))
    }

    fn declare_registers(&mut self) {
        let float = self.builder.type_float();
        for (i, file) in RegisterFile::ALL.iter().enumerate() {
            let id = self.private_array(float, file.size());
            self.name(id, file.name());
            self.registers[i] = id;
        }
        let bool_ty = self.builder.type_bool();
        self.predicates = self.private_array(bool_ty, PREDICATE_COUNT);
        self.name(self.predicates, "p");
    }

    fn declare_interface(&mut self, interface: &ShaderInterface, legacy_ids: bool) {
        for (storage, decls) in [
            (STORAGE_INPUT, &interface.inputs),
            (STORAGE_OUTPUT, &interface.outputs),
        ] {
            for decl in decls {
                let ty = decl.value_type();
                let ty_id = self.type_id(ty);
                let ptr = self.builder.type_pointer(storage, ty_id);
                let id = self.builder.add_variable(ptr, storage, None);
                if let Some(location) = decl.location {
                    self.builder.decorate(id, DECORATION_LOCATION, &[location]);
                }
                if let Some(builtin) = decl.builtin {
                    let value = match builtin {
                        Builtin::Position => BUILTIN_POSITION,
                        Builtin::FragCoord => BUILTIN_FRAG_COORD,
                        Builtin::VertexIndex if legacy_ids => BUILTIN_VERTEX_ID,
                        Builtin::VertexIndex => BUILTIN_VERTEX_INDEX,
                        Builtin::InstanceIndex if legacy_ids => BUILTIN_INSTANCE_ID,
                        Builtin::InstanceIndex => BUILTIN_INSTANCE_INDEX,
                    };
                    self.builder.decorate(id, DECORATION_BUILTIN, &[value]);
                }
                self.name(id, &decl.name);
                let var = Variable { id, ty };
                if storage == STORAGE_INPUT {
                    self.inputs.push(var);
                } else {
                    self.outputs.push(var);
                }
            }
        }
    }

    fn declare_buffers(&mut self, interface: &ShaderInterface) {
        let float = self.builder.type_float();
        let vec4 = self.builder.type_vector(float, 4);
        let mut strided = HashSet::new();
        for buffer in &interface.buffers {
            let array = self.builder.type_array(vec4, buffer.vec4_count());
            // Same-sized buffers share the array type
            if strided.insert(array) {
                self.builder.decorate(array, DECORATION_ARRAY_STRIDE, &[16]);
            }
            let block = self.builder.type_struct(&[array]);
            self.builder.decorate(block, DECORATION_BLOCK, &[]);
            self.builder.member_decorate(block, 0, DECORATION_OFFSET, &[0]);
            let ptr = self.builder.type_pointer(STORAGE_UNIFORM, block);
            let id = self.builder.add_variable(ptr, STORAGE_UNIFORM, None);
            self.builder
                .decorate(id, DECORATION_DESCRIPTOR_SET, &[UNIFORM_BUFFER_SET]);
            self.builder.decorate(id, DECORATION_BINDING, &[buffer.binding]);
            self.name(block, &format!("buffer{}_block", buffer.binding));
            self.name(id, &format!("buffer{}", buffer.binding));
            self.buffers.push((buffer.binding, id));
        }
    }

    fn declare_samplers(&mut self, interface: &ShaderInterface) {
        for sampler in &interface.samplers {
            let dim = if sampler.cube { DIM_CUBE } else { DIM_2D };
            let image = self.builder.type_image(dim);
            let sampled_type = self.builder.type_sampled_image(image);
            let ptr = self
                .builder
                .type_pointer(STORAGE_UNIFORM_CONSTANT, sampled_type);
            let id = self
                .builder
                .add_variable(ptr, STORAGE_UNIFORM_CONSTANT, None);
            self.builder.decorate(id, DECORATION_DESCRIPTOR_SET, &[SAMPLER_SET]);
            self.builder.decorate(id, DECORATION_BINDING, &[sampler.index]);
            self.name(id, &sampler.name);
            self.samplers.push(SamplerVar {
                index: sampler.index,
                id,
                sampled_type,
            });
        }
    }

    fn begin_function(&mut self) {
        let void = self.builder.type_void();
        let fn_type = self.builder.type_function(void);
        let function = self.builder.alloc_id();
        self.builder
            .emit_void(OP_FUNCTION, &[void, function, 0, fn_type]);
        let entry = self.builder.alloc_id();
        self.builder.emit_label(entry);
        self.function = function;
        self.name(function, "main");
    }

    //=========================================================================
    // EMISSION HELPERS
    //=========================================================================

    /// Open a fresh block if the previous one was terminated
    fn ensure_block(&mut self) {
        if self.terminated {
            let label = self.builder.alloc_id();
            self.builder.emit_label(label);
            self.terminated = false;
        }
    }

    fn op(&mut self, opcode: u16, ty: ValueType, operands: &[u32]) -> Value {
        self.ensure_block();
        let ty_id = self.type_id(ty);
        let id = self.builder.emit(opcode, ty_id, operands);
        Value { id, ty }
    }

    fn ext(&mut self, instruction: u32, ty: ValueType, operands: &[u32]) -> Value {
        self.ensure_block();
        let ty_id = self.type_id(ty);
        let id = self.builder.ext_inst(ty_id, instruction, operands);
        Value { id, ty }
    }

    fn void_op(&mut self, opcode: u16, operands: &[u32]) {
        self.ensure_block();
        self.builder.emit_void(opcode, operands);
    }

    fn terminate(&mut self, opcode: u16, operands: &[u32]) {
        self.void_op(opcode, operands);
        self.terminated = true;
    }

    fn slot_index(&mut self, slot: Slot) -> u32 {
        match slot {
            Slot::Fixed(index) => self.builder.constant_int(index as i32),
            Slot::Dynamic(value) => self.bitcast(value, ScalarKind::Int).id,
        }
    }

    fn pointer(&mut self, storage: u32, element: ValueType, base: u32, indices: &[u32]) -> u32 {
        let element = self.type_id(element);
        let ptr = self.builder.type_pointer(storage, element);
        let mut operands = vec![base];
        operands.extend_from_slice(indices);
        self.op_raw(OP_ACCESS_CHAIN, ptr, &operands)
    }

    fn op_raw(&mut self, opcode: u16, ty_id: u32, operands: &[u32]) -> u32 {
        self.ensure_block();
        self.builder.emit(opcode, ty_id, operands)
    }

    fn load(&mut self, ty: ValueType, pointer: u32) -> Value {
        self.op(OP_LOAD, ty, &[pointer])
    }

    /// Splat a scalar constant to the width of `like`
    fn splat(&mut self, scalar: Value, like: ValueType) -> Value {
        if like.is_scalar() {
            return scalar;
        }
        let parts = vec![scalar; like.components as usize];
        self.construct(&parts)
    }

    fn zero_of(&mut self, ty: ValueType) -> Value {
        let zero = match ty.kind {
            ScalarKind::Float => self.constant_f32(0.0),
            ScalarKind::Int => self.constant_i32(0),
            ScalarKind::Uint => self.constant_u32(0),
            ScalarKind::Bool => self.constant_bool(false),
        };
        self.splat(zero, ty)
    }

    fn one_of(&mut self, ty: ValueType) -> Value {
        let one = match ty.kind {
            ScalarKind::Float => self.constant_f32(1.0),
            ScalarKind::Int => self.constant_i32(1),
            ScalarKind::Uint => self.constant_u32(1),
            ScalarKind::Bool => self.constant_bool(true),
        };
        self.splat(one, ty)
    }

    fn innermost_loop(&self) -> Option<(u32, u32)> {
        self.frames.iter().rev().find_map(|frame| match *frame {
            Frame::Loop {
                continue_label,
                merge,
                ..
            } => Some((continue_label, merge)),
            Frame::If { .. } => None,
        })
    }
}

impl ShaderBackend for SpirvBackend {
    fn stage(&self) -> ShaderStage {
        self.stage
    }

    fn constant_f32(&mut self, value: f32) -> Value {
        Value {
            id: self.builder.constant_float(value),
            ty: ValueType::FLOAT,
        }
    }

    fn constant_i32(&mut self, value: i32) -> Value {
        Value {
            id: self.builder.constant_int(value),
            ty: ValueType::INT,
        }
    }

    fn constant_u32(&mut self, value: u32) -> Value {
        Value {
            id: self.builder.constant_uint(value),
            ty: ValueType::UINT,
        }
    }

    fn constant_bool(&mut self, value: bool) -> Value {
        Value {
            id: self.builder.constant_bool(value),
            ty: ValueType::BOOL,
        }
    }

    fn unary(&mut self, op: UnaryOp, value: Value) -> Value {
        let ty = value.ty;
        let v = value.id;
        match (op, ty.kind) {
            (UnaryOp::Negate, ScalarKind::Float) => self.op(OP_FNEGATE, ty, &[v]),
            (UnaryOp::Negate, ScalarKind::Bool) => self.op(OP_LOGICAL_NOT, ty, &[v]),
            (UnaryOp::Negate, _) => self.op(OP_SNEGATE, ty, &[v]),
            (UnaryOp::Abs, ScalarKind::Float) => self.ext(GLSL_FABS, ty, &[v]),
            (UnaryOp::Abs, ScalarKind::Int) => self.ext(GLSL_SABS, ty, &[v]),
            (UnaryOp::Abs, _) => value,
            (UnaryOp::Not, ScalarKind::Bool) => self.op(OP_LOGICAL_NOT, ty, &[v]),
            (UnaryOp::Not, ScalarKind::Float) => {
                let bits = self.bitcast(value, ScalarKind::Uint);
                let inverted = self.unary(UnaryOp::Not, bits);
                self.bitcast(inverted, ScalarKind::Float)
            }
            (UnaryOp::Not, _) => self.op(OP_NOT, ty, &[v]),
            (UnaryOp::Floor, _) => self.ext(GLSL_FLOOR, ty, &[v]),
            (UnaryOp::Fract, _) => self.ext(GLSL_FRACT, ty, &[v]),
            (UnaryOp::InverseSqrt, _) => self.ext(GLSL_INVERSE_SQRT, ty, &[v]),
            (UnaryOp::Exp2, _) => self.ext(GLSL_EXP2, ty, &[v]),
            (UnaryOp::Log2, _) => self.ext(GLSL_LOG2, ty, &[v]),
            (UnaryOp::DerivX, _) => self.op(OP_DPDX, ty, &[v]),
            (UnaryOp::DerivY, _) => self.op(OP_DPDY, ty, &[v]),
        }
    }

    fn binary(&mut self, op: BinaryOp, lhs: Value, rhs: Value) -> Value {
        let ty = lhs.ty;
        let operands = [lhs.id, rhs.id];
        let kind = ty.kind;
        let float = kind == ScalarKind::Float;
        match op {
            BinaryOp::Add if float => self.op(OP_FADD, ty, &operands),
            BinaryOp::Add => self.op(OP_IADD, ty, &operands),
            BinaryOp::Sub if float => self.op(OP_FSUB, ty, &operands),
            BinaryOp::Sub => self.op(OP_ISUB, ty, &operands),
            BinaryOp::Mul if float => self.op(OP_FMUL, ty, &operands),
            BinaryOp::Mul => self.op(OP_IMUL, ty, &operands),
            BinaryOp::Div => match kind {
                ScalarKind::Float => self.op(OP_FDIV, ty, &operands),
                ScalarKind::Uint => self.op(OP_UDIV, ty, &operands),
                _ => self.op(OP_SDIV, ty, &operands),
            },
            BinaryOp::Min => match kind {
                ScalarKind::Float => self.ext(GLSL_FMIN, ty, &operands),
                ScalarKind::Uint => self.ext(GLSL_UMIN, ty, &operands),
                _ => self.ext(GLSL_SMIN, ty, &operands),
            },
            BinaryOp::Max => match kind {
                ScalarKind::Float => self.ext(GLSL_FMAX, ty, &operands),
                ScalarKind::Uint => self.ext(GLSL_UMAX, ty, &operands),
                _ => self.ext(GLSL_SMAX, ty, &operands),
            },
            BinaryOp::And if kind == ScalarKind::Bool => self.op(OP_LOGICAL_AND, ty, &operands),
            BinaryOp::And => self.op(OP_BITWISE_AND, ty, &operands),
            BinaryOp::Or if kind == ScalarKind::Bool => self.op(OP_LOGICAL_OR, ty, &operands),
            BinaryOp::Or => self.op(OP_BITWISE_OR, ty, &operands),
            BinaryOp::Xor if kind == ScalarKind::Bool => {
                self.op(OP_LOGICAL_NOT_EQUAL, ty, &operands)
            }
            BinaryOp::Xor => self.op(OP_BITWISE_XOR, ty, &operands),
            BinaryOp::Shl => self.op(OP_SHIFT_LEFT_LOGICAL, ty, &operands),
            BinaryOp::Shr => self.op(OP_SHIFT_RIGHT_LOGICAL, ty, &operands),
            BinaryOp::Sar => self.op(OP_SHIFT_RIGHT_ARITHMETIC, ty, &operands),
            BinaryOp::Dot => self.op(OP_DOT, ValueType::FLOAT, &operands),
        }
    }

    fn compare(&mut self, op: CompareOp, lhs: Value, rhs: Value) -> Value {
        let ty = ValueType::vector(ScalarKind::Bool, lhs.ty.components);
        let opcode = match (lhs.ty.kind, op) {
            (ScalarKind::Float, CompareOp::Equal) => OP_FORD_EQUAL,
            (ScalarKind::Float, CompareOp::NotEqual) => OP_FORD_NOT_EQUAL,
            (ScalarKind::Float, CompareOp::Less) => OP_FORD_LESS_THAN,
            (ScalarKind::Float, CompareOp::LessEqual) => OP_FORD_LESS_THAN_EQUAL,
            (ScalarKind::Float, CompareOp::Greater) => OP_FORD_GREATER_THAN,
            (ScalarKind::Float, CompareOp::GreaterEqual) => OP_FORD_GREATER_THAN_EQUAL,
            (ScalarKind::Bool, CompareOp::Equal) => OP_LOGICAL_EQUAL,
            (ScalarKind::Bool, _) => OP_LOGICAL_NOT_EQUAL,
            (_, CompareOp::Equal) => OP_IEQUAL,
            (_, CompareOp::NotEqual) => OP_INOT_EQUAL,
            (ScalarKind::Int, CompareOp::Less) => OP_SLESS_THAN,
            (ScalarKind::Int, CompareOp::LessEqual) => OP_SLESS_THAN_EQUAL,
            (ScalarKind::Int, CompareOp::Greater) => OP_SGREATER_THAN,
            (ScalarKind::Int, CompareOp::GreaterEqual) => OP_SGREATER_THAN_EQUAL,
            (_, CompareOp::Less) => OP_ULESS_THAN,
            (_, CompareOp::LessEqual) => OP_ULESS_THAN_EQUAL,
            (_, CompareOp::Greater) => OP_UGREATER_THAN,
            (_, CompareOp::GreaterEqual) => OP_UGREATER_THAN_EQUAL,
        };
        self.op(opcode, ty, &[lhs.id, rhs.id])
    }

    fn select(&mut self, cond: Value, if_true: Value, if_false: Value) -> Value {
        self.op(OP_SELECT, if_true.ty, &[cond.id, if_true.id, if_false.id])
    }

    fn convert(&mut self, value: Value, kind: ScalarKind) -> Value {
        let from = value.ty.kind;
        if from == kind {
            return value;
        }
        let ty = ValueType::vector(kind, value.ty.components);
        match (from, kind) {
            (ScalarKind::Float, ScalarKind::Int) => self.op(OP_CONVERT_F_TO_S, ty, &[value.id]),
            (ScalarKind::Float, ScalarKind::Uint) => self.op(OP_CONVERT_F_TO_U, ty, &[value.id]),
            (ScalarKind::Int, ScalarKind::Float) => self.op(OP_CONVERT_S_TO_F, ty, &[value.id]),
            (ScalarKind::Uint, ScalarKind::Float) => self.op(OP_CONVERT_U_TO_F, ty, &[value.id]),
            (ScalarKind::Bool, _) => {
                let one = self.one_of(ty);
                let zero = self.zero_of(ty);
                self.select(value, one, zero)
            }
            (_, ScalarKind::Bool) => {
                let zero = self.zero_of(value.ty);
                self.compare(CompareOp::NotEqual, value, zero)
            }
            _ => self.bitcast(value, kind),
        }
    }

    fn bitcast(&mut self, value: Value, kind: ScalarKind) -> Value {
        if value.ty.kind == kind {
            return value;
        }
        if value.ty.kind == ScalarKind::Bool || kind == ScalarKind::Bool {
            return self.convert(value, kind);
        }
        let ty = ValueType::vector(kind, value.ty.components);
        self.op(OP_BITCAST, ty, &[value.id])
    }

    fn pack(&mut self, op: PackOp, value: Value) -> Value {
        let instruction = match op {
            PackOp::Half2x16 => GLSL_PACK_HALF2X16,
            PackOp::Unorm4x8 => GLSL_PACK_UNORM4X8,
        };
        self.ext(instruction, ValueType::UINT, &[value.id])
    }

    fn unpack(&mut self, op: PackOp, value: Value) -> Value {
        let instruction = match op {
            PackOp::Half2x16 => GLSL_UNPACK_HALF2X16,
            PackOp::Unorm4x8 => GLSL_UNPACK_UNORM4X8,
        };
        let ty = ValueType::vector(ScalarKind::Float, op.components());
        self.ext(instruction, ty, &[value.id])
    }

    fn construct(&mut self, components: &[Value]) -> Value {
        match components {
            [] => self.constant_f32(0.0),
            [single] => *single,
            [first, ..] => {
                let ty = ValueType::vector(first.ty.kind, components.len() as u8);
                let ids: Vec<u32> = components.iter().map(|c| c.id).collect();
                self.op(OP_COMPOSITE_CONSTRUCT, ty, &ids)
            }
        }
    }

    fn extract(&mut self, value: Value, index: u32) -> Value {
        if value.ty.is_scalar() {
            return value;
        }
        self.op(OP_COMPOSITE_EXTRACT, value.ty.element(), &[value.id, index])
    }

    fn load_register(&mut self, file: RegisterFile, slot: Slot) -> Value {
        let base = self.registers[file as usize];
        let index = self.slot_index(slot);
        let ptr = self.pointer(STORAGE_PRIVATE, ValueType::FLOAT, base, &[index]);
        self.load(ValueType::FLOAT, ptr)
    }

    fn store_register(&mut self, file: RegisterFile, slot: Slot, value: Value) {
        let value = self.bitcast(value, ScalarKind::Float);
        let base = self.registers[file as usize];
        let index = self.slot_index(slot);
        let ptr = self.pointer(STORAGE_PRIVATE, ValueType::FLOAT, base, &[index]);
        self.void_op(OP_STORE, &[ptr, value.id]);
    }

    fn load_predicate(&mut self, index: u32) -> Value {
        let index = self.builder.constant_int(index.min(PREDICATE_COUNT - 1) as i32);
        let ptr = self.pointer(STORAGE_PRIVATE, ValueType::BOOL, self.predicates, &[index]);
        self.load(ValueType::BOOL, ptr)
    }

    fn store_predicate(&mut self, index: u32, value: Value) {
        let value = self.convert(value, ScalarKind::Bool);
        let index = self.builder.constant_int(index.min(PREDICATE_COUNT - 1) as i32);
        let ptr = self.pointer(STORAGE_PRIVATE, ValueType::BOOL, self.predicates, &[index]);
        self.void_op(OP_STORE, &[ptr, value.id]);
    }

    fn load_input(&mut self, input: usize, component: u32) -> Value {
        let Some(var) = self.inputs.get(input).copied() else {
            return self.constant_f32(0.0);
        };
        if var.ty.is_scalar() {
            return self.load(var.ty, var.id);
        }
        let index = self.builder.constant_int(component.min(var.ty.components as u32 - 1) as i32);
        let element = var.ty.element();
        let ptr = self.pointer(STORAGE_INPUT, element, var.id, &[index]);
        self.load(element, ptr)
    }

    fn store_output(&mut self, output: usize, component: u32, value: Value) {
        let Some(var) = self.outputs.get(output).copied() else {
            return;
        };
        let value = self.bitcast(value, var.ty.kind);
        if var.ty.is_scalar() {
            self.void_op(OP_STORE, &[var.id, value.id]);
            return;
        }
        let index = self.builder.constant_int(component.min(var.ty.components as u32 - 1) as i32);
        let ptr = self.pointer(STORAGE_OUTPUT, var.ty.element(), var.id, &[index]);
        self.void_op(OP_STORE, &[ptr, value.id]);
    }

    fn buffer_load(&mut self, binding: u32, slot: Slot) -> Value {
        let Some(&(_, var)) = self.buffers.iter().find(|(b, _)| *b == binding) else {
            return self.constant_f32(0.0);
        };
        let member = self.builder.constant_int(0);
        let (vector, lane) = match slot {
            Slot::Fixed(offset) => (
                self.builder.constant_int((offset / 4) as i32),
                self.builder.constant_int((offset % 4) as i32),
            ),
            Slot::Dynamic(offset) => {
                let offset = self.bitcast(offset, ScalarKind::Int);
                let two = self.constant_i32(2);
                let three = self.constant_i32(3);
                let vector = self.binary(BinaryOp::Sar, offset, two);
                let lane = self.binary(BinaryOp::And, offset, three);
                (vector.id, lane.id)
            }
        };
        let ptr = self.pointer(STORAGE_UNIFORM, ValueType::FLOAT, var, &[member, vector, lane]);
        self.load(ValueType::FLOAT, ptr)
    }

    fn sample(&mut self, sampler: u32, coord: Value, lod: Option<Value>, projective: bool) -> Value {
        let vec4 = ValueType::vector(ScalarKind::Float, 4);
        let Some(var) = self.samplers.iter().find(|s| s.index == sampler).copied() else {
            return self.zero_of(vec4);
        };
        let sampled = self.op_raw(OP_LOAD, var.sampled_type, &[var.id]);
        // Implicit derivatives only exist in fragment shaders
        let lod = match lod {
            Some(lod) => Some(lod),
            None if !self.stage.is_fragment() => Some(self.constant_f32(0.0)),
            None => None,
        };
        match (lod, projective) {
            (Some(lod), false) => self.op(
                OP_IMAGE_SAMPLE_EXPLICIT_LOD,
                vec4,
                &[sampled, coord.id, IMAGE_OPERAND_LOD, lod.id],
            ),
            (Some(lod), true) => self.op(
                OP_IMAGE_SAMPLE_PROJ_EXPLICIT_LOD,
                vec4,
                &[sampled, coord.id, IMAGE_OPERAND_LOD, lod.id],
            ),
            (None, false) => self.op(OP_IMAGE_SAMPLE_IMPLICIT_LOD, vec4, &[sampled, coord.id]),
            (None, true) => self.op(OP_IMAGE_SAMPLE_PROJ_IMPLICIT_LOD, vec4, &[sampled, coord.id]),
        }
    }

    fn discard(&mut self) {
        self.terminate(OP_KILL, &[]);
    }

    fn begin_if(&mut self, cond: Value) {
        let cond = self.convert(cond, ScalarKind::Bool);
        let then_label = self.builder.alloc_id();
        let else_label = self.builder.alloc_id();
        let merge = self.builder.alloc_id();
        self.void_op(OP_SELECTION_MERGE, &[merge, 0]);
        self.terminate(OP_BRANCH_CONDITIONAL, &[cond.id, then_label, else_label]);
        self.builder.emit_label(then_label);
        self.terminated = false;
        self.frames.push(Frame::If {
            else_label,
            merge,
            in_else: false,
        });
    }

    fn begin_else(&mut self) {
        let Some(Frame::If {
            else_label,
            merge,
            in_else,
        }) = self.frames.last_mut()
        else {
            return;
        };
        if *in_else {
            return;
        }
        *in_else = true;
        let (else_label, merge) = (*else_label, *merge);
        if !self.terminated {
            self.builder.emit_void(OP_BRANCH, &[merge]);
        }
        self.builder.emit_label(else_label);
        self.terminated = false;
    }

    fn end_if(&mut self) {
        let Some(Frame::If {
            else_label,
            merge,
            in_else,
        }) = self.frames.last().copied()
        else {
            return;
        };
        self.frames.pop();
        if !self.terminated {
            self.builder.emit_void(OP_BRANCH, &[merge]);
        }
        if !in_else {
            self.builder.emit_label(else_label);
            self.builder.emit_void(OP_BRANCH, &[merge]);
        }
        self.builder.emit_label(merge);
        self.terminated = false;
    }

    fn begin_loop(&mut self) {
        let header = self.builder.alloc_id();
        let body = self.builder.alloc_id();
        let continue_label = self.builder.alloc_id();
        let merge = self.builder.alloc_id();
        self.terminate(OP_BRANCH, &[header]);
        self.builder.emit_label(header);
        self.builder
            .emit_void(OP_LOOP_MERGE, &[merge, continue_label, 0]);
        self.builder.emit_void(OP_BRANCH, &[body]);
        self.builder.emit_label(body);
        self.terminated = false;
        self.frames.push(Frame::Loop {
            header,
            continue_label,
            merge,
        });
    }

    fn end_loop(&mut self) {
        let Some(Frame::Loop {
            header,
            continue_label,
            merge,
        }) = self.frames.last().copied()
        else {
            return;
        };
        self.frames.pop();
        if !self.terminated {
            self.builder.emit_void(OP_BRANCH, &[continue_label]);
        }
        self.builder.emit_label(continue_label);
        self.builder.emit_void(OP_BRANCH, &[header]);
        self.builder.emit_label(merge);
        self.terminated = false;
    }

    fn emit_break(&mut self) {
        match self.innermost_loop() {
            Some((_, merge)) => self.terminate(OP_BRANCH, &[merge]),
            None => self.terminate(OP_RETURN, &[]),
        }
    }

    fn emit_continue(&mut self) {
        match self.innermost_loop() {
            Some((continue_label, _)) => self.terminate(OP_BRANCH, &[continue_label]),
            None => self.terminate(OP_RETURN, &[]),
        }
    }

    fn comment(&mut self, _text: &str) {}

    fn finish(mut self) -> ShaderCode {
        while let Some(frame) = self.frames.last() {
            match frame {
                Frame::If { .. } => self.end_if(),
                Frame::Loop { .. } => self.end_loop(),
            }
        }
        if !self.terminated {
            self.builder.emit_void(OP_RETURN, &[]);
        }
        self.builder.emit_void(OP_FUNCTION_END, &[]);

        let mut interface: Vec<u32> = self.inputs.iter().map(|v| v.id).collect();
        interface.extend(self.outputs.iter().map(|v| v.id));
        let model = if self.stage.is_fragment() {
            EXEC_MODEL_FRAGMENT
        } else {
            EXEC_MODEL_VERTEX
        };
        self.builder
            .add_entry_point(model, self.function, "main", &interface);
        if self.stage.is_fragment() {
            self.builder
                .add_execution_mode(self.function, EXEC_MODE_ORIGIN_UPPER_LEFT);
        }

        ShaderCode::SpirV(SpirVModule {
            bytecode: self.builder.build(self.version),
            stage: self.stage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BufferDecl, InterfaceDecl, SamplerDecl};

    fn opcodes(words: &[u32]) -> Vec<u16> {
        let mut ops = Vec::new();
        let mut i = 5;
        while i < words.len() {
            let count = (words[i] >> 16).max(1) as usize;
            ops.push((words[i] & 0xFFFF) as u16);
            i += count;
        }
        ops
    }

    fn vertex_interface() -> ShaderInterface {
        let mut interface = ShaderInterface::new(ShaderStage::VERTEX);
        interface
            .inputs
            .push(InterfaceDecl::located("in_position", 0, 4));
        interface
            .outputs
            .push(InterfaceDecl::builtin("out_position", Builtin::Position));
        interface.buffers.push(BufferDecl {
            binding: 0,
            size: 16,
        });
        interface
    }

    fn finish_words(backend: SpirvBackend) -> Vec<u32> {
        match backend.finish() {
            ShaderCode::SpirV(module) => module.bytecode,
            ShaderCode::Glsl(_) => unreachable!(),
        }
    }

    #[test]
    fn test_vertex_module_layout() {
        let interface = vertex_interface();
        let mut backend =
            SpirvBackend::new(&interface, &FeatureFlags::default(), &OutputConfig::default());
        let x = backend.load_input(0, 0);
        backend.store_output(0, 0, x);
        let words = finish_words(backend);

        assert_eq!(words[0], SPIRV_MAGIC);
        assert_eq!(words[1], 0x0001_0000);
        let ops = opcodes(&words);
        assert_eq!(ops[0], OP_CAPABILITY);
        assert!(ops.contains(&OP_ENTRY_POINT));
        assert!(!ops.contains(&OP_EXECUTION_MODE));
        assert_eq!(ops.last(), Some(&OP_FUNCTION_END));
        // Every id is below the bound
        assert!(words[3] > 1);
    }

    #[test]
    fn test_fragment_origin_upper_left() {
        let mut interface = ShaderInterface::new(ShaderStage::FRAGMENT);
        interface.outputs.push(InterfaceDecl::located("out_color", 0, 4));
        let backend =
            SpirvBackend::new(&interface, &FeatureFlags::default(), &OutputConfig::default());
        let words = finish_words(backend);
        let ops = opcodes(&words);
        assert!(ops.contains(&OP_EXECUTION_MODE));
    }

    #[test]
    fn test_structured_if_else() {
        let interface = vertex_interface();
        let mut backend =
            SpirvBackend::new(&interface, &FeatureFlags::default(), &OutputConfig::default());
        let p = backend.load_predicate(0);
        backend.begin_if(p);
        let one = backend.constant_f32(1.0);
        backend.store_register(RegisterFile::Temp, Slot::Fixed(0), one);
        backend.begin_else();
        backend.discard();
        backend.end_if();
        let words = finish_words(backend);
        let ops = opcodes(&words);
        let merge = ops.iter().position(|&op| op == OP_SELECTION_MERGE);
        let branch = ops.iter().position(|&op| op == OP_BRANCH_CONDITIONAL);
        assert!(merge.is_some());
        assert_eq!(branch, merge.map(|m| m + 1));
        assert!(ops.contains(&OP_KILL));
    }

    #[test]
    fn test_loop_with_break() {
        let interface = vertex_interface();
        let mut backend =
            SpirvBackend::new(&interface, &FeatureFlags::default(), &OutputConfig::default());
        backend.begin_loop();
        let p = backend.load_predicate(1);
        backend.begin_if(p);
        backend.emit_break();
        backend.end_if();
        backend.end_loop();
        let words = finish_words(backend);
        let ops = opcodes(&words);
        assert_eq!(ops.iter().filter(|&&op| op == OP_LOOP_MERGE).count(), 1);
        // Function still ends in a return
        let ret = ops.iter().rposition(|&op| op == OP_RETURN);
        assert_eq!(ret, Some(ops.len() - 2));
    }

    #[test]
    fn test_legacy_vertex_id_builtin() {
        let mut interface = vertex_interface();
        interface
            .inputs
            .push(InterfaceDecl::builtin("vertex_id", Builtin::VertexIndex));
        let features = FeatureFlags {
            use_legacy_vertex_id: true,
            ..FeatureFlags::default()
        };
        let backend = SpirvBackend::new(&interface, &features, &OutputConfig::default());
        let words = finish_words(backend);
        let has_decoration = |builtin: u32| {
            words
                .windows(4)
                .any(|w| w[0] == (4 << 16 | OP_DECORATE as u32) && w[2] == DECORATION_BUILTIN && w[3] == builtin)
        };
        assert!(has_decoration(BUILTIN_VERTEX_ID));
        assert!(!has_decoration(BUILTIN_VERTEX_INDEX));
    }

    #[test]
    fn test_debug_names_toggle() {
        let interface = vertex_interface();
        let output = OutputConfig {
            emit_debug_names: false,
            ..OutputConfig::default()
        };
        let backend = SpirvBackend::new(&interface, &FeatureFlags::default(), &output);
        let ops = opcodes(&finish_words(backend));
        assert!(!ops.contains(&OP_NAME));
    }

    #[test]
    fn test_sampler_in_vertex_stage_uses_explicit_lod() {
        let mut interface = vertex_interface();
        interface.samplers.push(SamplerDecl {
            index: 0,
            name: "tex".to_string(),
            cube: false,
        });
        let mut backend =
            SpirvBackend::new(&interface, &FeatureFlags::default(), &OutputConfig::default());
        let u = backend.constant_f32(0.5);
        let coord = backend.construct(&[u, u]);
        let texel = backend.sample(0, coord, None, false);
        assert_eq!(texel.ty, ValueType::vector(ScalarKind::Float, 4));
        let ops = opcodes(&finish_words(backend));
        assert!(ops.contains(&OP_IMAGE_SAMPLE_EXPLICIT_LOD));
        assert!(!ops.contains(&OP_IMAGE_SAMPLE_IMPLICIT_LOD));
    }
}
