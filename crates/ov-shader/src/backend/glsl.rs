//! GLSL text backend
//!
//! Every non-constant value is materialised into a `tN` temporary the moment
//! it is produced, so later register writes cannot change it. Constants are
//! inlined as literals.

use super::{
    BinaryOp, Builtin, CompareOp, InterfaceDecl, PackOp, RegisterFile, SamplerDecl, ScalarKind,
    ShaderBackend, ShaderCode, ShaderInterface, ShaderStage, Slot, UnaryOp, Value, ValueType,
    PREDICATE_COUNT,
};
use ov_core::{FeatureFlags, OutputConfig};
use std::fmt::Write as _;

/// GLSL generator for one recompiled program
pub struct GlslBackend {
    stage: ShaderStage,
    version: u32,
    comments: bool,
    mix_integers: bool,
    inputs: Vec<InterfaceDecl>,
    outputs: Vec<InterfaceDecl>,
    buffers: Vec<(u32, u32)>,
    samplers: Vec<SamplerDecl>,
    /// Expression text and type of every value id
    exprs: Vec<(String, ValueType)>,
    temps: u32,
    body: String,
    indent: usize,
    loop_depth: usize,
}

fn type_name(ty: ValueType) -> String {
    let (scalar, prefix) = match ty.kind {
        ScalarKind::Float => ("float", ""),
        ScalarKind::Int => ("int", "i"),
        ScalarKind::Uint => ("uint", "u"),
        ScalarKind::Bool => ("bool", "b"),
    };
    if ty.is_scalar() {
        scalar.to_string()
    } else {
        format!("{}vec{}", prefix, ty.components)
    }
}

/// Literal that reproduces `value` bit for bit
pub fn float_literal(value: f32) -> String {
    if !value.is_finite() {
        return format!("uintBitsToFloat(0x{:08x}u)", value.to_bits());
    }
    let text = format!("{:?}", value);
    if text.starts_with('-') {
        format!("({})", text)
    } else {
        text
    }
}

pub fn int_literal(value: i32) -> String {
    match value {
        i32::MIN => "(-2147483647 - 1)".to_string(),
        v if v < 0 => format!("({})", v),
        v => v.to_string(),
    }
}

fn builtin_name(builtin: Builtin) -> &'static str {
    match builtin {
        Builtin::Position => "gl_Position",
        Builtin::VertexIndex => "gl_VertexID",
        Builtin::InstanceIndex => "gl_InstanceID",
        Builtin::FragCoord => "gl_FragCoord",
    }
}

impl GlslBackend {
    pub fn new(interface: &ShaderInterface, features: &FeatureFlags, output: &OutputConfig) -> Self {
        Self {
            stage: interface.stage,
            version: output.glsl_version,
            comments: output.emit_debug_names,
            mix_integers: features.support_glsl_mixing_integers,
            inputs: interface.inputs.clone(),
            outputs: interface.outputs.clone(),
            buffers: interface
                .buffers
                .iter()
                .map(|b| (b.binding, b.vec4_count()))
                .collect(),
            samplers: interface.samplers.clone(),
            exprs: Vec::new(),
            temps: 0,
            body: String::new(),
            indent: 1,
            loop_depth: 0,
        }
    }

    fn line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.body.push_str("    ");
        }
        self.body.push_str(text);
        self.body.push('\n');
    }

    fn expr(&self, value: Value) -> &str {
        self.exprs
            .get(value.id as usize)
            .map(|(text, _)| text.as_str())
            .unwrap_or("0.0")
    }

    fn literal(&mut self, text: String, ty: ValueType) -> Value {
        let id = self.exprs.len() as u32;
        self.exprs.push((text, ty));
        Value { id, ty }
    }

    /// Bind `text` to a fresh temporary
    fn temp(&mut self, text: String, ty: ValueType) -> Value {
        let name = format!("t{}", self.temps);
        self.temps += 1;
        self.line(&format!("{} {} = {};", type_name(ty), name, text));
        self.literal(name, ty)
    }

    fn slot_expr(&self, slot: Slot) -> String {
        match slot {
            Slot::Fixed(index) => index.to_string(),
            Slot::Dynamic(value) => match value.kind() {
                ScalarKind::Int => self.expr(value).to_string(),
                ScalarKind::Float => format!("floatBitsToInt({})", self.expr(value)),
                _ => format!("int({})", self.expr(value)),
            },
        }
    }

    fn interface_name(decl: &InterfaceDecl) -> &str {
        match decl.builtin {
            Some(builtin) => builtin_name(builtin),
            None => &decl.name,
        }
    }

    fn component_ref(decl: &InterfaceDecl, component: u32) -> String {
        let name = Self::interface_name(decl);
        if decl.components == 1 {
            name.to_string()
        } else {
            format!("{}[{}]", name, component.min(decl.components as u32 - 1))
        }
    }

    fn sampler_type(sampler: &SamplerDecl) -> &'static str {
        if sampler.cube {
            "samplerCube"
        } else {
            "sampler2D"
        }
    }

    fn declarations(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "#version {}", self.version);
        out.push('\n');

        for (qualifier, decls) in [("in", &self.inputs), ("out", &self.outputs)] {
            for decl in decls.iter().filter(|d| d.builtin.is_none()) {
                let location = decl.location.unwrap_or(0);
                let _ = writeln!(
                    out,
                    "layout(location = {}) {} {} {};",
                    location,
                    qualifier,
                    type_name(decl.value_type()),
                    decl.name
                );
            }
        }
        for (binding, count) in &self.buffers {
            let _ = writeln!(
                out,
                "layout(std140, binding = {b}) uniform buffer{b}_block {{\n    vec4 data[{n}];\n}} buffer{b};",
                b = binding,
                n = count
            );
        }
        for sampler in &self.samplers {
            let _ = writeln!(
                out,
                "layout(binding = {}) uniform {} {};",
                sampler.index,
                Self::sampler_type(sampler),
                sampler.name
            );
        }
        out.push('\n');
        for file in RegisterFile::ALL {
            let _ = writeln!(out, "float {}[{}];", file.name(), file.size());
        }
        let _ = writeln!(out, "bool p[{}];", PREDICATE_COUNT);
        out
    }

    fn register_init(&self) -> String {
        let mut out = String::new();
        for file in RegisterFile::ALL {
            let _ = writeln!(
                out,
                "    for (int k = 0; k < {}; ++k) {}[k] = 0.0;",
                file.size(),
                file.name()
            );
        }
        let _ = writeln!(
            out,
            "    for (int k = 0; k < {}; ++k) p[k] = false;",
            PREDICATE_COUNT
        );
        out
    }
}

impl ShaderBackend for GlslBackend {
    fn stage(&self) -> ShaderStage {
        self.stage
    }

    fn constant_f32(&mut self, value: f32) -> Value {
        self.literal(float_literal(value), ValueType::FLOAT)
    }

    fn constant_i32(&mut self, value: i32) -> Value {
        self.literal(int_literal(value), ValueType::INT)
    }

    fn constant_u32(&mut self, value: u32) -> Value {
        self.literal(format!("{}u", value), ValueType::UINT)
    }

    fn constant_bool(&mut self, value: bool) -> Value {
        self.literal(value.to_string(), ValueType::BOOL)
    }

    fn unary(&mut self, op: UnaryOp, value: Value) -> Value {
        let a = self.expr(value).to_string();
        let ty = value.ty;
        let text = match (op, ty.kind) {
            (UnaryOp::Negate, ScalarKind::Bool) | (UnaryOp::Not, ScalarKind::Bool) => {
                if ty.is_scalar() {
                    format!("!{}", a)
                } else {
                    format!("not({})", a)
                }
            }
            (UnaryOp::Negate, _) => format!("-{}", a),
            (UnaryOp::Abs, ScalarKind::Uint) => return value,
            (UnaryOp::Abs, _) => format!("abs({})", a),
            (UnaryOp::Not, ScalarKind::Float) => {
                format!("uintBitsToFloat(~floatBitsToUint({}))", a)
            }
            (UnaryOp::Not, _) => format!("~{}", a),
            (UnaryOp::Floor, _) => format!("floor({})", a),
            (UnaryOp::Fract, _) => format!("fract({})", a),
            (UnaryOp::InverseSqrt, _) => format!("inversesqrt({})", a),
            (UnaryOp::Exp2, _) => format!("exp2({})", a),
            (UnaryOp::Log2, _) => format!("log2({})", a),
            (UnaryOp::DerivX, _) => format!("dFdx({})", a),
            (UnaryOp::DerivY, _) => format!("dFdy({})", a),
        };
        self.temp(text, ty)
    }

    fn binary(&mut self, op: BinaryOp, lhs: Value, rhs: Value) -> Value {
        let a = self.expr(lhs).to_string();
        let b = self.expr(rhs).to_string();
        let ty = lhs.ty;
        let logical = ty.kind == ScalarKind::Bool;
        let text = match op {
            BinaryOp::Add => format!("{} + {}", a, b),
            BinaryOp::Sub => format!("{} - {}", a, b),
            BinaryOp::Mul => format!("{} * {}", a, b),
            BinaryOp::Div => format!("{} / {}", a, b),
            BinaryOp::Min => format!("min({}, {})", a, b),
            BinaryOp::Max => format!("max({}, {})", a, b),
            BinaryOp::And if logical => format!("{} && {}", a, b),
            BinaryOp::And => format!("{} & {}", a, b),
            BinaryOp::Or if logical => format!("{} || {}", a, b),
            BinaryOp::Or => format!("{} | {}", a, b),
            BinaryOp::Xor if logical => format!("{} != {}", a, b),
            BinaryOp::Xor => format!("{} ^ {}", a, b),
            BinaryOp::Shl => format!("{} << {}", a, b),
            BinaryOp::Shr if ty.kind == ScalarKind::Int => {
                format!("int(uint({}) >> {})", a, b)
            }
            BinaryOp::Shr => format!("{} >> {}", a, b),
            BinaryOp::Sar if ty.kind == ScalarKind::Uint => {
                format!("uint(int({}) >> {})", a, b)
            }
            BinaryOp::Sar => format!("{} >> {}", a, b),
            BinaryOp::Dot => return self.temp(format!("dot({}, {})", a, b), ValueType::FLOAT),
        };
        self.temp(text, ty)
    }

    fn compare(&mut self, op: CompareOp, lhs: Value, rhs: Value) -> Value {
        let a = self.expr(lhs).to_string();
        let b = self.expr(rhs).to_string();
        let ty = ValueType::vector(ScalarKind::Bool, lhs.ty.components);
        let text = if lhs.ty.is_scalar() {
            let symbol = match op {
                CompareOp::Equal => "==",
                CompareOp::NotEqual => "!=",
                CompareOp::Less => "<",
                CompareOp::LessEqual => "<=",
                CompareOp::Greater => ">",
                CompareOp::GreaterEqual => ">=",
            };
            format!("{} {} {}", a, symbol, b)
        } else {
            let function = match op {
                CompareOp::Equal => "equal",
                CompareOp::NotEqual => "notEqual",
                CompareOp::Less => "lessThan",
                CompareOp::LessEqual => "lessThanEqual",
                CompareOp::Greater => "greaterThan",
                CompareOp::GreaterEqual => "greaterThanEqual",
            };
            format!("{}({}, {})", function, a, b)
        };
        self.temp(text, ty)
    }

    fn select(&mut self, cond: Value, if_true: Value, if_false: Value) -> Value {
        let c = self.expr(cond).to_string();
        let t = self.expr(if_true).to_string();
        let f = self.expr(if_false).to_string();
        let ty = if_true.ty;
        if cond.ty.is_scalar() {
            return self.temp(format!("{} ? {} : {}", c, t, f), ty);
        }
        if ty.kind == ScalarKind::Float || self.mix_integers {
            return self.temp(format!("mix({}, {}, {})", f, t, c), ty);
        }
        let parts: Vec<String> = (0..ty.components)
            .map(|i| format!("{c}[{i}] ? {t}[{i}] : {f}[{i}]"))
            .collect();
        self.temp(format!("{}({})", type_name(ty), parts.join(", ")), ty)
    }

    fn convert(&mut self, value: Value, kind: ScalarKind) -> Value {
        if value.kind() == kind {
            return value;
        }
        let ty = ValueType::vector(kind, value.ty.components);
        let text = format!("{}({})", type_name(ty), self.expr(value));
        self.temp(text, ty)
    }

    fn bitcast(&mut self, value: Value, kind: ScalarKind) -> Value {
        let from = value.kind();
        if from == kind {
            return value;
        }
        let function = match (from, kind) {
            (ScalarKind::Float, ScalarKind::Uint) => "floatBitsToUint",
            (ScalarKind::Float, ScalarKind::Int) => "floatBitsToInt",
            (ScalarKind::Uint, ScalarKind::Float) => "uintBitsToFloat",
            (ScalarKind::Int, ScalarKind::Float) => "intBitsToFloat",
            _ => return self.convert(value, kind),
        };
        let ty = ValueType::vector(kind, value.ty.components);
        let text = format!("{}({})", function, self.expr(value));
        self.temp(text, ty)
    }

    fn pack(&mut self, op: PackOp, value: Value) -> Value {
        let function = match op {
            PackOp::Half2x16 => "packHalf2x16",
            PackOp::Unorm4x8 => "packUnorm4x8",
        };
        let text = format!("{}({})", function, self.expr(value));
        self.temp(text, ValueType::UINT)
    }

    fn unpack(&mut self, op: PackOp, value: Value) -> Value {
        let function = match op {
            PackOp::Half2x16 => "unpackHalf2x16",
            PackOp::Unorm4x8 => "unpackUnorm4x8",
        };
        let ty = ValueType::vector(ScalarKind::Float, op.components());
        let text = format!("{}({})", function, self.expr(value));
        self.temp(text, ty)
    }

    fn construct(&mut self, components: &[Value]) -> Value {
        match components {
            [] => self.constant_f32(0.0),
            [single] => *single,
            [first, ..] => {
                let ty = ValueType::vector(first.kind(), components.len() as u8);
                let parts: Vec<&str> = components.iter().map(|c| self.expr(*c)).collect();
                let text = format!("{}({})", type_name(ty), parts.join(", "));
                self.temp(text, ty)
            }
        }
    }

    fn extract(&mut self, value: Value, index: u32) -> Value {
        if value.ty.is_scalar() {
            return value;
        }
        let text = format!("{}[{}]", self.expr(value), index);
        self.literal(text, value.ty.element())
    }

    fn load_register(&mut self, file: RegisterFile, slot: Slot) -> Value {
        let text = format!("{}[{}]", file.name(), self.slot_expr(slot));
        self.temp(text, ValueType::FLOAT)
    }

    fn store_register(&mut self, file: RegisterFile, slot: Slot, value: Value) {
        let value = self.bitcast(value, ScalarKind::Float);
        let text = format!("{}[{}] = {};", file.name(), self.slot_expr(slot), self.expr(value));
        self.line(&text);
    }

    fn load_predicate(&mut self, index: u32) -> Value {
        let text = format!("p[{}]", index.min(PREDICATE_COUNT - 1));
        self.temp(text, ValueType::BOOL)
    }

    fn store_predicate(&mut self, index: u32, value: Value) {
        let value = self.convert(value, ScalarKind::Bool);
        let text = format!("p[{}] = {};", index.min(PREDICATE_COUNT - 1), self.expr(value));
        self.line(&text);
    }

    fn load_input(&mut self, input: usize, component: u32) -> Value {
        let Some(decl) = self.inputs.get(input) else {
            return self.constant_f32(0.0);
        };
        let text = Self::component_ref(decl, component);
        let ty = decl.value_type().element();
        self.literal(text, ty)
    }

    fn store_output(&mut self, output: usize, component: u32, value: Value) {
        let Some(decl) = self.outputs.get(output) else {
            return;
        };
        let target = Self::component_ref(decl, component);
        let kind = decl.kind;
        let value = self.bitcast(value, kind);
        let text = format!("{} = {};", target, self.expr(value));
        self.line(&text);
    }

    fn buffer_load(&mut self, binding: u32, slot: Slot) -> Value {
        if !self.buffers.iter().any(|(b, _)| *b == binding) {
            return self.constant_f32(0.0);
        }
        let text = match slot {
            Slot::Fixed(offset) => format!("buffer{}.data[{}][{}]", binding, offset / 4, offset % 4),
            Slot::Dynamic(_) => {
                let index = self.slot_expr(slot);
                format!("buffer{}.data[({i}) >> 2][({i}) & 3]", binding, i = index)
            }
        };
        self.temp(text, ValueType::FLOAT)
    }

    fn sample(&mut self, sampler: u32, coord: Value, lod: Option<Value>, projective: bool) -> Value {
        let vec4 = ValueType::vector(ScalarKind::Float, 4);
        let Some(name) = self
            .samplers
            .iter()
            .find(|s| s.index == sampler)
            .map(|s| s.name.clone())
        else {
            return self.temp("vec4(0.0)".to_string(), vec4);
        };
        let coord = self.expr(coord).to_string();
        let lod = match lod {
            Some(lod) => Some(self.expr(lod).to_string()),
            None if !self.stage.is_fragment() => Some("0.0".to_string()),
            None => None,
        };
        let text = match (lod, projective) {
            (Some(lod), false) => format!("textureLod({}, {}, {})", name, coord, lod),
            (Some(lod), true) => format!("textureProjLod({}, {}, {})", name, coord, lod),
            (None, false) => format!("texture({}, {})", name, coord),
            (None, true) => format!("textureProj({}, {})", name, coord),
        };
        self.temp(text, vec4)
    }

    fn discard(&mut self) {
        self.line("discard;");
    }

    fn begin_if(&mut self, cond: Value) {
        let cond = self.convert(cond, ScalarKind::Bool);
        let text = format!("if ({}) {{", self.expr(cond));
        self.line(&text);
        self.indent += 1;
    }

    fn begin_else(&mut self) {
        self.indent = self.indent.saturating_sub(1).max(1);
        self.line("} else {");
        self.indent += 1;
    }

    fn end_if(&mut self) {
        self.indent = self.indent.saturating_sub(1).max(1);
        self.line("}");
    }

    fn begin_loop(&mut self) {
        self.line("while (true) {");
        self.indent += 1;
        self.loop_depth += 1;
    }

    fn end_loop(&mut self) {
        self.indent = self.indent.saturating_sub(1).max(1);
        self.loop_depth = self.loop_depth.saturating_sub(1);
        self.line("}");
    }

    fn emit_break(&mut self) {
        if self.loop_depth > 0 {
            self.line("break;");
        } else {
            self.line("return;");
        }
    }

    fn emit_continue(&mut self) {
        if self.loop_depth > 0 {
            self.line("continue;");
        } else {
            self.line("return;");
        }
    }

    fn comment(&mut self, text: &str) {
        if self.comments {
            self.line(&format!("// {}", text));
        }
    }

    fn finish(mut self) -> ShaderCode {
        while self.indent > 1 {
            self.indent -= 1;
            self.line("}");
        }
        let mut source = self.declarations();
        source.push_str("\nvoid main() {\n");
        source.push_str(&self.register_init());
        source.push_str(&self.body);
        source.push_str("}\n");
        ShaderCode::Glsl(source)
    }
}
