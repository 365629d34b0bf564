//! Test-only GXP blob builder and instruction encoders

#![allow(dead_code)]

use ov_shader::gxp::{field, GXP_MAGIC, HEADER_SIZE};

pub const VMOV: &str = "00111pppstrydecbmmaanoooiwwwwkllffgghhhhjjjjjjqqqqqquuuuuuvvvvvv";
pub const VMAD: &str = "00011pppsg1oderiiattnwwwwcbfhzkkjjllmmmmmmqqqquuuuvvxyAAAABBBBBB";
pub const BR: &str = "11111ppps000e-----wynba00r----------------iloooooooooooooooooooo";
pub const SMP: &str = "11100pppsn-ymrceffaaddlltbbggkhhiijjoooooooqqqqqqquuuuuuuvvvvvvv";

/// Place `value` into the bits named by `letter` of a family pattern
pub fn encode(pattern: &str, values: &[(char, u64)]) -> u64 {
    let chars: Vec<char> = pattern.chars().collect();
    let mut word = 0u64;
    for (i, ch) in chars.iter().enumerate() {
        if *ch == '1' {
            word |= 1 << (63 - i);
        }
    }
    for &(letter, value) in values {
        let positions: Vec<usize> = chars
            .iter()
            .enumerate()
            .filter(|(_, c)| **c == letter)
            .map(|(i, _)| 63 - i)
            .collect();
        let len = positions.len();
        for (n, bit) in positions.iter().enumerate() {
            if (value >> (len - 1 - n)) & 1 != 0 {
                word |= 1 << bit;
            }
        }
    }
    word
}

/// `vmov.f32 o<dest>, pa<src>.xyzw`, copying four floats in two iterations
pub fn mov_pa_to_o(dest: u64, src: u64) -> u64 {
    encode(
        VMOV,
        &[
            ('o', 5),
            ('l', 1),
            ('j', dest / 2),
            ('f', 2),
            ('u', src / 2),
            ('w', 4),
            ('h', 0b1111),
            ('a', 1),
        ],
    )
}

/// Unconditional or predicated relative branch
pub fn branch(pred: u64, offset: i32) -> u64 {
    encode(BR, &[('p', pred), ('o', (offset as u32 & 0xF_FFFF) as u64)])
}

pub const CATEGORY_ATTRIBUTE: u8 = 0;
pub const CATEGORY_UNIFORM: u8 = 1;
pub const CATEGORY_SAMPLER: u8 = 2;
pub const CATEGORY_AUXILIARY_SURFACE: u8 = 3;

#[derive(Debug, Clone)]
struct ParameterSpec {
    name: String,
    category: u8,
    param_type: u8,
    components: u8,
    container: u8,
    semantic: u16,
    array_size: u32,
    resource_index: i32,
}

/// Lays a program out the way the GXP parser expects it
#[derive(Debug, Clone, Default)]
pub struct GxpBuilder {
    fragment: bool,
    native_color: bool,
    parameters: Vec<ParameterSpec>,
    containers: Vec<[u16; 3]>,
    literals: Vec<(u32, f32)>,
    output_param_type: u8,
    vertex_outputs: [u32; 2],
    descriptors: Vec<[u32; 4]>,
    primary: Vec<u64>,
    secondary: Vec<u64>,
}

fn put_u16(data: &mut [u8], at: usize, value: u16) {
    data[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(data: &mut [u8], at: usize, value: u32) {
    data[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

/// Store the offset of `target` relative to `field` at `field`
fn put_relative(data: &mut [u8], field: usize, target: usize) {
    put_u32(data, field, (target - field) as u32);
}

impl GxpBuilder {
    pub fn vertex() -> Self {
        Self::default()
    }

    pub fn fragment() -> Self {
        Self {
            fragment: true,
            ..Self::default()
        }
    }

    pub fn native_color(mut self) -> Self {
        self.native_color = true;
        self
    }

    fn parameter(mut self, spec: ParameterSpec) -> Self {
        self.parameters.push(spec);
        self
    }

    /// F32 vertex attribute
    pub fn attribute(self, name: &str, components: u8, resource_index: i32) -> Self {
        self.parameter(ParameterSpec {
            name: name.to_string(),
            category: CATEGORY_ATTRIBUTE,
            param_type: 0,
            components,
            container: 0,
            semantic: 0,
            array_size: 1,
            resource_index,
        })
    }

    /// F32 uniform in a register container
    pub fn uniform(self, name: &str, components: u8, array_size: u32, container: u8, resource_index: i32) -> Self {
        self.parameter(ParameterSpec {
            name: name.to_string(),
            category: CATEGORY_UNIFORM,
            param_type: 0,
            components,
            container,
            semantic: 0,
            array_size,
            resource_index,
        })
    }

    pub fn sampler(self, name: &str, resource_index: i32) -> Self {
        self.parameter(ParameterSpec {
            name: name.to_string(),
            category: CATEGORY_SAMPLER,
            param_type: 0,
            components: 0,
            container: 0,
            semantic: 0,
            array_size: 1,
            resource_index,
        })
    }

    pub fn auxiliary_surface(self, name: &str) -> Self {
        self.parameter(ParameterSpec {
            name: name.to_string(),
            category: CATEGORY_AUXILIARY_SURFACE,
            param_type: 0,
            components: 0,
            container: 0,
            semantic: 0,
            array_size: 1,
            resource_index: 0,
        })
    }

    pub fn container(mut self, index: u16, base_sa_offset: u16, block_size: u16) -> Self {
        self.containers.push([index, base_sa_offset, block_size]);
        self
    }

    pub fn literal(mut self, sa_offset: u32, value: f32) -> Self {
        self.literals.push((sa_offset, value));
        self
    }

    /// Vertex output masks of the varyings block
    pub fn vertex_outputs(mut self, outputs1: u32, outputs2: u32) -> Self {
        self.vertex_outputs = [outputs1, outputs2];
        self
    }

    pub fn output_param_type(mut self, param_type: u8) -> Self {
        self.output_param_type = param_type;
        self
    }

    /// Fragment iterator descriptor
    pub fn descriptor(mut self, attribute_info: u32, resource_index: u32, size: u32, component_info: u32) -> Self {
        self.descriptors.push([attribute_info, resource_index, size, component_info]);
        self
    }

    pub fn primary(mut self, words: &[u64]) -> Self {
        self.primary = words.to_vec();
        self
    }

    pub fn secondary(mut self, words: &[u64]) -> Self {
        self.secondary = words.to_vec();
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut data = vec![0u8; HEADER_SIZE];
        data[..4].copy_from_slice(&GXP_MAGIC);
        data[field::MAJOR_VERSION] = 1;
        data[field::MINOR_VERSION] = 4;
        data[field::TYPE] = u8::from(self.fragment) | (u8::from(self.native_color) << 6);

        // Parameters, with names patched in once the string pool is placed
        let parameters_at = data.len();
        data.resize(parameters_at + self.parameters.len() * 16, 0);
        put_u32(&mut data, field::PARAMETER_COUNT, self.parameters.len() as u32);
        if !self.parameters.is_empty() {
            put_relative(&mut data, field::PARAMETERS_OFFSET, parameters_at);
        }

        let containers_at = data.len();
        for [index, base, size] in &self.containers {
            data.extend_from_slice(&index.to_le_bytes());
            data.extend_from_slice(&[0, 0]);
            data.extend_from_slice(&base.to_le_bytes());
            data.extend_from_slice(&size.to_le_bytes());
        }
        put_u32(&mut data, field::CONTAINER_COUNT, self.containers.len() as u32);
        if !self.containers.is_empty() {
            put_relative(&mut data, field::CONTAINER_OFFSET, containers_at);
        }

        let literals_at = data.len();
        for (offset, value) in &self.literals {
            data.extend_from_slice(&offset.to_le_bytes());
            data.extend_from_slice(&value.to_bits().to_le_bytes());
        }
        put_u32(&mut data, field::LITERALS_COUNT, self.literals.len() as u32);
        if !self.literals.is_empty() {
            put_relative(&mut data, field::LITERALS_OFFSET, literals_at);
        }

        let varyings_at = data.len();
        data.resize(varyings_at + 24, 0);
        put_relative(&mut data, field::VARYINGS_OFFSET, varyings_at);
        data[varyings_at + 10] = self.output_param_type;
        data[varyings_at + 11] = 4;
        put_u16(&mut data, varyings_at + 12, self.descriptors.len() as u16);
        if self.fragment {
            let descriptors_at = data.len();
            for descriptor in &self.descriptors {
                for word in descriptor {
                    data.extend_from_slice(&word.to_le_bytes());
                }
            }
            if !self.descriptors.is_empty() {
                put_relative(&mut data, varyings_at + 16, descriptors_at);
            }
        } else {
            put_u32(&mut data, varyings_at + 16, self.vertex_outputs[0]);
            put_u32(&mut data, varyings_at + 20, self.vertex_outputs[1]);
        }

        let primary_at = data.len();
        for word in &self.primary {
            data.extend_from_slice(&word.to_le_bytes());
        }
        put_u32(&mut data, field::PRIMARY_INSTR_COUNT, self.primary.len() as u32);
        put_relative(&mut data, field::PRIMARY_PROGRAM_OFFSET, primary_at);

        let secondary_at = data.len();
        for word in &self.secondary {
            data.extend_from_slice(&word.to_le_bytes());
        }
        let secondary_end = data.len();
        put_relative(&mut data, field::SECONDARY_PROGRAM_OFFSET, secondary_at);
        put_relative(&mut data, field::SECONDARY_PROGRAM_OFFSET_END, secondary_end);

        for (i, spec) in self.parameters.iter().enumerate() {
            let base = parameters_at + i * 16;
            let name_at = data.len();
            data.extend_from_slice(spec.name.as_bytes());
            data.push(0);

            put_u32(&mut data, base, (name_at - base) as u32);
            let bits = (spec.category as u16 & 0xF)
                | ((spec.param_type as u16 & 0xF) << 4)
                | ((spec.components as u16 & 0xF) << 8)
                | ((spec.container as u16 & 0xF) << 12);
            put_u16(&mut data, base + 4, bits);
            put_u16(&mut data, base + 6, spec.semantic);
            put_u32(&mut data, base + 8, spec.array_size);
            put_u32(&mut data, base + 12, spec.resource_index as u32);
        }

        let size = data.len() as u32;
        put_u32(&mut data, field::SIZE, size);
        data
    }
}

/// The smallest useful vertex program: position straight from an attribute
/// with an `mvp` matrix declared in container 14
pub fn mvp_program() -> Vec<u8> {
    GxpBuilder::vertex()
        .attribute("aPosition", 4, 0)
        .uniform("mvp", 4, 4, 14, 0)
        .container(14, 0, 16)
        .primary(&[mov_pa_to_o(0, 0)])
        .build()
}
