//! End-to-end compilation of synthetic GXP programs

mod common;

use common::*;
use ov_core::{Backend, FeatureFlags, Severity};
use ov_shader::program_input::InputSource;
use ov_shader::usse::RegisterBank;
use ov_shader::{compile, extract_program_input, try_compile, ShaderCode, ShaderStage};

const SPIRV_MAGIC: u32 = 0x0723_0203;

fn glsl_flags() -> FeatureFlags {
    FeatureFlags {
        backend: Backend::Glsl,
        ..FeatureFlags::default()
    }
}

fn glsl_source(code: &ShaderCode) -> &str {
    match code {
        ShaderCode::Glsl(text) => text,
        ShaderCode::SpirV(_) => panic!("expected GLSL output"),
    }
}

/// OpName strings are stored inline, so debug names show up in the raw bytes
fn contains_name(bytes: &[u8], name: &str) -> bool {
    bytes.windows(name.len()).any(|w| w == name.as_bytes())
}

#[test]
fn test_mvp_program_inputs() {
    let input = extract_program_input(&mvp_program());

    let attributes: Vec<_> = input
        .inputs
        .iter()
        .filter(|i| matches!(i.source, InputSource::Attribute { .. }))
        .collect();
    assert_eq!(attributes.len(), 1);
    assert_eq!(attributes[0].offset, 0);
    assert_eq!(attributes[0].component_count, 4);
    assert_eq!(attributes[0].bank, RegisterBank::PrimAttr);

    assert_eq!(input.uniform_buffers.len(), 1);
    let buffer = &input.uniform_buffers[0];
    assert_eq!(buffer.container_index, 14);
    assert!(buffer.size >= 16);
}

#[test]
fn test_mvp_program_spirv() {
    let output = compile(&mvp_program(), &FeatureFlags::default());
    assert_eq!(output.stage, ShaderStage::VERTEX);
    assert!(!output.degraded, "unexpected diagnostics: {:?}", output.diagnostics);

    let ShaderCode::SpirV(module) = &output.code else {
        panic!("expected SPIR-V output");
    };
    assert_eq!(module.bytecode[0], SPIRV_MAGIC);
    // Id bound covers every id the module uses
    assert!(module.bytecode[3] > 1);
    assert_eq!(module.as_bytes().len(), module.bytecode.len() * 4);
    assert!(contains_name(module.as_bytes(), "aPosition"));
    assert!(contains_name(module.as_bytes(), "buffer0"));
    assert!(contains_name(module.as_bytes(), "main"));
}

#[test]
fn test_mvp_program_glsl() {
    let output = compile(&mvp_program(), &glsl_flags());
    let source = glsl_source(&output.code);

    assert!(source.starts_with("#version 450"));
    assert!(source.contains("aPosition"));
    assert!(source.contains("buffer0"));
    assert!(source.contains("gl_Position"));
    assert!(source.contains("void main()"));
    assert_eq!(source.matches('{').count(), source.matches('}').count());
}

#[test]
fn test_compile_is_deterministic() {
    let blob = mvp_program();
    for flags in [FeatureFlags::default(), glsl_flags()] {
        let first = compile(&blob, &flags);
        let second = compile(&blob, &flags);
        assert_eq!(first.code.to_bytes(), second.code.to_bytes());
        assert_eq!(first.input, second.input);
    }
}

#[test]
fn test_branchy_program_compiles() {
    // 0 mov, 1 br p0 +2 -> 3, 2 mov, 3 mov, 4 br -4 -> 0
    let code = [
        mov_pa_to_o(0, 0),
        branch(1, 2),
        mov_pa_to_o(0, 4),
        mov_pa_to_o(0, 0),
        branch(0, -4),
    ];
    let blob = GxpBuilder::vertex()
        .attribute("aPosition", 4, 0)
        .attribute("aOther", 4, 4)
        .primary(&code)
        .build();

    for flags in [FeatureFlags::default(), glsl_flags()] {
        let output = compile(&blob, &flags);
        assert!(!output.code.is_empty());
        assert!(output.diagnostics.iter().all(|d| d.severity != Severity::Error));
    }
    let output = compile(&blob, &glsl_flags());
    let source = glsl_source(&output.code);
    assert!(source.contains("if ("));
    assert!(source.contains("while (true)") || source.contains("for (;;)"));
}

#[test]
fn test_illegal_instruction_degrades() {
    // VMOV with the reserved move type
    let illegal = encode(VMOV, &[('m', 3)]);
    let blob = GxpBuilder::vertex()
        .attribute("aPosition", 4, 0)
        .primary(&[illegal, mov_pa_to_o(0, 0)])
        .build();
    let output = compile(&blob, &FeatureFlags::default());
    assert!(output.degraded);
    assert!(output.diagnostics.iter().any(|d| d.offset == Some(0)));
    assert!(!output.code.is_empty());
}

#[test]
fn test_literals_and_secondary_program() {
    let blob = GxpBuilder::vertex()
        .attribute("aPosition", 4, 0)
        .container(16, 32, 0)
        .literal(0, 0.5)
        .secondary(&[mov_pa_to_o(0, 0)])
        .primary(&[mov_pa_to_o(0, 0)])
        .build();
    let output = compile(&blob, &glsl_flags());
    let literal = output
        .input
        .inputs
        .iter()
        .find(|i| matches!(i.source, InputSource::Literal { .. }))
        .unwrap();
    assert_eq!(literal.offset, 32);
    assert!(glsl_source(&output.code).contains("sa[32]"));
}

#[test]
fn test_fragment_program_reads_varying() {
    // Colour iterator, four components, one PA register
    let blob = GxpBuilder::fragment()
        .descriptor(0xA000 | (3 << 22) | 0xF, 0, 0, 0)
        .primary(&[])
        .build();
    let output = compile(&blob, &glsl_flags());
    assert_eq!(output.stage, ShaderStage::FRAGMENT);
    let source = glsl_source(&output.code);
    assert!(source.contains("v_Color0"));
    assert!(source.contains("out_color"));
}

#[test]
fn test_bad_container_is_reported() {
    let mut blob = mvp_program();
    blob[0] = b'X';
    assert!(try_compile(&blob, &FeatureFlags::default()).is_err());

    let output = compile(&blob, &FeatureFlags::default());
    assert!(output.degraded);
    assert_eq!(output.diagnostics[0].severity, Severity::Error);
    assert!(output.input.inputs.is_empty());
}

#[test]
fn test_skipped_parameters_reach_the_output() {
    let blob = GxpBuilder::vertex()
        .attribute("aPosition", 4, 0)
        .auxiliary_surface("aux0")
        .primary(&[mov_pa_to_o(0, 0)])
        .build();
    let output = compile(&blob, &FeatureFlags::default());
    assert!(output
        .diagnostics
        .iter()
        .any(|d| d.severity == Severity::Warning && d.message.contains("aux0")));
    assert_eq!(extract_program_input(&blob), output.input);
}
