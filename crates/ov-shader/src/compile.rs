//! Whole-program compilation
//!
//! Ties the pieces together: parse the container, extract the program
//! input, build the block trees of both instruction streams and drive the
//! selected backend through the prologue, the secondary program, the
//! primary program and the epilogue.

use crate::analyzer::{build_control_flow, BlockTree};
use crate::backend::{GlslBackend, ShaderBackend, ShaderCode, ShaderStage, SpirVModule, SpirvBackend};
use crate::gxp::GxpProgram;
use crate::program_input::ProgramInput;
use crate::translate::interface::StageLayout;
use crate::translate::Translator;
use crate::varyings::{fragment_interface, fragment_output, vertex_outputs, FragmentInterface, FragmentOutput, VertexOutput};
use ov_core::{Backend, Diagnostic, Diagnostics, FeatureFlags, GxpError, OutputConfig, RecompilerConfig};
use tracing::{info, warn};

/// What `emit` needs from the container besides the block tree and inputs
#[derive(Debug, Clone)]
pub struct ProgramContext {
    pub stage: ShaderStage,
    pub primary: Vec<u64>,
    /// Runs once per draw before the primary program, filling SA registers
    pub secondary: Vec<u64>,
    pub vertex_outputs: Vec<VertexOutput>,
    pub fragment: FragmentInterface,
    pub fragment_output: FragmentOutput,
}

impl ProgramContext {
    pub fn from_gxp(program: &GxpProgram) -> Self {
        Self {
            stage: if program.is_fragment() {
                ShaderStage::FRAGMENT
            } else {
                ShaderStage::VERTEX
            },
            primary: program.primary_program.clone(),
            secondary: program.secondary_program.clone(),
            vertex_outputs: vertex_outputs(program),
            fragment: fragment_interface(program),
            fragment_output: fragment_output(program),
        }
    }
}

/// Result of a compile
#[derive(Debug, Clone)]
pub struct CompiledOutput {
    pub code: ShaderCode,
    pub input: ProgramInput,
    pub stage: ShaderStage,
    pub diagnostics: Vec<Diagnostic>,
    /// Some construct was emitted through a fallback and may not match the hardware
    pub degraded: bool,
}

impl CompiledOutput {
    /// An empty, degraded output carrying one error
    fn failed(backend: Backend, message: String) -> Self {
        let stage = ShaderStage::VERTEX;
        let code = match backend {
            Backend::SpirV => ShaderCode::SpirV(SpirVModule::new(stage)),
            Backend::Glsl => ShaderCode::Glsl(String::new()),
        };
        Self {
            code,
            input: ProgramInput::default(),
            stage,
            diagnostics: vec![Diagnostic::error(None, message)],
            degraded: true,
        }
    }
}

/// Translate a program already split into its parts
pub fn emit(context: &ProgramContext, tree: &BlockTree, input: &ProgramInput, backend: Backend, features: &FeatureFlags) -> CompiledOutput {
    emit_with_output(context, tree, input, backend, features, &OutputConfig::default())
}

fn emit_with_output(
    context: &ProgramContext,
    tree: &BlockTree,
    input: &ProgramInput,
    backend: Backend,
    features: &FeatureFlags,
    output: &OutputConfig,
) -> CompiledOutput {
    let layout = StageLayout::new(
        context.stage,
        input,
        &context.vertex_outputs,
        &context.fragment,
        context.fragment_output,
    );
    let (code, diagnostics) = match backend {
        Backend::SpirV => run(SpirvBackend::new(&layout.interface, features, output), context, tree, input, &layout),
        Backend::Glsl => run(GlslBackend::new(&layout.interface, features, output), context, tree, input, &layout),
    };
    let (diagnostics, degraded) = diagnostics.into_parts();
    CompiledOutput {
        code,
        input: input.clone(),
        stage: context.stage,
        diagnostics,
        degraded,
    }
}

fn run<B: ShaderBackend>(
    backend: B,
    context: &ProgramContext,
    tree: &BlockTree,
    input: &ProgramInput,
    layout: &StageLayout,
) -> (ShaderCode, Diagnostics) {
    let mut translator = Translator::new(backend, input);
    translator.emit_prologue(layout);

    if !context.secondary.is_empty() {
        let mut secondary = build_control_flow(&context.secondary, context.secondary.len());
        translator.diagnostics_mut().extend(secondary.take_diagnostics());
        translator.translate_program(&context.secondary, &secondary, true);
    }

    translator.diagnostics_mut().extend(tree.diagnostics().clone());
    translator.translate_program(&context.primary, tree, false);
    translator.emit_epilogue(layout);

    let (backend, diagnostics) = translator.finish();
    (backend.finish(), diagnostics)
}

/// Compile a GXP blob
///
/// Never fails: a blob that cannot be parsed yields an empty, degraded
/// output with an error diagnostic.
pub fn compile(binary: &[u8], features: &FeatureFlags) -> CompiledOutput {
    compile_with_config(
        binary,
        &RecompilerConfig {
            features: *features,
            output: OutputConfig::default(),
        },
    )
}

pub fn compile_with_config(binary: &[u8], config: &RecompilerConfig) -> CompiledOutput {
    try_compile_with_config(binary, config).unwrap_or_else(|e| {
        warn!("Cannot compile shader: {}", e);
        CompiledOutput::failed(config.features.backend, e.to_string())
    })
}

/// Compile a GXP blob, reporting container errors
pub fn try_compile(binary: &[u8], features: &FeatureFlags) -> Result<CompiledOutput, GxpError> {
    try_compile_with_config(
        binary,
        &RecompilerConfig {
            features: *features,
            output: OutputConfig::default(),
        },
    )
}

fn try_compile_with_config(binary: &[u8], config: &RecompilerConfig) -> Result<CompiledOutput, GxpError> {
    let program = GxpProgram::parse(binary)?;
    let context = ProgramContext::from_gxp(&program);
    info!(
        "Compiling {} program: {} primary, {} secondary instructions",
        if context.stage.is_fragment() { "fragment" } else { "vertex" },
        context.primary.len(),
        context.secondary.len()
    );

    let (input, diagnostics) = ProgramInput::extract(&program);

    let tree = build_control_flow(&context.primary, context.primary.len());
    let mut output = emit_with_output(
        &context,
        &tree,
        &input,
        config.features.backend,
        &config.features,
        &config.output,
    );

    let (mut extracted, degraded) = diagnostics.into_parts();
    extracted.append(&mut output.diagnostics);
    output.diagnostics = extracted;
    output.degraded |= degraded;

    info!(
        "Compiled {} inputs, {} buffers, {} samplers ({} diagnostics{})",
        output.input.inputs.len(),
        output.input.uniform_buffers.len(),
        output.input.samplers.len(),
        output.diagnostics.len(),
        if output.degraded { ", degraded" } else { "" }
    );
    Ok(output)
}
