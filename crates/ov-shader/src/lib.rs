//! PS Vita GXP shader recompiler
//!
//! This crate decodes USSE instruction streams, recovers their structured
//! control flow and re-emits them as SPIR-V or GLSL:
//! - [`usse`]: instruction decoder, operand model and repeat stepping
//! - [`analyzer`]: branch analysis into a block tree
//! - [`backend`]: the [`ShaderBackend`] trait and its SPIR-V and GLSL emitters
//! - [`program_input`]: attribute, uniform and sampler bindings
//! - [`compile`]: the end-to-end entry points

pub mod analyzer;
pub mod backend;
pub mod compile;
pub mod gxp;
pub mod program_input;
pub mod translate;
pub mod usse;
pub mod varyings;

pub use analyzer::{build_control_flow, BlockTree, Node, NodeId};
pub use backend::{ShaderBackend, ShaderCode, ShaderStage, SpirVModule};
pub use compile::{compile, compile_with_config, emit, try_compile, CompiledOutput, ProgramContext};
pub use program_input::{extract_program_input, extract_program_input_checked, ProgramInput};
pub use usse::decode;
