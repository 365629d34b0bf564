//! Oxidized-Vita - GXP shader recompiler
//!
//! Command line driver: reads a GXP container and writes SPIR-V or GLSL.

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use ov_core::{Backend, RecompilerConfig, Severity};
use ov_shader::{compile_with_config, extract_program_input, ShaderCode};

#[derive(Parser, Debug)]
#[command(name = "oxidized-vita", about = "Recompile PS Vita GXP shaders to SPIR-V or GLSL")]
struct Args {
    /// Input GXP program
    input: PathBuf,

    /// Emit GLSL source
    #[arg(long, action = clap::ArgAction::SetTrue, conflicts_with = "spirv")]
    glsl: bool,

    /// Emit a SPIR-V module (default)
    #[arg(long, action = clap::ArgAction::SetTrue)]
    spirv: bool,

    /// TOML recompiler configuration
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Output path (GLSL goes to stdout when omitted)
    #[arg(long, value_name = "FILE")]
    out: Option<PathBuf>,

    /// Print the extracted program inputs as JSON
    #[arg(long, action = clap::ArgAction::SetTrue)]
    dump_inputs: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => RecompilerConfig::load_from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => RecompilerConfig::load().context("failed to load default config")?,
    };
    if args.glsl {
        config.features.backend = Backend::Glsl;
    } else if args.spirv {
        config.features.backend = Backend::SpirV;
    }

    let binary = fs::read(&args.input).with_context(|| format!("failed to read {}", args.input.display()))?;

    if args.dump_inputs {
        let input = extract_program_input(&binary);
        let json = serde_json::to_string_pretty(&input).context("failed to serialize program inputs")?;
        println!("{}", json);
    }

    let output = compile_with_config(&binary, &config);
    for diagnostic in &output.diagnostics {
        let at = diagnostic.offset.map(|o| format!(" at {}", o)).unwrap_or_default();
        match diagnostic.severity {
            Severity::Error => tracing::error!("{}{}", diagnostic.message, at),
            Severity::Warning => tracing::warn!("{}{}", diagnostic.message, at),
            Severity::Info => tracing::info!("{}{}", diagnostic.message, at),
        }
    }
    if output.degraded {
        tracing::warn!("{} was recompiled with approximations", args.input.display());
    }

    match (&args.out, &output.code) {
        (Some(path), code) => {
            fs::write(path, code.to_bytes()).with_context(|| format!("failed to write {}", path.display()))?;
            tracing::info!("Wrote {}", path.display());
        }
        (None, ShaderCode::Glsl(source)) => {
            io::stdout().write_all(source.as_bytes()).context("failed to write to stdout")?;
        }
        (None, ShaderCode::SpirV(_)) => {
            bail!("SPIR-V output needs --out");
        }
    }

    Ok(())
}
