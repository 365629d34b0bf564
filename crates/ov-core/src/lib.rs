//! Core types for the oxidized-vita shader recompiler
//!
//! This crate provides the error taxonomy, diagnostics record and the
//! configuration/feature-flag types shared by the recompiler and its driver.

pub mod config;
pub mod diagnostics;
pub mod error;

pub use config::{Backend, FeatureFlags, OutputConfig, RecompilerConfig, SpirvVersion};
pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use error::{ConfigError, GxpError, RecompilerError, Result};
