//! Configuration system for the oxidized-vita recompiler

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct RecompilerConfig {
    pub features: FeatureFlags,
    pub output: OutputConfig,
}

/// Host GPU capabilities and backend selection
///
/// Plain data so an external shader cache can key on it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(default)]
pub struct FeatureFlags {
    pub backend: Backend,
    /// Host compiler accepts `mix()` with boolean selectors on integer vectors
    pub support_glsl_mixing_integers: bool,
    /// Use the GL-style VertexId/InstanceId builtins instead of the Vulkan ones
    pub use_legacy_vertex_id: bool,
    pub spirv_version: SpirvVersion,
}

/// Code generation target
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    SpirV,
    Glsl,
}

/// SPIR-V module version written into the header
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
pub enum SpirvVersion {
    #[default]
    #[serde(rename = "1.0")]
    V1_0,
    #[serde(rename = "1.3")]
    V1_3,
}

impl SpirvVersion {
    /// Header word for this version
    pub fn word(self) -> u32 {
        match self {
            Self::V1_0 => 0x0001_0000,
            Self::V1_3 => 0x0001_0300,
        }
    }
}

/// Emitted-code presentation settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OutputConfig {
    /// Emit OpName / readable identifiers for register banks and inputs
    pub emit_debug_names: bool,
    pub glsl_version: u32,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            support_glsl_mixing_integers: false,
            use_legacy_vertex_id: false,
            spirv_version: SpirvVersion::default(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            emit_debug_names: true,
            glsl_version: 450,
        }
    }
}

impl RecompilerConfig {
    /// Parse a configuration from TOML text
    pub fn load_from_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from a file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::load_from_str(&content)?;
        tracing::debug!("Loaded recompiler config from {}", path.display());
        Ok(config)
    }

    /// Load the default config file, falling back to defaults if it doesn't exist
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();

        if path.exists() {
            Self::load_from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the path to the default configuration file
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("oxidized-vita")
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RecompilerConfig::default();
        assert_eq!(config.features.backend, Backend::SpirV);
        assert!(!config.features.support_glsl_mixing_integers);
        assert!(config.output.emit_debug_names);
        assert_eq!(config.output.glsl_version, 450);
    }

    #[test]
    fn test_partial_config() {
        let config = RecompilerConfig::load_from_str(
            r#"
            [features]
            backend = "glsl"
            spirv_version = "1.3"
            "#,
        )
        .unwrap();
        assert_eq!(config.features.backend, Backend::Glsl);
        assert_eq!(config.features.spirv_version.word(), 0x0001_0300);
        assert!(!config.features.use_legacy_vertex_id);
        assert_eq!(config.output, OutputConfig::default());
    }

    #[test]
    fn test_config_serialization() {
        let config = RecompilerConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: RecompilerConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_invalid_config() {
        let err = RecompilerConfig::load_from_str("[features]\nbackend = \"metal\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
