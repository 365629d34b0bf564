//! Error types for the oxidized-vita shader recompiler

use thiserror::Error;

/// Main error type for the recompiler
#[derive(Error, Debug)]
pub enum RecompilerError {
    #[error("GXP error: {0}")]
    Gxp(#[from] GxpError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported feature: {0}")]
    Unsupported(String),
}

/// GXP program container errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GxpError {
    #[error("Invalid magic: 0x{0:08x}")]
    InvalidMagic(u32),

    #[error("File too small: {size} bytes, need at least {needed}")]
    TooSmall { size: usize, needed: usize },

    #[error("Table {table} at 0x{offset:x} overruns the {size} byte blob")]
    TableOutOfBounds {
        table: &'static str,
        offset: usize,
        size: usize,
    },

    #[error("Unterminated string at 0x{0:x}")]
    UnterminatedString(usize),
}

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for recompiler operations
pub type Result<T> = std::result::Result<T, RecompilerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GxpError::InvalidMagic(0xDEADBEEF);
        assert_eq!(format!("{}", err), "Invalid magic: 0xdeadbeef");

        let err = GxpError::TableOutOfBounds {
            table: "parameters",
            offset: 0x40,
            size: 0x20,
        };
        assert_eq!(
            format!("{}", err),
            "Table parameters at 0x40 overruns the 32 byte blob"
        );
    }

    #[test]
    fn test_error_conversion() {
        let gxp_err = GxpError::TooSmall { size: 4, needed: 0x98 };
        let err: RecompilerError = gxp_err.into();
        assert!(matches!(err, RecompilerError::Gxp(_)));
    }
}
