//! Error types for the shield layer.
//!
//! Only construction-time and I/O paths (configuration, version parsing)
//! return these. Capability checks, failure reporting and the compatibility
//! probe are total and never surface an error to callers.

/// Top-level error type for the shield layer.
#[derive(Debug, thiserror::Error)]
pub enum ShieldError {
    /// Configuration error (invalid TOML, out-of-range values).
    #[error("config error: {0}")]
    Config(String),

    /// A version string could not be parsed.
    #[error("version error: {0}")]
    Version(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, ShieldError>;
