//! Unified error handling for the overload engine
//!
//! One error type covers engine construction and configuration; failures that
//! are themselves the product being simulated (injected work-unit failures,
//! capacity rejections) have their own types next to the code that produces
//! them and never pass through here.

use thiserror::Error;

/// Main error type for engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    /// I/O related errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration parsing or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Shared worker pool construction or shutdown errors
    #[error("Pool error: {0}")]
    Pool(String),

    /// Dedicated thread spawn errors
    #[error("Thread spawn failed: {0}")]
    Spawn(String),

    /// Serialization/Deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Convenience type alias for Results using EngineError
pub type EngineResult<T> = std::result::Result<T, EngineError>;

// ============================================
// From implementations for common error types
// ============================================

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for EngineError {
    fn from(err: serde_yaml::Error) -> Self {
        EngineError::Config(format!("YAML error: {}", err))
    }
}

// Helper methods
impl EngineError {
    /// Create a pool error
    pub fn pool<S: Into<String>>(msg: S) -> Self {
        EngineError::Pool(msg.into())
    }

    /// Create a thread spawn error
    pub fn spawn<S: Into<String>>(msg: S) -> Self {
        EngineError::Spawn(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_errors_convert_to_config() {
        let yaml_err = serde_yaml::from_str::<crate::config::EngineConfig>("pool: [bad]")
            .unwrap_err();
        let err = EngineError::from(yaml_err);
        assert!(matches!(err, EngineError::Config(_)));
        assert!(err.to_string().starts_with("Configuration error: YAML error:"));
    }

    #[test]
    fn test_io_errors_convert_to_io() {
        let err = EngineError::from(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "missing config",
        ));
        assert!(matches!(err, EngineError::Io(_)));
        assert!(err.to_string().contains("missing config"));
    }

    #[test]
    fn test_helper_ctors_build_their_variants() {
        assert!(matches!(EngineError::pool("runtime"), EngineError::Pool(_)));
        assert!(matches!(EngineError::spawn("sampler"), EngineError::Spawn(_)));
    }
}
