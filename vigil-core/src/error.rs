//! Error types for the Vigil core library.
//!
//! Uses `thiserror` for public API error types covering storage, configuration,
//! and the AI collaborator.

/// Top-level error type for the Vigil core library.
#[derive(Debug, thiserror::Error)]
pub enum VigilError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("AI collaborator error: {0}")]
    Ai(#[from] AiError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from the rule store, event source, and incident store collaborators.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("{kind} '{id}' was modified concurrently")]
    Conflict { kind: &'static str, id: String },

    #[error("Rejected: {message}")]
    Rejected { message: String },

    #[error("Invalid record: {0}")]
    Invalid(#[from] ConfigError),

    #[error("State snapshot {path} is in use by another process")]
    Locked { path: String },

    #[error("Store unavailable: {message}")]
    Unavailable { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        StoreError::NotFound {
            kind,
            id: id.into(),
        }
    }
}

/// Errors from configuration loading and rule validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid rule '{rule}': {message}")]
    Invalid { rule: String, message: String },

    #[error("Failed to load configuration: {message}")]
    Load { message: String },
}

impl ConfigError {
    pub fn invalid(rule: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            rule: rule.into(),
            message: message.into(),
        }
    }
}

/// Errors from the AI classification/narrative collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AiError {
    #[error("AI collaborator is not configured")]
    Unavailable,

    #[error("AI request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("AI request failed: {message}")]
    Request { message: String },

    #[error("AI response could not be used: {message}")]
    InvalidResponse { message: String },
}

/// Convenience type alias for Vigil core results.
pub type Result<T> = std::result::Result<T, VigilError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let err = StoreError::not_found("playbook", "pb-1");
        assert_eq!(err.to_string(), "playbook 'pb-1' not found");

        let err = StoreError::Conflict {
            kind: "investigation",
            id: "inv-1".into(),
        };
        assert!(err.to_string().contains("modified concurrently"));
    }

    #[test]
    fn test_config_error_into_vigil_error() {
        let err: VigilError = ConfigError::invalid("r1", "empty correlation keys").into();
        assert!(err.to_string().contains("r1"));
        assert!(matches!(err, VigilError::Config(_)));
    }

    #[test]
    fn test_ai_error_display() {
        assert_eq!(
            AiError::Timeout { timeout_secs: 20 }.to_string(),
            "AI request timed out after 20s"
        );
    }
}
