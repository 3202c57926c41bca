//! Error types for the engines.

use thiserror::Error;
use vigil_core::error::{AiError, ConfigError, StoreError};
use vigil_core::model::ActionKind;

/// Failures of a correlation, triage or auto-response run.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A malformed or contradictory rule. Engines skip the rule and continue.
    #[error("configuration error in rule '{rule}': {message}")]
    Configuration { rule: String, message: String },

    /// Fetching events, rules or incidents failed. The run is aborted and
    /// leaves no partial duplicates behind.
    #[error("evaluation failed: {0}")]
    Evaluation(#[from] StoreError),

    /// A single action failed. Recorded as `failed`, never propagated out of a
    /// rule execution.
    #[error("action '{action}' failed: {message}")]
    ActionExecution { action: ActionKind, message: String },

    /// The AI collaborator could not be used and no fallback applied.
    #[error("external service unavailable: {0}")]
    ExternalServiceUnavailable(#[from] AiError),
}

impl From<ConfigError> for EngineError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Invalid { rule, message } => EngineError::Configuration { rule, message },
            ConfigError::Load { message } => EngineError::Configuration {
                rule: "<config>".into(),
                message,
            },
        }
    }
}

/// Errors from operator-driven state changes: investigation steps and
/// lifecycle, triage and correlation status updates.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("cannot move from '{from}' to '{to}'")]
    InvalidTransition { from: String, to: String },

    #[error("'{id}' is {status} and can no longer change")]
    Terminal { id: String, status: String },

    #[error("investigation '{id}' is paused; resume it first")]
    Paused { id: String },

    #[error("'{id}' was modified by another editor; reload and retry")]
    Conflict { id: String },

    #[error("step index {index} is out of range (playbook has {len} steps)")]
    StepOutOfRange { index: usize, len: usize },

    #[error("checklist item {item} is out of range for step '{step_id}' ({len} items)")]
    ChecklistItemOutOfRange {
        step_id: String,
        item: usize,
        len: usize,
    },

    #[error("step '{step_id}' has {remaining} unchecked checklist item(s)")]
    ChecklistIncomplete { step_id: String, remaining: usize },

    #[error("{remaining} step(s) are neither completed nor skipped")]
    StepsOutstanding { remaining: usize },

    #[error("cannot jump to step {index}: step {reached} is not finished yet")]
    NavigationBlocked { index: usize, reached: usize },

    #[error("playbook '{id}' is a template and cannot be modified")]
    TemplateImmutable { id: String },

    #[error("playbook id '{id}' is reserved for a built-in template")]
    ReservedPlaybookId { id: String },

    #[error("playbook '{id}' is followed by {open} open investigation(s)")]
    PlaybookInUse { id: String, open: usize },

    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for WorkflowError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { kind, id } => WorkflowError::NotFound { kind, id },
            StoreError::Conflict { id, .. } => WorkflowError::Conflict { id },
            other => WorkflowError::Store(other),
        }
    }
}
