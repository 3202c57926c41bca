//! # Vigil Security
//!
//! The four security-operations engines built on `vigil-core`:
//!
//! - **Correlation:** groups events by key and time window into scored,
//!   deduplicated correlated incidents
//! - **Triage:** classifies a single event by ordered rule match with an AI
//!   fallback, and tracks its SLA
//! - **Auto-response:** fires remediation actions under per-rule cooldowns,
//!   with an append-only audit log
//! - **Investigation:** stateful playbook execution with checklists, evidence
//!   links and a timeline

pub mod correlation;
pub mod error;
pub mod investigation;
pub mod response;
pub mod triage;

// Re-exports for convenience
pub use correlation::{CorrelationEngine, CorrelationSummary};
pub use error::{EngineError, WorkflowError};
pub use investigation::{
    Evidence, InvestigationWorkflow, SeedReport, StartInvestigation, StepView, is_template_id,
    seed_playbooks, template_playbooks,
};
pub use response::{
    ActionExecutor, ActionRequest, DryRunExecutor, ExecutionReport, ExecutorRegistry,
    ResponseEngine, ResponseSummary, RuleOutcome, WebhookExecutor,
};
pub use triage::TriageClassifier;
