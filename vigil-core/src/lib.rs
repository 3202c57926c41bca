//! # Vigil Core
//!
//! Core library for Vigil, a security-operations engine.
//! Provides the data model (events, rules, incidents, playbooks), error types,
//! layered configuration, persistence collaborators, and the AI collaborator seam.

pub mod ai;
pub mod config;
pub mod error;
pub mod model;
pub mod persistence;
pub mod store;

// Re-export commonly used types at the crate root.
pub use ai::{
    AiAnalyst, AiClassification, DisabledAnalyst, EventContext, HttpAiAnalyst, MockAnalyst,
    analyst_from_config,
};
pub use config::{StepGating, StepNavigation, VigilConfig, load_config};
pub use error::{AiError, ConfigError, Result, StoreError, VigilError};
pub use store::{EventSource, IncidentStore, Insertion, MemoryStore, RuleStore, next_revision};
