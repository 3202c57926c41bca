//! Data model shared by the engines, the stores, and the CLI.

pub mod correlation;
pub mod event;
pub mod investigation;
pub mod response;
pub mod triage;

pub use correlation::{
    ChainEvent, CorrelatedIncident, CorrelationField, CorrelationPattern, CorrelationRule,
    CorrelationStatus, IncidentKey, PatternType,
};
pub use event::{EndpointPosture, SecurityEvent, Severity, ThreatIntelMatch};
pub use investigation::{
    ActiveInvestigation, IncidentRef, InvestigationPlaybook, InvestigationStatus, PlaybookStep,
    StepCategory, StepProgress, StepStatus, TimelineEntry,
};
pub use response::{
    ActionKind, ActionOutcome, ActionStatus, AutoResponseLog, AutoResponseRule, BlockIpAction,
    EscalateSeverityAction, NotifyEmailAction, ResponseActions, ToggleAction, TriggerConditions,
    VulnScanAction,
};
pub use triage::{
    AiAnalysis, SlaStatus, TriageCategory, TriageConditions, TriageMethod, TriageRule,
    TriageStatus, TriagedIncident, sla_deadline,
};
