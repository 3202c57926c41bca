//! Auto-response rules and their append-only audit log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::event::{EndpointPosture, Severity};
use crate::error::ConfigError;

fn default_true() -> bool {
    true
}

/// Remediation capabilities an auto-response rule can dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    BlockIp,
    IsolateEndpoint,
    TriggerVulnScan,
    NotifyEmail,
    CreateInAppAlert,
    EscalateSeverity,
}

impl ActionKind {
    /// Only blocking and isolation may be retried once after a timeout.
    pub fn is_idempotent(self) -> bool {
        matches!(self, ActionKind::BlockIp | ActionKind::IsolateEndpoint)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::BlockIp => "block_ip",
            ActionKind::IsolateEndpoint => "isolate_endpoint",
            ActionKind::TriggerVulnScan => "trigger_vuln_scan",
            ActionKind::NotifyEmail => "notify_email",
            ActionKind::CreateInAppAlert => "create_in_app_alert",
            ActionKind::EscalateSeverity => "escalate_severity",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockIpAction {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_block_minutes")]
    pub duration_minutes: u32,
}

fn default_block_minutes() -> u32 {
    60
}

impl Default for BlockIpAction {
    fn default() -> Self {
        Self {
            enabled: false,
            duration_minutes: default_block_minutes(),
        }
    }
}

/// An action without parameters beyond its toggle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToggleAction {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VulnScanAction {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_scan_type")]
    pub scan_type: String,
}

fn default_scan_type() -> String {
    "quick".into()
}

impl Default for VulnScanAction {
    fn default() -> Self {
        Self {
            enabled: false,
            scan_type: default_scan_type(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyEmailAction {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub recipients: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalateSeverityAction {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_escalation_target")]
    pub target: Severity,
}

fn default_escalation_target() -> Severity {
    Severity::Critical
}

impl Default for EscalateSeverityAction {
    fn default() -> Self {
        Self {
            enabled: false,
            target: default_escalation_target(),
        }
    }
}

/// Independently-enabled sub-actions of a rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseActions {
    pub block_ip: BlockIpAction,
    pub isolate_endpoint: ToggleAction,
    pub trigger_vuln_scan: VulnScanAction,
    pub notify_email: NotifyEmailAction,
    pub create_in_app_alert: ToggleAction,
    pub escalate_severity: EscalateSeverityAction,
}

impl ResponseActions {
    /// Enabled actions in a stable dispatch order.
    pub fn enabled_kinds(&self) -> Vec<ActionKind> {
        let mut kinds = Vec::new();
        if self.block_ip.enabled {
            kinds.push(ActionKind::BlockIp);
        }
        if self.isolate_endpoint.enabled {
            kinds.push(ActionKind::IsolateEndpoint);
        }
        if self.trigger_vuln_scan.enabled {
            kinds.push(ActionKind::TriggerVulnScan);
        }
        if self.notify_email.enabled {
            kinds.push(ActionKind::NotifyEmail);
        }
        if self.create_in_app_alert.enabled {
            kinds.push(ActionKind::CreateInAppAlert);
        }
        if self.escalate_severity.enabled {
            kinds.push(ActionKind::EscalateSeverity);
        }
        kinds
    }
}

/// Trigger conditions. Populated categories are OR-ed together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConditions {
    pub severity: Vec<Severity>,
    pub event_types: Vec<String>,
    pub threat_intel_match: bool,
    pub endpoint_posture: Vec<EndpointPosture>,
    /// When set, at least this many matching events must fall inside `time_window_minutes`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_count_threshold: Option<u32>,
    pub time_window_minutes: u32,
}

impl Default for TriggerConditions {
    fn default() -> Self {
        Self {
            severity: Vec::new(),
            event_types: Vec::new(),
            threat_intel_match: false,
            endpoint_posture: Vec::new(),
            event_count_threshold: None,
            time_window_minutes: 60,
        }
    }
}

impl TriggerConditions {
    pub fn is_empty(&self) -> bool {
        self.severity.is_empty()
            && self.event_types.is_empty()
            && !self.threat_intel_match
            && self.endpoint_posture.is_empty()
    }
}

/// An automated-response rule with per-rule cooldown and trigger counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoResponseRule {
    pub id: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub trigger_conditions: TriggerConditions,
    #[serde(default)]
    pub actions: ResponseActions,
    #[serde(default = "default_cooldown")]
    pub cooldown_minutes: u32,
    #[serde(default)]
    pub trigger_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_triggered: Option<DateTime<Utc>>,
}

fn default_cooldown() -> u32 {
    30
}

impl AutoResponseRule {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| Err(ConfigError::invalid(&self.id, message));

        if self.id.trim().is_empty() {
            return Err(ConfigError::invalid("<unnamed>", "rule id must not be empty"));
        }
        if self.name.trim().is_empty() {
            return invalid("rule name must not be empty");
        }
        if self.trigger_conditions.is_empty() {
            return invalid("at least one trigger condition is required");
        }
        if self.trigger_conditions.event_count_threshold == Some(0) {
            return invalid("event count threshold must be at least 1");
        }
        if self.trigger_conditions.event_count_threshold.is_some()
            && self.trigger_conditions.time_window_minutes == 0
        {
            return invalid("an event count threshold needs a non-zero time window");
        }
        if self.actions.enabled_kinds().is_empty() {
            return invalid("at least one action must be enabled");
        }
        if self.actions.block_ip.enabled && self.actions.block_ip.duration_minutes == 0 {
            return invalid("block_ip duration must be at least one minute");
        }
        if self.actions.notify_email.enabled && self.actions.notify_email.recipients.is_empty() {
            return invalid("notify_email needs at least one recipient");
        }
        Ok(())
    }

    /// Whether the rule is outside its cooldown at `now`.
    pub fn is_off_cooldown(&self, now: DateTime<Utc>) -> bool {
        match self.last_triggered {
            None => true,
            Some(last) => now - last >= chrono::Duration::minutes(i64::from(self.cooldown_minutes)),
        }
    }
}

/// Outcome status of one dispatched action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Success,
    Failed,
    Skipped,
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionStatus::Success => write!(f, "success"),
            ActionStatus::Failed => write!(f, "failed"),
            ActionStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Outcome of one action within a rule execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub action: ActionKind,
    pub status: ActionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Immutable audit record of one rule execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoResponseLog {
    pub id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub trigger_reason: String,
    #[serde(default)]
    pub event_ids: Vec<String>,
    pub actions_taken: Vec<ActionOutcome>,
    pub executed_at: DateTime<Utc>,
    /// Unset while the rule's actions are still being dispatched. An entry
    /// that stays unset records a firing whose outcomes were never stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl AutoResponseLog {
    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }
}
