//! Triage rules and triaged incidents.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::event::{EndpointPosture, SecurityEvent, Severity};
use crate::error::ConfigError;

fn default_true() -> bool {
    true
}

/// Response category assigned by triage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriageCategory {
    CriticalIncident,
    HighPriority,
    RequiresInvestigation,
    Monitor,
    LowRisk,
    FalsePositive,
}

impl std::fmt::Display for TriageCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriageCategory::CriticalIncident => write!(f, "critical_incident"),
            TriageCategory::HighPriority => write!(f, "high_priority"),
            TriageCategory::RequiresInvestigation => write!(f, "requires_investigation"),
            TriageCategory::Monitor => write!(f, "monitor"),
            TriageCategory::LowRisk => write!(f, "low_risk"),
            TriageCategory::FalsePositive => write!(f, "false_positive"),
        }
    }
}

impl std::str::FromStr for TriageCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "critical_incident" => Ok(TriageCategory::CriticalIncident),
            "high_priority" => Ok(TriageCategory::HighPriority),
            "requires_investigation" => Ok(TriageCategory::RequiresInvestigation),
            "monitor" => Ok(TriageCategory::Monitor),
            "low_risk" => Ok(TriageCategory::LowRisk),
            "false_positive" => Ok(TriageCategory::FalsePositive),
            other => Err(format!("unknown triage category '{other}'")),
        }
    }
}

/// Operator-driven lifecycle of a triaged incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriageStatus {
    New,
    Acknowledged,
    Investigating,
    Resolved,
    Escalated,
    Closed,
    FalsePositive,
}

impl TriageStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TriageStatus::Closed | TriageStatus::FalsePositive)
    }

    /// `new → acknowledged → investigating → {resolved|escalated} → closed`, with
    /// `false_positive` reachable from every non-terminal state.
    pub fn can_transition_to(self, next: TriageStatus) -> bool {
        use TriageStatus::*;
        if self.is_terminal() {
            return false;
        }
        if next == FalsePositive {
            return true;
        }
        matches!(
            (self, next),
            (New, Acknowledged)
                | (Acknowledged, Investigating)
                | (Investigating, Resolved)
                | (Investigating, Escalated)
                | (Resolved, Closed)
                | (Escalated, Closed)
        )
    }
}

impl std::fmt::Display for TriageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriageStatus::New => write!(f, "new"),
            TriageStatus::Acknowledged => write!(f, "acknowledged"),
            TriageStatus::Investigating => write!(f, "investigating"),
            TriageStatus::Resolved => write!(f, "resolved"),
            TriageStatus::Escalated => write!(f, "escalated"),
            TriageStatus::Closed => write!(f, "closed"),
            TriageStatus::FalsePositive => write!(f, "false_positive"),
        }
    }
}

impl std::str::FromStr for TriageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "new" => Ok(TriageStatus::New),
            "acknowledged" => Ok(TriageStatus::Acknowledged),
            "investigating" => Ok(TriageStatus::Investigating),
            "resolved" => Ok(TriageStatus::Resolved),
            "escalated" => Ok(TriageStatus::Escalated),
            "closed" => Ok(TriageStatus::Closed),
            "false_positive" => Ok(TriageStatus::FalsePositive),
            other => Err(format!("unknown triage status '{other}'")),
        }
    }
}

/// How the category was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriageMethod {
    Rule,
    Ai,
}

/// Match conditions of a triage rule. Each populated category must match
/// (any-of within the category); empty categories are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriageConditions {
    pub severities: Vec<Severity>,
    pub event_types: Vec<String>,
    /// `Some(true)` requires a threat-intel match, `Some(false)` requires none.
    pub threat_intel_match: Option<bool>,
    pub endpoint_postures: Vec<EndpointPosture>,
    /// Case-insensitive substrings searched in the event description and type.
    pub keywords: Vec<String>,
}

impl TriageConditions {
    /// Number of populated condition categories.
    pub fn populated(&self) -> usize {
        usize::from(!self.severities.is_empty())
            + usize::from(!self.event_types.is_empty())
            + usize::from(self.threat_intel_match.is_some())
            + usize::from(!self.endpoint_postures.is_empty())
            + usize::from(!self.keywords.is_empty())
    }
}

/// An ordered triage rule. The first enabled rule (ascending priority) whose
/// conditions all match wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriageRule {
    pub id: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: u32,
    pub category: TriageCategory,
    #[serde(default)]
    pub conditions: TriageConditions,
    #[serde(default)]
    pub investigation_steps: Vec<String>,
    #[serde(default)]
    pub documentation_links: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sla_minutes: Option<u32>,
}

impl TriageRule {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::invalid("<unnamed>", "rule id must not be empty"));
        }
        if self.name.trim().is_empty() {
            return Err(ConfigError::invalid(&self.id, "rule name must not be empty"));
        }
        if self.sla_minutes == Some(0) {
            return Err(ConfigError::invalid(&self.id, "SLA must be at least one minute"));
        }
        if self.conditions.keywords.iter().any(|k| k.trim().is_empty()) {
            return Err(ConfigError::invalid(&self.id, "keywords must not be blank"));
        }
        Ok(())
    }
}

/// Structured assessment returned by the AI collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiAnalysis {
    pub threat_assessment: String,
    pub potential_impact: String,
    pub recommended_actions: Vec<String>,
    pub related_mitre_techniques: Vec<String>,
}

/// SLA read model, derived from the stored deadline and the caller's clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaStatus {
    pub due_at: DateTime<Utc>,
    pub overdue: bool,
    /// Negative once the deadline has passed.
    pub remaining_minutes: i64,
}

/// A triage decision for exactly one security event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriagedIncident {
    pub id: String,
    pub security_event_id: String,
    pub category: TriageCategory,
    pub status: TriageStatus,
    pub triage_method: TriageMethod,
    pub confidence_score: u8,
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    #[serde(default)]
    pub investigation_steps: Vec<String>,
    #[serde(default)]
    pub documentation_links: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_analysis: Option<AiAnalysis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sla_due_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub event_snapshot: SecurityEvent,
}

impl TriagedIncident {
    /// Overdue is computed against `now` on every read, never stored.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        let open = !matches!(
            self.status,
            TriageStatus::Resolved | TriageStatus::Closed | TriageStatus::FalsePositive
        );
        open && self.sla_due_at.is_some_and(|due| now > due)
    }

    pub fn sla_status(&self, now: DateTime<Utc>) -> Option<SlaStatus> {
        self.sla_due_at.map(|due_at| SlaStatus {
            due_at,
            overdue: self.is_overdue(now),
            remaining_minutes: (due_at - now).num_minutes(),
        })
    }

    /// Apply an operator status change, stamping the lifecycle timestamps.
    pub fn transition(&mut self, next: TriageStatus, now: DateTime<Utc>) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        match next {
            TriageStatus::Acknowledged => self.acknowledged_at = Some(now),
            TriageStatus::Resolved | TriageStatus::FalsePositive => self.resolved_at = Some(now),
            _ => {}
        }
        self.status = next;
        self.updated_at = now;
        true
    }
}

/// Compute the SLA deadline for a record created at `created_at`.
pub fn sla_deadline(created_at: DateTime<Utc>, sla_minutes: Option<u32>) -> Option<DateTime<Utc>> {
    sla_minutes.map(|m| created_at + Duration::minutes(i64::from(m)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn incident(status: TriageStatus, due: Option<DateTime<Utc>>) -> TriagedIncident {
        let now = Utc::now();
        TriagedIncident {
            id: "t1".into(),
            security_event_id: "e1".into(),
            category: TriageCategory::HighPriority,
            status,
            triage_method: TriageMethod::Rule,
            confidence_score: 80,
            reasoning: String::new(),
            rule_id: None,
            investigation_steps: Vec::new(),
            documentation_links: Vec::new(),
            ai_analysis: None,
            sla_due_at: due,
            acknowledged_at: None,
            resolved_at: None,
            created_at: now,
            updated_at: now,
            event_snapshot: SecurityEvent::new("e1", now, Severity::High, "malware", "edr"),
        }
    }

    #[test]
    fn test_overdue_boundaries() {
        let due = Utc::now();
        let inc = incident(TriageStatus::Investigating, Some(due));
        assert!(!inc.is_overdue(due - Duration::seconds(1)));
        assert!(!inc.is_overdue(due));
        assert!(inc.is_overdue(due + Duration::seconds(1)));
    }

    #[test]
    fn test_never_overdue_once_resolved_or_closed() {
        let due = Utc::now();
        let far_future = due + Duration::days(365);
        assert!(!incident(TriageStatus::Resolved, Some(due)).is_overdue(far_future));
        assert!(!incident(TriageStatus::Closed, Some(due)).is_overdue(far_future));
    }

    #[test]
    fn test_no_sla_never_overdue() {
        let inc = incident(TriageStatus::New, None);
        assert!(!inc.is_overdue(Utc::now() + Duration::days(30)));
        assert!(inc.sla_status(Utc::now()).is_none());
    }

    #[test]
    fn test_status_transitions() {
        use TriageStatus::*;
        assert!(New.can_transition_to(Acknowledged));
        assert!(!New.can_transition_to(Investigating));
        assert!(Investigating.can_transition_to(Escalated));
        assert!(Escalated.can_transition_to(Closed));
        assert!(Acknowledged.can_transition_to(FalsePositive));
        assert!(!Closed.can_transition_to(FalsePositive));
        assert!(!FalsePositive.can_transition_to(New));
    }

    #[test]
    fn test_transition_stamps_timestamps() {
        let mut inc = incident(TriageStatus::New, None);
        let now = Utc::now();
        assert!(inc.transition(TriageStatus::Acknowledged, now));
        assert_eq!(inc.acknowledged_at, Some(now));
        assert!(!inc.transition(TriageStatus::Closed, now));
        assert!(inc.transition(TriageStatus::Investigating, now));
        assert!(inc.transition(TriageStatus::Resolved, now));
        assert_eq!(inc.resolved_at, Some(now));
    }

    #[test]
    fn test_category_parse() {
        assert_eq!(
            "Requires Investigation".parse::<TriageCategory>().unwrap(),
            TriageCategory::RequiresInvestigation
        );
        assert!("urgent".parse::<TriageCategory>().is_err());
    }

    #[test]
    fn test_sla_deadline() {
        let created = Utc::now();
        assert_eq!(
            sla_deadline(created, Some(30)),
            Some(created + Duration::minutes(30))
        );
        assert_eq!(sla_deadline(created, None), None);
    }
}
