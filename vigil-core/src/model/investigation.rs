//! Investigation playbooks and active, per-incident investigations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::event::Severity;
use crate::error::ConfigError;

/// Incident-response phase a playbook step belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepCategory {
    Identification,
    Containment,
    Eradication,
    Recovery,
    LessonsLearned,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybookStep {
    pub id: String,
    pub title: String,
    pub category: StepCategory,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub checklist: Vec<String>,
    #[serde(default)]
    pub data_queries: Vec<String>,
    #[serde(default)]
    pub recommended_actions: Vec<String>,
    #[serde(default)]
    pub mitre_techniques: Vec<String>,
}

/// An ordered investigation procedure. Templates are seed data and immutable;
/// custom playbooks are operator-authored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvestigationPlaybook {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub scenario_type: String,
    pub severity: Severity,
    pub estimated_duration_minutes: u32,
    #[serde(default)]
    pub is_template: bool,
    pub steps: Vec<PlaybookStep>,
}

impl InvestigationPlaybook {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::invalid("<unnamed>", "playbook id must not be empty"));
        }
        if self.steps.is_empty() {
            return Err(ConfigError::invalid(&self.id, "a playbook needs at least one step"));
        }
        for (i, step) in self.steps.iter().enumerate() {
            if step.id.trim().is_empty() {
                return Err(ConfigError::invalid(&self.id, format!("step {i} has no id")));
            }
            if self.steps[..i].iter().any(|s| s.id == step.id) {
                return Err(ConfigError::invalid(
                    &self.id,
                    format!("duplicate step id '{}'", step.id),
                ));
            }
        }
        Ok(())
    }
}

/// Investigation lifecycle. `completed`, `escalated` and `closed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvestigationStatus {
    InProgress,
    Paused,
    Completed,
    Escalated,
    Closed,
}

impl InvestigationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            InvestigationStatus::Completed
                | InvestigationStatus::Escalated
                | InvestigationStatus::Closed
        )
    }

    pub fn can_transition_to(self, next: InvestigationStatus) -> bool {
        use InvestigationStatus::*;
        matches!(
            (self, next),
            (InProgress, Paused)
                | (Paused, InProgress)
                | (InProgress, Completed)
                | (InProgress, Escalated)
                | (InProgress, Closed)
                | (Paused, Escalated)
                | (Paused, Closed)
        )
    }
}

impl std::fmt::Display for InvestigationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvestigationStatus::InProgress => write!(f, "in_progress"),
            InvestigationStatus::Paused => write!(f, "paused"),
            InvestigationStatus::Completed => write!(f, "completed"),
            InvestigationStatus::Escalated => write!(f, "escalated"),
            InvestigationStatus::Closed => write!(f, "closed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Skipped,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Pending => write!(f, "pending"),
            StepStatus::InProgress => write!(f, "in_progress"),
            StepStatus::Completed => write!(f, "completed"),
            StepStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Progress on one playbook step, aligned by index with the playbook's steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepProgress {
    pub step_id: String,
    pub status: StepStatus,
    pub checklist_completed: Vec<bool>,
    #[serde(default)]
    pub notes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl StepProgress {
    pub fn pending(step: &PlaybookStep) -> Self {
        Self {
            step_id: step.id.clone(),
            status: StepStatus::Pending,
            checklist_completed: vec![false; step.checklist.len()],
            notes: String::new(),
            completed_at: None,
        }
    }

    pub fn checklist_done(&self) -> bool {
        self.checklist_completed.iter().all(|c| *c)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    #[serde(default)]
    pub details: String,
}

/// Evidence record linked to an investigation. Linked records are never
/// mutated by the investigation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum IncidentRef {
    Correlated(String),
    Triaged(String),
}

impl std::fmt::Display for IncidentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IncidentRef::Correlated(id) => write!(f, "correlated:{id}"),
            IncidentRef::Triaged(id) => write!(f, "triaged:{id}"),
        }
    }
}

/// A running execution of a playbook against one or more incidents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveInvestigation {
    pub id: String,
    pub playbook_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub severity: Severity,
    pub status: InvestigationStatus,
    pub step_progress: Vec<StepProgress>,
    pub current_step_index: usize,
    #[serde(default)]
    pub linked_incidents: Vec<IncidentRef>,
    #[serde(default)]
    pub linked_findings: Vec<String>,
    #[serde(default)]
    pub timeline: Vec<TimelineEntry>,
    pub created_at: DateTime<Utc>,
    /// Optimistic-concurrency token; writers must present the value they read.
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ActiveInvestigation {
    /// Completed steps over total steps, always in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        if self.step_progress.is_empty() {
            return 0.0;
        }
        self.completed_steps() as f64 / self.step_progress.len() as f64
    }

    pub fn completed_steps(&self) -> usize {
        self.step_progress
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count()
    }

    pub fn record(&mut self, now: DateTime<Utc>, action: &str, details: impl Into<String>) {
        self.timeline.push(TimelineEntry {
            timestamp: now,
            action: action.to_string(),
            details: details.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: &str, items: usize) -> PlaybookStep {
        PlaybookStep {
            id: id.into(),
            title: id.into(),
            category: StepCategory::Identification,
            description: String::new(),
            checklist: (0..items).map(|i| format!("item {i}")).collect(),
            data_queries: Vec::new(),
            recommended_actions: Vec::new(),
            mitre_techniques: Vec::new(),
        }
    }

    #[test]
    fn test_playbook_validation() {
        let mut pb = InvestigationPlaybook {
            id: "pb".into(),
            name: "PB".into(),
            description: String::new(),
            scenario_type: "phishing".into(),
            severity: Severity::High,
            estimated_duration_minutes: 60,
            is_template: false,
            steps: vec![step("a", 2), step("b", 0)],
        };
        assert!(pb.validate().is_ok());

        pb.steps.push(step("a", 1));
        assert!(pb.validate().is_err());

        pb.steps.clear();
        assert!(pb.validate().is_err());
    }

    #[test]
    fn test_pending_step_presizes_checklist() {
        let progress = StepProgress::pending(&step("a", 3));
        assert_eq!(progress.checklist_completed, vec![false, false, false]);
        assert_eq!(progress.status, StepStatus::Pending);
        assert!(!progress.checklist_done());
        assert!(StepProgress::pending(&step("b", 0)).checklist_done());
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        use InvestigationStatus::*;
        for terminal in [Completed, Escalated, Closed] {
            assert!(terminal.is_terminal());
            for next in [InProgress, Paused, Completed, Escalated, Closed] {
                assert!(!terminal.can_transition_to(next));
            }
        }
        assert!(InProgress.can_transition_to(Paused));
        assert!(Paused.can_transition_to(InProgress));
        assert!(!Paused.can_transition_to(Completed));
    }

    #[test]
    fn test_incident_ref_serialization() {
        let json = serde_json::to_string(&IncidentRef::Correlated("c-1".into())).unwrap();
        assert_eq!(json, r#"{"kind":"correlated","id":"c-1"}"#);
    }
}
