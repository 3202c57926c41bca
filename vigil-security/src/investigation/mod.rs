//! Investigation workflow engine.
//!
//! An investigation is a stateful run of a playbook: ordered steps with
//! checklists and notes, linked evidence, and an append-only timeline.
//! Lifecycle: `in_progress <-> paused`, then one of the terminal states
//! `completed`, `escalated` or `closed`.
//!
//! Every mutation takes the `updated_at` the caller last read and fails with
//! [`WorkflowError::Conflict`] if someone else wrote in between.

pub mod seed;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vigil_core::config::{InvestigationConfig, StepGating, StepNavigation};
use vigil_core::model::{
    ActiveInvestigation, CorrelatedIncident, IncidentRef, InvestigationPlaybook,
    InvestigationStatus, PlaybookStep, Severity, StepProgress, StepStatus, TriagedIncident,
};
use vigil_core::store::{IncidentStore, RuleStore, next_revision};

use crate::error::WorkflowError;

pub use seed::{SeedReport, is_template_id, seed_playbooks, template_playbooks};

/// Parameters for starting an investigation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartInvestigation {
    pub playbook_id: String,
    /// Defaults to the playbook name.
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Defaults to the playbook severity.
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub incidents: Vec<IncidentRef>,
}

/// The active step with its definition, when the playbook still exists.
#[derive(Debug, Clone, Serialize)]
pub struct StepView {
    pub index: usize,
    pub total: usize,
    pub step: Option<PlaybookStep>,
    pub progress: StepProgress,
    pub overall_progress: f64,
}

/// Linked evidence, fetched read-only.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Evidence {
    pub correlated: Vec<CorrelatedIncident>,
    pub triaged: Vec<TriagedIncident>,
    pub findings: Vec<String>,
    /// Links whose record no longer exists.
    pub missing: Vec<IncidentRef>,
}

pub struct InvestigationWorkflow {
    rules: Arc<dyn RuleStore>,
    incidents: Arc<dyn IncidentStore>,
    config: InvestigationConfig,
}

impl InvestigationWorkflow {
    pub fn new(
        rules: Arc<dyn RuleStore>,
        incidents: Arc<dyn IncidentStore>,
        config: InvestigationConfig,
    ) -> Self {
        Self {
            rules,
            incidents,
            config,
        }
    }

    /// Start a playbook: every step pending, checklists all unchecked, first step active.
    pub async fn start(
        &self,
        request: StartInvestigation,
        now: DateTime<Utc>,
    ) -> Result<ActiveInvestigation, WorkflowError> {
        let playbook = self.playbook(&request.playbook_id).await?;
        for link in &request.incidents {
            self.ensure_linkable(link).await?;
        }

        let mut investigation = ActiveInvestigation {
            id: uuid::Uuid::new_v4().to_string(),
            playbook_id: playbook.id.clone(),
            title: request.title.unwrap_or_else(|| playbook.name.clone()),
            description: request.description.unwrap_or_default(),
            severity: request.severity.unwrap_or(playbook.severity),
            status: InvestigationStatus::InProgress,
            step_progress: playbook.steps.iter().map(StepProgress::pending).collect(),
            current_step_index: 0,
            linked_incidents: Vec::new(),
            linked_findings: Vec::new(),
            timeline: Vec::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        for link in request.incidents {
            if !investigation.linked_incidents.contains(&link) {
                investigation.linked_incidents.push(link);
            }
        }
        investigation.record(
            now,
            "investigation_started",
            format!("Started playbook '{}' ({} steps)", playbook.name, playbook.steps.len()),
        );

        self.incidents.insert_investigation(investigation.clone()).await?;
        tracing::info!(
            investigation = investigation.id.as_str(),
            playbook = playbook.id.as_str(),
            "Investigation started"
        );
        Ok(investigation)
    }

    pub async fn get(&self, id: &str) -> Result<ActiveInvestigation, WorkflowError> {
        self.incidents
            .investigation(id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound {
                kind: "investigation",
                id: id.to_string(),
            })
    }

    pub async fn list(&self) -> Result<Vec<ActiveInvestigation>, WorkflowError> {
        Ok(self.incidents.investigations().await?)
    }

    /// Check or uncheck a checklist item of the active step. A pending step
    /// becomes in-progress.
    pub async fn toggle_checklist_item(
        &self,
        id: &str,
        expected: DateTime<Utc>,
        item: usize,
        checked: bool,
        now: DateTime<Utc>,
    ) -> Result<ActiveInvestigation, WorkflowError> {
        self.mutate(id, expected, now, |inv| {
            ensure_editable(inv)?;
            let step = current_step_mut(inv)?;
            let step_id = step.step_id.clone();
            let len = step.checklist_completed.len();
            let slot = step.checklist_completed.get_mut(item).ok_or_else(|| {
                WorkflowError::ChecklistItemOutOfRange {
                    step_id: step_id.clone(),
                    item,
                    len,
                }
            })?;
            *slot = checked;
            if step.status == StepStatus::Pending {
                step.status = StepStatus::InProgress;
            }
            let details = format!("Step '{step_id}' item {item}");
            let action = if checked {
                "checklist_item_checked"
            } else {
                "checklist_item_unchecked"
            };
            inv.record(now, action, details);
            Ok(())
        })
        .await
    }

    pub async fn update_notes(
        &self,
        id: &str,
        expected: DateTime<Utc>,
        notes: String,
        now: DateTime<Utc>,
    ) -> Result<ActiveInvestigation, WorkflowError> {
        self.mutate(id, expected, now, |inv| {
            ensure_editable(inv)?;
            let step = current_step_mut(inv)?;
            step.notes = notes;
            let details = format!("Step '{}'", step.step_id);
            inv.record(now, "notes_updated", details);
            Ok(())
        })
        .await
    }

    /// Complete the active step and advance (clamped to the last step). The
    /// investigation itself stays in progress.
    pub async fn complete_step(
        &self,
        id: &str,
        expected: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<ActiveInvestigation, WorkflowError> {
        let gating = self.config.step_gating;
        self.mutate(id, expected, now, |inv| {
            ensure_editable(inv)?;
            let step = current_step_mut(inv)?;
            if step.status == StepStatus::Completed {
                return Err(WorkflowError::InvalidTransition {
                    from: StepStatus::Completed.to_string(),
                    to: StepStatus::Completed.to_string(),
                });
            }
            if gating == StepGating::RequireChecklist && !step.checklist_done() {
                return Err(WorkflowError::ChecklistIncomplete {
                    step_id: step.step_id.clone(),
                    remaining: step.checklist_completed.iter().filter(|c| !**c).count(),
                });
            }
            step.status = StepStatus::Completed;
            step.completed_at = Some(now);
            let details = format!("Step '{}'", step.step_id);
            inv.record(now, "step_completed", details);
            advance(inv);
            Ok(())
        })
        .await
    }

    /// Mark the active step skipped and advance.
    pub async fn skip_step(
        &self,
        id: &str,
        expected: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<ActiveInvestigation, WorkflowError> {
        self.mutate(id, expected, now, |inv| {
            ensure_editable(inv)?;
            let step = current_step_mut(inv)?;
            if step.status == StepStatus::Completed {
                return Err(WorkflowError::InvalidTransition {
                    from: StepStatus::Completed.to_string(),
                    to: StepStatus::Skipped.to_string(),
                });
            }
            step.status = StepStatus::Skipped;
            let details = format!("Step '{}'", step.step_id);
            inv.record(now, "step_skipped", details);
            advance(inv);
            Ok(())
        })
        .await
    }

    /// Make another step active.
    pub async fn navigate_to(
        &self,
        id: &str,
        expected: DateTime<Utc>,
        index: usize,
        now: DateTime<Utc>,
    ) -> Result<ActiveInvestigation, WorkflowError> {
        let navigation = self.config.navigation;
        self.mutate(id, expected, now, |inv| {
            ensure_editable(inv)?;
            let len = inv.step_progress.len();
            if index >= len {
                return Err(WorkflowError::StepOutOfRange { index, len });
            }
            if navigation == StepNavigation::Sequential {
                let reached = furthest_reachable(inv);
                if index > reached {
                    return Err(WorkflowError::NavigationBlocked { index, reached });
                }
            }
            let from = inv.current_step_index;
            inv.current_step_index = index;
            inv.record(now, "navigated", format!("Step {from} -> step {index}"));
            Ok(())
        })
        .await
    }

    pub async fn pause(
        &self,
        id: &str,
        expected: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<ActiveInvestigation, WorkflowError> {
        self.transition(id, expected, InvestigationStatus::Paused, String::new(), now)
            .await
    }

    pub async fn resume(
        &self,
        id: &str,
        expected: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<ActiveInvestigation, WorkflowError> {
        self.transition(id, expected, InvestigationStatus::InProgress, String::new(), now)
            .await
    }

    /// Explicitly complete the investigation. Full progress is not required
    /// unless step gating is on, in which case every step must be completed
    /// or skipped.
    pub async fn complete(
        &self,
        id: &str,
        expected: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<ActiveInvestigation, WorkflowError> {
        if self.config.step_gating == StepGating::RequireChecklist {
            let inv = self.get(id).await?;
            let remaining = inv
                .step_progress
                .iter()
                .filter(|s| !matches!(s.status, StepStatus::Completed | StepStatus::Skipped))
                .count();
            if remaining > 0 && !inv.status.is_terminal() {
                return Err(WorkflowError::StepsOutstanding { remaining });
            }
        }
        self.transition(id, expected, InvestigationStatus::Completed, String::new(), now)
            .await
    }

    pub async fn escalate(
        &self,
        id: &str,
        expected: DateTime<Utc>,
        reason: String,
        now: DateTime<Utc>,
    ) -> Result<ActiveInvestigation, WorkflowError> {
        self.transition(id, expected, InvestigationStatus::Escalated, reason, now)
            .await
    }

    pub async fn close(
        &self,
        id: &str,
        expected: DateTime<Utc>,
        reason: String,
        now: DateTime<Utc>,
    ) -> Result<ActiveInvestigation, WorkflowError> {
        self.transition(id, expected, InvestigationStatus::Closed, reason, now)
            .await
    }

    /// Attach a correlated or triaged incident as evidence. The linked record
    /// itself is never modified.
    pub async fn link_incident(
        &self,
        id: &str,
        expected: DateTime<Utc>,
        link: IncidentRef,
        now: DateTime<Utc>,
    ) -> Result<ActiveInvestigation, WorkflowError> {
        self.ensure_linkable(&link).await?;
        self.mutate(id, expected, now, |inv| {
            ensure_open(inv)?;
            if !inv.linked_incidents.contains(&link) {
                inv.record(now, "incident_linked", link.to_string());
                inv.linked_incidents.push(link);
            }
            Ok(())
        })
        .await
    }

    pub async fn link_finding(
        &self,
        id: &str,
        expected: DateTime<Utc>,
        finding: String,
        now: DateTime<Utc>,
    ) -> Result<ActiveInvestigation, WorkflowError> {
        self.mutate(id, expected, now, |inv| {
            ensure_open(inv)?;
            if !inv.linked_findings.contains(&finding) {
                inv.record(now, "finding_linked", finding.clone());
                inv.linked_findings.push(finding);
            }
            Ok(())
        })
        .await
    }

    /// The active step joined with its playbook definition.
    pub async fn current_step(&self, id: &str) -> Result<StepView, WorkflowError> {
        let inv = self.get(id).await?;
        let playbook = self.rules.playbook(&inv.playbook_id).await?;
        let index = inv.current_step_index;
        let progress = inv
            .step_progress
            .get(index)
            .cloned()
            .ok_or(WorkflowError::StepOutOfRange {
                index,
                len: inv.step_progress.len(),
            })?;
        let step = playbook.and_then(|p| p.steps.into_iter().find(|s| s.id == progress.step_id));
        Ok(StepView {
            index,
            total: inv.step_progress.len(),
            step,
            progress,
            overall_progress: inv.progress(),
        })
    }

    /// Fetch linked evidence for display.
    pub async fn evidence(&self, id: &str) -> Result<Evidence, WorkflowError> {
        let inv = self.get(id).await?;
        let mut evidence = Evidence {
            findings: inv.linked_findings.clone(),
            ..Default::default()
        };
        for link in &inv.linked_incidents {
            match link {
                IncidentRef::Correlated(cid) => match self.incidents.correlated(cid).await? {
                    Some(incident) => evidence.correlated.push(incident),
                    None => evidence.missing.push(link.clone()),
                },
                IncidentRef::Triaged(tid) => match self.incidents.triaged(tid).await? {
                    Some(incident) => evidence.triaged.push(incident),
                    None => evidence.missing.push(link.clone()),
                },
            }
        }
        Ok(evidence)
    }

    /// Create or replace a custom playbook. Templates cannot be overwritten,
    /// template ids cannot be reused, and the steps of a playbook with open
    /// investigations cannot change.
    pub async fn save_playbook(&self, playbook: InvestigationPlaybook) -> Result<(), WorkflowError> {
        let existing = self.rules.playbook(&playbook.id).await?;
        if existing.as_ref().is_some_and(|p| p.is_template) {
            return Err(WorkflowError::TemplateImmutable { id: playbook.id });
        }
        if is_template_id(&playbook.id) {
            return Err(WorkflowError::ReservedPlaybookId { id: playbook.id });
        }
        if let Some(existing) = existing
            && existing.steps != playbook.steps
        {
            let open = self.open_investigations(&playbook.id).await?;
            if open > 0 {
                return Err(WorkflowError::PlaybookInUse {
                    id: playbook.id,
                    open,
                });
            }
        }
        Ok(self.rules.upsert_playbook(playbook).await?)
    }

    /// Delete a custom playbook that no open investigation follows.
    pub async fn delete_playbook(&self, id: &str) -> Result<(), WorkflowError> {
        let playbook = self.playbook(id).await?;
        if playbook.is_template {
            return Err(WorkflowError::TemplateImmutable { id: id.to_string() });
        }
        let open = self.open_investigations(id).await?;
        if open > 0 {
            return Err(WorkflowError::PlaybookInUse {
                id: id.to_string(),
                open,
            });
        }
        Ok(self.rules.delete_playbook(id).await?)
    }

    async fn open_investigations(&self, playbook_id: &str) -> Result<usize, WorkflowError> {
        Ok(self
            .incidents
            .investigations()
            .await?
            .iter()
            .filter(|i| i.playbook_id == playbook_id && !i.status.is_terminal())
            .count())
    }

    async fn playbook(&self, id: &str) -> Result<InvestigationPlaybook, WorkflowError> {
        self.rules
            .playbook(id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound {
                kind: "playbook",
                id: id.to_string(),
            })
    }

    async fn ensure_linkable(&self, link: &IncidentRef) -> Result<(), WorkflowError> {
        let exists = match link {
            IncidentRef::Correlated(cid) => self.incidents.correlated(cid).await?.is_some(),
            IncidentRef::Triaged(tid) => self.incidents.triaged(tid).await?.is_some(),
        };
        if exists {
            Ok(())
        } else {
            let (kind, id) = match link {
                IncidentRef::Correlated(cid) => ("correlated incident", cid),
                IncidentRef::Triaged(tid) => ("triaged incident", tid),
            };
            Err(WorkflowError::NotFound {
                kind,
                id: id.clone(),
            })
        }
    }

    async fn transition(
        &self,
        id: &str,
        expected: DateTime<Utc>,
        next: InvestigationStatus,
        reason: String,
        now: DateTime<Utc>,
    ) -> Result<ActiveInvestigation, WorkflowError> {
        self.mutate(id, expected, now, |inv| {
            ensure_open(inv)?;
            if !inv.status.can_transition_to(next) {
                return Err(WorkflowError::InvalidTransition {
                    from: inv.status.to_string(),
                    to: next.to_string(),
                });
            }
            inv.status = next;
            if next == InvestigationStatus::Completed {
                inv.completed_at = Some(now);
            }
            let details = if reason.is_empty() {
                format!("Progress {:.0}%", inv.progress() * 100.0)
            } else {
                reason
            };
            inv.record(now, &next.to_string(), details);
            Ok(())
        })
        .await
    }

    /// Load, check the concurrency token, apply `change`, and write back with
    /// a fresh revision.
    async fn mutate<F>(
        &self,
        id: &str,
        expected: DateTime<Utc>,
        now: DateTime<Utc>,
        change: F,
    ) -> Result<ActiveInvestigation, WorkflowError>
    where
        F: FnOnce(&mut ActiveInvestigation) -> Result<(), WorkflowError>,
    {
        let mut inv = self.get(id).await?;
        if inv.updated_at != expected {
            return Err(WorkflowError::Conflict { id: id.to_string() });
        }
        change(&mut inv)?;
        inv.updated_at = next_revision(expected, now);
        self.incidents
            .update_investigation(inv.clone(), expected)
            .await?;
        tracing::debug!(
            investigation = id,
            status = %inv.status,
            step = inv.current_step_index,
            "Investigation updated"
        );
        Ok(inv)
    }
}

fn ensure_open(inv: &ActiveInvestigation) -> Result<(), WorkflowError> {
    if inv.status.is_terminal() {
        return Err(WorkflowError::Terminal {
            id: inv.id.clone(),
            status: inv.status.to_string(),
        });
    }
    Ok(())
}

/// Step edits need an investigation that is open and not paused.
fn ensure_editable(inv: &ActiveInvestigation) -> Result<(), WorkflowError> {
    ensure_open(inv)?;
    if inv.status == InvestigationStatus::Paused {
        return Err(WorkflowError::Paused { id: inv.id.clone() });
    }
    Ok(())
}

fn current_step_mut(inv: &mut ActiveInvestigation) -> Result<&mut StepProgress, WorkflowError> {
    let index = inv.current_step_index;
    let len = inv.step_progress.len();
    inv.step_progress
        .get_mut(index)
        .ok_or(WorkflowError::StepOutOfRange { index, len })
}

fn advance(inv: &mut ActiveInvestigation) {
    let last = inv.step_progress.len().saturating_sub(1);
    inv.current_step_index = (inv.current_step_index + 1).min(last);
}

/// Index of the first unfinished step (or the last step when all are done).
fn furthest_reachable(inv: &ActiveInvestigation) -> usize {
    inv.step_progress
        .iter()
        .position(|s| !matches!(s.status, StepStatus::Completed | StepStatus::Skipped))
        .unwrap_or_else(|| inv.step_progress.len().saturating_sub(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use vigil_core::model::StepCategory;
    use vigil_core::store::MemoryStore;

    fn playbook() -> InvestigationPlaybook {
        let step = |id: &str, items: usize| PlaybookStep {
            id: id.into(),
            title: id.into(),
            category: StepCategory::Identification,
            description: String::new(),
            checklist: (0..items).map(|i| format!("{id} item {i}")).collect(),
            data_queries: Vec::new(),
            recommended_actions: Vec::new(),
            mitre_techniques: Vec::new(),
        };
        InvestigationPlaybook {
            id: "pb-custom".into(),
            name: "Custom".into(),
            description: String::new(),
            scenario_type: "custom".into(),
            severity: Severity::Medium,
            estimated_duration_minutes: 30,
            is_template: false,
            steps: vec![step("identify", 2), step("contain", 1), step("recover", 0)],
        }
    }

    async fn workflow(config: InvestigationConfig) -> (Arc<MemoryStore>, InvestigationWorkflow) {
        let store = Arc::new(MemoryStore::new());
        store.upsert_playbook(playbook()).await.unwrap();
        let workflow = InvestigationWorkflow::new(store.clone(), store.clone(), config);
        (store, workflow)
    }

    fn start_request() -> StartInvestigation {
        StartInvestigation {
            playbook_id: "pb-custom".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_start_initializes_progress() {
        let (_, wf) = workflow(InvestigationConfig::default()).await;
        let now = Utc::now();
        let inv = wf.start(start_request(), now).await.unwrap();

        assert_eq!(inv.status, InvestigationStatus::InProgress);
        assert_eq!(inv.title, "Custom");
        assert_eq!(inv.step_progress.len(), 3);
        assert_eq!(inv.step_progress[0].checklist_completed, vec![false, false]);
        assert!(inv.step_progress.iter().all(|s| s.status == StepStatus::Pending));
        assert_eq!(inv.current_step_index, 0);
        assert_eq!(inv.timeline.len(), 1);
    }

    #[tokio::test]
    async fn test_start_with_unknown_playbook() {
        let (_, wf) = workflow(InvestigationConfig::default()).await;
        let err = wf
            .start(
                StartInvestigation {
                    playbook_id: "nope".into(),
                    ..Default::default()
                },
                Utc::now(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound { kind: "playbook", .. }));
    }

    #[tokio::test]
    async fn test_checklist_toggle_starts_step() {
        let (_, wf) = workflow(InvestigationConfig::default()).await;
        let now = Utc::now();
        let inv = wf.start(start_request(), now).await.unwrap();
        let inv = wf
            .toggle_checklist_item(&inv.id, inv.updated_at, 1, true, now)
            .await
            .unwrap();
        assert_eq!(inv.step_progress[0].status, StepStatus::InProgress);
        assert_eq!(inv.step_progress[0].checklist_completed, vec![false, true]);

        let err = wf
            .toggle_checklist_item(&inv.id, inv.updated_at, 5, true, now)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::ChecklistItemOutOfRange { len: 2, .. }));
    }

    #[tokio::test]
    async fn test_complete_step_is_ungated_by_default() {
        let (_, wf) = workflow(InvestigationConfig::default()).await;
        let now = Utc::now();
        let inv = wf.start(start_request(), now).await.unwrap();
        let inv = wf.complete_step(&inv.id, inv.updated_at, now).await.unwrap();

        assert_eq!(inv.step_progress[0].status, StepStatus::Completed);
        assert_eq!(inv.step_progress[0].completed_at, Some(now));
        assert_eq!(inv.current_step_index, 1);
        assert!((inv.progress() - 1.0 / 3.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_gated_completion_requires_checklist() {
        let config = InvestigationConfig {
            step_gating: StepGating::RequireChecklist,
            ..Default::default()
        };
        let (_, wf) = workflow(config).await;
        let now = Utc::now();
        let inv = wf.start(start_request(), now).await.unwrap();
        let err = wf.complete_step(&inv.id, inv.updated_at, now).await.unwrap_err();
        assert!(matches!(err, WorkflowError::ChecklistIncomplete { remaining: 2, .. }));

        let err = wf.complete(&inv.id, inv.updated_at, now).await.unwrap_err();
        assert!(matches!(err, WorkflowError::StepsOutstanding { remaining: 3 }));
    }

    #[tokio::test]
    async fn test_last_step_clamps_and_keeps_status() {
        let (_, wf) = workflow(InvestigationConfig::default()).await;
        let mut now = Utc::now();
        let mut inv = wf.start(start_request(), now).await.unwrap();
        for _ in 0..3 {
            now += Duration::seconds(1);
            inv = wf.complete_step(&inv.id, inv.updated_at, now).await.unwrap();
        }
        assert_eq!(inv.current_step_index, 2);
        assert_eq!(inv.progress(), 1.0);
        assert_eq!(inv.status, InvestigationStatus::InProgress);

        let inv = wf.complete(&inv.id, inv.updated_at, now).await.unwrap();
        assert_eq!(inv.status, InvestigationStatus::Completed);
        assert_eq!(inv.completed_at, Some(now));
    }

    #[tokio::test]
    async fn test_stale_writer_conflicts() {
        let (_, wf) = workflow(InvestigationConfig::default()).await;
        let now = Utc::now();
        let inv = wf.start(start_request(), now).await.unwrap();
        let stale = inv.updated_at;
        wf.update_notes(&inv.id, stale, "first".into(), now).await.unwrap();

        let err = wf
            .update_notes(&inv.id, stale, "second".into(), now)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Conflict { .. }));
        assert_eq!(wf.get(&inv.id).await.unwrap().step_progress[0].notes, "first");
    }

    #[tokio::test]
    async fn test_pause_blocks_step_edits_and_terminal_is_final() {
        let (_, wf) = workflow(InvestigationConfig::default()).await;
        let now = Utc::now();
        let inv = wf.start(start_request(), now).await.unwrap();
        let inv = wf.pause(&inv.id, inv.updated_at, now).await.unwrap();
        let err = wf.complete_step(&inv.id, inv.updated_at, now).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Paused { .. }));

        let inv = wf
            .close(&inv.id, inv.updated_at, "Duplicate of INC-42".into(), now)
            .await
            .unwrap();
        assert_eq!(inv.status, InvestigationStatus::Closed);
        let err = wf.resume(&inv.id, inv.updated_at, now).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Terminal { .. }));
    }

    #[tokio::test]
    async fn test_sequential_navigation() {
        let config = InvestigationConfig {
            navigation: StepNavigation::Sequential,
            ..Default::default()
        };
        let (_, wf) = workflow(config).await;
        let now = Utc::now();
        let inv = wf.start(start_request(), now).await.unwrap();
        let err = wf.navigate_to(&inv.id, inv.updated_at, 2, now).await.unwrap_err();
        assert!(matches!(err, WorkflowError::NavigationBlocked { index: 2, reached: 0 }));

        let inv = wf.skip_step(&inv.id, inv.updated_at, now).await.unwrap();
        let inv = wf.navigate_to(&inv.id, inv.updated_at, 0, now).await.unwrap();
        assert_eq!(inv.current_step_index, 0);
        let err = wf.navigate_to(&inv.id, inv.updated_at, 9, now).await.unwrap_err();
        assert!(matches!(err, WorkflowError::StepOutOfRange { index: 9, len: 3 }));
    }

    #[tokio::test]
    async fn test_link_requires_existing_incident() {
        let (_, wf) = workflow(InvestigationConfig::default()).await;
        let now = Utc::now();
        let inv = wf.start(start_request(), now).await.unwrap();
        let err = wf
            .link_incident(&inv.id, inv.updated_at, IncidentRef::Triaged("t-404".into()), now)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound { .. }));

        let inv = wf
            .link_finding(&inv.id, inv.updated_at, "Hash matches Emotet".into(), now)
            .await
            .unwrap();
        let evidence = wf.evidence(&inv.id).await.unwrap();
        assert_eq!(evidence.findings, vec!["Hash matches Emotet"]);
    }

    #[tokio::test]
    async fn test_current_step_view() {
        let (_, wf) = workflow(InvestigationConfig::default()).await;
        let now = Utc::now();
        let inv = wf.start(start_request(), now).await.unwrap();
        let view = wf.current_step(&inv.id).await.unwrap();
        assert_eq!(view.index, 0);
        assert_eq!(view.total, 3);
        assert_eq!(view.step.unwrap().checklist.len(), 2);
    }

    #[tokio::test]
    async fn test_playbook_steps_locked_while_investigation_open() {
        let (store, wf) = workflow(InvestigationConfig::default()).await;
        let now = Utc::now();
        let inv = wf.start(start_request(), now).await.unwrap();

        let mut extended = playbook();
        extended.steps.push(extended.steps[0].clone());
        extended.steps[3].id = "review".into();
        let err = wf.save_playbook(extended.clone()).await.unwrap_err();
        assert!(matches!(err, WorkflowError::PlaybookInUse { open: 1, .. }));
        let err = wf.delete_playbook("pb-custom").await.unwrap_err();
        assert!(matches!(err, WorkflowError::PlaybookInUse { .. }));

        // The store enforces the same rule for callers that bypass the workflow.
        assert!(store.upsert_playbook(extended.clone()).await.is_err());
        assert!(store.delete_playbook("pb-custom").await.is_err());

        let stored = store.playbook("pb-custom").await.unwrap().unwrap();
        assert_eq!(stored.steps.len(), inv.step_progress.len());

        // Metadata edits are fine; step edits once the investigation is closed.
        let mut renamed = playbook();
        renamed.name = "Custom (v2)".into();
        wf.save_playbook(renamed).await.unwrap();

        wf.close(&inv.id, inv.updated_at, "duplicate".into(), now)
            .await
            .unwrap();
        wf.save_playbook(extended).await.unwrap();
        wf.delete_playbook("pb-custom").await.unwrap();
    }

    #[tokio::test]
    async fn test_template_ids_are_reserved() {
        let (_, wf) = workflow(InvestigationConfig::default()).await;
        let mut squatter = playbook();
        squatter.id = "tpl-ransomware".into();
        let err = wf.save_playbook(squatter).await.unwrap_err();
        assert!(matches!(err, WorkflowError::ReservedPlaybookId { .. }));
    }
}
