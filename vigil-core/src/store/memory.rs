//! In-memory implementation of every store trait, optionally persisted to a
//! JSON snapshot file.
//!
//! Every guarded insert performs its existence check and its write under a
//! single write guard, so overlapping engine runs cannot both insert.
//! A file-backed store also holds an exclusive lock on `<snapshot>.lock` for
//! its whole lifetime, so two processes never load, mutate and overwrite the
//! same snapshot concurrently.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::{EventSource, IncidentStore, Insertion, RuleStore};
use crate::error::StoreError;
use crate::model::{
    ActionOutcome, ActiveInvestigation, AutoResponseLog, AutoResponseRule, CorrelatedIncident,
    CorrelationRule, InvestigationPlaybook, SecurityEvent, TriageRule, TriagedIncident,
};
use crate::persistence::{atomic_write_json, load_json};

/// Everything the store holds, in the shape written to the snapshot file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreState {
    pub events: BTreeMap<String, SecurityEvent>,
    pub correlation_rules: BTreeMap<String, CorrelationRule>,
    pub triage_rules: BTreeMap<String, TriageRule>,
    pub response_rules: BTreeMap<String, AutoResponseRule>,
    pub playbooks: BTreeMap<String, InvestigationPlaybook>,
    pub correlated: BTreeMap<String, CorrelatedIncident>,
    pub triaged: BTreeMap<String, TriagedIncident>,
    pub response_logs: Vec<AutoResponseLog>,
    pub investigations: BTreeMap<String, ActiveInvestigation>,
}

pub struct MemoryStore {
    state: RwLock<StoreState>,
    path: Option<PathBuf>,
    /// Released when the store is dropped.
    _lock: Option<File>,
}

impl MemoryStore {
    /// Create an empty, purely in-memory store.
    pub fn new() -> Self {
        Self::with_state(StoreState::default())
    }

    pub fn with_state(state: StoreState) -> Self {
        Self {
            state: RwLock::new(state),
            path: None,
            _lock: None,
        }
    }

    /// Open a store backed by a snapshot file. A missing file yields an empty store.
    ///
    /// Fails with [`StoreError::Locked`] while another store holds the snapshot.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let lock = acquire_lock(&path)?;
        let state: StoreState = load_json(&path)?.unwrap_or_default();
        tracing::debug!(
            path = %path.display(),
            events = state.events.len(),
            "Opened state snapshot"
        );
        Ok(Self {
            state: RwLock::new(state),
            path: Some(path),
            _lock: Some(lock),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Write the current state to the snapshot file, if the store has one.
    pub async fn persist(&self) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let state = self.state.read().await;
        atomic_write_json(path, &*state)?;
        Ok(())
    }

    pub async fn snapshot(&self) -> StoreState {
        self.state.read().await.clone()
    }

    /// Load events supplied by the external source. Returns how many were new.
    pub async fn insert_events(&self, events: Vec<SecurityEvent>) -> usize {
        let mut state = self.state.write().await;
        let mut added = 0;
        for event in events {
            if !state.events.contains_key(&event.id) {
                state.events.insert(event.id.clone(), event);
                added += 1;
            }
        }
        added
    }
}

/// Investigations on `playbook_id` that are not yet completed, escalated or closed.
fn open_investigations(state: &StoreState, playbook_id: &str) -> usize {
    state
        .investigations
        .values()
        .filter(|i| i.playbook_id == playbook_id && !i.status.is_terminal())
        .count()
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

fn acquire_lock(path: &Path) -> Result<File, StoreError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let lock_path = lock_path(path);
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)?;
    match file.try_lock() {
        Ok(()) => Ok(file),
        Err(TryLockError::WouldBlock) => Err(StoreError::Locked {
            path: path.display().to_string(),
        }),
        Err(TryLockError::Error(e)) => Err(StoreError::Io(e)),
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSource for MemoryStore {
    async fn events_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SecurityEvent>, StoreError> {
        let state = self.state.read().await;
        let mut events: Vec<SecurityEvent> = state
            .events
            .values()
            .filter(|e| e.timestamp >= start && e.timestamp <= end)
            .cloned()
            .collect();
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        Ok(events)
    }

    async fn event(&self, id: &str) -> Result<Option<SecurityEvent>, StoreError> {
        Ok(self.state.read().await.events.get(id).cloned())
    }
}

#[async_trait]
impl RuleStore for MemoryStore {
    async fn correlation_rules(&self) -> Result<Vec<CorrelationRule>, StoreError> {
        Ok(self.state.read().await.correlation_rules.values().cloned().collect())
    }

    async fn upsert_correlation_rule(&self, rule: CorrelationRule) -> Result<(), StoreError> {
        rule.validate()?;
        let mut state = self.state.write().await;
        state.correlation_rules.insert(rule.id.clone(), rule);
        Ok(())
    }

    async fn delete_correlation_rule(&self, id: &str) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if !state.correlation_rules.contains_key(id) {
            return Err(StoreError::not_found("correlation rule", id));
        }
        let open = state
            .correlated
            .values()
            .filter(|i| i.rule_id == id && i.status.is_open())
            .count();
        if open > 0 {
            return Err(StoreError::Rejected {
                message: format!("correlation rule '{id}' is referenced by {open} open incident(s)"),
            });
        }
        state.correlation_rules.remove(id);
        Ok(())
    }

    async fn triage_rules(&self) -> Result<Vec<TriageRule>, StoreError> {
        Ok(self.state.read().await.triage_rules.values().cloned().collect())
    }

    async fn upsert_triage_rule(&self, rule: TriageRule) -> Result<(), StoreError> {
        rule.validate()?;
        self.state
            .write()
            .await
            .triage_rules
            .insert(rule.id.clone(), rule);
        Ok(())
    }

    async fn delete_triage_rule(&self, id: &str) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .triage_rules
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("triage rule", id))
    }

    async fn response_rules(&self) -> Result<Vec<AutoResponseRule>, StoreError> {
        Ok(self.state.read().await.response_rules.values().cloned().collect())
    }

    async fn response_rule(&self, id: &str) -> Result<Option<AutoResponseRule>, StoreError> {
        Ok(self.state.read().await.response_rules.get(id).cloned())
    }

    async fn upsert_response_rule(&self, mut rule: AutoResponseRule) -> Result<(), StoreError> {
        rule.validate()?;
        let mut state = self.state.write().await;
        // Counters belong to the engine, not the rule editor.
        if let Some(existing) = state.response_rules.get(&rule.id) {
            rule.trigger_count = existing.trigger_count;
            rule.last_triggered = existing.last_triggered;
        }
        state.response_rules.insert(rule.id.clone(), rule);
        Ok(())
    }

    async fn delete_response_rule(&self, id: &str) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .response_rules
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("auto-response rule", id))
    }

    async fn record_trigger(
        &self,
        rule_id: &str,
        expected: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Option<AutoResponseRule>, StoreError> {
        let mut state = self.state.write().await;
        let rule = state
            .response_rules
            .get_mut(rule_id)
            .ok_or_else(|| StoreError::not_found("auto-response rule", rule_id))?;
        if rule.last_triggered != expected {
            return Ok(None);
        }
        rule.last_triggered = Some(now);
        rule.trigger_count += 1;
        Ok(Some(rule.clone()))
    }

    async fn release_trigger(
        &self,
        rule_id: &str,
        claimed_at: DateTime<Utc>,
        previous: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let rule = state
            .response_rules
            .get_mut(rule_id)
            .ok_or_else(|| StoreError::not_found("auto-response rule", rule_id))?;
        if rule.last_triggered != Some(claimed_at) {
            return Ok(false);
        }
        rule.last_triggered = previous;
        rule.trigger_count = rule.trigger_count.saturating_sub(1);
        Ok(true)
    }

    async fn playbooks(&self) -> Result<Vec<InvestigationPlaybook>, StoreError> {
        Ok(self.state.read().await.playbooks.values().cloned().collect())
    }

    async fn playbook(&self, id: &str) -> Result<Option<InvestigationPlaybook>, StoreError> {
        Ok(self.state.read().await.playbooks.get(id).cloned())
    }

    async fn insert_playbook_if_absent(
        &self,
        playbook: InvestigationPlaybook,
    ) -> Result<Insertion<InvestigationPlaybook>, StoreError> {
        playbook.validate()?;
        let mut state = self.state.write().await;
        if let Some(existing) = state.playbooks.get(&playbook.id) {
            return Ok(Insertion::Existing(existing.clone()));
        }
        state.playbooks.insert(playbook.id.clone(), playbook.clone());
        Ok(Insertion::Inserted(playbook))
    }

    async fn upsert_playbook(&self, playbook: InvestigationPlaybook) -> Result<(), StoreError> {
        playbook.validate()?;
        let mut state = self.state.write().await;
        if let Some(existing) = state.playbooks.get(&playbook.id) {
            if existing.is_template {
                return Err(StoreError::Rejected {
                    message: format!(
                        "playbook '{}' is a template and cannot be modified",
                        playbook.id
                    ),
                });
            }
            // Running investigations index into the step list.
            let open = open_investigations(&state, &playbook.id);
            if existing.steps != playbook.steps && open > 0 {
                return Err(StoreError::Rejected {
                    message: format!(
                        "playbook '{}' has {open} open investigation(s); its steps cannot change",
                        playbook.id
                    ),
                });
            }
        }
        state.playbooks.insert(playbook.id.clone(), playbook);
        Ok(())
    }

    async fn delete_playbook(&self, id: &str) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        match state.playbooks.get(id) {
            None => Err(StoreError::not_found("playbook", id)),
            Some(p) if p.is_template => Err(StoreError::Rejected {
                message: format!("playbook '{id}' is a template and cannot be deleted"),
            }),
            Some(_) => {
                let open = open_investigations(&state, id);
                if open > 0 {
                    return Err(StoreError::Rejected {
                        message: format!("playbook '{id}' has {open} open investigation(s)"),
                    });
                }
                state.playbooks.remove(id);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl IncidentStore for MemoryStore {
    async fn insert_correlated_if_absent(
        &self,
        incident: CorrelatedIncident,
    ) -> Result<Insertion<CorrelatedIncident>, StoreError> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.correlated.values().find(|i| i.duplicates(&incident)) {
            return Ok(Insertion::Existing(existing.clone()));
        }
        state.correlated.insert(incident.id.clone(), incident.clone());
        Ok(Insertion::Inserted(incident))
    }

    async fn correlated(&self, id: &str) -> Result<Option<CorrelatedIncident>, StoreError> {
        Ok(self.state.read().await.correlated.get(id).cloned())
    }

    async fn correlated_incidents(&self) -> Result<Vec<CorrelatedIncident>, StoreError> {
        let mut incidents: Vec<CorrelatedIncident> =
            self.state.read().await.correlated.values().cloned().collect();
        incidents.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(incidents)
    }

    async fn update_correlated(
        &self,
        incident: CorrelatedIncident,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let current = state
            .correlated
            .get(&incident.id)
            .ok_or_else(|| StoreError::not_found("correlated incident", &incident.id))?;
        if current.updated_at != expected_updated_at {
            return Err(StoreError::Conflict {
                kind: "correlated incident",
                id: incident.id,
            });
        }
        state.correlated.insert(incident.id.clone(), incident);
        Ok(())
    }

    async fn insert_triaged_if_absent(
        &self,
        incident: TriagedIncident,
    ) -> Result<Insertion<TriagedIncident>, StoreError> {
        let mut state = self.state.write().await;
        if let Some(existing) = state
            .triaged
            .values()
            .find(|t| t.security_event_id == incident.security_event_id)
        {
            return Ok(Insertion::Existing(existing.clone()));
        }
        state.triaged.insert(incident.id.clone(), incident.clone());
        Ok(Insertion::Inserted(incident))
    }

    async fn triaged_for_event(
        &self,
        event_id: &str,
    ) -> Result<Option<TriagedIncident>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .triaged
            .values()
            .find(|t| t.security_event_id == event_id)
            .cloned())
    }

    async fn triaged(&self, id: &str) -> Result<Option<TriagedIncident>, StoreError> {
        Ok(self.state.read().await.triaged.get(id).cloned())
    }

    async fn triaged_incidents(&self) -> Result<Vec<TriagedIncident>, StoreError> {
        let mut incidents: Vec<TriagedIncident> =
            self.state.read().await.triaged.values().cloned().collect();
        incidents.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(incidents)
    }

    async fn update_triaged(
        &self,
        incident: TriagedIncident,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let current = state
            .triaged
            .get(&incident.id)
            .ok_or_else(|| StoreError::not_found("triaged incident", &incident.id))?;
        if current.updated_at != expected_updated_at {
            return Err(StoreError::Conflict {
                kind: "triaged incident",
                id: incident.id,
            });
        }
        state.triaged.insert(incident.id.clone(), incident);
        Ok(())
    }

    async fn append_response_log(&self, entry: AutoResponseLog) -> Result<(), StoreError> {
        self.state.write().await.response_logs.push(entry);
        Ok(())
    }

    async fn complete_response_log(
        &self,
        id: &str,
        actions: Vec<ActionOutcome>,
        completed_at: DateTime<Utc>,
    ) -> Result<AutoResponseLog, StoreError> {
        let mut state = self.state.write().await;
        let entry = state
            .response_logs
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or_else(|| StoreError::not_found("auto-response log", id))?;
        if entry.is_complete() {
            return Err(StoreError::Rejected {
                message: format!("auto-response log '{id}' is already complete"),
            });
        }
        entry.actions_taken = actions;
        entry.completed_at = Some(completed_at);
        Ok(entry.clone())
    }

    async fn response_logs(
        &self,
        rule_id: Option<&str>,
    ) -> Result<Vec<AutoResponseLog>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .response_logs
            .iter()
            .filter(|l| rule_id.is_none_or(|id| l.rule_id == id))
            .cloned()
            .collect())
    }

    async fn insert_investigation(
        &self,
        investigation: ActiveInvestigation,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.investigations.contains_key(&investigation.id) {
            return Err(StoreError::Rejected {
                message: format!("investigation '{}' already exists", investigation.id),
            });
        }
        state
            .investigations
            .insert(investigation.id.clone(), investigation);
        Ok(())
    }

    async fn investigation(&self, id: &str) -> Result<Option<ActiveInvestigation>, StoreError> {
        Ok(self.state.read().await.investigations.get(id).cloned())
    }

    async fn investigations(&self) -> Result<Vec<ActiveInvestigation>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .investigations
            .values()
            .cloned()
            .collect())
    }

    async fn update_investigation(
        &self,
        investigation: ActiveInvestigation,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let current = state
            .investigations
            .get(&investigation.id)
            .ok_or_else(|| StoreError::not_found("investigation", &investigation.id))?;
        if current.updated_at != expected_updated_at {
            return Err(StoreError::Conflict {
                kind: "investigation",
                id: investigation.id,
            });
        }
        state
            .investigations
            .insert(investigation.id.clone(), investigation);
        Ok(())
    }
}
