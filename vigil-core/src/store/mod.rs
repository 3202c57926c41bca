//! Persistence collaborators.
//!
//! The event source, rule store and incident store are external systems; the
//! engines only see these traits. [`MemoryStore`] implements all three and can
//! be backed by a JSON snapshot file.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::error::StoreError;
use crate::model::{
    ActionOutcome, ActiveInvestigation, AutoResponseLog, AutoResponseRule, CorrelatedIncident,
    CorrelationRule, InvestigationPlaybook, SecurityEvent, TriageRule, TriagedIncident,
};

pub use memory::{MemoryStore, StoreState};

/// Result of a guarded insert: either the new record or the one already present.
#[derive(Debug, Clone, PartialEq)]
pub enum Insertion<T> {
    Inserted(T),
    Existing(T),
}

impl<T> Insertion<T> {
    pub fn was_inserted(&self) -> bool {
        matches!(self, Insertion::Inserted(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            Insertion::Inserted(v) | Insertion::Existing(v) => v,
        }
    }
}

/// Supplies timestamped security events.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Events with `start <= timestamp <= end`, ordered by timestamp.
    async fn events_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SecurityEvent>, StoreError>;

    async fn event(&self, id: &str) -> Result<Option<SecurityEvent>, StoreError>;
}

/// Persists correlation, triage and auto-response rules plus playbooks.
///
/// Upserts validate the record and reject malformed shapes with
/// [`StoreError::Invalid`].
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn correlation_rules(&self) -> Result<Vec<CorrelationRule>, StoreError>;
    async fn upsert_correlation_rule(&self, rule: CorrelationRule) -> Result<(), StoreError>;
    /// Rejected while an open correlated incident still references the rule.
    async fn delete_correlation_rule(&self, id: &str) -> Result<(), StoreError>;

    async fn triage_rules(&self) -> Result<Vec<TriageRule>, StoreError>;
    async fn upsert_triage_rule(&self, rule: TriageRule) -> Result<(), StoreError>;
    async fn delete_triage_rule(&self, id: &str) -> Result<(), StoreError>;

    async fn response_rules(&self) -> Result<Vec<AutoResponseRule>, StoreError>;
    async fn response_rule(&self, id: &str) -> Result<Option<AutoResponseRule>, StoreError>;
    async fn upsert_response_rule(&self, rule: AutoResponseRule) -> Result<(), StoreError>;
    async fn delete_response_rule(&self, id: &str) -> Result<(), StoreError>;

    /// Compare-and-swap on the rule's trigger counters.
    ///
    /// Writes `last_triggered = now` and increments `trigger_count` only if the
    /// stored `last_triggered` still equals `expected`. Returns the updated rule,
    /// or `None` when another writer got there first.
    async fn record_trigger(
        &self,
        rule_id: &str,
        expected: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Option<AutoResponseRule>, StoreError>;

    /// Undo a claim made by [`record_trigger`](RuleStore::record_trigger) at
    /// `claimed_at`, restoring `previous`. Returns `false` if the rule has
    /// been triggered again since.
    async fn release_trigger(
        &self,
        rule_id: &str,
        claimed_at: DateTime<Utc>,
        previous: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError>;

    async fn playbooks(&self) -> Result<Vec<InvestigationPlaybook>, StoreError>;
    async fn playbook(&self, id: &str) -> Result<Option<InvestigationPlaybook>, StoreError>;
    async fn insert_playbook_if_absent(
        &self,
        playbook: InvestigationPlaybook,
    ) -> Result<Insertion<InvestigationPlaybook>, StoreError>;
    /// Template playbooks cannot be overwritten.
    async fn upsert_playbook(&self, playbook: InvestigationPlaybook) -> Result<(), StoreError>;
    /// Template playbooks cannot be deleted.
    async fn delete_playbook(&self, id: &str) -> Result<(), StoreError>;
}

/// Persists engine output: correlated and triaged incidents, the response
/// audit log, and active investigations.
#[async_trait]
pub trait IncidentStore: Send + Sync {
    /// Insert unless an incident for the same burst exists: the same
    /// [`IncidentKey`](crate::model::IncidentKey), or the same key and pattern
    /// sharing an event (see [`CorrelatedIncident::duplicates`]). The check
    /// and the insert are atomic.
    async fn insert_correlated_if_absent(
        &self,
        incident: CorrelatedIncident,
    ) -> Result<Insertion<CorrelatedIncident>, StoreError>;
    async fn correlated(&self, id: &str) -> Result<Option<CorrelatedIncident>, StoreError>;
    async fn correlated_incidents(&self) -> Result<Vec<CorrelatedIncident>, StoreError>;
    async fn update_correlated(
        &self,
        incident: CorrelatedIncident,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Insert unless the event already has a triage record. Atomic.
    async fn insert_triaged_if_absent(
        &self,
        incident: TriagedIncident,
    ) -> Result<Insertion<TriagedIncident>, StoreError>;
    async fn triaged_for_event(&self, event_id: &str)
    -> Result<Option<TriagedIncident>, StoreError>;
    async fn triaged(&self, id: &str) -> Result<Option<TriagedIncident>, StoreError>;
    async fn triaged_incidents(&self) -> Result<Vec<TriagedIncident>, StoreError>;
    async fn update_triaged(
        &self,
        incident: TriagedIncident,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Append-only; entries are never removed.
    async fn append_response_log(&self, entry: AutoResponseLog) -> Result<(), StoreError>;
    /// Store the outcomes of a pending entry. A completed entry is never
    /// rewritten: completing it again is [`StoreError::Rejected`].
    async fn complete_response_log(
        &self,
        id: &str,
        actions: Vec<ActionOutcome>,
        completed_at: DateTime<Utc>,
    ) -> Result<AutoResponseLog, StoreError>;
    async fn response_logs(
        &self,
        rule_id: Option<&str>,
    ) -> Result<Vec<AutoResponseLog>, StoreError>;

    async fn insert_investigation(
        &self,
        investigation: ActiveInvestigation,
    ) -> Result<(), StoreError>;
    async fn investigation(&self, id: &str) -> Result<Option<ActiveInvestigation>, StoreError>;
    async fn investigations(&self) -> Result<Vec<ActiveInvestigation>, StoreError>;
    /// Optimistic write: fails with [`StoreError::Conflict`] unless the stored
    /// `updated_at` equals `expected_updated_at`.
    async fn update_investigation(
        &self,
        investigation: ActiveInvestigation,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

/// Next `updated_at` revision: `now`, or one microsecond past `previous` when
/// the clock has not advanced, so a concurrent stale writer is always detected.
pub fn next_revision(previous: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    if now > previous {
        now
    } else {
        previous + Duration::microseconds(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_revision_is_strictly_increasing() {
        let t = Utc::now();
        assert_eq!(next_revision(t, t + Duration::seconds(1)), t + Duration::seconds(1));
        assert!(next_revision(t, t) > t);
        assert!(next_revision(t, t - Duration::seconds(5)) > t);
    }

    #[test]
    fn test_insertion_helpers() {
        assert!(Insertion::Inserted(1).was_inserted());
        assert!(!Insertion::Existing(1).was_inserted());
        assert_eq!(Insertion::Existing(7).into_inner(), 7);
    }
}
