//! Correlation engine: groups events by key and time window into correlated
//! incidents, scores them, and stores each (key, pattern, window) at most once.

pub mod scoring;
pub mod window;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use vigil_core::ai::AiAnalyst;
use vigil_core::config::CorrelationConfig;
use vigil_core::model::{
    ChainEvent, CorrelatedIncident, CorrelationRule, CorrelationStatus, SecurityEvent,
    ThreatIntelMatch,
};
use vigil_core::store::{EventSource, IncidentStore, Insertion, RuleStore, next_revision};

use crate::error::{EngineError, WorkflowError};

pub use scoring::{confidence_score, fidelity_score};
pub use window::{WindowMatch, find_windows};

/// Result of one correlation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationSummary {
    /// Qualifying groups found, including ones already stored.
    pub incidents_found: usize,
    /// Incidents newly stored by this run.
    pub incidents_saved: usize,
    pub rules_evaluated: usize,
    /// Rules skipped because they failed validation.
    pub rules_skipped: usize,
    pub saved_incident_ids: Vec<String>,
}

pub struct CorrelationEngine {
    events: Arc<dyn EventSource>,
    rules: Arc<dyn RuleStore>,
    incidents: Arc<dyn IncidentStore>,
    analyst: Arc<dyn AiAnalyst>,
    config: CorrelationConfig,
}

impl CorrelationEngine {
    pub fn new(
        events: Arc<dyn EventSource>,
        rules: Arc<dyn RuleStore>,
        incidents: Arc<dyn IncidentStore>,
        analyst: Arc<dyn AiAnalyst>,
        config: CorrelationConfig,
    ) -> Self {
        Self {
            events,
            rules,
            incidents,
            analyst,
            config,
        }
    }

    /// Correlate the last `window_hours` (or the configured default) of events.
    pub async fn run(&self, window_hours: Option<u32>) -> Result<CorrelationSummary, EngineError> {
        self.run_at(window_hours, Utc::now()).await
    }

    pub async fn run_at(
        &self,
        window_hours: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<CorrelationSummary, EngineError> {
        let hours = window_hours.unwrap_or(self.config.default_window_hours);
        let start = now - Duration::hours(i64::from(hours));
        tracing::info!(hours, "Starting correlation run");

        let mut rules = self.rules.correlation_rules().await?;
        let events = self.events.events_between(start, now).await?;
        rules.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));

        let mut summary = CorrelationSummary::default();
        for rule in rules.iter().filter(|r| r.enabled) {
            if let Err(e) = rule.validate() {
                tracing::warn!(rule = rule.id.as_str(), error = %e, "Skipping malformed correlation rule");
                summary.rules_skipped += 1;
                continue;
            }
            summary.rules_evaluated += 1;

            let candidates = self.evaluate_rule(rule, &events, now);
            summary.incidents_found += candidates.len();
            for candidate in candidates {
                match self.incidents.insert_correlated_if_absent(candidate).await? {
                    Insertion::Inserted(incident) => {
                        tracing::info!(
                            incident = incident.id.as_str(),
                            rule = rule.id.as_str(),
                            key = incident.correlation_key.as_str(),
                            events = incident.event_chain.len(),
                            fidelity = incident.fidelity_score,
                            "Correlated incident created"
                        );
                        summary.incidents_saved += 1;
                        summary.saved_incident_ids.push(incident.id.clone());
                        if self.config.request_narrative {
                            self.attach_narrative(incident, now).await;
                        }
                    }
                    Insertion::Existing(existing) => {
                        tracing::debug!(
                            incident = existing.id.as_str(),
                            key = existing.correlation_key.as_str(),
                            "Correlated incident already exists for this window"
                        );
                    }
                }
            }
        }

        tracing::info!(
            found = summary.incidents_found,
            saved = summary.incidents_saved,
            skipped = summary.rules_skipped,
            "Correlation run finished"
        );
        Ok(summary)
    }

    /// Evaluate one valid rule against `events` without touching any store.
    pub fn evaluate_rule(
        &self,
        rule: &CorrelationRule,
        events: &[SecurityEvent],
        now: DateTime<Utc>,
    ) -> Vec<CorrelatedIncident> {
        build_candidates(rule, events, now)
    }

    /// The narrative is optional; any collaborator failure leaves it empty.
    async fn attach_narrative(&self, mut incident: CorrelatedIncident, now: DateTime<Utc>) {
        let narrative = match self.analyst.narrate(&incident).await {
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(incident = incident.id.as_str(), error = %e, "No attack narrative");
                return;
            }
        };
        let expected = incident.updated_at;
        incident.attack_narrative = Some(narrative);
        incident.updated_at = next_revision(expected, now);
        if let Err(e) = self.incidents.update_correlated(incident, expected).await {
            tracing::warn!(error = %e, "Failed to store attack narrative");
        }
    }

    /// Operator-driven status change on a correlated incident.
    pub async fn update_status(
        &self,
        incident_id: &str,
        next: CorrelationStatus,
        now: DateTime<Utc>,
    ) -> Result<CorrelatedIncident, WorkflowError> {
        let mut incident = self
            .incidents
            .correlated(incident_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound {
                kind: "correlated incident",
                id: incident_id.to_string(),
            })?;
        if !incident.status.can_transition_to(next) {
            return Err(WorkflowError::InvalidTransition {
                from: incident.status.to_string(),
                to: next.to_string(),
            });
        }
        let expected = incident.updated_at;
        incident.status = next;
        incident.updated_at = next_revision(expected, now);
        self.incidents
            .update_correlated(incident.clone(), expected)
            .await?;
        tracing::info!(incident = incident_id, status = %next, "Correlated incident status changed");
        Ok(incident)
    }
}

/// Group, window and score events for one rule.
pub fn build_candidates(
    rule: &CorrelationRule,
    events: &[SecurityEvent],
    now: DateTime<Utc>,
) -> Vec<CorrelatedIncident> {
    let window = Duration::minutes(i64::from(rule.time_window_minutes));

    let mut groups: BTreeMap<String, Vec<&SecurityEvent>> = BTreeMap::new();
    for event in events.iter().filter(|e| rule.accepts(e)) {
        if let Some(key) = rule.key_for(event) {
            groups.entry(key).or_default().push(event);
        }
    }

    let mut incidents = Vec::new();
    for (key, mut group) in groups {
        group.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        for found in find_windows(&rule.pattern, window, &group) {
            incidents.push(assemble(rule, &key, found, window, now));
        }
    }
    incidents
}

fn assemble(
    rule: &CorrelationRule,
    key: &str,
    found: WindowMatch<'_>,
    window: Duration,
    now: DateTime<Utc>,
) -> CorrelatedIncident {
    let chain = &found.events;
    let span = match (chain.first(), chain.last()) {
        (Some(first), Some(last)) => (last.timestamp - first.timestamp).num_minutes().max(0),
        _ => 0,
    };

    let collect = |f: fn(&SecurityEvent) -> Option<&str>| -> Vec<String> {
        chain
            .iter()
            .filter_map(|e| f(e))
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    };

    let mut seen = BTreeSet::new();
    let threat_intel_matches: Vec<ThreatIntelMatch> = chain
        .iter()
        .flat_map(|e| e.threat_intel_matches.iter())
        .filter(|m| seen.insert((m.indicator.clone(), m.feed.clone())))
        .cloned()
        .collect();

    CorrelatedIncident {
        id: uuid::Uuid::new_v4().to_string(),
        rule_id: rule.id.clone(),
        rule_name: rule.name.clone(),
        correlation_type: rule.pattern_type(),
        correlation_key: key.to_string(),
        window_start: found.window_start,
        window_end: found.window_end,
        severity: rule.output_severity,
        sources_involved: collect(|e| Some(e.source.as_str())),
        event_chain: chain.iter().map(|e| ChainEvent::from(*e)).collect(),
        time_span_minutes: u32::try_from(span).unwrap_or(u32::MAX),
        fidelity_score: fidelity_score(chain, window),
        confidence_score: confidence_score(rule, chain.len()),
        attack_narrative: None,
        related_ips: collect(|e| e.ip_address.as_deref()),
        related_users: collect(|e| e.user.as_deref()),
        related_endpoints: collect(|e| e.endpoint_id.as_deref()),
        threat_intel_matches,
        mitre_techniques: rule.mitre_techniques.clone(),
        recommended_actions: rule.recommended_actions.clone(),
        status: CorrelationStatus::New,
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::ai::MockAnalyst;
    use vigil_core::model::{CorrelationField, CorrelationPattern, PatternType, Severity};
    use vigil_core::store::MemoryStore;

    fn brute_force_rule() -> CorrelationRule {
        CorrelationRule {
            id: "cr-brute".into(),
            name: "Brute force from one IP".into(),
            description: String::new(),
            enabled: true,
            priority: 1,
            pattern: CorrelationPattern::Threshold { count: 5 },
            correlation_keys: vec![CorrelationField::IpAddress],
            time_window_minutes: 15,
            event_types: vec!["login_failed".into()],
            output_severity: Severity::High,
            mitre_techniques: vec!["T1110".into()],
            recommended_actions: vec!["Block source IP".into()],
        }
    }

    fn failed_logins(now: DateTime<Utc>, ip: &str, n: i64) -> Vec<SecurityEvent> {
        (0..n)
            .map(|i| {
                SecurityEvent::new(
                    format!("{ip}-{i}"),
                    now - Duration::minutes(30) + Duration::minutes(i * 2),
                    Severity::Medium,
                    "login_failed",
                    "okta",
                )
                .with_ip(ip)
                .with_user(format!("user{}", i % 2))
            })
            .collect()
    }

    fn engine(store: &Arc<MemoryStore>, analyst: Arc<MockAnalyst>) -> CorrelationEngine {
        CorrelationEngine::new(
            store.clone(),
            store.clone(),
            store.clone(),
            analyst,
            CorrelationConfig::default(),
        )
    }

    #[test]
    fn test_build_candidates_groups_by_key() {
        let now = Utc::now();
        let mut events = failed_logins(now, "10.0.0.5", 6);
        events.extend(failed_logins(now, "10.0.0.9", 3));
        let incidents = build_candidates(&brute_force_rule(), &events, now);

        assert_eq!(incidents.len(), 1);
        let incident = &incidents[0];
        assert_eq!(incident.correlation_key, "10.0.0.5");
        assert_eq!(incident.correlation_type, PatternType::Threshold);
        assert_eq!(incident.event_chain.len(), 6);
        assert_eq!(incident.time_span_minutes, 10);
        assert_eq!(incident.related_users, vec!["user0", "user1"]);
        assert_eq!(incident.sources_involved, vec!["okta"]);
        assert_eq!(incident.severity, Severity::High);
    }

    #[test]
    fn test_event_type_filter_and_missing_key() {
        let now = Utc::now();
        let mut events = failed_logins(now, "10.0.0.5", 6);
        for e in events.iter_mut().take(2) {
            e.event_type = "login_ok".into();
        }
        events.push(SecurityEvent::new("no-ip", now, Severity::High, "login_failed", "okta"));
        // Only four failed logins carry the key.
        assert!(build_candidates(&brute_force_rule(), &events, now).is_empty());
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        store.insert_events(failed_logins(now, "10.0.0.5", 6)).await;
        store.upsert_correlation_rule(brute_force_rule()).await.unwrap();
        let engine = engine(&store, Arc::new(MockAnalyst::new()));

        let first = engine.run_at(Some(24), now).await.unwrap();
        assert_eq!(first.incidents_found, 1);
        assert_eq!(first.incidents_saved, 1);

        let second = engine.run_at(Some(24), now).await.unwrap();
        assert_eq!(second.incidents_found, 1);
        assert_eq!(second.incidents_saved, 0);
        assert_eq!(store.correlated_incidents().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_narrative_attached_when_available() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        store.insert_events(failed_logins(now, "10.0.0.5", 6)).await;
        store.upsert_correlation_rule(brute_force_rule()).await.unwrap();
        let analyst = Arc::new(MockAnalyst::new().with_narrative("Password spraying from 10.0.0.5"));
        let engine = engine(&store, analyst.clone());

        engine.run_at(Some(24), now).await.unwrap();
        let incidents = store.correlated_incidents().await.unwrap();
        assert_eq!(
            incidents[0].attack_narrative.as_deref(),
            Some("Password spraying from 10.0.0.5")
        );
        assert_eq!(analyst.narrate_calls(), 1);
    }

    #[tokio::test]
    async fn test_narrative_failure_is_not_fatal() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        store.insert_events(failed_logins(now, "10.0.0.5", 6)).await;
        store.upsert_correlation_rule(brute_force_rule()).await.unwrap();
        let engine = engine(&store, Arc::new(MockAnalyst::new()));

        let summary = engine.run_at(Some(24), now).await.unwrap();
        assert_eq!(summary.incidents_saved, 1);
        assert!(store.correlated_incidents().await.unwrap()[0]
            .attack_narrative
            .is_none());
    }

    #[tokio::test]
    async fn test_status_transitions() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        store.insert_events(failed_logins(now, "10.0.0.5", 6)).await;
        store.upsert_correlation_rule(brute_force_rule()).await.unwrap();
        let engine = engine(&store, Arc::new(MockAnalyst::new()));
        let summary = engine.run_at(Some(24), now).await.unwrap();
        let id = &summary.saved_incident_ids[0];

        let updated = engine
            .update_status(id, CorrelationStatus::Investigating, now)
            .await
            .unwrap();
        assert_eq!(updated.status, CorrelationStatus::Investigating);

        let err = engine
            .update_status(id, CorrelationStatus::New, now)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidTransition { .. }));
    }
}
