//! Triage classifier: assigns a response category and SLA to an event by
//! ordered rule match, falling back to the AI collaborator.

pub mod matcher;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use vigil_core::ai::{AiAnalyst, AiClassification, EventContext};
use vigil_core::config::TriageConfig;
use vigil_core::error::{AiError, StoreError};
use vigil_core::model::{
    SecurityEvent, TriageCategory, TriageMethod, TriageRule, TriageStatus, TriagedIncident,
    sla_deadline,
};
use vigil_core::store::{EventSource, IncidentStore, Insertion, RuleStore, next_revision};

use crate::error::{EngineError, WorkflowError};

pub use matcher::{ConditionMatch, evaluate_conditions};

/// Confidence of a rule match with no populated conditions.
const RULE_BASE_CONFIDENCE: usize = 50;
const RULE_CONFIDENCE_PER_CONDITION: usize = 10;

pub struct TriageClassifier {
    events: Arc<dyn EventSource>,
    rules: Arc<dyn RuleStore>,
    incidents: Arc<dyn IncidentStore>,
    analyst: Arc<dyn AiAnalyst>,
    config: TriageConfig,
}

impl TriageClassifier {
    pub fn new(
        events: Arc<dyn EventSource>,
        rules: Arc<dyn RuleStore>,
        incidents: Arc<dyn IncidentStore>,
        analyst: Arc<dyn AiAnalyst>,
        config: TriageConfig,
    ) -> Self {
        Self {
            events,
            rules,
            incidents,
            analyst,
            config,
        }
    }

    /// Triage one event. Safe to call repeatedly: an existing record for the
    /// event is returned unchanged.
    pub async fn triage(&self, event_id: &str) -> Result<Insertion<TriagedIncident>, EngineError> {
        self.triage_at(event_id, Utc::now()).await
    }

    pub async fn triage_at(
        &self,
        event_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Insertion<TriagedIncident>, EngineError> {
        if let Some(existing) = self.incidents.triaged_for_event(event_id).await? {
            tracing::debug!(event = event_id, incident = existing.id.as_str(), "Event already triaged");
            return Ok(Insertion::Existing(existing));
        }

        let event = self
            .events
            .event(event_id)
            .await?
            .ok_or_else(|| StoreError::not_found("security event", event_id))?;

        let rules = self.active_rules().await?;
        let incident = match classify_by_rules(&rules, &event, now) {
            Some(incident) => incident,
            None => self.fallback(&rules, event, now).await?,
        };

        let result = self.incidents.insert_triaged_if_absent(incident).await?;
        if let Insertion::Inserted(incident) = &result {
            tracing::info!(
                event = event_id,
                incident = incident.id.as_str(),
                category = %incident.category,
                method = ?incident.triage_method,
                "Event triaged"
            );
        }
        Ok(result)
    }

    /// Enabled, valid rules in evaluation order.
    async fn active_rules(&self) -> Result<Vec<TriageRule>, EngineError> {
        let mut rules: Vec<TriageRule> = self
            .rules
            .triage_rules()
            .await?
            .into_iter()
            .filter(|r| r.enabled)
            .filter(|r| match r.validate() {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(rule = r.id.as_str(), error = %e, "Skipping malformed triage rule");
                    false
                }
            })
            .collect();
        rules.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
        Ok(rules)
    }

    /// No rule matched: ask the AI collaborator, or degrade to a partial match.
    async fn fallback(
        &self,
        rules: &[TriageRule],
        event: SecurityEvent,
        now: DateTime<Utc>,
    ) -> Result<TriagedIncident, EngineError> {
        let partial: Vec<&TriageRule> = rules
            .iter()
            .filter(|r| evaluate_conditions(&r.conditions, &event).is_partial())
            .collect();

        let ai_error = if self.config.ai_fallback {
            let context = EventContext {
                event: event.clone(),
                partial_rule_matches: partial.iter().map(|r| r.name.clone()).collect(),
            };
            match self.analyst.classify(&context).await {
                Ok(classification) => return Ok(from_ai(classification, event, now)),
                Err(e) => e,
            }
        } else {
            AiError::Unavailable
        };

        match partial.first() {
            Some(rule) => {
                tracing::warn!(
                    event = event.id.as_str(),
                    rule = rule.id.as_str(),
                    error = %ai_error,
                    "AI unavailable, falling back to partial rule match"
                );
                Ok(from_partial_match(
                    rule,
                    event,
                    self.config.partial_match_confidence,
                    &ai_error,
                    now,
                ))
            }
            None => {
                tracing::warn!(
                    event = event.id.as_str(),
                    error = %ai_error,
                    "Event left untriaged"
                );
                Err(EngineError::ExternalServiceUnavailable(ai_error))
            }
        }
    }

    /// Operator-driven status change, guarded by the record's `updated_at`.
    pub async fn update_status(
        &self,
        incident_id: &str,
        next: TriageStatus,
        now: DateTime<Utc>,
    ) -> Result<TriagedIncident, WorkflowError> {
        let mut incident = self
            .incidents
            .triaged(incident_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound {
                kind: "triaged incident",
                id: incident_id.to_string(),
            })?;
        if incident.status.is_terminal() {
            return Err(WorkflowError::Terminal {
                id: incident.id,
                status: incident.status.to_string(),
            });
        }
        let expected = incident.updated_at;
        let from = incident.status;
        if !incident.transition(next, next_revision(expected, now)) {
            return Err(WorkflowError::InvalidTransition {
                from: from.to_string(),
                to: next.to_string(),
            });
        }
        self.incidents
            .update_triaged(incident.clone(), expected)
            .await?;
        tracing::info!(incident = incident_id, from = %from, to = %next, "Triage status changed");
        Ok(incident)
    }

    /// Open incidents past their SLA deadline at `now`.
    pub async fn overdue(&self, now: DateTime<Utc>) -> Result<Vec<TriagedIncident>, EngineError> {
        Ok(self
            .incidents
            .triaged_incidents()
            .await?
            .into_iter()
            .filter(|i| i.is_overdue(now))
            .collect())
    }
}

/// First enabled rule, in the given order, whose conditions all match.
pub fn classify_by_rules(
    rules: &[TriageRule],
    event: &SecurityEvent,
    now: DateTime<Utc>,
) -> Option<TriagedIncident> {
    rules
        .iter()
        .filter(|r| r.enabled)
        .find_map(|rule| {
            let matched = evaluate_conditions(&rule.conditions, event);
            matched.is_full().then(|| from_rule(rule, matched, event.clone(), now))
        })
}

fn rule_confidence(populated: usize) -> u8 {
    (RULE_BASE_CONFIDENCE + populated * RULE_CONFIDENCE_PER_CONDITION).min(100) as u8
}

fn new_incident(
    event: SecurityEvent,
    category: TriageCategory,
    method: TriageMethod,
    now: DateTime<Utc>,
) -> TriagedIncident {
    TriagedIncident {
        id: uuid::Uuid::new_v4().to_string(),
        security_event_id: event.id.clone(),
        category,
        status: TriageStatus::New,
        triage_method: method,
        confidence_score: 0,
        reasoning: String::new(),
        rule_id: None,
        investigation_steps: Vec::new(),
        documentation_links: Vec::new(),
        ai_analysis: None,
        sla_due_at: None,
        acknowledged_at: None,
        resolved_at: None,
        created_at: now,
        updated_at: now,
        event_snapshot: event,
    }
}

fn from_rule(
    rule: &TriageRule,
    matched: ConditionMatch,
    event: SecurityEvent,
    now: DateTime<Utc>,
) -> TriagedIncident {
    let mut incident = new_incident(event, rule.category, TriageMethod::Rule, now);
    incident.confidence_score = rule_confidence(matched.populated);
    incident.reasoning = if matched.populated == 0 {
        format!("Matched catch-all triage rule '{}'", rule.name)
    } else {
        format!(
            "Matched triage rule '{}' on {} condition categories",
            rule.name, matched.populated
        )
    };
    incident.rule_id = Some(rule.id.clone());
    incident.investigation_steps = rule.investigation_steps.clone();
    incident.documentation_links = rule.documentation_links.clone();
    incident.sla_due_at = sla_deadline(now, rule.sla_minutes);
    incident
}

fn from_ai(
    classification: AiClassification,
    event: SecurityEvent,
    now: DateTime<Utc>,
) -> TriagedIncident {
    let mut incident = new_incident(event, classification.category, TriageMethod::Ai, now);
    incident.confidence_score = classification.confidence_score;
    incident.reasoning = classification.reasoning;
    incident.investigation_steps = classification.investigation_steps;
    incident.ai_analysis = classification.ai_analysis;
    incident
}

fn from_partial_match(
    rule: &TriageRule,
    event: SecurityEvent,
    confidence: u8,
    cause: &AiError,
    now: DateTime<Utc>,
) -> TriagedIncident {
    let mut incident = new_incident(
        event,
        TriageCategory::RequiresInvestigation,
        TriageMethod::Rule,
        now,
    );
    incident.confidence_score = confidence.min(100);
    incident.reasoning = format!(
        "Partially matched triage rule '{}'; AI classification unavailable ({cause})",
        rule.name
    );
    incident.rule_id = Some(rule.id.clone());
    incident.investigation_steps = rule.investigation_steps.clone();
    incident.documentation_links = rule.documentation_links.clone();
    incident.sla_due_at = sla_deadline(now, rule.sla_minutes);
    incident
}
