//! Auto-response engine: evaluates rules against recent events and dispatches
//! remediation actions under a per-rule cooldown.
//!
//! A rule fires at most once per cooldown, even across overlapping runs: the
//! trigger is claimed with a compare-and-swap on `last_triggered` before any
//! action is dispatched. Actions run concurrently, each under its own timeout,
//! and every action's outcome is recorded whether or not its siblings failed.

pub mod executor;
pub mod trigger;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use vigil_core::config::ResponseConfig;
use vigil_core::error::StoreError;
use vigil_core::model::{
    ActionKind, ActionOutcome, ActionStatus, AutoResponseLog, AutoResponseRule, SecurityEvent,
    Severity,
};
use vigil_core::store::{EventSource, IncidentStore, RuleStore};

use crate::error::EngineError;

pub use executor::{
    ActionExecutor, ActionRequest, DryRunExecutor, ExecutionReport, ExecutorRegistry,
    WebhookExecutor,
};
pub use trigger::{TriggerMatch, evaluate_trigger, event_matches};

/// Look-back used when a run does not specify one.
pub const DEFAULT_WINDOW_MINUTES: u32 = 60;

/// What happened to one rule during a run.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleOutcome {
    NotMatched,
    OnCooldown { until: DateTime<Utc> },
    /// Another run claimed the trigger first.
    Superseded,
    Fired(AutoResponseLog),
}

/// Result of one auto-response run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseSummary {
    pub rules_evaluated: usize,
    pub rules_skipped: usize,
    pub rules_triggered: usize,
    pub rules_on_cooldown: usize,
    pub logs: Vec<AutoResponseLog>,
}

/// An action ready to dispatch, or one skipped before dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum PlannedAction {
    Dispatch(ActionRequest),
    Skip { action: ActionKind, detail: String },
}

pub struct ResponseEngine {
    events: Arc<dyn EventSource>,
    rules: Arc<dyn RuleStore>,
    incidents: Arc<dyn IncidentStore>,
    executors: Arc<ExecutorRegistry>,
    action_timeout: Duration,
    retry_idempotent: bool,
}

impl ResponseEngine {
    pub fn new(
        events: Arc<dyn EventSource>,
        rules: Arc<dyn RuleStore>,
        incidents: Arc<dyn IncidentStore>,
        executors: Arc<ExecutorRegistry>,
        config: &ResponseConfig,
    ) -> Self {
        Self {
            events,
            rules,
            incidents,
            executors,
            action_timeout: Duration::from_secs(config.action_timeout_secs),
            retry_idempotent: config.retry_idempotent_on_timeout,
        }
    }

    pub fn with_action_timeout(mut self, timeout: Duration) -> Self {
        self.action_timeout = timeout;
        self
    }

    pub async fn run(&self, window_minutes: Option<u32>) -> Result<ResponseSummary, EngineError> {
        self.run_at(window_minutes, Utc::now()).await
    }

    /// Evaluate every enabled rule against events from the trailing window.
    pub async fn run_at(
        &self,
        window_minutes: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<ResponseSummary, EngineError> {
        let minutes = window_minutes.unwrap_or(DEFAULT_WINDOW_MINUTES);
        tracing::info!(minutes, "Starting auto-response run");

        let mut rules = self.rules.response_rules().await?;
        rules.sort_by(|a, b| a.id.cmp(&b.id));
        let events = self.window_events(minutes, now).await?;

        let mut summary = ResponseSummary::default();
        for rule in rules.iter().filter(|r| r.enabled) {
            if let Err(e) = rule.validate() {
                tracing::warn!(rule = rule.id.as_str(), error = %e, "Skipping malformed auto-response rule");
                summary.rules_skipped += 1;
                continue;
            }
            summary.rules_evaluated += 1;
            match self.execute_rule(rule, &events, now).await? {
                RuleOutcome::Fired(log) => {
                    summary.rules_triggered += 1;
                    summary.logs.push(log);
                }
                RuleOutcome::OnCooldown { .. } => summary.rules_on_cooldown += 1,
                RuleOutcome::NotMatched | RuleOutcome::Superseded => {}
            }
        }

        tracing::info!(
            evaluated = summary.rules_evaluated,
            triggered = summary.rules_triggered,
            cooldown = summary.rules_on_cooldown,
            "Auto-response run finished"
        );
        Ok(summary)
    }

    /// Evaluate a single rule, e.g. to test it after editing. Disabled rules
    /// are evaluated too.
    pub async fn run_rule_at(
        &self,
        rule_id: &str,
        window_minutes: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<RuleOutcome, EngineError> {
        let rule = self
            .rules
            .response_rule(rule_id)
            .await?
            .ok_or_else(|| StoreError::not_found("auto-response rule", rule_id))?;
        rule.validate()?;
        let events = self
            .window_events(window_minutes.unwrap_or(DEFAULT_WINDOW_MINUTES), now)
            .await?;
        self.execute_rule(&rule, &events, now).await
    }

    async fn window_events(
        &self,
        minutes: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<SecurityEvent>, EngineError> {
        let start = now - chrono::Duration::minutes(i64::from(minutes));
        Ok(self.events.events_between(start, now).await?)
    }

    async fn execute_rule(
        &self,
        rule: &AutoResponseRule,
        events: &[SecurityEvent],
        now: DateTime<Utc>,
    ) -> Result<RuleOutcome, EngineError> {
        let Some(trigger) = evaluate_trigger(&rule.trigger_conditions, events, now) else {
            return Ok(RuleOutcome::NotMatched);
        };

        if !rule.is_off_cooldown(now) {
            let until = rule.last_triggered.unwrap_or(now)
                + chrono::Duration::minutes(i64::from(rule.cooldown_minutes));
            tracing::debug!(rule = rule.id.as_str(), until = %until, "Rule is within cooldown");
            return Ok(RuleOutcome::OnCooldown { until });
        }

        // Claim the trigger before acting so a concurrent run cannot fire too.
        if self
            .rules
            .record_trigger(&rule.id, rule.last_triggered, now)
            .await?
            .is_none()
        {
            tracing::debug!(rule = rule.id.as_str(), "Trigger already claimed by another run");
            return Ok(RuleOutcome::Superseded);
        }

        let planned = plan_actions(rule, &trigger);
        let pending = AutoResponseLog {
            id: uuid::Uuid::new_v4().to_string(),
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            trigger_reason: trigger.reason,
            event_ids: trigger.events.iter().map(|e| e.id.clone()).collect(),
            actions_taken: Vec::new(),
            executed_at: now,
            completed_at: None,
        };

        // No action is dispatched without an audit entry. If the entry cannot
        // be written, hand the trigger back so the rule is not left on cooldown.
        if let Err(e) = self.incidents.append_response_log(pending.clone()).await {
            match self
                .rules
                .release_trigger(&rule.id, now, rule.last_triggered)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!(rule = rule.id.as_str(), "Trigger was reclaimed before it could be released")
                }
                Err(release) => {
                    tracing::warn!(rule = rule.id.as_str(), error = %release, "Failed to release trigger")
                }
            }
            return Err(e.into());
        }

        let outcomes = join_all(planned.into_iter().map(|p| self.dispatch(p))).await;
        let log = match self
            .incidents
            .complete_response_log(&pending.id, outcomes, now)
            .await
        {
            Ok(log) => log,
            Err(e) => {
                tracing::warn!(
                    rule = rule.id.as_str(),
                    log = pending.id.as_str(),
                    error = %e,
                    "Actions dispatched but their outcomes could not be stored"
                );
                return Err(e.into());
            }
        };

        let failed = log
            .actions_taken
            .iter()
            .filter(|o| o.status == ActionStatus::Failed)
            .count();
        tracing::info!(
            rule = rule.id.as_str(),
            actions = log.actions_taken.len(),
            failed,
            "Auto-response rule fired"
        );
        Ok(RuleOutcome::Fired(log))
    }

    async fn dispatch(&self, planned: PlannedAction) -> ActionOutcome {
        let request = match planned {
            PlannedAction::Skip { action, detail } => {
                return ActionOutcome {
                    action,
                    status: ActionStatus::Skipped,
                    target: None,
                    detail: Some(detail),
                };
            }
            PlannedAction::Dispatch(request) => request,
        };

        let action = request.kind();
        let target = request.target();
        let outcome = |status: ActionStatus, detail: Option<String>| ActionOutcome {
            action,
            status,
            target: target.clone(),
            detail,
        };

        let Some(executor) = self.executors.get(action) else {
            return outcome(
                ActionStatus::Skipped,
                Some(format!("no executor registered for {action}")),
            );
        };

        let attempts = if self.retry_idempotent && action.is_idempotent() {
            2
        } else {
            1
        };
        for attempt in 1..=attempts {
            match tokio::time::timeout(self.action_timeout, executor.execute(&request)).await {
                Ok(Ok(report)) => return outcome(report.status, report.detail),
                Ok(Err(e)) => {
                    tracing::warn!(action = %action, target = ?target, error = %e, "Action failed");
                    return outcome(ActionStatus::Failed, Some(e.to_string()));
                }
                Err(_) if attempt < attempts => {
                    tracing::warn!(action = %action, target = ?target, "Action timed out; retrying once");
                }
                Err(_) => {
                    tracing::warn!(action = %action, target = ?target, "Action timed out");
                }
            }
        }
        let retried = if attempts > 1 { " (retried once)" } else { "" };
        outcome(
            ActionStatus::Failed,
            Some(format!(
                "timed out after {}ms{retried}",
                self.action_timeout.as_millis()
            )),
        )
    }
}

/// Turn a rule's enabled actions into concrete requests, one per target.
pub fn plan_actions(rule: &AutoResponseRule, trigger: &TriggerMatch<'_>) -> Vec<PlannedAction> {
    let actions = &rule.actions;
    let events = &trigger.events;
    let ips = distinct(events, |e| e.ip_address.as_deref());
    let endpoints = distinct(events, |e| e.endpoint_id.as_deref());

    let mut planned = Vec::new();
    for kind in actions.enabled_kinds() {
        match kind {
            ActionKind::BlockIp => per_target(&mut planned, kind, &ips, "no IP address on matching events", |ip| {
                ActionRequest::BlockIp {
                    ip,
                    duration_minutes: actions.block_ip.duration_minutes,
                }
            }),
            ActionKind::IsolateEndpoint => per_target(
                &mut planned,
                kind,
                &endpoints,
                "no endpoint on matching events",
                |endpoint_id| ActionRequest::IsolateEndpoint { endpoint_id },
            ),
            ActionKind::TriggerVulnScan => {
                let targets = if endpoints.is_empty() { &ips } else { &endpoints };
                per_target(&mut planned, kind, targets, "no scan target on matching events", |target| {
                    ActionRequest::TriggerVulnScan {
                        target,
                        scan_type: actions.trigger_vuln_scan.scan_type.clone(),
                    }
                })
            }
            ActionKind::NotifyEmail => planned.push(PlannedAction::Dispatch(ActionRequest::NotifyEmail {
                recipients: actions.notify_email.recipients.clone(),
                subject: format!("[Vigil] Auto-response rule '{}' fired", rule.name),
                message: notification_body(rule, trigger),
            })),
            ActionKind::CreateInAppAlert => {
                planned.push(PlannedAction::Dispatch(ActionRequest::CreateInAppAlert {
                    title: rule.name.clone(),
                    message: trigger.reason.clone(),
                    severity: events
                        .iter()
                        .map(|e| e.severity)
                        .max()
                        .unwrap_or(Severity::Medium),
                }))
            }
            ActionKind::EscalateSeverity => {
                planned.push(PlannedAction::Dispatch(ActionRequest::EscalateSeverity {
                    target: actions.escalate_severity.target,
                    event_ids: events.iter().map(|e| e.id.clone()).collect(),
                }))
            }
        }
    }
    planned
}

fn per_target(
    planned: &mut Vec<PlannedAction>,
    kind: ActionKind,
    targets: &[String],
    missing: &str,
    build: impl Fn(String) -> ActionRequest,
) {
    if targets.is_empty() {
        planned.push(PlannedAction::Skip {
            action: kind,
            detail: missing.to_string(),
        });
        return;
    }
    planned.extend(targets.iter().cloned().map(|t| PlannedAction::Dispatch(build(t))));
}

fn distinct(events: &[&SecurityEvent], field: fn(&SecurityEvent) -> Option<&str>) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| field(e))
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn notification_body(rule: &AutoResponseRule, trigger: &TriggerMatch<'_>) -> String {
    let mut body = format!("Rule '{}' fired: {}.\n\nEvents:\n", rule.name, trigger.reason);
    for event in &trigger.events {
        body.push_str(&format!(
            "- [{}] {} {}\n",
            event.severity,
            event.timestamp.to_rfc3339(),
            event.summary()
        ));
    }
    body
}
