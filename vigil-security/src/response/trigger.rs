//! Trigger-condition evaluation for auto-response rules.
//!
//! Populated categories are OR-ed: an event matches when its severity, event
//! type, threat-intel presence or endpoint posture hits any populated
//! category. An optional count threshold then requires enough matching events
//! inside the rule's trailing time window.

use chrono::{DateTime, Duration, Utc};
use vigil_core::model::{SecurityEvent, TriggerConditions};

/// Matching events and the human-readable reason the rule fired.
#[derive(Debug, Clone)]
pub struct TriggerMatch<'a> {
    pub events: Vec<&'a SecurityEvent>,
    pub reason: String,
}

/// Which populated categories an event hit.
fn hits(conditions: &TriggerConditions, event: &SecurityEvent) -> Vec<&'static str> {
    let mut hits = Vec::new();
    if conditions.severity.contains(&event.severity) {
        hits.push("severity");
    }
    if conditions.event_types.iter().any(|t| t == &event.event_type) {
        hits.push("event type");
    }
    if conditions.threat_intel_match && event.has_threat_intel() {
        hits.push("threat intel");
    }
    if event
        .endpoint_posture
        .is_some_and(|p| conditions.endpoint_posture.contains(&p))
    {
        hits.push("endpoint posture");
    }
    hits
}

pub fn event_matches(conditions: &TriggerConditions, event: &SecurityEvent) -> bool {
    !hits(conditions, event).is_empty()
}

/// Evaluate trigger conditions against `events` at `now`. `None` when the
/// rule does not fire.
pub fn evaluate_trigger<'a>(
    conditions: &TriggerConditions,
    events: &'a [SecurityEvent],
    now: DateTime<Utc>,
) -> Option<TriggerMatch<'a>> {
    let mut categories: Vec<&'static str> = Vec::new();
    let mut matching: Vec<&SecurityEvent> = Vec::new();
    for event in events {
        let event_hits = hits(conditions, event);
        if event_hits.is_empty() {
            continue;
        }
        for hit in event_hits {
            if !categories.contains(&hit) {
                categories.push(hit);
            }
        }
        matching.push(event);
    }

    if let Some(threshold) = conditions.event_count_threshold {
        let since = now - Duration::minutes(i64::from(conditions.time_window_minutes));
        matching.retain(|e| e.timestamp >= since && e.timestamp <= now);
        if matching.len() < threshold as usize {
            return None;
        }
    }
    if matching.is_empty() {
        return None;
    }

    let mut reason = format!(
        "{} matching event(s) on {}",
        matching.len(),
        categories.join(" or ")
    );
    if let Some(threshold) = conditions.event_count_threshold {
        reason.push_str(&format!(
            " (threshold {threshold} within {}m)",
            conditions.time_window_minutes
        ));
    }
    Some(TriggerMatch {
        events: matching,
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::model::{EndpointPosture, Severity};

    fn ev(id: &str, minutes_ago: i64, severity: Severity, now: DateTime<Utc>) -> SecurityEvent {
        SecurityEvent::new(id, now - Duration::minutes(minutes_ago), severity, "login_failed", "okta")
    }

    #[test]
    fn test_any_category_matches() {
        let now = Utc::now();
        let conditions = TriggerConditions {
            severity: vec![Severity::Critical],
            endpoint_posture: vec![EndpointPosture::NonCompliant],
            ..Default::default()
        };
        let events = vec![
            ev("crit", 1, Severity::Critical, now),
            ev("posture", 1, Severity::Low, now).with_posture(EndpointPosture::NonCompliant),
            ev("other", 1, Severity::Low, now),
        ];
        let found = evaluate_trigger(&conditions, &events, now).unwrap();
        let ids: Vec<&str> = found.events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["crit", "posture"]);
        assert!(found.reason.contains("severity or endpoint posture"));
    }

    #[test]
    fn test_no_match() {
        let now = Utc::now();
        let conditions = TriggerConditions {
            threat_intel_match: true,
            ..Default::default()
        };
        let events = vec![ev("a", 1, Severity::Critical, now)];
        assert!(evaluate_trigger(&conditions, &events, now).is_none());
    }

    #[test]
    fn test_count_threshold_uses_trailing_window() {
        let now = Utc::now();
        let conditions = TriggerConditions {
            severity: vec![Severity::High],
            event_count_threshold: Some(3),
            time_window_minutes: 10,
            ..Default::default()
        };
        let mut events = vec![
            ev("old1", 50, Severity::High, now),
            ev("old2", 40, Severity::High, now),
            ev("new1", 5, Severity::High, now),
            ev("new2", 2, Severity::High, now),
        ];
        assert!(evaluate_trigger(&conditions, &events, now).is_none());

        events.push(ev("new3", 1, Severity::High, now));
        let found = evaluate_trigger(&conditions, &events, now).unwrap();
        assert_eq!(found.events.len(), 3);
        assert!(found.reason.contains("threshold 3 within 10m"));
    }
}
