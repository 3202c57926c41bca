//! Triage condition evaluation.
//!
//! Within a category any listed value may match; every populated category
//! must match for the rule to apply. A rule with no populated categories
//! matches every event.

use vigil_core::model::{SecurityEvent, TriageConditions};

/// How many populated condition categories an event satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConditionMatch {
    pub populated: usize,
    pub matched: usize,
}

impl ConditionMatch {
    pub fn is_full(self) -> bool {
        self.matched == self.populated
    }

    /// Some, but not all, populated categories matched.
    pub fn is_partial(self) -> bool {
        self.matched > 0 && self.matched < self.populated
    }
}

pub fn evaluate_conditions(conditions: &TriageConditions, event: &SecurityEvent) -> ConditionMatch {
    let checks = [
        (!conditions.severities.is_empty())
            .then(|| conditions.severities.contains(&event.severity)),
        (!conditions.event_types.is_empty())
            .then(|| conditions.event_types.iter().any(|t| t == &event.event_type)),
        conditions
            .threat_intel_match
            .map(|wanted| event.has_threat_intel() == wanted),
        (!conditions.endpoint_postures.is_empty()).then(|| {
            event
                .endpoint_posture
                .is_some_and(|p| conditions.endpoint_postures.contains(&p))
        }),
        (!conditions.keywords.is_empty()).then(|| keywords_match(&conditions.keywords, event)),
    ];

    ConditionMatch {
        populated: checks.iter().flatten().count(),
        matched: checks.iter().flatten().filter(|hit| **hit).count(),
    }
}

fn keywords_match(keywords: &[String], event: &SecurityEvent) -> bool {
    let haystack = format!("{} {}", event.event_type, event.description).to_lowercase();
    keywords
        .iter()
        .any(|k| haystack.contains(&k.trim().to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use vigil_core::model::{EndpointPosture, Severity};

    fn event() -> SecurityEvent {
        SecurityEvent::new("e1", Utc::now(), Severity::High, "malware_detected", "edr")
            .with_description("Emotet loader quarantined on FIN-LT-22")
            .with_posture(EndpointPosture::AtRisk)
    }

    #[test]
    fn test_empty_conditions_match_everything() {
        let m = evaluate_conditions(&TriageConditions::default(), &event());
        assert_eq!(m, ConditionMatch { populated: 0, matched: 0 });
        assert!(m.is_full());
        assert!(!m.is_partial());
    }

    #[test]
    fn test_all_categories_must_match() {
        let conditions = TriageConditions {
            severities: vec![Severity::High, Severity::Critical],
            endpoint_postures: vec![EndpointPosture::AtRisk],
            keywords: vec!["EMOTET".into()],
            ..Default::default()
        };
        let m = evaluate_conditions(&conditions, &event());
        assert_eq!(m.populated, 3);
        assert!(m.is_full());

        let conditions = TriageConditions {
            severities: vec![Severity::Critical],
            keywords: vec!["emotet".into()],
            ..Default::default()
        };
        let m = evaluate_conditions(&conditions, &event());
        assert!(!m.is_full());
        assert!(m.is_partial());
    }

    #[test]
    fn test_threat_intel_flag() {
        let requires = TriageConditions {
            threat_intel_match: Some(true),
            ..Default::default()
        };
        assert!(!evaluate_conditions(&requires, &event()).is_full());
        let with_intel = event().with_threat_intel("45.9.148.3", "feodo");
        assert!(evaluate_conditions(&requires, &with_intel).is_full());

        let forbids = TriageConditions {
            threat_intel_match: Some(false),
            ..Default::default()
        };
        assert!(evaluate_conditions(&forbids, &event()).is_full());
    }

    #[test]
    fn test_missing_posture_does_not_match() {
        let conditions = TriageConditions {
            endpoint_postures: vec![EndpointPosture::Critical],
            ..Default::default()
        };
        let mut e = event();
        e.endpoint_posture = None;
        assert_eq!(evaluate_conditions(&conditions, &e).matched, 0);
    }
}
