//! Property-based tests for scoring, windowing and investigation progress.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use proptest::prelude::*;
use vigil_core::config::InvestigationConfig;
use vigil_core::model::{
    CorrelationField, CorrelationPattern, CorrelationRule, InvestigationPlaybook, PlaybookStep,
    SecurityEvent, Severity, StepCategory,
};
use vigil_core::store::{MemoryStore, RuleStore};
use vigil_security::correlation::{confidence_score, fidelity_score, find_windows};
use vigil_security::{InvestigationWorkflow, StartInvestigation};

fn base() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-03-01T00:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

fn severity(n: u8) -> Severity {
    match n % 5 {
        0 => Severity::Info,
        1 => Severity::Low,
        2 => Severity::Medium,
        3 => Severity::High,
        _ => Severity::Critical,
    }
}

fn events_from(specs: &[(i64, u8, u8, bool)]) -> Vec<SecurityEvent> {
    let mut events: Vec<SecurityEvent> = specs
        .iter()
        .enumerate()
        .map(|(i, (offset, sev, source, intel))| {
            let event = SecurityEvent::new(
                format!("e{i}"),
                base() + Duration::minutes(*offset),
                severity(*sev),
                "login_failed",
                format!("source-{}", source % 8),
            );
            if *intel {
                event.with_threat_intel("198.51.100.9", "abuse.ch")
            } else {
                event
            }
        })
        .collect();
    events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
    events
}

fn rule(keys: usize, filtered: bool, pattern: CorrelationPattern) -> CorrelationRule {
    let fields = [
        CorrelationField::IpAddress,
        CorrelationField::User,
        CorrelationField::EndpointId,
        CorrelationField::EventType,
        CorrelationField::Source,
    ];
    CorrelationRule {
        id: "prop".into(),
        name: "prop".into(),
        description: String::new(),
        enabled: true,
        priority: 0,
        pattern,
        correlation_keys: fields[..keys.clamp(1, fields.len())].to_vec(),
        time_window_minutes: 30,
        event_types: if filtered {
            vec!["login_failed".into()]
        } else {
            Vec::new()
        },
        output_severity: Severity::High,
        mitre_techniques: Vec::new(),
        recommended_actions: Vec::new(),
    }
}

fn pattern_strategy() -> impl Strategy<Value = CorrelationPattern> {
    prop_oneof![
        (1usize..50).prop_map(|count| CorrelationPattern::Threshold { count }),
        prop::collection::vec("[a-z_]{1,12}", 2..12)
            .prop_map(|event_types| CorrelationPattern::Sequence { event_types }),
        (2usize..50).prop_map(|min_events| CorrelationPattern::Aggregation { min_events }),
        (2usize..10).prop_map(|min_sources| CorrelationPattern::MultiSource { min_sources }),
    ]
}

proptest! {
    #[test]
    fn fidelity_is_bounded(
        specs in prop::collection::vec((0i64..600, any::<u8>(), any::<u8>(), any::<bool>()), 0..40),
        window_minutes in 0i64..1440,
    ) {
        let events = events_from(&specs);
        let chain: Vec<&SecurityEvent> = events.iter().collect();
        let score = fidelity_score(&chain, Duration::minutes(window_minutes));
        prop_assert!(score <= 100);
        if chain.is_empty() {
            prop_assert_eq!(score, 0);
        }
    }

    #[test]
    fn confidence_is_bounded(
        keys in 1usize..6,
        filtered in any::<bool>(),
        pattern in pattern_strategy(),
        chain_len in 0usize..10_000,
    ) {
        let score = confidence_score(&rule(keys, filtered, pattern), chain_len);
        prop_assert!(score <= 100);
    }

    #[test]
    fn windows_never_overlap(
        specs in prop::collection::vec((0i64..600, any::<u8>(), any::<u8>(), Just(false)), 0..60),
        count in 1usize..6,
    ) {
        let events = events_from(&specs);
        let refs: Vec<&SecurityEvent> = events.iter().collect();
        let windows = find_windows(
            &CorrelationPattern::Threshold { count },
            Duration::minutes(30),
            &refs,
        );
        for pair in windows.windows(2) {
            prop_assert!(pair[1].window_start > pair[0].window_end);
        }
        for window in &windows {
            prop_assert!(window.events.len() >= count);
            for event in &window.events {
                prop_assert!(event.timestamp >= window.window_start);
                prop_assert!(event.timestamp <= window.window_end);
            }
        }
    }

    #[test]
    fn investigation_progress_stays_in_unit_interval(
        steps in 1usize..8,
        ops in prop::collection::vec((0u8..3, 0usize..10), 0..30),
    ) {
        tokio_test::block_on(async {
            let store = Arc::new(MemoryStore::new());
            store.upsert_playbook(playbook(steps)).await.unwrap();
            let workflow = InvestigationWorkflow::new(
                store.clone(),
                store.clone(),
                InvestigationConfig::default(),
            );
            let mut now = base();
            let mut inv = workflow
                .start(
                    StartInvestigation {
                        playbook_id: "prop-pb".into(),
                        ..Default::default()
                    },
                    now,
                )
                .await
                .unwrap();

            for (op, index) in ops {
                now += Duration::seconds(1);
                let result = match op {
                    0 => workflow.complete_step(&inv.id, inv.updated_at, now).await,
                    1 => workflow.skip_step(&inv.id, inv.updated_at, now).await,
                    _ => workflow.navigate_to(&inv.id, inv.updated_at, index, now).await,
                };
                if let Ok(updated) = result {
                    inv = updated;
                }
                let progress = inv.progress();
                assert!((0.0..=1.0).contains(&progress));
                assert!(inv.current_step_index < steps);
            }
        });
    }
}

fn playbook(steps: usize) -> InvestigationPlaybook {
    InvestigationPlaybook {
        id: "prop-pb".into(),
        name: "Property playbook".into(),
        description: String::new(),
        scenario_type: "custom".into(),
        severity: Severity::Medium,
        estimated_duration_minutes: 10,
        is_template: false,
        steps: (0..steps)
            .map(|i| PlaybookStep {
                id: format!("step-{i}"),
                title: format!("Step {i}"),
                category: StepCategory::Identification,
                description: String::new(),
                checklist: vec!["check".into()],
                data_queries: Vec::new(),
                recommended_actions: Vec::new(),
                mitre_techniques: Vec::new(),
            })
            .collect(),
    }
}
