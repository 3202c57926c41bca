//! Fidelity and confidence scoring for correlated incidents.
//!
//! Both scores are integers in `[0, 100]` for any input.

use std::collections::BTreeSet;

use chrono::Duration;
use vigil_core::model::{CorrelationRule, SecurityEvent};

const SOURCE_WEIGHT: f64 = 30.0;
const SEVERITY_WEIGHT: f64 = 30.0;
const THREAT_INTEL_BONUS: f64 = 20.0;
const COMPACTNESS_WEIGHT: f64 = 20.0;
/// Distinct sources beyond this count add nothing.
const SOURCE_SATURATION: usize = 5;

const CONDITION_POINTS: usize = 10;
const CONDITION_CAP: usize = 50;
const CHAIN_POINTS: usize = 5;
const CHAIN_CAP: usize = 50;

/// Weighted combination of source diversity, severity mix, threat-intel
/// presence and time compactness.
pub fn fidelity_score(chain: &[&SecurityEvent], window: Duration) -> u8 {
    if chain.is_empty() {
        return 0;
    }

    let sources = chain
        .iter()
        .map(|e| e.source.as_str())
        .collect::<BTreeSet<_>>()
        .len();
    let source_part =
        sources.min(SOURCE_SATURATION) as f64 / SOURCE_SATURATION as f64 * SOURCE_WEIGHT;

    let severity_mix =
        chain.iter().map(|e| e.severity.weight()).sum::<f64>() / chain.len() as f64;
    let severity_part = severity_mix * SEVERITY_WEIGHT;

    let intel_part = if chain.iter().any(|e| e.has_threat_intel()) {
        THREAT_INTEL_BONUS
    } else {
        0.0
    };

    let compactness_part = compactness(chain, window) * COMPACTNESS_WEIGHT;

    clamp_score(source_part + severity_part + intel_part + compactness_part)
}

/// Rule specificity plus chain size.
pub fn confidence_score(rule: &CorrelationRule, chain_len: usize) -> u8 {
    let specificity = (rule.condition_count() * CONDITION_POINTS).min(CONDITION_CAP);
    let volume = chain_len.saturating_mul(CHAIN_POINTS).min(CHAIN_CAP);
    clamp_score((specificity + volume) as f64)
}

/// 1.0 for a chain that happens at one instant, 0.0 for one spanning the whole window.
fn compactness(chain: &[&SecurityEvent], window: Duration) -> f64 {
    let window_secs = window.num_seconds();
    if window_secs <= 0 {
        return 0.0;
    }
    let (Some(first), Some(last)) = (
        chain.iter().map(|e| e.timestamp).min(),
        chain.iter().map(|e| e.timestamp).max(),
    ) else {
        return 0.0;
    };
    let span = (last - first).num_seconds() as f64;
    (1.0 - span / window_secs as f64).clamp(0.0, 1.0)
}

pub(crate) fn clamp_score(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use vigil_core::model::{CorrelationField, CorrelationPattern, Severity};

    fn event(id: &str, offset_min: i64, severity: Severity, source: &str) -> SecurityEvent {
        SecurityEvent::new(
            id,
            Utc::now() + Duration::minutes(offset_min),
            severity,
            "login_failed",
            source,
        )
    }

    #[test]
    fn test_fidelity_extremes() {
        let low: Vec<SecurityEvent> = vec![
            event("a", 0, Severity::Info, "okta"),
            event("b", 15, Severity::Info, "okta"),
        ];
        let low_refs: Vec<&SecurityEvent> = low.iter().collect();
        // One source (6) + info mix (0) + no intel + zero compactness.
        assert_eq!(fidelity_score(&low_refs, Duration::minutes(15)), 6);

        let high: Vec<SecurityEvent> = ["edr", "fw", "proxy", "dns", "mail"]
            .iter()
            .enumerate()
            .map(|(i, s)| {
                event(&format!("e{i}"), 0, Severity::Critical, s).with_threat_intel("1.2.3.4", "abuse.ch")
            })
            .collect();
        let high_refs: Vec<&SecurityEvent> = high.iter().collect();
        assert_eq!(fidelity_score(&high_refs, Duration::minutes(15)), 100);
    }

    #[test]
    fn test_fidelity_prefers_tighter_chains() {
        let tight = [
            event("a", 0, Severity::High, "okta"),
            event("b", 1, Severity::High, "okta"),
        ];
        let loose = [
            event("a", 0, Severity::High, "okta"),
            event("b", 14, Severity::High, "okta"),
        ];
        let t: Vec<&SecurityEvent> = tight.iter().collect();
        let l: Vec<&SecurityEvent> = loose.iter().collect();
        assert!(fidelity_score(&t, Duration::minutes(15)) > fidelity_score(&l, Duration::minutes(15)));
    }

    #[test]
    fn test_fidelity_empty_chain() {
        assert_eq!(fidelity_score(&[], Duration::minutes(15)), 0);
    }

    #[test]
    fn test_confidence_caps() {
        let rule = CorrelationRule {
            id: "r".into(),
            name: "r".into(),
            description: String::new(),
            enabled: true,
            priority: 1,
            pattern: CorrelationPattern::Threshold { count: 5 },
            correlation_keys: vec![CorrelationField::IpAddress],
            time_window_minutes: 15,
            event_types: vec!["login_failed".into()],
            output_severity: Severity::High,
            mitre_techniques: Vec::new(),
            recommended_actions: Vec::new(),
        };
        // 3 conditions -> 30, 6 events -> 30.
        assert_eq!(confidence_score(&rule, 6), 60);
        assert_eq!(confidence_score(&rule, 10_000), 80);
        assert_eq!(confidence_score(&rule, usize::MAX), 80);
    }

    #[test]
    fn test_clamp_score() {
        assert_eq!(clamp_score(-4.0), 0);
        assert_eq!(clamp_score(250.0), 100);
        assert_eq!(clamp_score(f64::NAN), 0);
        assert_eq!(clamp_score(49.6), 50);
    }
}
