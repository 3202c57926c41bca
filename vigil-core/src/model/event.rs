//! Security events: the read-only input every engine evaluates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event and incident severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Relative weight in `[0.0, 1.0]` used by the scoring functions.
    pub fn weight(self) -> f64 {
        match self {
            Severity::Info => 0.0,
            Severity::Low => 0.25,
            Severity::Medium => 0.5,
            Severity::High => 0.75,
            Severity::Critical => 1.0,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

/// Endpoint posture reported by the endpoint agent for the host an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointPosture {
    Compliant,
    AtRisk,
    NonCompliant,
    Critical,
}

impl std::fmt::Display for EndpointPosture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointPosture::Compliant => write!(f, "compliant"),
            EndpointPosture::AtRisk => write!(f, "at_risk"),
            EndpointPosture::NonCompliant => write!(f, "non_compliant"),
            EndpointPosture::Critical => write!(f, "critical"),
        }
    }
}

/// A threat-intelligence indicator that matched an event attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreatIntelMatch {
    /// The matched indicator (IP, domain, hash).
    pub indicator: String,
    /// Feed that produced the indicator.
    pub feed: String,
    /// Optional threat classification from the feed (e.g. "botnet").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threat_type: Option<String>,
}

/// A timestamped security event.
///
/// Events are supplied by the external event source and never mutated once observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub event_type: String,
    /// Producer of the event (firewall, EDR, IdP, ...).
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_id: Option<String>,
    /// Free-text description, searched by keyword conditions.
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub threat_intel_matches: Vec<ThreatIntelMatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_posture: Option<EndpointPosture>,
}

impl SecurityEvent {
    /// Build a bare event; optional attributes are filled with the `with_*` helpers.
    pub fn new(
        id: impl Into<String>,
        timestamp: DateTime<Utc>,
        severity: Severity,
        event_type: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            timestamp,
            severity,
            event_type: event_type.into(),
            source: source.into(),
            ip_address: None,
            user: None,
            endpoint_id: None,
            description: String::new(),
            threat_intel_matches: Vec::new(),
            endpoint_posture: None,
        }
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint_id: impl Into<String>) -> Self {
        self.endpoint_id = Some(endpoint_id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_posture(mut self, posture: EndpointPosture) -> Self {
        self.endpoint_posture = Some(posture);
        self
    }

    pub fn with_threat_intel(mut self, indicator: impl Into<String>, feed: impl Into<String>) -> Self {
        self.threat_intel_matches.push(ThreatIntelMatch {
            indicator: indicator.into(),
            feed: feed.into(),
            threat_type: None,
        });
        self
    }

    /// Whether any threat-intelligence indicator matched this event.
    pub fn has_threat_intel(&self) -> bool {
        !self.threat_intel_matches.is_empty()
    }

    /// One-line summary used in event chains and log lines.
    pub fn summary(&self) -> String {
        let actor = self
            .ip_address
            .as_deref()
            .or(self.user.as_deref())
            .or(self.endpoint_id.as_deref())
            .unwrap_or("unknown");
        if self.description.is_empty() {
            format!("{} from {} ({})", self.event_type, actor, self.source)
        } else {
            format!("{} from {}: {}", self.event_type, actor, self.description)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Info < Severity::Low);
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn test_severity_parse_and_display() {
        assert_eq!("CRITICAL".parse::<Severity>().unwrap(), Severity::Critical);
        assert_eq!(Severity::Medium.to_string(), "medium");
        assert!("severe".parse::<Severity>().is_err());
    }

    #[test]
    fn test_event_deserializes_with_defaults() {
        let json = r#"{
            "id": "evt-1",
            "timestamp": "2026-01-10T12:00:00Z",
            "severity": "high",
            "event_type": "login_failed",
            "source": "okta",
            "ip_address": "10.0.0.5"
        }"#;
        let event: SecurityEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.ip_address.as_deref(), Some("10.0.0.5"));
        assert!(event.description.is_empty());
        assert!(!event.has_threat_intel());
        assert!(event.endpoint_posture.is_none());
    }

    #[test]
    fn test_summary_prefers_ip() {
        let event = SecurityEvent::new("e", Utc::now(), Severity::Low, "port_scan", "fw")
            .with_ip("1.2.3.4")
            .with_user("alice");
        assert_eq!(event.summary(), "port_scan from 1.2.3.4 (fw)");
    }
}
