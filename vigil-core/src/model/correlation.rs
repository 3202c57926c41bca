//! Correlation rules and the correlated incidents they produce.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::event::{SecurityEvent, Severity, ThreatIntelMatch};
use crate::error::ConfigError;

fn default_true() -> bool {
    true
}

/// Event attribute used to group events into a correlation key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationField {
    IpAddress,
    User,
    EndpointId,
    EventType,
    Source,
}

impl CorrelationField {
    /// Project an event onto this field. Events lacking the field are not grouped.
    pub fn project<'a>(&self, event: &'a SecurityEvent) -> Option<&'a str> {
        match self {
            CorrelationField::IpAddress => event.ip_address.as_deref(),
            CorrelationField::User => event.user.as_deref(),
            CorrelationField::EndpointId => event.endpoint_id.as_deref(),
            CorrelationField::EventType => Some(event.event_type.as_str()),
            CorrelationField::Source => Some(event.source.as_str()),
        }
        .filter(|v| !v.is_empty())
    }
}

/// Pattern discriminant, used in dedup keys and summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    Threshold,
    Sequence,
    Aggregation,
    MultiSource,
}

impl std::fmt::Display for PatternType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatternType::Threshold => write!(f, "threshold"),
            PatternType::Sequence => write!(f, "sequence"),
            PatternType::Aggregation => write!(f, "aggregation"),
            PatternType::MultiSource => write!(f, "multi_source"),
        }
    }
}

/// Pattern semantics, one variant per pattern type with only the parameters it needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "pattern_type", rename_all = "snake_case")]
pub enum CorrelationPattern {
    /// At least `count` events for the same key inside the window.
    Threshold { count: usize },
    /// The listed event types occur in this order inside the window.
    Sequence { event_types: Vec<String> },
    /// At least `min_events` events for the key, reported by two or more sources.
    Aggregation {
        #[serde(default = "default_min_events")]
        min_events: usize,
    },
    /// Events for the key originate from at least `min_sources` distinct sources.
    MultiSource { min_sources: usize },
}

fn default_min_events() -> usize {
    2
}

impl CorrelationPattern {
    pub fn pattern_type(&self) -> PatternType {
        match self {
            CorrelationPattern::Threshold { .. } => PatternType::Threshold,
            CorrelationPattern::Sequence { .. } => PatternType::Sequence,
            CorrelationPattern::Aggregation { .. } => PatternType::Aggregation,
            CorrelationPattern::MultiSource { .. } => PatternType::MultiSource,
        }
    }

    /// Number of independent conditions this pattern asserts.
    fn condition_count(&self) -> usize {
        match self {
            CorrelationPattern::Threshold { .. } => 1,
            CorrelationPattern::Sequence { event_types } => event_types.len(),
            CorrelationPattern::Aggregation { .. } => 2,
            CorrelationPattern::MultiSource { .. } => 1,
        }
    }
}

/// An operator-owned rule that groups events into correlated incidents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationRule {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Lower values are evaluated first.
    #[serde(default)]
    pub priority: u32,
    pub pattern: CorrelationPattern,
    pub correlation_keys: Vec<CorrelationField>,
    pub time_window_minutes: u32,
    /// Restrict the rule to these event types (empty = all).
    #[serde(default)]
    pub event_types: Vec<String>,
    pub output_severity: Severity,
    #[serde(default)]
    pub mitre_techniques: Vec<String>,
    #[serde(default)]
    pub recommended_actions: Vec<String>,
}

impl CorrelationRule {
    /// Validate the rule shape. Called by the rule store on save and by the engine
    /// before each evaluation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| Err(ConfigError::invalid(&self.id, message));

        if self.id.trim().is_empty() {
            return Err(ConfigError::invalid("<unnamed>", "rule id must not be empty"));
        }
        if self.name.trim().is_empty() {
            return invalid("rule name must not be empty");
        }
        if self.correlation_keys.is_empty() {
            return invalid("at least one correlation key is required");
        }
        for (i, key) in self.correlation_keys.iter().enumerate() {
            if self.correlation_keys[..i].contains(key) {
                return invalid("correlation keys must be distinct");
            }
        }
        if self.time_window_minutes == 0 {
            return invalid("time window must be at least one minute");
        }
        match &self.pattern {
            CorrelationPattern::Threshold { count } if *count == 0 => {
                invalid("threshold count must be at least 1")
            }
            CorrelationPattern::Sequence { event_types } if event_types.len() < 2 => {
                invalid("a sequence needs at least two event types")
            }
            CorrelationPattern::Sequence { event_types }
                if event_types.iter().any(|t| t.trim().is_empty()) =>
            {
                invalid("sequence event types must not be empty")
            }
            CorrelationPattern::Aggregation { min_events } if *min_events < 2 => {
                invalid("aggregation needs at least two events")
            }
            CorrelationPattern::MultiSource { min_sources } if *min_sources < 2 => {
                invalid("multi-source correlation needs at least two sources")
            }
            _ => Ok(()),
        }
    }

    pub fn pattern_type(&self) -> PatternType {
        self.pattern.pattern_type()
    }

    /// Rule specificity: grouping keys, event-type filter, and pattern conditions.
    pub fn condition_count(&self) -> usize {
        self.correlation_keys.len()
            + usize::from(!self.event_types.is_empty())
            + self.pattern.condition_count()
    }

    /// Whether an event passes the rule's event-type filter.
    pub fn accepts(&self, event: &SecurityEvent) -> bool {
        self.event_types.is_empty() || self.event_types.iter().any(|t| t == &event.event_type)
    }

    /// Composite grouping value for an event, `None` if any key field is missing.
    pub fn key_for(&self, event: &SecurityEvent) -> Option<String> {
        let parts: Option<Vec<&str>> = self
            .correlation_keys
            .iter()
            .map(|field| field.project(event))
            .collect();
        parts.map(|p| p.join("|"))
    }
}

/// Lifecycle of a correlated incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationStatus {
    New,
    Investigating,
    Confirmed,
    FalsePositive,
    Resolved,
}

impl CorrelationStatus {
    pub fn can_transition_to(self, next: CorrelationStatus) -> bool {
        use CorrelationStatus::*;
        matches!(
            (self, next),
            (New, Investigating)
                | (New, FalsePositive)
                | (Investigating, Confirmed)
                | (Investigating, FalsePositive)
                | (Investigating, Resolved)
                | (Confirmed, Resolved)
        )
    }

    /// Open incidents still hold references to their rule.
    pub fn is_open(self) -> bool {
        !matches!(
            self,
            CorrelationStatus::FalsePositive | CorrelationStatus::Resolved
        )
    }
}

impl std::fmt::Display for CorrelationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CorrelationStatus::New => write!(f, "new"),
            CorrelationStatus::Investigating => write!(f, "investigating"),
            CorrelationStatus::Confirmed => write!(f, "confirmed"),
            CorrelationStatus::FalsePositive => write!(f, "false_positive"),
            CorrelationStatus::Resolved => write!(f, "resolved"),
        }
    }
}

impl std::str::FromStr for CorrelationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "new" => Ok(CorrelationStatus::New),
            "investigating" => Ok(CorrelationStatus::Investigating),
            "confirmed" => Ok(CorrelationStatus::Confirmed),
            "false_positive" => Ok(CorrelationStatus::FalsePositive),
            "resolved" => Ok(CorrelationStatus::Resolved),
            other => Err(format!("unknown correlation status '{other}'")),
        }
    }
}

/// One entry of an incident's ordered event chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub event_type: String,
    pub source: String,
    pub summary: String,
}

impl From<&SecurityEvent> for ChainEvent {
    fn from(event: &SecurityEvent) -> Self {
        Self {
            event_id: event.id.clone(),
            timestamp: event.timestamp,
            severity: event.severity,
            event_type: event.event_type.clone(),
            source: event.source.clone(),
            summary: event.summary(),
        }
    }
}

/// Uniqueness key of a correlated incident.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IncidentKey {
    pub correlation_key: String,
    pub pattern_type: PatternType,
    pub window_start: DateTime<Utc>,
}

/// A multi-event incident produced by the correlation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelatedIncident {
    pub id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub correlation_type: PatternType,
    pub correlation_key: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub severity: Severity,
    pub sources_involved: Vec<String>,
    pub event_chain: Vec<ChainEvent>,
    pub time_span_minutes: u32,
    pub fidelity_score: u8,
    pub confidence_score: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attack_narrative: Option<String>,
    #[serde(default)]
    pub related_ips: Vec<String>,
    #[serde(default)]
    pub related_users: Vec<String>,
    #[serde(default)]
    pub related_endpoints: Vec<String>,
    #[serde(default)]
    pub threat_intel_matches: Vec<ThreatIntelMatch>,
    #[serde(default)]
    pub mitre_techniques: Vec<String>,
    #[serde(default)]
    pub recommended_actions: Vec<String>,
    pub status: CorrelationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CorrelatedIncident {
    pub fn key(&self) -> IncidentKey {
        IncidentKey {
            correlation_key: self.correlation_key.clone(),
            pattern_type: self.correlation_type,
            window_start: self.window_start,
        }
    }

    /// Whether `other` describes the same burst as `self`: the same key and
    /// window, or the same key and pattern with at least one shared event.
    /// The second case catches a later run whose lookback no longer reaches
    /// the burst's first event and so anchors its window further in.
    pub fn duplicates(&self, other: &CorrelatedIncident) -> bool {
        if self.key() == other.key() {
            return true;
        }
        self.correlation_key == other.correlation_key
            && self.correlation_type == other.correlation_type
            && self.event_chain.iter().any(|mine| {
                other
                    .event_chain
                    .iter()
                    .any(|theirs| theirs.event_id == mine.event_id)
            })
    }
}
