//! AI classification and narrative collaborator.
//!
//! The engines depend only on the [`AiAnalyst`] trait. [`HttpAiAnalyst`] talks
//! to a JSON endpoint, [`DisabledAnalyst`] stands in when none is configured,
//! and [`MockAnalyst`] scripts responses for tests. Every implementation may be
//! unavailable; callers degrade instead of failing.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::AiConfig;
use crate::error::AiError;
use crate::model::{AiAnalysis, CorrelatedIncident, SecurityEvent, TriageCategory};

/// Context bundle sent with a classification request.
#[derive(Debug, Clone, Serialize)]
pub struct EventContext {
    pub event: SecurityEvent,
    /// Names of triage rules whose conditions partially matched.
    pub partial_rule_matches: Vec<String>,
}

impl EventContext {
    pub fn new(event: SecurityEvent) -> Self {
        Self {
            event,
            partial_rule_matches: Vec::new(),
        }
    }
}

/// Raw classification payload as returned by the collaborator. Every field is
/// optional on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClassificationResponse {
    pub category: Option<String>,
    pub confidence_score: Option<f64>,
    pub reasoning: Option<String>,
    pub investigation_steps: Vec<String>,
    pub ai_analysis: Option<AiAnalysis>,
}

/// A validated classification.
#[derive(Debug, Clone, PartialEq)]
pub struct AiClassification {
    pub category: TriageCategory,
    pub confidence_score: u8,
    pub reasoning: String,
    pub investigation_steps: Vec<String>,
    pub ai_analysis: Option<AiAnalysis>,
}

const DEFAULT_AI_CONFIDENCE: f64 = 50.0;

impl TryFrom<ClassificationResponse> for AiClassification {
    type Error = AiError;

    fn try_from(raw: ClassificationResponse) -> Result<Self, Self::Error> {
        let category = raw
            .category
            .as_deref()
            .ok_or_else(|| AiError::InvalidResponse {
                message: "response has no category".into(),
            })?
            .parse::<TriageCategory>()
            .map_err(|message| AiError::InvalidResponse { message })?;

        let confidence = raw.confidence_score.unwrap_or(DEFAULT_AI_CONFIDENCE);
        let confidence = if confidence.is_finite() {
            confidence.round().clamp(0.0, 100.0) as u8
        } else {
            DEFAULT_AI_CONFIDENCE as u8
        };

        Ok(Self {
            category,
            confidence_score: confidence,
            reasoning: raw.reasoning.unwrap_or_default(),
            investigation_steps: raw.investigation_steps,
            ai_analysis: raw.ai_analysis,
        })
    }
}

/// Classifies events and writes attack narratives for correlated incidents.
#[async_trait]
pub trait AiAnalyst: Send + Sync {
    fn name(&self) -> &str;

    async fn classify(&self, context: &EventContext) -> Result<AiClassification, AiError>;

    async fn narrate(&self, incident: &CorrelatedIncident) -> Result<String, AiError>;
}

/// JSON-over-HTTP collaborator.
///
/// `POST {endpoint}/classify` with `{model, event, partial_rule_matches}` and
/// `POST {endpoint}/narrate` with `{model, incident}` returning `{narrative}`.
pub struct HttpAiAnalyst {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    timeout_secs: u64,
}

#[derive(Deserialize)]
struct NarrativeResponse {
    narrative: Option<String>,
}

impl HttpAiAnalyst {
    /// Build a client from configuration. Returns [`AiError::Unavailable`] when
    /// no endpoint is configured. The API key is optional and read from the
    /// environment variable named by `api_key_env`.
    pub fn new(config: &AiConfig) -> Result<Self, AiError> {
        let endpoint = config.endpoint.clone().ok_or(AiError::Unavailable)?;
        let api_key = std::env::var(&config.api_key_env).ok();
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AiError::Request {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            timeout_secs: config.timeout_secs,
        })
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<String, AiError> {
        let url = format!("{}/{path}", self.endpoint);
        tracing::debug!(url = url.as_str(), model = self.model.as_str(), "Sending AI request");

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AiError::Timeout {
                    timeout_secs: self.timeout_secs,
                }
            } else {
                AiError::Request {
                    message: format!("request to {url} failed: {e}"),
                }
            }
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| AiError::Request {
            message: format!("failed to read response body: {e}"),
        })?;
        if !status.is_success() {
            return Err(AiError::Request {
                message: format!("HTTP {status}: {text}"),
            });
        }
        Ok(text)
    }
}

#[async_trait]
impl AiAnalyst for HttpAiAnalyst {
    fn name(&self) -> &str {
        "http"
    }

    async fn classify(&self, context: &EventContext) -> Result<AiClassification, AiError> {
        let body = json!({
            "model": self.model,
            "event": context.event,
            "partial_rule_matches": context.partial_rule_matches,
        });
        let text = self.post("classify", body).await?;
        let raw: ClassificationResponse =
            serde_json::from_str(&text).map_err(|e| AiError::InvalidResponse {
                message: format!("invalid JSON: {e}"),
            })?;
        AiClassification::try_from(raw)
    }

    async fn narrate(&self, incident: &CorrelatedIncident) -> Result<String, AiError> {
        let body = json!({ "model": self.model, "incident": incident });
        let text = self.post("narrate", body).await?;
        let raw: NarrativeResponse =
            serde_json::from_str(&text).map_err(|e| AiError::InvalidResponse {
                message: format!("invalid JSON: {e}"),
            })?;
        raw.narrative
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| AiError::InvalidResponse {
                message: "empty narrative".into(),
            })
    }
}

/// Collaborator used when no endpoint is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledAnalyst;

#[async_trait]
impl AiAnalyst for DisabledAnalyst {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn classify(&self, _context: &EventContext) -> Result<AiClassification, AiError> {
        Err(AiError::Unavailable)
    }

    async fn narrate(&self, _incident: &CorrelatedIncident) -> Result<String, AiError> {
        Err(AiError::Unavailable)
    }
}

/// Build the configured collaborator, falling back to [`DisabledAnalyst`].
pub fn analyst_from_config(config: &AiConfig) -> Arc<dyn AiAnalyst> {
    if config.endpoint.is_none() {
        return Arc::new(DisabledAnalyst);
    }
    match HttpAiAnalyst::new(config) {
        Ok(analyst) => Arc::new(analyst),
        Err(e) => {
            tracing::warn!(error = %e, "AI collaborator could not be created; running without it");
            Arc::new(DisabledAnalyst)
        }
    }
}

/// Scripted collaborator for tests.
pub struct MockAnalyst {
    classification: Mutex<Result<AiClassification, AiError>>,
    narrative: Mutex<Result<String, AiError>>,
    classify_calls: AtomicUsize,
    narrate_calls: AtomicUsize,
}

impl MockAnalyst {
    /// A mock that is unavailable for both operations until scripted.
    pub fn new() -> Self {
        Self {
            classification: Mutex::new(Err(AiError::Unavailable)),
            narrative: Mutex::new(Err(AiError::Unavailable)),
            classify_calls: AtomicUsize::new(0),
            narrate_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_classification(self, classification: AiClassification) -> Self {
        self.set_classification(Ok(classification));
        self
    }

    pub fn with_narrative(self, narrative: &str) -> Self {
        *self.narrative.lock().unwrap() = Ok(narrative.to_string());
        self
    }

    pub fn set_classification(&self, result: Result<AiClassification, AiError>) {
        *self.classification.lock().unwrap() = result;
    }

    pub fn classify_calls(&self) -> usize {
        self.classify_calls.load(Ordering::SeqCst)
    }

    pub fn narrate_calls(&self) -> usize {
        self.narrate_calls.load(Ordering::SeqCst)
    }
}

impl Default for MockAnalyst {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AiAnalyst for MockAnalyst {
    fn name(&self) -> &str {
        "mock"
    }

    async fn classify(&self, _context: &EventContext) -> Result<AiClassification, AiError> {
        self.classify_calls.fetch_add(1, Ordering::SeqCst);
        self.classification.lock().unwrap().clone()
    }

    async fn narrate(&self, _incident: &CorrelatedIncident) -> Result<String, AiError> {
        self.narrate_calls.fetch_add(1, Ordering::SeqCst);
        self.narrative.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_clamps_confidence() {
        let raw = ClassificationResponse {
            category: Some("high_priority".into()),
            confidence_score: Some(140.0),
            ..Default::default()
        };
        let c = AiClassification::try_from(raw).unwrap();
        assert_eq!(c.category, TriageCategory::HighPriority);
        assert_eq!(c.confidence_score, 100);

        let raw = ClassificationResponse {
            category: Some("monitor".into()),
            confidence_score: Some(-3.0),
            ..Default::default()
        };
        assert_eq!(AiClassification::try_from(raw).unwrap().confidence_score, 0);
    }

    #[test]
    fn test_classification_rejects_unknown_category() {
        let raw = ClassificationResponse {
            category: Some("apocalyptic".into()),
            ..Default::default()
        };
        assert!(matches!(
            AiClassification::try_from(raw),
            Err(AiError::InvalidResponse { .. })
        ));
        assert!(AiClassification::try_from(ClassificationResponse::default()).is_err());
    }

    #[test]
    fn test_classification_from_json() {
        let json = r#"{
            "category": "critical_incident",
            "confidence_score": 87.4,
            "reasoning": "Known ransomware hash",
            "ai_analysis": {
                "threat_assessment": "Active encryption",
                "potential_impact": "Data loss",
                "recommended_actions": ["Isolate host"],
                "related_mitre_techniques": ["T1486"]
            }
        }"#;
        let raw: ClassificationResponse = serde_json::from_str(json).unwrap();
        let c = AiClassification::try_from(raw).unwrap();
        assert_eq!(c.confidence_score, 87);
        assert_eq!(
            c.ai_analysis.unwrap().related_mitre_techniques,
            vec!["T1486".to_string()]
        );
    }

    #[tokio::test]
    async fn test_disabled_analyst_is_unavailable() {
        let ctx = EventContext::new(SecurityEvent::new(
            "e1",
            chrono::Utc::now(),
            crate::model::Severity::Low,
            "login",
            "okta",
        ));
        assert_eq!(
            DisabledAnalyst.classify(&ctx).await.unwrap_err(),
            AiError::Unavailable
        );
    }

    #[test]
    fn test_http_analyst_requires_endpoint() {
        assert!(matches!(
            HttpAiAnalyst::new(&AiConfig::default()),
            Err(AiError::Unavailable)
        ));
        assert_eq!(analyst_from_config(&AiConfig::default()).name(), "disabled");
    }
}
