//! Action executors and the registry that dispatches to them.
//!
//! One executor per capability, registered by [`ActionKind`]. The engine only
//! talks to the registry, so adding an action kind never touches the
//! evaluation loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use vigil_core::config::ResponseConfig;
use vigil_core::model::{ActionKind, ActionStatus, Severity};

use crate::error::EngineError;

/// Action-specific input handed to an executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionRequest {
    BlockIp {
        ip: String,
        duration_minutes: u32,
    },
    IsolateEndpoint {
        endpoint_id: String,
    },
    TriggerVulnScan {
        target: String,
        scan_type: String,
    },
    NotifyEmail {
        recipients: Vec<String>,
        subject: String,
        message: String,
    },
    CreateInAppAlert {
        title: String,
        message: String,
        severity: Severity,
    },
    EscalateSeverity {
        target: Severity,
        event_ids: Vec<String>,
    },
}

impl ActionRequest {
    pub fn kind(&self) -> ActionKind {
        match self {
            ActionRequest::BlockIp { .. } => ActionKind::BlockIp,
            ActionRequest::IsolateEndpoint { .. } => ActionKind::IsolateEndpoint,
            ActionRequest::TriggerVulnScan { .. } => ActionKind::TriggerVulnScan,
            ActionRequest::NotifyEmail { .. } => ActionKind::NotifyEmail,
            ActionRequest::CreateInAppAlert { .. } => ActionKind::CreateInAppAlert,
            ActionRequest::EscalateSeverity { .. } => ActionKind::EscalateSeverity,
        }
    }

    /// What the action acts on, as recorded in the audit log.
    pub fn target(&self) -> Option<String> {
        match self {
            ActionRequest::BlockIp { ip, .. } => Some(ip.clone()),
            ActionRequest::IsolateEndpoint { endpoint_id } => Some(endpoint_id.clone()),
            ActionRequest::TriggerVulnScan { target, .. } => Some(target.clone()),
            ActionRequest::NotifyEmail { recipients, .. } => Some(recipients.join(",")),
            ActionRequest::CreateInAppAlert { .. } => None,
            ActionRequest::EscalateSeverity { target, .. } => Some(target.to_string()),
        }
    }
}

impl std::fmt::Display for ActionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionRequest::BlockIp {
                ip,
                duration_minutes,
            } => write!(f, "Block IP {ip} for {duration_minutes}m"),
            ActionRequest::IsolateEndpoint { endpoint_id } => {
                write!(f, "Isolate endpoint {endpoint_id}")
            }
            ActionRequest::TriggerVulnScan { target, scan_type } => {
                write!(f, "Run {scan_type} vulnerability scan on {target}")
            }
            ActionRequest::NotifyEmail { recipients, .. } => {
                write!(f, "Email {}", recipients.join(", "))
            }
            ActionRequest::CreateInAppAlert { title, .. } => write!(f, "Raise alert '{title}'"),
            ActionRequest::EscalateSeverity { target, event_ids } => {
                write!(f, "Escalate {} event(s) to {target}", event_ids.len())
            }
        }
    }
}

/// Executor response: `{status, detail?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub status: ActionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ExecutionReport {
    pub fn success(detail: impl Into<String>) -> Self {
        Self {
            status: ActionStatus::Success,
            detail: Some(detail.into()),
        }
    }
}

/// Performs one remediation capability.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, request: &ActionRequest) -> Result<ExecutionReport, EngineError>;
}

/// Logs the action it would take and reports success.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunExecutor;

#[async_trait]
impl ActionExecutor for DryRunExecutor {
    fn name(&self) -> &str {
        "dry-run"
    }

    async fn execute(&self, request: &ActionRequest) -> Result<ExecutionReport, EngineError> {
        let message = format!("[DRY RUN] Would execute: {request}");
        tracing::info!(action = %request.kind(), "{message}");
        Ok(ExecutionReport::success(message))
    }
}

/// Posts each request as JSON to an HTTP endpoint. A 2xx reply counts as
/// success unless its body carries an explicit `{status, detail}` report.
pub struct WebhookExecutor {
    client: Client,
    url: String,
}

impl WebhookExecutor {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, EngineError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Configuration {
                rule: "<response.webhook_url>".into(),
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ActionExecutor for WebhookExecutor {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn execute(&self, request: &ActionRequest) -> Result<ExecutionReport, EngineError> {
        let action = request.kind();
        let failed = |message: String| EngineError::ActionExecution { action, message };

        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| failed(format!("request to {} failed: {e}", self.url)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| failed(format!("failed to read response body: {e}")))?;
        if !status.is_success() {
            return Err(failed(format!("HTTP {status}: {body}")));
        }

        Ok(serde_json::from_str::<ExecutionReport>(&body)
            .unwrap_or_else(|_| ExecutionReport::success(format!("{request} (HTTP {status})"))))
    }
}

/// Executors keyed by the action kind they perform.
#[derive(Default, Clone)]
pub struct ExecutorRegistry {
    executors: HashMap<ActionKind, Arc<dyn ActionExecutor>>,
}

const ALL_KINDS: [ActionKind; 6] = [
    ActionKind::BlockIp,
    ActionKind::IsolateEndpoint,
    ActionKind::TriggerVulnScan,
    ActionKind::NotifyEmail,
    ActionKind::CreateInAppAlert,
    ActionKind::EscalateSeverity,
];

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every action kind handled by [`DryRunExecutor`].
    pub fn dry_run() -> Self {
        Self::with_all(Arc::new(DryRunExecutor))
    }

    /// Every action kind handled by the same executor.
    pub fn with_all(executor: Arc<dyn ActionExecutor>) -> Self {
        let mut registry = Self::new();
        for kind in ALL_KINDS {
            registry.register(kind, executor.clone());
        }
        registry
    }

    /// Build the registry described by the response configuration.
    pub fn from_config(config: &ResponseConfig) -> Result<Self, EngineError> {
        match (&config.webhook_url, config.dry_run) {
            (Some(url), false) => {
                let executor =
                    WebhookExecutor::new(url, Duration::from_secs(config.action_timeout_secs))?;
                Ok(Self::with_all(Arc::new(executor)))
            }
            (None, false) => Err(EngineError::Configuration {
                rule: "<response>".into(),
                message: "dry_run is off but no webhook_url is configured".into(),
            }),
            _ => Ok(Self::dry_run()),
        }
    }

    /// Register (or replace) the executor for `kind`.
    pub fn register(&mut self, kind: ActionKind, executor: Arc<dyn ActionExecutor>) {
        self.executors.insert(kind, executor);
    }

    pub fn get(&self, kind: ActionKind) -> Option<Arc<dyn ActionExecutor>> {
        self.executors.get(&kind).cloned()
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dry_run_succeeds() {
        let report = DryRunExecutor
            .execute(&ActionRequest::BlockIp {
                ip: "10.0.0.5".into(),
                duration_minutes: 60,
            })
            .await
            .unwrap();
        assert_eq!(report.status, ActionStatus::Success);
        assert!(report.detail.unwrap().contains("Block IP 10.0.0.5 for 60m"));
    }

    #[test]
    fn test_request_serializes_with_action_tag() {
        let json = serde_json::to_value(ActionRequest::IsolateEndpoint {
            endpoint_id: "FIN-LT-22".into(),
        })
        .unwrap();
        assert_eq!(json["action"], "isolate_endpoint");
        assert_eq!(json["endpoint_id"], "FIN-LT-22");
    }

    #[test]
    fn test_request_targets() {
        let email = ActionRequest::NotifyEmail {
            recipients: vec!["soc@example.com".into(), "ciso@example.com".into()],
            subject: String::new(),
            message: String::new(),
        };
        assert_eq!(email.kind(), ActionKind::NotifyEmail);
        assert_eq!(email.target().as_deref(), Some("soc@example.com,ciso@example.com"));
    }

    #[test]
    fn test_registry_from_config() {
        let registry = ExecutorRegistry::from_config(&ResponseConfig::default()).unwrap();
        assert_eq!(registry.len(), 6);
        assert_eq!(registry.get(ActionKind::BlockIp).unwrap().name(), "dry-run");

        let live_without_url = ResponseConfig {
            dry_run: false,
            ..Default::default()
        };
        assert!(ExecutorRegistry::from_config(&live_without_url).is_err());

        let live = ResponseConfig {
            dry_run: false,
            webhook_url: Some("http://127.0.0.1:9/actions".into()),
            ..Default::default()
        };
        let registry = ExecutorRegistry::from_config(&live).unwrap();
        assert_eq!(registry.get(ActionKind::NotifyEmail).unwrap().name(), "webhook");
    }
}
