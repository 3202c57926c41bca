//! Configuration system for Vigil.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config -> environment variables -> explicit overrides.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration for the Vigil engines.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VigilConfig {
    #[serde(default)]
    pub correlation: CorrelationConfig,
    #[serde(default)]
    pub triage: TriageConfig,
    #[serde(default)]
    pub response: ResponseConfig,
    #[serde(default)]
    pub investigation: InvestigationConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationConfig {
    /// Look-back window used when a run does not specify one.
    pub default_window_hours: u32,
    /// Ask the AI collaborator for an attack narrative on new incidents.
    pub request_narrative: bool,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            default_window_hours: 24,
            request_narrative: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriageConfig {
    /// Consult the AI collaborator when no triage rule matches.
    pub ai_fallback: bool,
    /// Confidence assigned to the `requires_investigation` fallback taken when
    /// the AI collaborator is unavailable but some rule partially matched.
    pub partial_match_confidence: u8,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            ai_fallback: true,
            partial_match_confidence: 40,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseConfig {
    /// Per-action timeout in seconds.
    pub action_timeout_secs: u64,
    /// Retry idempotent actions (block, isolate, escalate) once on timeout.
    pub retry_idempotent_on_timeout: bool,
    /// Log actions instead of calling a real executor.
    pub dry_run: bool,
    /// Endpoint receiving action requests when `dry_run` is off.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            action_timeout_secs: 10,
            retry_idempotent_on_timeout: true,
            dry_run: true,
            webhook_url: None,
        }
    }
}

/// Whether completing a step requires its checklist to be fully checked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepGating {
    #[default]
    Ungated,
    RequireChecklist,
}

/// Whether responders may jump to any step or only to steps already reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepNavigation {
    #[default]
    Free,
    Sequential,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvestigationConfig {
    #[serde(default)]
    pub step_gating: StepGating,
    #[serde(default)]
    pub navigation: StepNavigation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiConfig {
    /// Classification/narrative endpoint. The collaborator is disabled when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub model: String,
    /// Name of the environment variable holding the bearer token.
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            model: "security-analyst".to_string(),
            api_key_env: "VIGIL_AI_API_KEY".to_string(),
            timeout_secs: 20,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Snapshot file. Defaults to `<workspace>/.vigil/state.json`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_path: Option<PathBuf>,
}

impl StorageConfig {
    pub fn resolve_state_path(&self, workspace: &Path) -> PathBuf {
        match &self.state_path {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => workspace.join(p),
            None => workspace.join(".vigil").join("state.json"),
        }
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("dev", "vigil", "vigil")
}

/// Path of the workspace-level config file.
pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(".vigil").join("config.toml")
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `VIGIL_`)
/// 3. Workspace-local config (`.vigil/config.toml`)
/// 4. User config (`~/.config/vigil/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&VigilConfig>,
) -> Result<VigilConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(VigilConfig::default()));

    if let Some(dirs) = project_dirs() {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // VIGIL_RESPONSE__DRY_RUN, VIGIL_AI__ENDPOINT, ...
    figment = figment.merge(Env::prefixed("VIGIL_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Load configuration from one explicit file on top of the defaults.
pub fn load_config_file(path: &Path) -> Result<VigilConfig, Box<figment::Error>> {
    Figment::from(Serialized::defaults(VigilConfig::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("VIGIL_").split("__"))
        .extract()
        .map_err(Box::new)
}

/// Whether a user-level or workspace-level config file exists.
pub fn config_exists(workspace: Option<&Path>) -> bool {
    if let Some(dirs) = project_dirs()
        && dirs.config_dir().join("config.toml").exists()
    {
        return true;
    }
    workspace.is_some_and(|ws| workspace_config_path(ws).exists())
}
