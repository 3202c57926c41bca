//! CLI subcommand handlers.
//!
//! Every handler loads the workspace state snapshot, runs one engine
//! operation, persists the snapshot if anything changed, and prints JSON.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use vigil_core::ai::{AiAnalyst, analyst_from_config};
use vigil_core::config::{VigilConfig, load_config, load_config_file, workspace_config_path};
use vigil_core::model::{
    AutoResponseRule, CorrelationRule, IncidentRef, InvestigationPlaybook, SecurityEvent,
    TriageRule,
};
use vigil_core::store::{IncidentStore, MemoryStore, RuleStore};
use vigil_security::response::RuleOutcome;
use vigil_security::{
    CorrelationEngine, ExecutorRegistry, InvestigationWorkflow, ResponseEngine,
    StartInvestigation, TriageClassifier, seed_playbooks,
};

use crate::{
    Commands, ConfigAction, EventsAction, IncidentsAction, InvestigateAction, RulesAction,
    TriageAction,
};

/// Loaded configuration plus the state snapshot it points at.
struct Session {
    config: VigilConfig,
    store: Arc<MemoryStore>,
    analyst: Arc<dyn AiAnalyst>,
}

impl Session {
    fn load(workspace: &Path, config_path: Option<&Path>) -> anyhow::Result<Self> {
        let config = match config_path {
            Some(path) => load_config_file(path),
            None => load_config(Some(workspace), None),
        }
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

        let state_path = config.storage.resolve_state_path(workspace);
        let store = MemoryStore::open(&state_path)
            .with_context(|| format!("Failed to open state at {}", state_path.display()))?;
        let analyst = analyst_from_config(&config.ai);
        tracing::debug!(state = %state_path.display(), analyst = analyst.name(), "Workspace loaded");

        Ok(Self {
            config,
            store: Arc::new(store),
            analyst,
        })
    }

    async fn persist(&self) -> anyhow::Result<()> {
        self.store.persist().await.context("Failed to save state")
    }

    fn correlation(&self) -> CorrelationEngine {
        CorrelationEngine::new(
            self.store.clone(),
            self.store.clone(),
            self.store.clone(),
            self.analyst.clone(),
            self.config.correlation.clone(),
        )
    }

    fn triage(&self) -> TriageClassifier {
        TriageClassifier::new(
            self.store.clone(),
            self.store.clone(),
            self.store.clone(),
            self.analyst.clone(),
            self.config.triage.clone(),
        )
    }

    fn response(&self) -> anyhow::Result<ResponseEngine> {
        let executors = ExecutorRegistry::from_config(&self.config.response)?;
        Ok(ResponseEngine::new(
            self.store.clone(),
            self.store.clone(),
            self.store.clone(),
            Arc::new(executors),
            &self.config.response,
        ))
    }

    fn investigations(&self) -> InvestigationWorkflow {
        InvestigationWorkflow::new(
            self.store.clone(),
            self.store.clone(),
            self.config.investigation.clone(),
        )
    }
}

/// Rules and custom playbooks, as read by `rules import`.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleBundle {
    pub correlation_rules: Vec<CorrelationRule>,
    pub triage_rules: Vec<TriageRule>,
    pub response_rules: Vec<AutoResponseRule>,
    pub playbooks: Vec<InvestigationPlaybook>,
}

impl RuleBundle {
    /// Parse a bundle as TOML when the file says so, JSON otherwise.
    pub fn parse(path: &Path, content: &str) -> anyhow::Result<Self> {
        if path.extension().is_some_and(|ext| ext == "toml") {
            Ok(toml::from_str(content)?)
        } else {
            Ok(serde_json::from_str(content)?)
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Handle a CLI subcommand.
pub async fn handle_command(
    command: Commands,
    workspace: &Path,
    config_path: Option<&Path>,
) -> anyhow::Result<()> {
    let session = || Session::load(workspace, config_path);
    match command {
        Commands::Config { action } => handle_config(action, workspace, config_path),
        Commands::Seed => {
            let session = session()?;
            let report = seed_playbooks(session.store.as_ref()).await?;
            session.persist().await?;
            print_json(&report)
        }
        Commands::Rules { action } => handle_rules(action, &session()?).await,
        Commands::Events { action } => handle_events(action, &session()?).await,
        Commands::Correlate { hours } => {
            let session = session()?;
            let summary = session.correlation().run(hours).await?;
            session.persist().await?;
            print_json(&summary)
        }
        Commands::Triage { event_id, action } => {
            handle_triage(event_id, action, &session()?).await
        }
        Commands::Respond { minutes, rule } => handle_respond(minutes, rule, &session()?).await,
        Commands::Incidents { action } => handle_incidents(action, &session()?).await,
        Commands::Investigate { action } => handle_investigate(action, &session()?).await,
    }
}

fn handle_config(
    action: ConfigAction,
    workspace: &Path,
    config_path: Option<&Path>,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_path = workspace_config_path(workspace);
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }
            if let Some(dir) = config_path.parent() {
                std::fs::create_dir_all(dir)?;
            }

            let toml_str = toml::to_string_pretty(&VigilConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = match config_path {
                Some(path) => load_config_file(path),
                None => load_config(Some(workspace), None),
            }
            .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn handle_rules(action: RulesAction, session: &Session) -> anyhow::Result<()> {
    match action {
        RulesAction::List => {
            let store = &session.store;
            print_json(&RuleBundle {
                correlation_rules: store.correlation_rules().await?,
                triage_rules: store.triage_rules().await?,
                response_rules: store.response_rules().await?,
                playbooks: store.playbooks().await?,
            })
        }
        RulesAction::Import { file } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let bundle = RuleBundle::parse(&file, &content)
                .with_context(|| format!("Invalid rule bundle {}", file.display()))?;

            let store = &session.store;
            let workflow = session.investigations();
            let mut imported = Vec::new();
            let mut rejected = Vec::new();
            let mut record = |id: String, result: Result<(), String>| match result {
                Ok(()) => imported.push(id),
                Err(error) => {
                    tracing::warn!(rule = id.as_str(), error = error.as_str(), "Rule rejected");
                    rejected.push(json!({ "id": id, "error": error }));
                }
            };
            for rule in bundle.correlation_rules {
                let id = rule.id.clone();
                let result = store.upsert_correlation_rule(rule).await;
                record(id, result.map_err(|e| e.to_string()));
            }
            for rule in bundle.triage_rules {
                let id = rule.id.clone();
                let result = store.upsert_triage_rule(rule).await;
                record(id, result.map_err(|e| e.to_string()));
            }
            for rule in bundle.response_rules {
                let id = rule.id.clone();
                let result = store.upsert_response_rule(rule).await;
                record(id, result.map_err(|e| e.to_string()));
            }
            for playbook in bundle.playbooks {
                let id = playbook.id.clone();
                let result = workflow.save_playbook(playbook).await;
                record(id, result.map_err(|e| e.to_string()));
            }

            session.persist().await?;
            print_json(&json!({ "imported": imported, "rejected": rejected }))
        }
    }
}

async fn handle_events(action: EventsAction, session: &Session) -> anyhow::Result<()> {
    match action {
        EventsAction::Import { file } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let events: Vec<SecurityEvent> = serde_json::from_str(&content)
                .with_context(|| format!("Invalid events file {}", file.display()))?;
            let total = events.len();
            let added = session.store.insert_events(events).await;
            session.persist().await?;
            tracing::info!(added, total, "Events imported");
            print_json(&json!({ "imported": added, "duplicates": total - added }))
        }
    }
}

async fn handle_triage(
    event_id: Option<String>,
    action: Option<TriageAction>,
    session: &Session,
) -> anyhow::Result<()> {
    let classifier = session.triage();
    match (event_id, action) {
        (_, Some(TriageAction::Status { id, status })) => {
            let incident = classifier.update_status(&id, status, Utc::now()).await?;
            session.persist().await?;
            print_json(&incident)
        }
        (_, Some(TriageAction::Overdue)) => print_json(&classifier.overdue(Utc::now()).await?),
        (Some(event_id), None) => {
            let result = classifier.triage(&event_id).await?;
            let created = result.was_inserted();
            let incident = result.into_inner();
            if created {
                session.persist().await?;
            }
            print_json(&json!({ "created": created, "incident": incident }))
        }
        (None, None) => anyhow::bail!("Specify an event id or a triage subcommand"),
    }
}

async fn handle_respond(
    minutes: Option<u32>,
    rule: Option<String>,
    session: &Session,
) -> anyhow::Result<()> {
    let engine = session.response()?;
    match rule {
        Some(rule_id) => {
            let outcome = engine.run_rule_at(&rule_id, minutes, Utc::now()).await?;
            session.persist().await?;
            let report = match outcome {
                RuleOutcome::NotMatched => json!({ "rule": rule_id, "outcome": "not_matched" }),
                RuleOutcome::OnCooldown { until } => {
                    json!({ "rule": rule_id, "outcome": "on_cooldown", "until": until })
                }
                RuleOutcome::Superseded => json!({ "rule": rule_id, "outcome": "superseded" }),
                RuleOutcome::Fired(log) => {
                    json!({ "rule": rule_id, "outcome": "fired", "log": log })
                }
            };
            print_json(&report)
        }
        None => {
            let summary = engine.run(minutes).await?;
            session.persist().await?;
            print_json(&summary)
        }
    }
}

async fn handle_incidents(action: IncidentsAction, session: &Session) -> anyhow::Result<()> {
    let store = &session.store;
    match action {
        IncidentsAction::List { kind } => match kind.as_deref() {
            None => print_json(&json!({
                "correlated": store.correlated_incidents().await?,
                "triaged": store.triaged_incidents().await?,
            })),
            Some("correlated") => print_json(&store.correlated_incidents().await?),
            Some("triaged") => print_json(&store.triaged_incidents().await?),
            Some(other) => anyhow::bail!("Unknown incident kind '{other}' (correlated, triaged)"),
        },
        IncidentsAction::Status { id, status } => {
            let incident = session.correlation().update_status(&id, status, Utc::now()).await?;
            session.persist().await?;
            print_json(&incident)
        }
        IncidentsAction::Log { rule } => print_json(&store.response_logs(rule.as_deref()).await?),
    }
}

async fn handle_investigate(action: InvestigateAction, session: &Session) -> anyhow::Result<()> {
    let workflow = session.investigations();
    let now = Utc::now();

    // Read-only views first; everything else mutates and persists.
    let updated = match action {
        InvestigateAction::Playbooks => return print_json(&session.store.playbooks().await?),
        InvestigateAction::List => return print_json(&workflow.list().await?),
        InvestigateAction::Show { id } => {
            let investigation = workflow.get(&id).await?;
            let current = workflow.current_step(&id).await?;
            return print_json(&json!({
                "investigation": investigation,
                "progress": investigation.progress(),
                "current_step": current,
            }));
        }
        InvestigateAction::Evidence { id } => return print_json(&workflow.evidence(&id).await?),
        InvestigateAction::Start {
            playbook,
            title,
            description,
            severity,
            correlated,
            triaged,
        } => {
            let incidents = correlated
                .into_iter()
                .map(IncidentRef::Correlated)
                .chain(triaged.into_iter().map(IncidentRef::Triaged))
                .collect();
            workflow
                .start(
                    StartInvestigation {
                        playbook_id: playbook,
                        title,
                        description,
                        severity,
                        incidents,
                    },
                    now,
                )
                .await?
        }
        InvestigateAction::Check { id, item, uncheck } => {
            let rev = workflow.get(&id).await?.updated_at;
            workflow
                .toggle_checklist_item(&id, rev, item, !uncheck, now)
                .await?
        }
        InvestigateAction::Notes { id, text } => {
            let rev = workflow.get(&id).await?.updated_at;
            workflow.update_notes(&id, rev, text, now).await?
        }
        InvestigateAction::CompleteStep { id } => {
            let rev = workflow.get(&id).await?.updated_at;
            workflow.complete_step(&id, rev, now).await?
        }
        InvestigateAction::SkipStep { id } => {
            let rev = workflow.get(&id).await?.updated_at;
            workflow.skip_step(&id, rev, now).await?
        }
        InvestigateAction::Goto { id, index } => {
            let rev = workflow.get(&id).await?.updated_at;
            workflow.navigate_to(&id, rev, index, now).await?
        }
        InvestigateAction::Link {
            id,
            correlated,
            triaged,
            finding,
        } => {
            let mut investigation = workflow.get(&id).await?;
            let links = correlated
                .map(IncidentRef::Correlated)
                .into_iter()
                .chain(triaged.map(IncidentRef::Triaged));
            for link in links {
                investigation = workflow
                    .link_incident(&id, investigation.updated_at, link, now)
                    .await?;
            }
            if let Some(finding) = finding {
                investigation = workflow
                    .link_finding(&id, investigation.updated_at, finding, now)
                    .await?;
            }
            investigation
        }
        InvestigateAction::Pause { id } => {
            let rev = workflow.get(&id).await?.updated_at;
            workflow.pause(&id, rev, now).await?
        }
        InvestigateAction::Resume { id } => {
            let rev = workflow.get(&id).await?.updated_at;
            workflow.resume(&id, rev, now).await?
        }
        InvestigateAction::Complete { id } => {
            let rev = workflow.get(&id).await?.updated_at;
            workflow.complete(&id, rev, now).await?
        }
        InvestigateAction::Escalate { id, reason } => {
            let rev = workflow.get(&id).await?.updated_at;
            workflow.escalate(&id, rev, reason, now).await?
        }
        InvestigateAction::Close { id, reason } => {
            let rev = workflow.get(&id).await?.updated_at;
            workflow.close(&id, rev, reason, now).await?
        }
    };

    session.persist().await?;
    print_json(&updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_bundle_parses_json_and_toml() {
        let json = r#"{
            "triage_rules": [
                {"id": "tr-1", "name": "Phishing", "category": "high_priority",
                 "conditions": {"keywords": ["phish"]}, "sla_minutes": 60}
            ]
        }"#;
        let bundle = RuleBundle::parse(&PathBuf::from("rules.json"), json).unwrap();
        assert_eq!(bundle.triage_rules.len(), 1);
        assert!(bundle.correlation_rules.is_empty());

        let toml = r#"
            [[response_rules]]
            id = "ar-1"
            name = "Block critical"
            cooldown_minutes = 15

            [response_rules.trigger_conditions]
            severity = ["critical"]

            [response_rules.actions.block_ip]
            enabled = true
        "#;
        let bundle = RuleBundle::parse(&PathBuf::from("rules.toml"), toml).unwrap();
        assert_eq!(bundle.response_rules[0].cooldown_minutes, 15);
        assert!(bundle.response_rules[0].validate().is_ok());
    }

    #[tokio::test]
    async fn test_session_uses_workspace_state_path() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::load(dir.path(), None).unwrap();
        assert_eq!(
            session.store.path(),
            Some(dir.path().join(".vigil").join("state.json").as_path())
        );
        session.persist().await.unwrap();
        assert!(dir.path().join(".vigil").join("state.json").exists());
    }
}
