//! Vigil CLI: run the correlation, triage, auto-response and investigation
//! engines against a workspace's state snapshot.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};
use vigil_core::model::{CorrelationStatus, Severity, TriageStatus};

/// Vigil: security event correlation, triage, automated response and investigations
#[derive(Parser, Debug)]
#[command(name = "vigil", version, about, long_about = None)]
struct Cli {
    /// Workspace directory
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Install the built-in investigation playbooks
    Seed,
    /// Manage correlation, triage and auto-response rules
    Rules {
        #[command(subcommand)]
        action: RulesAction,
    },
    /// Load security events
    Events {
        #[command(subcommand)]
        action: EventsAction,
    },
    /// Run the correlation engine
    Correlate {
        /// Look-back window in hours (defaults to correlation.default_window_hours)
        #[arg(long)]
        hours: Option<u32>,
    },
    /// Triage an event, or manage triaged incidents
    #[command(args_conflicts_with_subcommands = true)]
    Triage {
        /// Event to triage
        event_id: Option<String>,

        #[command(subcommand)]
        action: Option<TriageAction>,
    },
    /// Run the auto-response engine
    Respond {
        /// Look-back window in minutes
        #[arg(long)]
        minutes: Option<u32>,
        /// Evaluate a single rule (disabled rules included)
        #[arg(long)]
        rule: Option<String>,
    },
    /// Inspect engine output
    Incidents {
        #[command(subcommand)]
        action: IncidentsAction,
    },
    /// Run playbook investigations
    Investigate {
        #[command(subcommand)]
        action: InvestigateAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Write a default .vigil/config.toml
    Init,
    /// Print the effective configuration
    Show,
}

#[derive(clap::Subcommand, Debug)]
enum RulesAction {
    /// List all rules and playbooks
    List,
    /// Import rules and custom playbooks from a JSON or TOML bundle
    Import {
        /// Bundle file
        file: PathBuf,
    },
}

#[derive(clap::Subcommand, Debug)]
enum EventsAction {
    /// Import a JSON array of security events
    Import {
        /// Events file
        file: PathBuf,
    },
}

#[derive(clap::Subcommand, Debug)]
enum TriageAction {
    /// Change the status of a triaged incident
    Status {
        /// Triaged incident id
        id: String,
        /// new, acknowledged, investigating, resolved, escalated, closed, false_positive
        status: TriageStatus,
    },
    /// List open incidents past their SLA
    Overdue,
}

#[derive(clap::Subcommand, Debug)]
enum IncidentsAction {
    /// List correlated and triaged incidents
    List {
        /// Only `correlated` or `triaged`
        #[arg(long)]
        kind: Option<String>,
    },
    /// Change the status of a correlated incident
    Status {
        /// Correlated incident id
        id: String,
        /// new, investigating, confirmed, false_positive, resolved
        status: CorrelationStatus,
    },
    /// Show the auto-response audit log
    Log {
        /// Only entries for this rule
        #[arg(long)]
        rule: Option<String>,
    },
}

#[derive(clap::Subcommand, Debug)]
enum InvestigateAction {
    /// List playbooks
    Playbooks,
    /// List investigations
    List,
    /// Start an investigation from a playbook
    Start {
        /// Playbook id
        playbook: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        severity: Option<Severity>,
        /// Correlated incident to link (repeatable)
        #[arg(long)]
        correlated: Vec<String>,
        /// Triaged incident to link (repeatable)
        #[arg(long)]
        triaged: Vec<String>,
    },
    /// Show an investigation and its current step
    Show { id: String },
    /// Show linked evidence
    Evidence { id: String },
    /// Check (or uncheck) a checklist item of the current step
    Check {
        id: String,
        item: usize,
        #[arg(long)]
        uncheck: bool,
    },
    /// Replace the notes of the current step
    Notes { id: String, text: String },
    /// Complete the current step
    CompleteStep { id: String },
    /// Skip the current step
    SkipStep { id: String },
    /// Make another step current
    Goto { id: String, index: usize },
    /// Link an incident or finding
    Link {
        id: String,
        #[arg(long)]
        correlated: Option<String>,
        #[arg(long)]
        triaged: Option<String>,
        #[arg(long)]
        finding: Option<String>,
    },
    Pause { id: String },
    Resume { id: String },
    Complete { id: String },
    Escalate { id: String, reason: String },
    Close { id: String, reason: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Human-readable stderr plus JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "vigil", "vigil")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "vigil.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    commands::handle_command(cli.command, &workspace, cli.config.as_deref()).await
}
