//! Built-in investigation playbooks.
//!
//! Templates are seeded once per store and never overwritten. Re-seeding a
//! store that already has them is a no-op.

use serde::Serialize;
use vigil_core::error::StoreError;
use vigil_core::model::{InvestigationPlaybook, PlaybookStep, Severity, StepCategory};
use vigil_core::store::{Insertion, RuleStore};

/// Outcome of [`seed_playbooks`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    pub inserted: Vec<String>,
    pub existing: Vec<String>,
    /// Template ids taken by a custom playbook; those templates are missing.
    pub collisions: Vec<String>,
}

/// Insert every template the store does not already have.
pub async fn seed_playbooks(store: &dyn RuleStore) -> Result<SeedReport, StoreError> {
    let mut report = SeedReport::default();
    for playbook in template_playbooks() {
        let id = playbook.id.clone();
        match store.insert_playbook_if_absent(playbook).await? {
            Insertion::Inserted(_) => report.inserted.push(id),
            Insertion::Existing(existing) if existing.is_template => report.existing.push(id),
            Insertion::Existing(_) => {
                tracing::warn!(playbook = id.as_str(), "Template id is taken by a custom playbook");
                report.collisions.push(id);
            }
        }
    }
    if !report.inserted.is_empty() {
        tracing::info!(count = report.inserted.len(), "Seeded template playbooks");
    }
    Ok(report)
}

/// Whether `id` belongs to a built-in template, seeded or not.
pub fn is_template_id(id: &str) -> bool {
    template_playbooks().iter().any(|p| p.id == id)
}

#[allow(clippy::too_many_arguments)]
fn step(
    id: &str,
    title: &str,
    category: StepCategory,
    description: &str,
    checklist: &[&str],
    data_queries: &[&str],
    recommended_actions: &[&str],
    mitre_techniques: &[&str],
) -> PlaybookStep {
    let owned = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
    PlaybookStep {
        id: id.into(),
        title: title.into(),
        category,
        description: description.into(),
        checklist: owned(checklist),
        data_queries: owned(data_queries),
        recommended_actions: owned(recommended_actions),
        mitre_techniques: owned(mitre_techniques),
    }
}

pub fn template_playbooks() -> Vec<InvestigationPlaybook> {
    vec![brute_force(), malware_outbreak(), data_exfiltration(), ransomware()]
}

fn brute_force() -> InvestigationPlaybook {
    InvestigationPlaybook {
        id: "tpl-brute-force".into(),
        name: "Brute Force Attack".into(),
        description: "Repeated authentication failures against one or more accounts.".into(),
        scenario_type: "brute_force".into(),
        severity: Severity::High,
        estimated_duration_minutes: 60,
        is_template: true,
        steps: vec![
            step(
                "scope",
                "Scope the attack",
                StepCategory::Identification,
                "Identify targeted accounts, source addresses and whether any attempt succeeded.",
                &[
                    "List targeted accounts",
                    "List source IPs and their reputation",
                    "Check for a successful login after the failures",
                ],
                &["login_failed events grouped by source_ip over 24h"],
                &["Correlate with threat intel feeds"],
                &["T1110", "T1110.003"],
            ),
            step(
                "contain",
                "Contain access",
                StepCategory::Containment,
                "Stop the attack and protect exposed accounts.",
                &["Block attacking IPs", "Lock or reset compromised accounts"],
                &[],
                &["block_ip", "Force password reset"],
                &["T1078"],
            ),
            step(
                "harden",
                "Harden authentication",
                StepCategory::Eradication,
                "Close the gap that made the attack viable.",
                &["Enforce MFA on targeted accounts", "Review lockout policy"],
                &[],
                &["Enable conditional access"],
                &[],
            ),
            step(
                "review",
                "Post-incident review",
                StepCategory::LessonsLearned,
                "",
                &["Document timeline", "Tune detection thresholds"],
                &[],
                &[],
                &[],
            ),
        ],
    }
}

fn malware_outbreak() -> InvestigationPlaybook {
    InvestigationPlaybook {
        id: "tpl-malware-outbreak".into(),
        name: "Malware Outbreak".into(),
        description: "Malware detected on one or more endpoints.".into(),
        scenario_type: "malware".into(),
        severity: Severity::Critical,
        estimated_duration_minutes: 180,
        is_template: true,
        steps: vec![
            step(
                "identify",
                "Identify infected hosts",
                StepCategory::Identification,
                "Find every endpoint showing the same indicators.",
                &[
                    "Collect file hashes",
                    "Search for the hashes fleet-wide",
                    "Identify patient zero",
                ],
                &["malware_detected events by endpoint_id over 7d"],
                &["trigger_vuln_scan"],
                &["T1204", "T1059"],
            ),
            step(
                "isolate",
                "Isolate endpoints",
                StepCategory::Containment,
                "",
                &["Isolate infected endpoints", "Block C2 destinations"],
                &[],
                &["isolate_endpoint", "block_ip"],
                &["T1071"],
            ),
            step(
                "eradicate",
                "Remove the malware",
                StepCategory::Eradication,
                "Clean or reimage affected systems.",
                &["Remove persistence mechanisms", "Reimage where cleaning is unreliable"],
                &[],
                &[],
                &["T1547"],
            ),
            step(
                "recover",
                "Restore service",
                StepCategory::Recovery,
                "",
                &["Reconnect cleaned endpoints", "Monitor for reinfection for 72h"],
                &[],
                &[],
                &[],
            ),
        ],
    }
}

fn data_exfiltration() -> InvestigationPlaybook {
    InvestigationPlaybook {
        id: "tpl-data-exfiltration".into(),
        name: "Data Exfiltration".into(),
        description: "Unusual outbound transfer of sensitive data.".into(),
        scenario_type: "data_exfiltration".into(),
        severity: Severity::Critical,
        estimated_duration_minutes: 240,
        is_template: true,
        steps: vec![
            step(
                "quantify",
                "Quantify the transfer",
                StepCategory::Identification,
                "Determine what left, how much, and where it went.",
                &[
                    "Identify destination hosts",
                    "Estimate data volume",
                    "Classify the data involved",
                ],
                &["outbound transfer events by user_id over 48h"],
                &[],
                &["T1041", "T1567"],
            ),
            step(
                "cut-off",
                "Cut off the channel",
                StepCategory::Containment,
                "",
                &["Block destination addresses", "Suspend the involved accounts"],
                &[],
                &["block_ip", "notify_email"],
                &["T1048"],
            ),
            step(
                "notify",
                "Legal and compliance review",
                StepCategory::Recovery,
                "Assess notification obligations.",
                &["Engage legal counsel", "Decide on regulator notification"],
                &[],
                &["notify_email"],
                &[],
            ),
        ],
    }
}

fn ransomware() -> InvestigationPlaybook {
    InvestigationPlaybook {
        id: "tpl-ransomware".into(),
        name: "Ransomware".into(),
        description: "Encryption of files or systems with a ransom demand.".into(),
        scenario_type: "ransomware".into(),
        severity: Severity::Critical,
        estimated_duration_minutes: 480,
        is_template: true,
        steps: vec![
            step(
                "triage",
                "Assess impact",
                StepCategory::Identification,
                "Identify the strain and the encrypted systems.",
                &["Identify the ransomware family", "List encrypted systems and shares"],
                &["file modification bursts by endpoint_id over 6h"],
                &[],
                &["T1486"],
            ),
            step(
                "isolate",
                "Stop the spread",
                StepCategory::Containment,
                "",
                &[
                    "Isolate affected segments",
                    "Disable compromised service accounts",
                    "Protect backups from deletion",
                ],
                &[],
                &["isolate_endpoint", "escalate_severity"],
                &["T1490", "T1021"],
            ),
            step(
                "eradicate",
                "Remove the foothold",
                StepCategory::Eradication,
                "",
                &["Find the initial access vector", "Remove attacker persistence"],
                &[],
                &[],
                &["T1133"],
            ),
            step(
                "restore",
                "Restore from backup",
                StepCategory::Recovery,
                "Restore systems from known-good backups in priority order.",
                &["Verify backup integrity", "Restore critical systems first"],
                &[],
                &[],
                &[],
            ),
            step(
                "review",
                "Lessons learned",
                StepCategory::LessonsLearned,
                "",
                &["Document timeline", "Update backup and segmentation policy"],
                &[],
                &[],
                &[],
            ),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::store::MemoryStore;

    #[test]
    fn test_templates_are_valid() {
        let templates = template_playbooks();
        assert_eq!(templates.len(), 4);
        for playbook in &templates {
            assert!(playbook.is_template);
            playbook.validate().unwrap();
        }
    }

    #[tokio::test]
    async fn test_seeding_is_idempotent() {
        let store = MemoryStore::new();
        let first = seed_playbooks(&store).await.unwrap();
        assert_eq!(first.inserted.len(), 4);
        assert!(first.existing.is_empty());

        let second = seed_playbooks(&store).await.unwrap();
        assert!(second.inserted.is_empty());
        assert_eq!(second.existing.len(), 4);
        assert_eq!(store.playbooks().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_custom_playbook_on_template_id_is_a_collision() {
        let store = MemoryStore::new();
        let mut squatter = brute_force();
        squatter.is_template = false;
        squatter.name = "Our brute force runbook".into();
        store.upsert_playbook(squatter).await.unwrap();

        let report = seed_playbooks(&store).await.unwrap();
        assert_eq!(report.collisions, vec!["tpl-brute-force".to_string()]);
        assert!(report.existing.is_empty());
        assert_eq!(report.inserted.len(), 3);
        assert!(is_template_id("tpl-brute-force"));
        assert!(!is_template_id("pb-custom"));
    }
}
