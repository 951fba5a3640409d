//! Rescale Orchestrator (spec §4.4): autoscale detection, legacy config
//! migration, and the full rescale sequence.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::configgen;
use crate::error::{CcSlurmError, Result};
use crate::lifecycle::{self, ExistingNodePolicy, UnreferencedNodePolicy};
use crate::orchestrator::OrchestratorClient;
use crate::partitions;
use crate::scheduler_cli;

const SLURM_CONF_PATH: &str = "/sched/slurm.conf";
const SLURM_CONF_BASE_PATH: &str = "/sched/slurm.conf.base";
const CYCLECLOUD_CONF_PATH: &str = "/sched/cyclecloud.conf";
const TOPOLOGY_CONF_PATH: &str = "/sched/topology.conf";
const BACKUP_DIR: &str = "/etc/slurm/.backups";

const DEPRECATED_PREFIXES: &[&str] = &["partitionname", "nodename", "controlmachine"];

/// Legacy bootstrap path rewritten by `upgrade_conf` on hosts that have
/// already migrated `/opt/cycle/slurm` into place.
const LEGACY_BOOTSTRAP_PATH: &str = "/opt/cycle/jetpack/system/bootstrap/slurm";
const UPGRADED_BOOTSTRAP_PATH: &str = "/opt/cycle/slurm";

/// `{old: new}` path substitutions applied to every surviving line, guarded
/// by the new path actually existing on disk — mirrors the original's
/// `replace` map.
fn path_substitutions() -> Vec<(&'static str, &'static str)> {
    if Path::new(UPGRADED_BOOTSTRAP_PATH).exists() {
        vec![(LEGACY_BOOTSTRAP_PATH, UPGRADED_BOOTSTRAP_PATH)]
    } else {
        Vec::new()
    }
}

/// Memoized per-process: `scontrol show config`, falling back to
/// `/sched/slurm.conf`, falling back to `true`. Looks for a `SuspendTime`
/// line; `NONE` or negative disables autoscale.
pub fn autoscale_enabled() -> bool {
    static ENABLED: OnceLock<bool> = OnceLock::new();
    *ENABLED.get_or_init(|| detect_autoscale_enabled())
}

fn detect_autoscale_enabled() -> bool {
    let config_text = match scheduler_cli::scontrol_show_config() {
        Ok(text) => text,
        Err(_) => match std::fs::read_to_string(SLURM_CONF_PATH) {
            Ok(text) => text,
            Err(_) => return true,
        },
    };
    parse_suspend_time(&config_text).unwrap_or(true)
}

fn parse_suspend_time(config_text: &str) -> Option<bool> {
    for line in config_text.lines() {
        let trimmed = line.trim();
        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("suspendtime ") || lower.starts_with("suspendtime=") {
            let value = match trimmed.find('=') {
                Some(eq_pos) => trimmed[eq_pos + 1..].trim(),
                None => trimmed.splitn(2, char::is_whitespace).nth(1).unwrap_or(trimmed).trim(),
            };
            let value = value.split_whitespace().next().unwrap_or(value);
            if value.eq_ignore_ascii_case("none") {
                return Some(false);
            }
            return value.parse::<i64>().ok().map(|n| n >= 0);
        }
    }
    None
}

fn epoch_backup_dir() -> Result<PathBuf> {
    let epoch = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    Ok(PathBuf::from(BACKUP_DIR).join(epoch.to_string()))
}

fn backup_file(path: &Path, backup_dir: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    std::fs::create_dir_all(backup_dir)?;
    let dest = backup_dir.join(path.file_name().unwrap_or_default());
    std::fs::copy(path, dest)?;
    Ok(())
}

fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    std::io::Write::write_all(&mut tmp, contents)?;
    tmp.persist(path).map_err(|e| CcSlurmError::Io(e.error))?;
    Ok(())
}

/// Best-effort legacy migration: detects deprecated directives and, if
/// found, strips them and appends `include cyclecloud.conf`.
pub fn upgrade_conf() -> Result<()> {
    if std::env::var("CYCLECLOUD_SLURM_DISABLE_CONF_UPGRADE").is_ok() {
        tracing::info!("CYCLECLOUD_SLURM_DISABLE_CONF_UPGRADE set, skipping upgrade_conf");
        return Ok(());
    }

    let slurm_conf = Path::new(SLURM_CONF_PATH);
    if !slurm_conf.exists() {
        let base = Path::new(SLURM_CONF_BASE_PATH);
        if base.exists() {
            std::fs::copy(base, slurm_conf)?;
        } else {
            return Err(CcSlurmError::ConfigMissing(format!(
                "{SLURM_CONF_PATH} does not exist and no {SLURM_CONF_BASE_PATH} to restore from"
            )));
        }
    }

    let original = std::fs::read_to_string(slurm_conf)?;
    let substitutions = path_substitutions();
    if !needs_upgrade(&original, &substitutions) {
        tracing::info!("slurm.conf does not need an upgrade");
        return Ok(());
    }

    let backup_dir = epoch_backup_dir()?;
    backup_file(slurm_conf, &backup_dir)?;

    let rewritten = rewrite_legacy_conf(&original, &substitutions);
    atomic_write(slurm_conf, rewritten.as_bytes())?;
    tracing::info!(backup = %backup_dir.display(), "upgraded slurm.conf");
    Ok(())
}

fn needs_upgrade(text: &str, substitutions: &[(&str, &str)]) -> bool {
    let mut has_include = false;
    let mut has_deprecated = false;
    for line in text.lines() {
        let trimmed = line.trim();
        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("include cyclecloud.conf") {
            has_include = true;
        }
        if DEPRECATED_PREFIXES.iter().any(|p| lower.starts_with(p)) {
            has_deprecated = true;
        }
        if substitutions.iter().any(|(old, _)| line.contains(old)) {
            has_deprecated = true;
        }
    }
    has_deprecated || !has_include
}

fn rewrite_legacy_conf(text: &str, substitutions: &[(&str, &str)]) -> String {
    let mut out = String::new();
    for line in text.lines() {
        let lower = line.trim().to_ascii_lowercase();
        let skip = DEPRECATED_PREFIXES.iter().any(|p| lower.starts_with(p))
            || lower.starts_with("include cyclecloud.conf");

        let mut rewritten = line.to_string();
        for (old, new) in substitutions {
            if rewritten.contains(old) {
                rewritten = rewritten.replace(old, new);
            }
        }

        if !skip {
            out.push_str(&rewritten);
            out.push('\n');
        }
    }
    out.push_str("include cyclecloud.conf\n");
    out
}

/// Full rescale sequence (spec §4.4). `config_only=true` implements `reconfigure`.
pub fn rescale(client: &OrchestratorClient, config_only: bool) -> Result<()> {
    let partitions = partitions::fetch_partitions(client)?;

    if !config_only {
        reconcile_machine_type_changes(client, &partitions)?;
        lifecycle::create_nodes(
            &partitions,
            None,
            client,
            ExistingNodePolicy::AllowExisting,
            UnreferencedNodePolicy::RemoveSafely,
            false,
        )?;
    }

    let partitions = partitions::fetch_partitions(client)?;

    let backup_dir = epoch_backup_dir()?;
    backup_file(Path::new(SLURM_CONF_PATH), &backup_dir)?;
    backup_file(Path::new(TOPOLOGY_CONF_PATH), &backup_dir)?;

    let autoscale = autoscale_enabled();

    let mut cyclecloud_conf = Vec::new();
    configgen::generate_slurm_conf(&partitions, &mut cyclecloud_conf, config_only, autoscale)?;
    atomic_write(Path::new(CYCLECLOUD_CONF_PATH), &cyclecloud_conf)?;

    let nodes = client.get_nodes()?;
    let mut topology_conf = Vec::new();
    configgen::generate_topology(&nodes, &mut topology_conf)?;
    atomic_write(Path::new(TOPOLOGY_CONF_PATH), &topology_conf)?;

    scheduler_cli::systemctl_restart("slurmctld")?;

    if !autoscale {
        update_future_states(&nodes)?;
    }

    let topology = scheduler_cli::scontrol_show_topology()?;
    tracing::info!(topology = %topology, "new topology");

    Ok(())
}

pub fn reconfigure(client: &OrchestratorClient) -> Result<()> {
    rescale(client, true)
}

fn reconcile_machine_type_changes(client: &OrchestratorClient, partitions: &[crate::model::Partition]) -> Result<()> {
    let nodes = client.get_nodes()?;
    let mut to_remove: Vec<String> = Vec::new();
    let mut offenders: Vec<String> = Vec::new();

    for partition in partitions {
        for node in &nodes.nodes {
            if node.template.as_deref() != Some(partition.nodearray.as_str()) {
                continue;
            }
            let Some(name) = &node.name else { continue };
            let node_machine_type = node.machine_type.as_deref().unwrap_or("");
            if node_machine_type == partition.machine_type || node_machine_type.is_empty() {
                continue;
            }
            let status = node.status.as_deref();
            if matches!(status, None | Some("Terminated") | Some("Off")) {
                to_remove.push(name.clone());
            } else {
                offenders.push(name.clone());
            }
        }
    }

    if !offenders.is_empty() {
        return Err(CcSlurmError::MachineTypeConflict(format!(
            "Cannot change machine type while the following nodes are still live: {}",
            offenders.join(", ")
        )));
    }

    if !to_remove.is_empty() {
        lifecycle::remove_nodes(client, Some(&to_remove))?;
    }

    Ok(())
}

/// `sync_nodes`: apply `state=FUTURE` to every node whose `TargetState !=
/// "Started"`, as a shared step after rescale and as the standalone subcommand.
pub fn update_future_states(nodes: &crate::orchestrator::model::NodeListResponse) -> Result<()> {
    for node in &nodes.nodes {
        if node.target_state.as_deref() == Some("Started") {
            continue;
        }
        let Some(name) = &node.name else { continue };
        scheduler_cli::scontrol_update_node(
            name,
            &[
                format!("NodeAddr={name}"),
                format!("NodeHostName={name}"),
                "State=FUTURE".to_string(),
            ],
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suspend_time_none_disables_autoscale() {
        assert_eq!(parse_suspend_time("SuspendTime=NONE"), Some(false));
        assert_eq!(parse_suspend_time("SuspendTime = -1"), Some(false));
        assert_eq!(parse_suspend_time("SuspendTime=120"), Some(true));
        assert_eq!(parse_suspend_time("SuspendTime 300"), Some(true));
        assert_eq!(parse_suspend_time("SomeOtherKey=1"), None);
    }

    #[test]
    fn needs_upgrade_detects_deprecated_directives() {
        assert!(needs_upgrade("PartitionName=old Nodes=ALL\n", &[]));
        assert!(needs_upgrade("ControlMachine=foo\n", &[]));
        assert!(needs_upgrade("SlurmctldHost=foo\n", &[]));
        assert!(!needs_upgrade("SlurmctldHost=foo\ninclude cyclecloud.conf\n", &[]));
    }

    #[test]
    fn needs_upgrade_flags_legacy_path_even_with_include_present() {
        let subs = [(LEGACY_BOOTSTRAP_PATH, UPGRADED_BOOTSTRAP_PATH)];
        let input = "PrologFlags=/opt/cycle/jetpack/system/bootstrap/slurm/prolog.sh\ninclude cyclecloud.conf\n";
        assert!(needs_upgrade(input, &subs));
        assert!(!needs_upgrade("SlurmctldHost=foo\ninclude cyclecloud.conf\n", &subs));
    }

    #[test]
    fn rewrite_strips_deprecated_lines_and_appends_include() {
        let input = "PartitionName=old Nodes=ALL\nNodeName=x State=UNKNOWN\nControlMachine=y\nSlurmctldHost=foo\n";
        let output = rewrite_legacy_conf(input, &[]);
        assert!(!output.to_ascii_lowercase().contains("partitionname"));
        assert!(!output.to_ascii_lowercase().contains("controlmachine"));
        assert!(output.contains("SlurmctldHost=foo"));
        assert!(output.trim_end().ends_with("include cyclecloud.conf"));
    }

    #[test]
    fn rewrite_does_not_duplicate_existing_include() {
        let input = "SlurmctldHost=foo\ninclude cyclecloud.conf\n";
        let output = rewrite_legacy_conf(input, &[]);
        assert_eq!(output.matches("include cyclecloud.conf").count(), 1);
    }

    #[test]
    fn rewrite_applies_path_substitutions() {
        let subs = [(LEGACY_BOOTSTRAP_PATH, UPGRADED_BOOTSTRAP_PATH)];
        let input = "SlurmctldHost=foo\nPrologFlags=/opt/cycle/jetpack/system/bootstrap/slurm/prolog.sh\ninclude cyclecloud.conf\n";
        let output = rewrite_legacy_conf(input, &subs);
        assert!(output.contains("/opt/cycle/slurm/prolog.sh"));
        assert!(!output.contains("jetpack/system/bootstrap"));
    }
}
