//! Thin wrapper over the Scheduler's command-line tools (`scontrol`,
//! `sinfo`, `systemctl`). Every invocation goes through [`run`] /
//! [`run_output`] so retry and the chaos-mode fault injector live in one
//! place.

use std::process::Command;

use rand::Rng;

use crate::error::CcSlurmError;
use crate::retry::{retry_subprocess, DEFAULT_ATTEMPTS};

/// Runs a command, discarding stdout, retrying on non-zero exit / spawn failure.
pub fn run(args: &[&str]) -> Result<(), CcSlurmError> {
    tracing::info!(cmd = %args.join(" "), "running command");
    retry_subprocess(|| run_once(args).map(|_| ()), DEFAULT_ATTEMPTS)
}

/// Runs a command once, without retry — used where the caller supplies its
/// own loop (e.g. the drain poll).
pub fn run_once(args: &[&str]) -> Result<String, String> {
    maybe_inject_chaos()?;
    let (prog, rest) = args.split_first().ok_or_else(|| "empty command".to_string())?;
    let output = Command::new(prog)
        .args(rest)
        .output()
        .map_err(|e| e.to_string())?;
    if !output.status.success() {
        return Err(format!(
            "{} exited with {}: {}",
            args.join(" "),
            output.status,
            String::from_utf8_lossy(&output.stderr)
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Runs a command and returns stdout, retrying on failure.
pub fn run_output(args: &[&str]) -> Result<String, CcSlurmError> {
    tracing::debug!(cmd = %args.join(" "), "running command");
    retry_subprocess(|| run_once(args), DEFAULT_ATTEMPTS)
}

/// Chaos-mode: when `CCSLURM_CHAOS_MODE` is set, randomly fail command
/// invocations to exercise the retry paths in development and tests.
fn maybe_inject_chaos() -> Result<(), String> {
    if std::env::var("CCSLURM_CHAOS_MODE").is_err() {
        return Ok(());
    }
    let mut rng = rand::thread_rng();
    if rng.gen_bool(0.3) {
        return Err("injected chaos-mode failure".to_string());
    }
    Ok(())
}

/// `scontrol update NodeName=<name> ...` with the supplied extra key=value tokens.
pub fn scontrol_update_node(name: &str, extra: &[String]) -> Result<(), CcSlurmError> {
    let mut args: Vec<String> = vec!["scontrol".into(), "update".into(), format!("NodeName={name}")];
    args.extend(extra.iter().cloned());
    let refs: Vec<&str> = args.iter().map(String::as_str).collect();
    run(&refs)
}

pub fn systemctl_restart(unit: &str) -> Result<(), CcSlurmError> {
    run(&["systemctl", "restart", unit])
}

pub fn scontrol_show_config() -> Result<String, String> {
    run_once(&["scontrol", "show", "config"])
}

pub fn scontrol_show_topology() -> Result<String, CcSlurmError> {
    run_output(&["scontrol", "show", "topology"])
}

pub fn sinfo_all_node_names() -> Result<Vec<String>, CcSlurmError> {
    let out = run_output(&["sinfo", "-O", "nodelist", "-h", "-N"])?;
    Ok(out.split_whitespace().map(str::to_string).collect())
}

pub fn sinfo_node_state(nodelist: Option<&[String]>) -> Result<Vec<String>, CcSlurmError> {
    let mut args: Vec<String> = vec![
        "sinfo".into(),
        "-N".into(),
        "-h".into(),
        "-o".into(),
        "\"%N %T\"".into(),
    ];
    if let Some(nodes) = nodelist {
        args.push("--nodes".into());
        args.push(nodes.join(","));
    }
    let refs: Vec<&str> = args.iter().map(String::as_str).collect();
    let out = run_output(&refs)?;
    Ok(out.replace('"', "").lines().map(str::to_string).collect())
}

pub fn sinfo_drained_nodes(node_expr: &str) -> Result<Vec<String>, String> {
    run_once(&[
        "sinfo", "-n", node_expr, "-N", "-t", "drained", "-O", "nodelist", "-h",
    ])
    .map(|out| out.split_whitespace().map(str::to_string).collect())
}
