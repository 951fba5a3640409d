//! Hostlist Adapter: compress/expand node-name ranges via
//! `scontrol show hostlist|hostnames`.

use crate::error::CcSlurmError;
use crate::retry::{retry_subprocess, DEFAULT_ATTEMPTS};
use crate::scheduler_cli::run_once;

/// `name-1,name-2,name-3` -> `name-[1-3]`
pub fn compress(names: &[String]) -> Result<String, CcSlurmError> {
    if names.is_empty() {
        return Ok(String::new());
    }
    let joined = names.join(",");
    let out = retry_subprocess(
        || run_once(&["scontrol", "show", "hostlist", &joined]),
        DEFAULT_ATTEMPTS,
    )?;
    Ok(out.trim().to_string())
}

/// `name-[1-3]` -> `[name-1, name-2, name-3]`
pub fn expand(hostlist_expr: &str) -> Result<Vec<String>, CcSlurmError> {
    if hostlist_expr.is_empty() {
        return Ok(Vec::new());
    }
    let out = retry_subprocess(
        || run_once(&["scontrol", "show", "hostnames", hostlist_expr]),
        DEFAULT_ATTEMPTS,
    )?;
    Ok(out.split_whitespace().map(str::to_string).collect())
}

#[cfg(test)]
mod tests {
    // These require a real `scontrol` binary and so are exercised by the
    // integration suite against a Slurm test cluster, not here. The pure
    // sort/naming logic that sits on either side of compress/expand is
    // covered in `model.rs`.
}
