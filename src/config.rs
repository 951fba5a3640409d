//! On-disk credentials file: `{cluster_name, username, password, url}`.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CcSlurmError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub cluster_name: String,
    pub username: String,
    pub password: String,
    pub url: String,
    #[serde(default)]
    pub verify_certificates: bool,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

fn default_timeout() -> u64 {
    60
}

/// Default location: `$CYCLECLOUD_HOME/config/autoscale.json`.
pub fn default_config_path() -> PathBuf {
    let home = std::env::var("CYCLECLOUD_HOME").unwrap_or_else(|_| "/opt/cycle/jetpack".to_string());
    Path::new(&home).join("config").join("autoscale.json")
}

pub fn load(path: &Path) -> Result<Credentials> {
    if !path.exists() {
        return Err(CcSlurmError::ConfigMissing(format!(
            "{} does not exist! Please see 'ccslurm initialize'",
            path.display()
        )));
    }
    let contents = std::fs::read_to_string(path)?;
    let creds: Credentials = serde_json::from_str(&contents)?;
    if creds.cluster_name.is_empty() {
        return Err(CcSlurmError::ConfigMissing(format!(
            "Please define cluster_name in {}",
            path.display()
        )));
    }
    if creds.username.is_empty() {
        return Err(CcSlurmError::ConfigMissing(format!(
            "Please define username in {}",
            path.display()
        )));
    }
    if creds.password.is_empty() {
        return Err(CcSlurmError::ConfigMissing(format!(
            "Please define password in {}",
            path.display()
        )));
    }
    if creds.url.is_empty() {
        return Err(CcSlurmError::ConfigMissing(format!(
            "Please define url in {}",
            path.display()
        )));
    }
    Ok(creds)
}

pub fn initialize(
    path: &Path,
    cluster_name: &str,
    username: &str,
    password: &str,
    url: &str,
    force: bool,
) -> Result<()> {
    if path.exists() && !force {
        return Err(CcSlurmError::ConfigMissing(format!(
            "{} already exists. To force reinitialization, please pass in --force",
            path.display()
        )));
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let creds = Credentials {
        cluster_name: cluster_name.to_string(),
        username: username.to_string(),
        password: password.to_string(),
        url: url.trim_end_matches('/').to_string(),
        verify_certificates: false,
        timeout: default_timeout(),
    };
    let tmp_path = path.with_extension("json.tmp");
    {
        let mut f = std::fs::File::create(&tmp_path)?;
        let body = serde_json::to_string_pretty(&creds)?;
        f.write_all(body.as_bytes())?;
    }
    std::fs::rename(&tmp_path, path)?;
    tracing::info!(path = %path.display(), "Initialized config");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn initialize_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("autoscale.json");
        initialize(&path, "cluster1", "user", "pass", "https://example.com/", false).unwrap();
        let creds = load(&path).unwrap();
        assert_eq!(creds.cluster_name, "cluster1");
        assert_eq!(creds.url, "https://example.com");
        assert_eq!(creds.timeout, 60);
        assert!(!creds.verify_certificates);
    }

    #[test]
    fn initialize_refuses_to_overwrite_without_force() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("autoscale.json");
        initialize(&path, "cluster1", "user", "pass", "https://example.com", false).unwrap();
        let err = initialize(&path, "cluster2", "user", "pass", "https://example.com", false)
            .unwrap_err();
        assert!(matches!(err, CcSlurmError::ConfigMissing(_)));
    }

    #[test]
    fn load_missing_file_is_config_missing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nope.json");
        let err = load(&path).unwrap_err();
        assert!(matches!(err, CcSlurmError::ConfigMissing(_)));
    }
}
