//! Typed wrapper over the cluster-orchestration REST API.

pub mod model;

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde_json::json;

use crate::config::Credentials;
use crate::error::CcSlurmError;
use crate::retry::{retry_rest, DEFAULT_ATTEMPTS};
use model::*;

pub struct OrchestratorClient {
    http: Client,
    base_url: String,
    pub cluster_name: String,
    username: String,
    password: String,
}

impl OrchestratorClient {
    pub fn new(creds: &Credentials) -> Result<Self, CcSlurmError> {
        let http = Client::builder()
            .danger_accept_invalid_certs(!creds.verify_certificates)
            .timeout(Duration::from_secs(creds.timeout))
            .build()
            .map_err(|e| CcSlurmError::OrchestratorFailure(e.to_string()))?;
        Ok(Self {
            http,
            base_url: creds.url.clone(),
            cluster_name: creds.cluster_name.clone(),
            username: creds.username.clone(),
            password: creds.password.clone(),
        })
    }

    fn cluster_path(&self, suffix: &str) -> String {
        format!(
            "{}/clusters/{}/{}",
            self.base_url, self.cluster_name, suffix
        )
    }

    fn get<T>(&self, path: &str, query: &[(&str, &str)]) -> Result<T, String>
    where
        T: serde::de::DeserializeOwned,
    {
        let resp = self
            .http
            .get(path)
            .basic_auth(&self.username, Some(&self.password))
            .query(query)
            .send()
            .map_err(|e| e.to_string())?;
        self.decode(resp)
    }

    fn post<B, T>(&self, path: &str, body: &B) -> Result<T, String>
    where
        B: serde::Serialize,
        T: serde::de::DeserializeOwned,
    {
        let resp = self
            .http
            .post(path)
            .basic_auth(&self.username, Some(&self.password))
            .json(body)
            .send()
            .map_err(|e| e.to_string())?;
        self.decode(resp)
    }

    fn decode<T>(&self, resp: reqwest::blocking::Response) -> Result<T, String>
    where
        T: serde::de::DeserializeOwned,
    {
        let status = resp.status();
        let body = resp.text().map_err(|e| e.to_string())?;
        if status != StatusCode::OK && status != StatusCode::CREATED && status != StatusCode::ACCEPTED {
            return Err(format_error_body(&body));
        }
        serde_json::from_str(&body).map_err(|e| format!("{e}: {body}"))
    }

    pub fn get_cluster_status(&self, include_nodes: bool) -> Result<ClusterStatusResponse, CcSlurmError> {
        retry_rest(
            || {
                let path = self.cluster_path("status");
                self.get(&path, &[("nodes", if include_nodes { "true" } else { "false" })])
            },
            DEFAULT_ATTEMPTS,
        )
    }

    pub fn get_nodes(&self) -> Result<NodeListResponse, CcSlurmError> {
        retry_rest(
            || {
                let path = self.cluster_path("nodes");
                self.get(&path, &[])
            },
            DEFAULT_ATTEMPTS,
        )
    }

    /// Not retried: node creation is not idempotent.
    pub fn create_nodes(&self, request: &NodeCreationRequest) -> Result<NodeCreationResult, CcSlurmError> {
        let path = self.cluster_path("nodes/create");
        self.post(&path, request)
            .map_err(CcSlurmError::OrchestratorFailure)
    }

    pub fn start_nodes(&self, names: &[String]) -> Result<StartNodesResponse, CcSlurmError> {
        retry_rest(
            || {
                let path = self.cluster_path("nodes/start");
                self.post(&path, &json!({ "names": names }))
            },
            DEFAULT_ATTEMPTS,
        )
    }

    pub fn shutdown_nodes(&self, names: &[String]) -> Result<(), CcSlurmError> {
        retry_rest(
            || {
                let path = self.cluster_path("nodes/shutdown");
                self.post::<_, serde_json::Value>(&path, &json!({ "names": names }))
            },
            DEFAULT_ATTEMPTS,
        )?;
        Ok(())
    }

    pub fn terminate_nodes(&self, names: &[String]) -> Result<(), CcSlurmError> {
        retry_rest(
            || {
                let path = self.cluster_path("nodes/terminate");
                self.post::<_, serde_json::Value>(&path, &json!({ "names": names }))
            },
            DEFAULT_ATTEMPTS,
        )?;
        Ok(())
    }

    pub fn remove_nodes(&self, custom_filter: &str) -> Result<RemoveNodesResponse, CcSlurmError> {
        retry_rest(
            || {
                let path = self.cluster_path("nodes/remove");
                self.post(&path, &json!({ "filter": custom_filter }))
            },
            DEFAULT_ATTEMPTS,
        )
    }
}
