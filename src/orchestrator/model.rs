//! Wire types for the Orchestrator's cluster-management REST API.
//!
//! Nodearray/node `Configuration` blobs are duck-typed (spec §9): rather
//! than modeling every key CycleCloud-style services might emit, we parse
//! the handful of fields this bridge cares about out of a raw
//! [`serde_json::Value`] via [`json_path`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub fn json_path<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = value;
    for key in path {
        current = current.as_object()?.get(*key)?;
    }
    Some(current)
}

pub fn json_path_str<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    json_path(value, path)?.as_str()
}

/// Accepts a JSON bool, or a string/number coerced the way the original's
/// `str(val).lower() == "true"` would.
pub fn json_path_bool_str(value: &Value, path: &[&str]) -> Option<String> {
    json_path(value, path).map(|v| match v {
        Value::Bool(b) => b.to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

pub fn json_path_f64(value: &Value, path: &[&str]) -> Option<f64> {
    json_path(value, path)?.as_f64()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ClusterStatusResponse {
    #[serde(default)]
    pub nodearrays: Vec<NodearrayStatus>,
    /// Present when the status query was made with `nodes=true`; each
    /// node carries `Status`/`TargetState`/`PrivateIp` used by the resume-wait loop.
    #[serde(default)]
    pub nodes: Vec<NodeRecord>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct NodearrayStatus {
    pub name: Option<String>,
    /// Raw `nodearray` record: `Configuration.slurm.*`, `MachineType`, `Azure.MaxScalesetSize`.
    pub nodearray: Option<Value>,
    #[serde(default)]
    pub buckets: Vec<Bucket>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Bucket {
    pub definition: Option<BucketDefinition>,
    pub virtual_machine: Option<VirtualMachineRecord>,
    pub max_count: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct BucketDefinition {
    pub machine_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct VirtualMachineRecord {
    pub vcpu_count: Option<u32>,
    pub pcpu_count: Option<u32>,
    pub gpu_count: Option<u32>,
    pub memory: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct NodeListResponse {
    #[serde(default)]
    pub nodes: Vec<NodeRecord>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct NodeRecord {
    #[serde(rename = "Name")]
    pub name: Option<String>,
    #[serde(rename = "Template")]
    pub template: Option<String>,
    #[serde(rename = "MachineType")]
    pub machine_type: Option<String>,
    #[serde(rename = "Status")]
    pub status: Option<String>,
    #[serde(rename = "TargetState")]
    pub target_state: Option<String>,
    #[serde(rename = "PrivateIp")]
    pub private_ip: Option<String>,
    #[serde(rename = "Hostname")]
    pub hostname: Option<String>,
    #[serde(rename = "State")]
    pub state: Option<String>,
    #[serde(rename = "PlacementGroupId")]
    pub placement_group_id: Option<String>,
    #[serde(rename = "Configuration", default)]
    pub configuration: Value,
}

impl NodeRecord {
    pub fn slurm_autoscale(&self) -> bool {
        json_path_bool_str(&self.configuration, &["slurm", "autoscale"])
            .map(|s| s.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    pub fn use_nodename_as_hostname(&self) -> bool {
        json_path_bool_str(&self.configuration, &["slurm", "use_nodename_as_hostname"])
            .map(|s| s.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeCreationRequest {
    pub request_id: String,
    pub sets: Vec<NodeCreationRequestSet>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeCreationRequestSet {
    pub nodearray: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placement_group_id: Option<String>,
    pub count: u32,
    pub definition: NodeCreationRequestSetDefinition,
    pub name_format: String,
    pub name_offset: u32,
    pub node_attributes: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeCreationRequestSetDefinition {
    pub machine_type: String,
}

pub fn default_node_attributes() -> Value {
    serde_json::json!({ "StartAutomatically": false, "Fixed": true })
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct NodeCreationResult {
    #[serde(default)]
    pub sets: Vec<NodeCreationResultSet>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct NodeCreationResultSet {
    #[serde(default)]
    pub added: u32,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct StartNodesResponse {
    pub operation_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RemoveNodesResponse {
    #[serde(default)]
    pub nodes: Vec<RemovedNode>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RemovedNode {
    pub name: String,
}

/// Best-effort extraction of `{"Message": ..., "Detail": ...}` from a
/// structured Orchestrator error body, falling back to the raw text.
pub fn format_error_body(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(v) => {
            let message = v.get("Message").and_then(Value::as_str);
            let detail = v.get("Detail").and_then(Value::as_str);
            match (message, detail) {
                (Some(m), Some(d)) => format!("{m}: {d}"),
                (Some(m), None) => m.to_string(),
                _ => body.to_string(),
            }
        }
        Err(_) => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_structured_error_body() {
        let body = r#"{"Message": "Invalid request", "Detail": "bad machine type"}"#;
        assert_eq!(format_error_body(body), "Invalid request: bad machine type");
    }

    #[test]
    fn falls_back_to_raw_text_for_unstructured_body() {
        assert_eq!(format_error_body("plain text error"), "plain text error");
    }

    #[test]
    fn node_record_reads_nested_slurm_autoscale() {
        let mut node = NodeRecord::default();
        node.configuration = serde_json::json!({"slurm": {"autoscale": true}});
        assert!(node.slurm_autoscale());
    }
}
