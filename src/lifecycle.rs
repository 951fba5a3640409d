//! Node Lifecycle Controller (spec §4.3): create, remove, resume-wait,
//! suspend/shutdown, terminate, drain, and the `nodeinfo`/`nodeaddrs`
//! reporting commands.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::error::{CcSlurmError, Result};
use crate::hostlist;
use crate::model::{self, Partition};
use crate::orchestrator::model::{
    default_node_attributes, NodeCreationRequest, NodeCreationRequestSet,
    NodeCreationRequestSetDefinition, NodeCreationResult, NodeCreationResultSet, NodeRecord,
};
use crate::orchestrator::OrchestratorClient;
use crate::scheduler_cli;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExistingNodePolicy {
    Error,
    AllowExisting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnreferencedNodePolicy {
    RemoveSafely,
    ForceRemove,
    IgnoreSafely,
}

/// Creation bucket key: `(partition, placement_group, pg_index, name_offset)`.
type BucketKey = (String, String, u32, u32);

pub fn create_nodes(
    partitions: &[Partition],
    node_subset: Option<&[String]>,
    client: &OrchestratorClient,
    existing_policy: ExistingNodePolicy,
    unreferenced_policy: UnreferencedNodePolicy,
    dry_run: bool,
) -> Result<()> {
    let unreferenced_policy = if node_subset.is_some() && unreferenced_policy == UnreferencedNodePolicy::RemoveSafely {
        UnreferencedNodePolicy::IgnoreSafely
    } else {
        unreferenced_policy
    };

    let mut bucket_counts: BTreeMap<BucketKey, u32> = BTreeMap::new();

    for partition in partitions {
        let placement_group_base = format!("{}-{}-pg", partition.nodearray, partition.machine_type);

        let expanded_node_list: Vec<String> = match &partition.node_list {
            Some(nl) => hostlist::expand(nl)?,
            None => Vec::new(),
        };
        let expanded_set: HashSet<&str> = expanded_node_list.iter().map(String::as_str).collect();

        let mut valid_node_names: HashSet<String> = HashSet::new();
        let mut current_pg_index: Option<u32> = None;
        let mut current_name_offset: u32 = 1;

        for index in 0..partition.max_vm_count {
            let pg_index = index / partition.max_scaleset_size;
            let placement_group = format!("{placement_group_base}{pg_index}");

            if current_pg_index != Some(pg_index) {
                current_name_offset = 1;
                current_pg_index = Some(pg_index);
            }

            let name_index = (index % partition.max_scaleset_size) + 1;
            let node_name = model::node_name(
                &partition.nodename_prefix,
                &partition.nodearray,
                partition.is_hpc,
                pg_index,
                name_index,
            );

            if let Some(subset) = node_subset {
                if !subset.iter().any(|s| s == &node_name) {
                    tracing::debug!(node = %node_name, "skipping, not in the specified node list");
                    current_name_offset = name_index + 1;
                    continue;
                }
            }

            valid_node_names.insert(node_name.clone());

            if expanded_set.contains(node_name.as_str()) {
                if existing_policy == ExistingNodePolicy::Error {
                    return Err(CcSlurmError::NameCollision(format!(
                        "Node {node_name} already exists. Please pass in --policy AllowExisting if you want to go ahead and create the nodes anyways."
                    )));
                }
                current_name_offset = name_index + 1;
                continue;
            }

            let name_offset = current_name_offset;
            let key = (partition.name.clone(), placement_group.clone(), pg_index, name_offset);
            *bucket_counts.entry(key).or_insert(0) += 1;
        }

        let mut unreferenced: Vec<String> = expanded_node_list
            .iter()
            .filter(|n| !valid_node_names.contains(n.as_str()))
            .cloned()
            .collect();
        unreferenced.sort();

        if !unreferenced.is_empty()
            && matches!(
                unreferenced_policy,
                UnreferencedNodePolicy::RemoveSafely | UnreferencedNodePolicy::ForceRemove
            )
            && node_subset.is_none()
        {
            if dry_run {
                tracing::warn!(nodes = ?unreferenced, "dry-run: would remove");
            } else {
                remove_nodes_impl(client, &unreferenced)?;
            }
        }
    }

    let mut sets: Vec<NodeCreationRequestSet> = Vec::new();
    for (key, count) in &bucket_counts {
        let (partition_name, placement_group, pg_index, name_offset) = key;
        let partition = partitions
            .iter()
            .find(|p| &p.name == partition_name)
            .expect("bucket key references a known partition");

        sets.push(NodeCreationRequestSet {
            nodearray: partition.nodearray.clone(),
            placement_group_id: if partition.is_hpc {
                Some(placement_group.clone())
            } else {
                None
            },
            count: *count,
            definition: NodeCreationRequestSetDefinition {
                machine_type: partition.machine_type.clone(),
            },
            name_format: model::name_format(&partition.nodename_prefix, &partition.nodearray, partition.is_hpc, *pg_index),
            name_offset: *name_offset,
            node_attributes: default_node_attributes(),
        });
    }

    if sets.is_empty() {
        if existing_policy == ExistingNodePolicy::Error {
            return Err(CcSlurmError::NameCollision("No nodes were created!".to_string()));
        }
        tracing::info!("No new nodes are required.");
        return Ok(());
    }

    let request = NodeCreationRequest {
        request_id: Uuid::new_v4().to_string(),
        sets,
    };

    let result = if dry_run {
        NodeCreationResult {
            sets: request
                .sets
                .iter()
                .map(|s| NodeCreationResultSet {
                    added: s.count,
                    message: Some("dry run!".to_string()),
                })
                .collect(),
        }
    } else {
        client.create_nodes(&request)?
    };

    let num_created: u32 = result.sets.iter().map(|s| s.added).sum();
    if num_created == 0 && existing_policy == ExistingNodePolicy::Error {
        return Err(CcSlurmError::NameCollision("Did not create a single node!".to_string()));
    }

    for (request_set, set_result) in request.sets.iter().zip(result.sets.iter()) {
        if set_result.added == 0 {
            tracing::warn!(
                nodearray = %request_set.nodearray,
                name_format = %request_set.name_format,
                name_offset = request_set.name_offset,
                message = ?set_result.message,
                "no nodes were created for this set"
            );
        } else {
            tracing::info!(
                added = set_result.added,
                nodearray = %request_set.nodearray,
                name_format = %request_set.name_format,
                name_offset = request_set.name_offset,
                note = ?set_result.message,
                "added nodes"
            );
        }
    }

    Ok(())
}

fn remove_nodes_impl(client: &OrchestratorClient, names_to_remove: &[String]) -> Result<()> {
    let display = hostlist::compress(names_to_remove).unwrap_or_else(|_| names_to_remove.join(","));
    tracing::info!(nodes = %display, "attempting to remove nodes");

    let quoted_names = names_to_remove.join("\",\"");
    let node_filter = format!(
        "ClusterName == \"{}\" && Name in {{\"{}\"}} && (State==\"Terminated\" || State is undefined)",
        client.cluster_name, quoted_names
    );
    let result = client.remove_nodes(&node_filter)?;
    let removed: HashSet<String> = result.nodes.into_iter().map(|n| n.name).collect();
    let unremoved: Vec<&String> = names_to_remove.iter().filter(|n| !removed.contains(*n)).collect();
    if !unremoved.is_empty() {
        tracing::warn!(nodes = ?unremoved, "could not be removed because they were not terminated");
        tracing::warn!("please terminate them and rerun this command or remove them manually");
    }
    Ok(())
}

pub fn remove_nodes(client: &OrchestratorClient, node_list: Option<&[String]>) -> Result<()> {
    let names = match node_list {
        Some(v) => v.to_vec(),
        None => {
            let all = client.get_nodes()?;
            all.nodes
                .iter()
                .filter(|n| n.slurm_autoscale())
                .filter_map(|n| n.name.clone())
                .collect()
        }
    };
    remove_nodes_impl(client, &names)
}

pub fn resume(client: &OrchestratorClient, node_list: &[String]) -> Result<()> {
    let start_response = client.start_nodes(node_list)?;
    let operation_id = start_response.operation_id.unwrap_or_else(|| "noop".to_string());
    wait_for_resume(client, &operation_id, node_list)
}

/// The resume-wait state machine: polls the Orchestrator every 5 seconds
/// for up to an hour, marking failed/recovered nodes down/idle in the
/// Scheduler and pushing `NodeAddr` as private IPs become known.
pub fn wait_for_resume(client: &OrchestratorClient, operation_id: &str, node_list: &[String]) -> Result<()> {
    let deadline = Instant::now() + Duration::from_secs(3600);
    let node_set: HashSet<&str> = node_list.iter().map(String::as_str).collect();
    let nodes_preview = node_list.iter().take(5).cloned().collect::<Vec<_>>().join(",");

    let mut failed_nodes: HashSet<String> = HashSet::new();
    let mut ip_already_set: HashSet<String> = HashSet::new();
    let mut previous_tally: BTreeMap<String, u32> = BTreeMap::new();
    let mut ready_nodes: Vec<NodeRecord> = Vec::new();

    while Instant::now() < deadline {
        ready_nodes = Vec::new();
        let mut states: BTreeMap<String, u32> = BTreeMap::new();
        let mut unknown: BTreeMap<String, u32> = BTreeMap::new();
        let cluster = client.get_cluster_status(true)?;

        let mut relevant_count: u32 = 0;
        let mut newly_failed: Vec<String> = Vec::new();
        let mut recovered: Vec<String> = Vec::new();

        for node in &cluster.nodes {
            let Some(name) = node.name.clone() else { continue };
            if !node_set.contains(name.as_str()) {
                continue;
            }
            relevant_count += 1;

            let status = node.status.clone().unwrap_or_default();
            if !status.is_empty() && status.eq_ignore_ascii_case("failed") {
                *states.entry("Failed".to_string()).or_insert(0) += 1;
                if !failed_nodes.contains(&name) {
                    newly_failed.push(name.clone());
                    failed_nodes.insert(name.clone());
                }
                continue;
            }

            if failed_nodes.contains(&name) {
                recovered.push(name.clone());
            }

            if node.target_state.as_deref() != Some("Started") {
                *unknown.entry(status.clone()).or_insert(0) += 1;
                continue;
            }

            let private_ip = node.private_ip.clone();
            if !node.use_nodename_as_hostname() {
                if let Some(ip) = &private_ip {
                    if !ip_already_set.contains(ip) {
                        if let Err(e) = scheduler_cli::scontrol_update_node(
                            &name,
                            &[format!("NodeAddr={ip}"), format!("NodeHostName={ip}")],
                        ) {
                            tracing::warn!(node = %name, error = %e, "failed to set NodeAddr");
                        }
                        ip_already_set.insert(ip.clone());
                    }
                }
            }

            let mut display_status = status.clone();
            if status == "Ready" {
                if private_ip.is_none() {
                    display_status = "WaitingOnIPAddress".to_string();
                } else {
                    ready_nodes.push(node.clone());
                }
            }
            *states.entry(display_status).or_insert(0) += 1;
        }

        for name in &newly_failed {
            tracing::error!(node = %name, "node failed to start");
            if let Err(e) =
                scheduler_cli::scontrol_update_node(name, &["State=down".to_string(), "Reason=cyclecloud_node_failure".to_string()])
            {
                tracing::error!(node = %name, error = %e, "failed to mark node down, will re-attempt next iteration");
            }
        }

        for name in &recovered {
            tracing::info!(node = %name, "node recovered from failure");
            match scheduler_cli::scontrol_update_node(
                name,
                &["State=idle".to_string(), "Reason=cyclecloud_node_recovery".to_string()],
            ) {
                Ok(()) => {
                    failed_nodes.remove(name);
                }
                Err(e) => tracing::error!(node = %name, error = %e, "failed to mark node recovered, will re-attempt next iteration"),
            }
        }

        let terminal = states.get("Ready").copied().unwrap_or(0)
            + unknown.values().sum::<u32>()
            + states.get("Failed").copied().unwrap_or(0);

        let mut combined = states.clone();
        for (k, v) in &unknown {
            *combined.entry(k.clone()).or_insert(0) += v;
        }

        if combined != previous_tally {
            let mut parts: Vec<String> = states.iter().map(|(k, v)| format!("{k}={v}")).collect();
            parts.extend(unknown.iter().map(|(k, v)| format!("{k}={v}")));
            tracing::info!(operation_id, nodes = %nodes_preview, tally = %parts.join(" , "), "resume-wait tally changed");
        }

        if terminal == relevant_count {
            break;
        }

        previous_tally = combined;
        std::thread::sleep(Duration::from_secs(5));
    }

    let ready_names: Vec<String> = ready_nodes.iter().filter_map(|n| n.name.clone()).collect();
    tracing::info!(nodes = %ready_names.join(","), "nodes reached Ready state");

    for node in &ready_nodes {
        if node.use_nodename_as_hostname() {
            continue;
        }
        let Some(name) = &node.name else { continue };
        match &node.private_ip {
            Some(ip) => {
                if let Err(e) =
                    scheduler_cli::scontrol_update_node(name, &[format!("NodeAddr={ip}"), format!("NodeHostName={ip}")])
                {
                    tracing::warn!(node = %name, error = %e, "failed to re-issue NodeAddr backstop update");
                }
            }
            None => tracing::error!(node = %name, "could not find PrivateIp for node"),
        }
    }

    tracing::info!(operation_id, nodes = %nodes_preview, "all nodes updated with the proper IP address, exiting");
    Ok(())
}

/// `suspend`/`resume_fail`: tell the Scheduler the node is shutting down,
/// then ask the Orchestrator to shut it down.
pub fn shutdown(client: &OrchestratorClient, autoscale_enabled: bool, node_list: &[String]) -> Result<()> {
    for node in node_list {
        let mut extra = vec![format!("NodeAddr={node}"), format!("NodeHostName={node}")];
        if !autoscale_enabled {
            extra.push("State=FUTURE".to_string());
        }
        scheduler_cli::scontrol_update_node(node, &extra)?;
    }
    client.shutdown_nodes(node_list)
}

/// Forces Orchestrator termination regardless of the cluster's shutdown policy.
pub fn terminate_nodes(client: &OrchestratorClient, node_list: &[String]) -> Result<()> {
    client.terminate_nodes(node_list)
}

/// Drains nodes via `scontrol`, then polls `sinfo -t drained` until every
/// requested node appears. User-driven; no timeout.
pub fn drain(node_list: &[String]) -> Result<()> {
    let node_expr = hostlist::compress(node_list)?;
    let args: Vec<String> = vec![
        "scontrol".into(),
        "update".into(),
        format!("nodename={node_expr}"),
        "state=drain".into(),
        "reason=cyclecloud_drain_command".into(),
    ];
    let refs: Vec<&str> = args.iter().map(String::as_str).collect();
    scheduler_cli::run(&refs)?;

    let mut previous_drained: HashSet<String> = HashSet::new();
    while previous_drained.len() < node_list.len() {
        let current: HashSet<String> = scheduler_cli::sinfo_drained_nodes(&node_expr)
            .map_err(CcSlurmError::CommandFailure)?
            .into_iter()
            .collect();
        let mut newly: Vec<&String> = current.difference(&previous_drained).collect();
        if !newly.is_empty() {
            newly.sort();
            tracing::info!(nodes = ?newly, "nodes now drained");
        }
        previous_drained = current;
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct NodeInfoRow {
    pub names: String,
    pub slurm_status: String,
    pub ip: String,
    pub hostname: String,
    pub cc_state: String,
    pub cc_status: String,
    pub machine_type: String,
}

/// `nodeinfo`: aggregates (by default) or lists (`-N`) the intersection of
/// `sinfo` slurm-side state with Orchestrator-side node state.
pub fn nodeinfo(
    client: &OrchestratorClient,
    node_list: Option<&[String]>,
    show_all: bool,
    list_nodes: bool,
) -> Result<Vec<NodeInfoRow>> {
    let cluster_nodes = client.get_nodes()?;
    let by_name: HashMap<String, &NodeRecord> = cluster_nodes
        .nodes
        .iter()
        .filter_map(|n| n.name.clone().map(|name| (name, n)))
        .collect();

    let sinfo_lines = scheduler_cli::sinfo_node_state(node_list)?;
    let mut aggregated: BTreeMap<(String, String, String, String, String, String), Vec<String>> = BTreeMap::new();
    let mut rows = Vec::new();

    for line in sinfo_lines {
        let mut parts = line.split_whitespace();
        let node_name = match parts.next() {
            Some(n) => n.to_string(),
            None => continue,
        };
        let slurm_status = parts.next().unwrap_or("-").to_string();
        let node = match by_name.get(&node_name) {
            Some(n) => *n,
            None => continue,
        };

        let mut ip = node.private_ip.clone().unwrap_or_else(|| "-".to_string());
        let mut hostname = node.hostname.clone().unwrap_or_else(|| "-".to_string());
        let vmsku = node.machine_type.clone().unwrap_or_else(|| "-".to_string());
        let node_state = node.state.clone().unwrap_or_else(|| "-".to_string());
        let node_status = node.status.clone().unwrap_or_else(|| "-".to_string());

        let show = if node_status == "Off" {
            if (node_state != "-" && node_state != "Terminated") || show_all {
                ip = "-".to_string();
                hostname = "-".to_string();
                true
            } else {
                false
            }
        } else {
            true
        };

        if !show {
            continue;
        }

        if list_nodes {
            rows.push(NodeInfoRow {
                names: node_name,
                slurm_status,
                ip,
                hostname,
                cc_state: node_state,
                cc_status: node_status,
                machine_type: vmsku,
            });
        } else {
            let key = (slurm_status, ip, hostname, node_state, node_status, vmsku);
            aggregated.entry(key).or_default().push(node_name);
        }
    }

    if !list_nodes {
        for (key, names) in aggregated {
            let (slurm_status, ip, hostname, node_state, node_status, vmsku) = key;
            let hostlist_expr = hostlist::compress(&names)?;
            rows.push(NodeInfoRow {
                names: hostlist_expr,
                slurm_status,
                ip,
                hostname,
                cc_state: node_state,
                cc_status: node_status,
                machine_type: vmsku,
            });
        }
    }

    Ok(rows)
}

/// `nodeaddrs`: `<ip> <name>` pairs for autoscale-enabled nodes with a known IP.
pub fn nodeaddrs(client: &OrchestratorClient) -> Result<Vec<(String, String)>> {
    let nodes = client.get_nodes()?;
    Ok(nodes
        .nodes
        .iter()
        .filter(|n| n.slurm_autoscale())
        .filter_map(|n| match (&n.private_ip, &n.name) {
            (Some(ip), Some(name)) => Some((ip.clone(), name.clone())),
            _ => None,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::VirtualMachine;

    fn partition(name: &str, max_vm_count: u32, max_scaleset_size: u32, is_hpc: bool, node_list: Option<&str>) -> Partition {
        Partition {
            name: name.to_string(),
            nodearray: name.to_string(),
            nodename_prefix: String::new(),
            machine_type: "Standard_F2".to_string(),
            is_default: true,
            is_hpc,
            max_scaleset_size,
            vm: VirtualMachine {
                vcpu_count: 2,
                pcpu_count: Some(1),
                gpu_count: None,
                memory_gib: 4.0,
            },
            max_vm_count,
            dampen_memory: 0.05,
            use_pcpu: true,
            node_list: node_list.map(str::to_string),
        }
    }

    #[test]
    fn unreferenced_policy_is_downgraded_when_subset_is_given() {
        let policy = UnreferencedNodePolicy::RemoveSafely;
        let downgraded = if Some(&[] as &[String]).is_some() && policy == UnreferencedNodePolicy::RemoveSafely {
            UnreferencedNodePolicy::IgnoreSafely
        } else {
            policy
        };
        assert_eq!(downgraded, UnreferencedNodePolicy::IgnoreSafely);
    }

    #[test]
    fn bucket_key_orders_by_partition_then_pg_then_offset() {
        let mut map: BTreeMap<BucketKey, u32> = BTreeMap::new();
        map.insert(("b".to_string(), "b-pg0".to_string(), 0, 1), 1);
        map.insert(("a".to_string(), "a-pg1".to_string(), 1, 1), 1);
        map.insert(("a".to_string(), "a-pg0".to_string(), 0, 1), 1);
        let keys: Vec<&BucketKey> = map.keys().collect();
        assert_eq!(keys[0].0, "a");
        assert_eq!(keys[1].0, "a");
        assert_eq!(keys[2].0, "b");
        assert!(keys[0].2 < keys[1].2);
    }

    #[test]
    fn partition_with_no_node_list_has_empty_expanded_list() {
        let p = partition("hpc", 5, 3, true, None);
        assert!(p.node_list.is_none());
    }
}
