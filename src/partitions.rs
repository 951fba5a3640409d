//! Partition Resolver (spec §4.1): Orchestrator inventory -> ordered
//! `Partition` list, one per eligible nodearray, in nodearray-enumeration order.

use serde_json::Value;

use crate::error::{CcSlurmError, Result};
use crate::hostlist;
use crate::model::{
    parse_bool_default, sanitize_prefix, sort_names, Partition, VirtualMachine,
    UNBOUNDED_SCALESET_SIZE,
};
use crate::orchestrator::model::{json_path, json_path_bool_str, json_path_f64, json_path_str};
use crate::orchestrator::OrchestratorClient;

const DEFAULT_MAX_SCALESET_SIZE: u32 = 40;

pub fn fetch_partitions(client: &OrchestratorClient) -> Result<Vec<Partition>> {
    let status = client.get_cluster_status(true)?;
    let nodes_resp = client.get_nodes()?;

    let mut partitions: Vec<Partition> = Vec::new();

    for nodearray_status in &status.nodearrays {
        let nodearray_name = match nodearray_status.name.as_deref() {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => {
                tracing::error!("Name is not defined for nodearray. Skipping");
                continue;
            }
        };

        let record = match &nodearray_status.nodearray {
            Some(r) => r,
            None => {
                tracing::error!(nodearray = %nodearray_name, "Nodearray record is not defined for nodearray status. Skipping");
                continue;
            }
        };

        let is_autoscale = json_path_bool_str(record, &["Configuration", "slurm", "autoscale"]);
        match is_autoscale.as_deref() {
            None => {
                tracing::warn!(nodearray = %nodearray_name, "Nodearray does not define slurm.autoscale, skipping.");
                continue;
            }
            Some(s) if !s.eq_ignore_ascii_case("true") => {
                tracing::debug!(nodearray = %nodearray_name, "Nodearray explicitly defined slurm.autoscale=false, skipping.");
                continue;
            }
            _ => {}
        }

        let partition_name = json_path_str(record, &["Configuration", "slurm", "partition"])
            .map(str::to_string)
            .unwrap_or_else(|| nodearray_name.clone());

        let raw_prefix = json_path_str(record, &["Configuration", "slurm", "node_prefix"])
            .unwrap_or("")
            .to_string();
        let (nodename_prefix, changed) = sanitize_prefix(&raw_prefix);
        if changed {
            tracing::warn!(
                nodearray = %nodearray_name,
                from = %raw_prefix,
                to = %nodename_prefix,
                "slurm.node_prefix was converted due to invalid hostname characters"
            );
        }

        let machine_types = machine_type_candidates(record);
        if machine_types.len() > 1 {
            tracing::warn!(nodearray = %nodearray_name, "Ignoring multiple machine types for nodearray");
        }
        let machine_type = match machine_types.into_iter().next() {
            Some(mt) if !mt.is_empty() => mt,
            _ => {
                tracing::warn!(nodearray = %nodearray_name, "MachineType not defined for nodearray. Skipping");
                continue;
            }
        };

        if partitions.iter().any(|p| p.name == partition_name) {
            tracing::warn!(nodearray = %nodearray_name, partition = %partition_name, "Same partition defined for two different nodearrays. Ignoring nodearray");
            continue;
        }

        let bucket = nodearray_status
            .buckets
            .iter()
            .find(|b| b.definition.as_ref().and_then(|d| d.machine_type.as_deref()) == Some(machine_type.as_str()));

        let bucket = match bucket {
            Some(b) => b,
            None => {
                return Err(CcSlurmError::InventoryInvariant(format!(
                    "Invalid status response - missing bucket with machinetype=='{machine_type}'"
                )));
            }
        };

        let vm_record = bucket.virtual_machine.as_ref().ok_or_else(|| {
            CcSlurmError::InventoryInvariant(format!(
                "Invalid status response - missing virtualMachine definition with machinetype=='{machine_type}'"
            ))
        })?;

        let max_vm_count = match bucket.max_count {
            None => {
                tracing::error!(machine_type = %machine_type, "No max_count defined for machine type. Skipping");
                continue;
            }
            Some(c) if c <= 0 => {
                tracing::info!(machine_type = %machine_type, "Bucket has a max_count <= 0. Skipping");
                continue;
            }
            Some(c) => c as u32,
        };

        let is_hpc = parse_bool_default(
            json_path_bool_str(record, &["Configuration", "slurm", "hpc"]).as_deref(),
            true,
        );
        let use_pcpu = parse_bool_default(
            json_path_bool_str(record, &["Configuration", "slurm", "use_pcpu"]).as_deref(),
            true,
        );

        let max_scaleset_size = if !is_hpc {
            UNBOUNDED_SCALESET_SIZE
        } else {
            json_path(record, &["Azure", "MaxScalesetSize"])
                .and_then(Value::as_u64)
                .map(|v| v as u32)
                .unwrap_or(DEFAULT_MAX_SCALESET_SIZE)
        };

        let dampen_pct = json_path_f64(record, &["Configuration", "slurm", "dampen_memory"]).unwrap_or(5.0);
        let dampen_memory = dampen_pct / 100.0;

        let is_default = json_path(record, &["Configuration", "slurm", "default_partition"])
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let vm = VirtualMachine {
            vcpu_count: vm_record.vcpu_count.unwrap_or(1),
            pcpu_count: vm_record.pcpu_count,
            gpu_count: vm_record.gpu_count,
            memory_gib: vm_record.memory.unwrap_or(0.0),
        };

        let mut partition = Partition {
            name: partition_name.clone(),
            nodearray: nodearray_name.clone(),
            nodename_prefix,
            machine_type,
            is_default,
            is_hpc,
            max_scaleset_size,
            vm,
            max_vm_count,
            dampen_memory,
            use_pcpu,
            node_list: None,
        };

        let mut existing_nodes: Vec<String> = nodes_resp
            .nodes
            .iter()
            .filter(|n| n.template.as_deref() == Some(nodearray_name.as_str()))
            .filter_map(|n| n.name.clone())
            .collect();

        if !existing_nodes.is_empty() {
            sort_names(&mut existing_nodes, partition.is_hpc);
            partition.node_list = Some(hostlist::compress(&existing_nodes)?);
        }

        partitions.push(partition);
    }

    reconcile_default(&mut partitions);

    Ok(partitions)
}

fn machine_type_candidates(record: &Value) -> Vec<String> {
    match json_path(record, &["MachineType"]) {
        Some(Value::String(s)) => s.split(',').map(str::trim).map(str::to_string).collect(),
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).map(str::to_string).collect(),
        _ => Vec::new(),
    }
}

fn reconcile_default(partitions: &mut [Partition]) {
    let default_count = partitions.iter().filter(|p| p.is_default).count();
    if default_count == 0 {
        tracing::warn!("slurm.default_partition was not set on any nodearray.");
        if partitions.len() == 1 {
            tracing::info!("Only one nodearray was defined, setting as default.");
            partitions[0].is_default = true;
        }
    } else if default_count > 1 {
        tracing::warn!("slurm.default_partition was set on more than one nodearray!");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn machine_type_candidates_accepts_string_and_array() {
        let v = serde_json::json!({"MachineType": "Standard_F2"});
        assert_eq!(machine_type_candidates(&v), vec!["Standard_F2"]);

        let v = serde_json::json!({"MachineType": ["Standard_F2", "Standard_F4"]});
        assert_eq!(machine_type_candidates(&v), vec!["Standard_F2", "Standard_F4"]);

        let v = serde_json::json!({});
        assert!(machine_type_candidates(&v).is_empty());
    }

    #[test]
    fn reconcile_promotes_sole_partition_to_default() {
        let mk = |name: &str, is_default: bool| Partition {
            name: name.to_string(),
            nodearray: name.to_string(),
            nodename_prefix: String::new(),
            machine_type: "Standard_F2".to_string(),
            is_default,
            is_hpc: true,
            max_scaleset_size: 40,
            vm: VirtualMachine { vcpu_count: 2, pcpu_count: None, gpu_count: None, memory_gib: 4.0 },
            max_vm_count: 5,
            dampen_memory: 0.05,
            use_pcpu: true,
            node_list: None,
        };

        let mut partitions = vec![mk("hpc", false)];
        reconcile_default(&mut partitions);
        assert!(partitions[0].is_default);

        let mut partitions = vec![mk("a", false), mk("b", false)];
        reconcile_default(&mut partitions);
        assert!(!partitions[0].is_default && !partitions[1].is_default);

        let mut partitions = vec![mk("a", true), mk("b", true)];
        reconcile_default(&mut partitions);
        assert!(partitions[0].is_default && partitions[1].is_default);
    }
}
