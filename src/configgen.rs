//! Configuration Generator (spec §4.2): renders the partition/node config,
//! topology config, and GRES config from a resolved partition model.

use std::collections::BTreeMap;
use std::io::Write;

use crate::error::{CcSlurmError, Result};
use crate::hostlist;
use crate::model::{sort_names, Partition};
use crate::orchestrator::model::NodeListResponse;

struct CpuLayout {
    cpus: u32,
    threads_per_core: u32,
}

fn cpu_layout(partition: &Partition) -> CpuLayout {
    if partition.use_pcpu {
        CpuLayout {
            cpus: partition.pcpu_count(),
            threads_per_core: (partition.vcpu_count() / partition.pcpu_count().max(1)).max(1),
        }
    } else {
        CpuLayout {
            cpus: partition.vcpu_count(),
            threads_per_core: 1,
        }
    }
}

struct MemoryLayout {
    memory_to_reduce_gib: f64,
    memory_mib: u64,
}

fn memory_layout(partition: &Partition) -> MemoryLayout {
    let memory_to_reduce_gib = (partition.memory_gib() * partition.dampen_memory).max(1.0);
    let memory_mib = (((partition.memory_gib() - memory_to_reduce_gib) * 1024.0).floor() as i64).max(1024) as u64;
    MemoryLayout {
        memory_to_reduce_gib,
        memory_mib,
    }
}

fn def_mem_per_cpu(memory_mib: u64, cpus: u32) -> u64 {
    memory_mib / (cpus.max(1) as u64)
}

/// Renders the partition/node config (`cyclecloud.conf`-style fragment).
///
/// `allow_empty` lets config-only reconfiguration (spec §4.4 step 1) skip
/// partitions whose node list hasn't been populated by `create_nodes` yet.
pub fn generate_slurm_conf<W: Write>(
    partitions: &[Partition],
    writer: &mut W,
    allow_empty: bool,
    autoscale_enabled: bool,
) -> Result<()> {
    for partition in partitions {
        let node_list = match &partition.node_list {
            Some(nl) => nl,
            None => {
                if allow_empty {
                    continue;
                }
                return Err(CcSlurmError::ConfigInvariant(format!(
                    "No nodes found for nodearray {}. Please run 'ccslurm create_nodes' first!",
                    partition.nodearray
                )));
            }
        };

        let mem = memory_layout(partition);
        let layout = cpu_layout(partition);
        let default_yn = if partition.is_default { "YES" } else { "NO" };
        let def_mem_per_cpu = def_mem_per_cpu(mem.memory_mib, layout.cpus);

        writeln!(
            writer,
            "# Note: the Orchestrator reported a RealMemory of {} but we reduced it by {} (i.e. max(1gb, {}%)) to account for OS/VM overhead which",
            (partition.memory_gib() * 1024.0) as i64,
            (mem.memory_to_reduce_gib * 1024.0) as i64,
            (partition.dampen_memory * 100.0) as i64,
        )?;
        writeln!(
            writer,
            "# would result in the nodes being rejected by Slurm if they report a number less than defined here."
        )?;
        writeln!(
            writer,
            "# To pick a different percentage to dampen, set slurm.dampen_memory=X in the nodearray's Configuration where X is percentage (5 = 5%)."
        )?;
        writeln!(
            writer,
            "PartitionName={} Nodes={} Default={} DefMemPerCPU={} MaxTime=INFINITE State=UP",
            partition.name, node_list, default_yn, def_mem_per_cpu
        )?;

        let mut all_nodes = hostlist::expand(node_list)?;
        sort_names(&mut all_nodes, partition.is_hpc);

        for pg_index in 0..partition.num_placement_groups() {
            let (start, end) = crate::model::placement_group_bounds(
                pg_index,
                partition.max_scaleset_size,
                partition.max_vm_count,
            );
            let subset = &all_nodes[start.min(all_nodes.len())..end.min(all_nodes.len())];
            let subset_hostlist = hostlist::compress(subset)?;

            let feature_expr = if autoscale_enabled { " Feature=cloud" } else { "" };
            let state_expr = if autoscale_enabled { " state=CLOUD" } else { "" };

            write!(
                writer,
                "Nodename={}{}{} CPUs={} ThreadsPerCore={} RealMemory={}",
                subset_hostlist, feature_expr, state_expr, layout.cpus, layout.threads_per_core, mem.memory_mib
            )?;
            if partition.gpu_count() > 0 {
                write!(writer, " Gres=gpu:{}", partition.gpu_count())?;
            }
            writeln!(writer)?;
        }
    }
    Ok(())
}

/// Renders `gres.conf`. Partitions with no GPUs contribute nothing.
pub fn generate_gres_conf<W: Write>(partitions: &[Partition], writer: &mut W) -> Result<()> {
    for partition in partitions {
        if partition.gpu_count() == 0 {
            continue;
        }
        let node_list = match &partition.node_list {
            Some(nl) => nl,
            None => {
                return Err(CcSlurmError::ConfigInvariant(format!(
                    "No nodes found for nodearray {}. Please run 'ccslurm create_nodes' first!",
                    partition.nodearray
                )));
            }
        };

        let mut all_nodes = hostlist::expand(node_list)?;
        sort_names(&mut all_nodes, partition.is_hpc);

        for pg_index in 0..partition.num_placement_groups() {
            let (start, end) = crate::model::placement_group_bounds(
                pg_index,
                partition.max_scaleset_size,
                partition.max_vm_count,
            );
            let subset = &all_nodes[start.min(all_nodes.len())..end.min(all_nodes.len())];
            let subset_hostlist = hostlist::compress(subset)?;

            let gpu_count = partition.gpu_count();
            let nvidia_devices = if gpu_count > 1 {
                format!("/dev/nvidia[0-{}]", gpu_count - 1)
            } else {
                "/dev/nvidia0".to_string()
            };
            writeln!(
                writer,
                "Nodename={subset_hostlist} Name=gpu Count={gpu_count} File={nvidia_devices}"
            )?;
        }
    }
    Ok(())
}

/// Renders `topology.conf` from the live node list, grouping by
/// `PlacementGroupId` (literal `"htc"` when absent) across every
/// autoscale-enabled node.
pub fn generate_topology<W: Write>(nodes: &NodeListResponse, writer: &mut W) -> Result<()> {
    let mut by_pg: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for node in &nodes.nodes {
        if !node.slurm_autoscale() {
            continue;
        }
        let Some(name) = node.name.clone() else { continue };
        let pg = node.placement_group_id.clone().unwrap_or_else(|| "htc".to_string());
        by_pg.entry(pg).or_default().push(name);
    }

    if by_pg.is_empty() {
        return Err(CcSlurmError::ConfigInvariant(
            "No nodes found to create topology! Do you need to run create_nodes first?".to_string(),
        ));
    }

    for (pg, mut names) in by_pg {
        let is_hpc = pg != "htc";
        sort_names(&mut names, is_hpc);
        let hostlist_expr = hostlist::compress(&names)?;
        writeln!(writer, "SwitchName={pg} Nodes={hostlist_expr}")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::VirtualMachine;

    fn hpc_partition() -> Partition {
        Partition {
            name: "hpc".to_string(),
            nodearray: "hpc".to_string(),
            nodename_prefix: String::new(),
            machine_type: "Standard_F2".to_string(),
            is_default: true,
            is_hpc: true,
            max_scaleset_size: 3,
            vm: VirtualMachine {
                vcpu_count: 2,
                pcpu_count: Some(1),
                gpu_count: None,
                memory_gib: 4.0,
            },
            max_vm_count: 5,
            dampen_memory: 0.05,
            use_pcpu: true,
            node_list: None,
        }
    }

    #[test]
    fn memory_layout_matches_worked_example() {
        // 4.0 GiB VM, dampen_memory=0.05: memory_to_reduce = max(1, 4.0*0.05) = 1 GiB
        // (the max(1, ...) floor always cuts at least 1 GiB, per upstream's
        // "recommended by schedmd" comment), so memory_mib = floor(3.0*1024) = 3072.
        let partition = hpc_partition();
        let mem = memory_layout(&partition);
        assert_eq!(mem.memory_mib, 3072);
        let layout = cpu_layout(&partition);
        assert_eq!(layout.cpus, 1);
        assert_eq!(layout.threads_per_core, 2);
        assert_eq!(def_mem_per_cpu(mem.memory_mib, layout.cpus), 3072);
    }

    #[test]
    fn memory_mib_floor_is_never_below_1024() {
        let mut partition = hpc_partition();
        partition.vm.memory_gib = 0.5;
        let mem = memory_layout(&partition);
        assert_eq!(mem.memory_mib, 1024);
    }

    #[test]
    fn use_pcpu_false_divides_by_vcpu_count() {
        let mut partition = hpc_partition();
        partition.use_pcpu = false;
        partition.vm.vcpu_count = 8;
        partition.vm.pcpu_count = Some(4);
        let layout = cpu_layout(&partition);
        assert_eq!(layout.cpus, 8);
        assert_eq!(layout.threads_per_core, 1);
        let mem = memory_layout(&partition);
        assert_eq!(def_mem_per_cpu(mem.memory_mib, layout.cpus), mem.memory_mib / 8);
    }

    #[test]
    fn slurm_conf_rejects_missing_node_list_unless_allow_empty() {
        let partitions = vec![hpc_partition()];
        let mut buf = Vec::new();
        let err = generate_slurm_conf(&partitions, &mut buf, false, true).unwrap_err();
        assert!(matches!(err, CcSlurmError::ConfigInvariant(_)));

        let mut buf = Vec::new();
        generate_slurm_conf(&partitions, &mut buf, true, true).unwrap();
        assert!(buf.is_empty());
    }

    #[test]
    fn gres_conf_skips_partitions_without_gpus() {
        let partitions = vec![hpc_partition()];
        let mut buf = Vec::new();
        generate_gres_conf(&partitions, &mut buf).unwrap();
        assert!(buf.is_empty());
    }
}
