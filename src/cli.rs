//! Subcommand surface (spec §6).

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::lifecycle::{ExistingNodePolicy, UnreferencedNodePolicy};

#[derive(Debug, Parser)]
#[command(name = "ccslurm", about = "Bridges Slurm with a cloud cluster orchestrator")]
pub struct Cli {
    /// Path to the credentials file. Defaults to $CYCLECLOUD_HOME/config/autoscale.json.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ExistingNodePolicyArg {
    Error,
    AllowExisting,
}

impl From<ExistingNodePolicyArg> for ExistingNodePolicy {
    fn from(v: ExistingNodePolicyArg) -> Self {
        match v {
            ExistingNodePolicyArg::Error => ExistingNodePolicy::Error,
            ExistingNodePolicyArg::AllowExisting => ExistingNodePolicy::AllowExisting,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Write the JSON credentials file.
    Initialize {
        #[arg(long)]
        cluster_name: String,
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        url: String,
        #[arg(long)]
        force: bool,
    },
    /// Write the partition/node config to stdout.
    SlurmConf,
    /// Write the GRES config to stdout.
    GresConf,
    /// Write the topology config to stdout.
    Topology,
    /// Create nodes.
    CreateNodes {
        #[arg(long, value_enum, default_value = "error")]
        policy: ExistingNodePolicyArg,
        /// Hostlist expression, or `*` for all.
        #[arg(long)]
        node_list: Option<String>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Remove nodes (filtered by terminated status).
    RemoveNodes {
        #[arg(long)]
        node_list: Option<String>,
    },
    /// Drain nodes and wait for them to appear drained.
    Drain {
        #[arg(long)]
        node_list: String,
    },
    /// Force-terminate nodes via the Orchestrator.
    TerminateNodes {
        #[arg(long)]
        node_list: String,
    },
    /// Start nodes and run the resume-wait loop.
    Resume {
        #[arg(long)]
        node_list: String,
    },
    /// Shut a node down after a failed resume attempt.
    ResumeFail {
        #[arg(long)]
        node_list: String,
    },
    /// Shut nodes down.
    Suspend {
        #[arg(long)]
        node_list: String,
    },
    /// Apply FUTURE state to every node not yet started, when autoscale is disabled.
    SyncNodes,
    /// Full rescale: reconcile, regenerate config, restart the scheduler daemon.
    Scale,
    /// `scale` with config regeneration only (no node create/reconcile).
    Reconfigure,
    /// Legacy `slurm.conf` migration.
    UpgradeConf,
    /// Emit `<ip> <name>` pairs for autoscale-enabled nodes with a known IP.
    NodeAddrs,
    /// TSV report of Scheduler/Orchestrator node state.
    NodeInfo {
        #[arg(long)]
        node_list: Option<String>,
        #[arg(short = 'a', long = "all")]
        all: bool,
        #[arg(short = 'N')]
        list: bool,
    },
    /// Hidden developer affordance: resume-wait without first starting nodes.
    /// Only available when `CycleCloudDevel` is set.
    #[command(hide = true)]
    Wait {
        #[arg(long)]
        node_list: String,
        #[arg(long)]
        operation_id: String,
    },
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Initialize { .. } => "initialize",
            Commands::SlurmConf => "slurm_conf",
            Commands::GresConf => "gres_conf",
            Commands::Topology => "topology",
            Commands::CreateNodes { .. } => "create_nodes",
            Commands::RemoveNodes { .. } => "remove_nodes",
            Commands::Drain { .. } => "drain",
            Commands::TerminateNodes { .. } => "terminate_nodes",
            Commands::Resume { .. } => "resume",
            Commands::ResumeFail { .. } => "resume_fail",
            Commands::Suspend { .. } => "suspend",
            Commands::SyncNodes => "sync_nodes",
            Commands::Scale => "scale",
            Commands::Reconfigure => "reconfigure",
            Commands::UpgradeConf => "upgrade_conf",
            Commands::NodeAddrs => "nodeaddrs",
            Commands::NodeInfo { .. } => "nodeinfo",
            Commands::Wait { .. } => "wait",
        }
    }
}
