mod cli;
mod config;
mod configgen;
mod error;
mod hostlist;
mod lifecycle;
mod logging;
mod model;
mod orchestrator;
mod partitions;
mod rescale;
mod retry;
mod scheduler_cli;

use std::io::Write;

use clap::Parser;

use cli::{Cli, Commands};
use error::CcSlurmError;
use lifecycle::UnreferencedNodePolicy;
use orchestrator::OrchestratorClient;

fn main() {
    let cli = Cli::parse();
    logging::init(&format!("{}.log", cli.command.name()));

    if let Err(err) = run(cli) {
        tracing::error!("{err}");
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(config::default_config_path);

    if let Commands::Initialize {
        cluster_name,
        username,
        password,
        url,
        force,
    } = &cli.command
    {
        config::initialize(&config_path, cluster_name, username, password, url, *force)?;
        return Ok(());
    }

    let creds = config::load(&config_path)?;
    let client = OrchestratorClient::new(&creds)?;

    match cli.command {
        Commands::Initialize { .. } => unreachable!("handled above"),
        Commands::SlurmConf => {
            let partitions = partitions::fetch_partitions(&client)?;
            let stdout = std::io::stdout();
            let mut handle = stdout.lock();
            configgen::generate_slurm_conf(&partitions, &mut handle, false, rescale::autoscale_enabled())?;
        }
        Commands::GresConf => {
            let partitions = partitions::fetch_partitions(&client)?;
            let stdout = std::io::stdout();
            let mut handle = stdout.lock();
            configgen::generate_gres_conf(&partitions, &mut handle)?;
        }
        Commands::Topology => {
            let nodes = client.get_nodes()?;
            let stdout = std::io::stdout();
            let mut handle = stdout.lock();
            configgen::generate_topology(&nodes, &mut handle)?;
        }
        Commands::CreateNodes { policy, node_list, dry_run } => {
            let partitions = partitions::fetch_partitions(&client)?;
            let subset = resolve_subset(&node_list)?;
            let unreferenced_policy = match policy {
                cli::ExistingNodePolicyArg::Error => UnreferencedNodePolicy::RemoveSafely,
                cli::ExistingNodePolicyArg::AllowExisting => UnreferencedNodePolicy::IgnoreSafely,
            };
            lifecycle::create_nodes(
                &partitions,
                subset.as_deref(),
                &client,
                policy.into(),
                unreferenced_policy,
                dry_run,
            )?;
        }
        Commands::RemoveNodes { node_list } => {
            let subset = resolve_subset(&node_list)?;
            lifecycle::remove_nodes(&client, subset.as_deref())?;
        }
        Commands::Drain { node_list } => {
            let names = hostlist::expand(&node_list)?;
            lifecycle::drain(&names)?;
        }
        Commands::TerminateNodes { node_list } => {
            let names = hostlist::expand(&node_list)?;
            lifecycle::terminate_nodes(&client, &names)?;
        }
        Commands::Resume { node_list } => {
            let names = hostlist::expand(&node_list)?;
            lifecycle::resume(&client, &names)?;
        }
        Commands::ResumeFail { node_list } | Commands::Suspend { node_list } => {
            let names = hostlist::expand(&node_list)?;
            lifecycle::shutdown(&client, rescale::autoscale_enabled(), &names)?;
        }
        Commands::SyncNodes => {
            let nodes = client.get_nodes()?;
            rescale::update_future_states(&nodes)?;
        }
        Commands::Scale => {
            rescale::rescale(&client, false)?;
        }
        Commands::Reconfigure => {
            rescale::reconfigure(&client)?;
        }
        Commands::UpgradeConf => {
            rescale::upgrade_conf()?;
        }
        Commands::NodeAddrs => {
            let pairs = lifecycle::nodeaddrs(&client)?;
            let stdout = std::io::stdout();
            let mut handle = stdout.lock();
            for (ip, name) in pairs {
                writeln!(handle, "{ip} {name}")?;
            }
        }
        Commands::NodeInfo { node_list, all, list } => {
            let names = match &node_list {
                Some(expr) if expr != "*" => Some(hostlist::expand(expr)?),
                _ => None,
            };
            let rows = lifecycle::nodeinfo(&client, names.as_deref(), all, list)?;
            let stdout = std::io::stdout();
            let mut handle = stdout.lock();
            writeln!(
                handle,
                "Node-Name\tSlurm-State\tIpAddr\tHostname\tCC-Node-State\tCC-Node-Status\tAzure-VM-SKU"
            )?;
            for row in rows {
                writeln!(
                    handle,
                    "{}\t{}\t{}\t{}\t{}\t{}\t{}",
                    row.names, row.slurm_status, row.ip, row.hostname, row.cc_state, row.cc_status, row.machine_type
                )?;
            }
        }
        Commands::Wait { node_list, operation_id } => {
            if std::env::var("CycleCloudDevel").is_err() {
                return Err(CcSlurmError::ConfigMissing(
                    "the 'wait' subcommand requires CycleCloudDevel to be set".to_string(),
                )
                .into());
            }
            let names = hostlist::expand(&node_list)?;
            lifecycle::wait_for_resume(&client, &operation_id, &names)?;
        }
    }

    Ok(())
}

/// `None` or `"*"` mean "all" (no subset filter); anything else is an
/// explicit hostlist expression to expand.
fn resolve_subset(node_list: &Option<String>) -> Result<Option<Vec<String>>, CcSlurmError> {
    match node_list {
        None => Ok(None),
        Some(expr) if expr == "*" => Ok(None),
        Some(expr) => Ok(Some(hostlist::expand(expr)?)),
    }
}
