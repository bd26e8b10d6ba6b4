//! Subnet provisioner CLI
//!
//! Usage:
//!   subnet-provisioner partition <parent> <prefix> [--limit N]
//!   subnet-provisioner nth <parent> <prefix> <n>
//!   subnet-provisioner index-of <parent> <prefix> <block>
//!   subnet-provisioner simulate --parent <cidr> --prefix <len> --subnets <n>

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use subnet_provisioner::{
    telemetry, AddressBlock, CidrPartitioner, InMemoryConfig, InMemoryControlPlane,
    ProvisionRequest, ProvisionerConfig, ResourceDescription, SubnetProvisioner, TracingConfig,
    ENV_PREFIX,
};
use tokio_util::sync::CancellationToken;

/// Deterministic subnet partitioning and provisioning
#[derive(Parser)]
#[command(name = "subnet-provisioner")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Output format
    #[arg(short, long, default_value = "plain", global = true)]
    format: OutputFormat,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, Default, ValueEnum)]
enum OutputFormat {
    #[default]
    Plain,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// List the subdivisions of a parent block
    Partition {
        parent: AddressBlock,
        prefix: u8,
        /// Stop after this many blocks
        #[arg(long, default_value_t = 256)]
        limit: usize,
    },

    /// Show the n-th subdivision of a parent block
    Nth {
        parent: AddressBlock,
        prefix: u8,
        n: u128,
    },

    /// Show the ordinal of a block within a parent
    IndexOf {
        parent: AddressBlock,
        prefix: u8,
        block: AddressBlock,
    },

    /// Provision subnets against an in-memory control plane and print the outcomes as JSON
    Simulate {
        #[arg(long)]
        parent: AddressBlock,
        #[arg(long)]
        prefix: u8,
        #[arg(long, default_value_t = 4)]
        subnets: usize,
        /// Polls each association spends in `associating`
        #[arg(long, default_value_t = 1)]
        latency: u32,
    },
}

#[derive(Serialize)]
struct PartitionOutput {
    parent: AddressBlock,
    prefix_len: u8,
    count: Option<String>,
    blocks: Vec<AddressBlock>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ProvisionerConfig::load_with_env(cli.config.as_deref(), ENV_PREFIX)
        .context("failed to load configuration")?;
    let log_level = match cli.verbose {
        0 => config.log_level.clone(),
        1 => "info".to_string(),
        2 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    telemetry::init(&TracingConfig {
        log_level,
        ..Default::default()
    })?;

    match cli.command {
        Commands::Partition {
            parent,
            prefix,
            limit,
        } => {
            let partitioner = CidrPartitioner::new(parent, prefix)?;
            let output = PartitionOutput {
                parent,
                prefix_len: prefix,
                count: partitioner.count().map(|c| c.to_string()),
                blocks: partitioner.iter().take(limit).collect(),
            };
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
                OutputFormat::Plain => {
                    for block in &output.blocks {
                        println!("{}", block);
                    }
                }
            }
        }

        Commands::Nth { parent, prefix, n } => {
            let block = CidrPartitioner::new(parent, prefix)?.nth(n)?;
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string(&block)?),
                OutputFormat::Plain => println!("{}", block),
            }
        }

        Commands::IndexOf {
            parent,
            prefix,
            block,
        } => {
            let index = CidrPartitioner::new(parent, prefix)?.index_of(&block)?;
            println!("{}", index);
        }

        Commands::Simulate {
            parent,
            prefix,
            subnets,
            latency,
        } => {
            config.parent_family = parent.family();
            if config.default_route_destination.family() != parent.family() {
                config.default_route_destination = AddressBlock::new(parent.family(), 0, 0)?;
            }
            // In-memory associations settle within a few polls
            config.poll.initial_delay_ms = config.poll.initial_delay_ms.min(10);
            config.poll.max_delay_ms = config.poll.max_delay_ms.min(10);
            config.validate()?;

            let control_plane = Arc::new(InMemoryControlPlane::with_config(InMemoryConfig {
                association_latency: latency,
                ..Default::default()
            }));
            control_plane.add_parent_space("vpc-sim", parent);
            for i in 0..subnets {
                control_plane.add_resource(ResourceDescription::new(
                    format!("subnet-sim-{:04}", i),
                    "vpc-sim",
                ));
            }

            let provisioner = SubnetProvisioner::new(control_plane, config);
            let cancel = CancellationToken::new();
            let mut outcomes = Vec::with_capacity(subnets);
            for i in 0..subnets {
                let request = ProvisionRequest::new(format!("subnet-sim-{:04}", i), prefix);
                let outcome = provisioner
                    .provision(&request, &cancel)
                    .await
                    .with_context(|| format!("failed to provision {}", request.resource_id))?;
                outcomes.push(outcome);
            }

            println!("{}", serde_json::to_string_pretty(&outcomes)?);
        }
    }

    Ok(())
}
