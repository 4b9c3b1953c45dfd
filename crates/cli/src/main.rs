//! Kubeprov CLI
//!
//! A command-line tool for creating and deleting Kubes, managing their
//! nodes, and inspecting the provisioner's job queue.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{jobs, kubes, nodes};
use std::path::PathBuf;

/// Kubeprov CLI
#[derive(Parser)]
#[command(name = "kp")]
#[command(author, version, about = "CLI for the kubeprov cluster provisioner", long_about = None)]
pub struct Cli {
    /// Provisioner API URL (can also be set via KP_API_URL env var)
    #[arg(long, env = "KP_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short)]
    pub format: Option<output::OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect and feed the job queue
    #[command(subcommand)]
    Jobs(JobsCommands),

    /// Create, inspect and delete Kubes
    #[command(subcommand)]
    Kubes(KubesCommands),

    /// Add and remove nodes of a Kube
    #[command(subcommand)]
    Nodes(NodesCommands),
}

#[derive(Subcommand)]
pub enum JobsCommands {
    /// List queued, running and failed jobs
    List,

    /// Enqueue a job
    Enqueue {
        /// Job type (create_kube, delete_kube, create_node, delete_node, deploy_component)
        #[arg(long = "type")]
        job_type: String,

        /// JSON payload of the job
        #[arg(long, default_value = "")]
        data: String,
    },
}

#[derive(Subcommand)]
pub enum KubesCommands {
    /// List Kubes
    List,

    /// Show one Kube
    Get {
        /// Kube name
        name: String,
    },

    /// Create a Kube from a JSON definition
    Create {
        /// Path to the Kube definition
        #[arg(long)]
        file: PathBuf,
    },

    /// Delete a Kube and its cloud resources
    Delete {
        /// Kube name
        name: String,
    },
}

#[derive(Subcommand)]
pub enum NodesCommands {
    /// List the nodes of a Kube
    List {
        /// Kube name
        kube: String,
    },

    /// Add a node to a Kube
    Add {
        /// Kube name
        kube: String,

        /// Instance size of the new node
        #[arg(long)]
        size: String,
    },

    /// Remove a node from a Kube
    Remove {
        /// Kube name
        kube: String,

        /// Node name
        node: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::Config::load()?;
    let format = config.format(cli.format);

    // Initialize client
    let client = client::ApiClient::new(&config.api_url(cli.api_url))?;

    // Execute command
    match cli.command {
        Commands::Jobs(jobs_cmd) => match jobs_cmd {
            JobsCommands::List => jobs::list_jobs(&client, format).await?,
            JobsCommands::Enqueue { job_type, data } => {
                jobs::enqueue_job(&client, &job_type, &data, format).await?;
            }
        },
        Commands::Kubes(kubes_cmd) => match kubes_cmd {
            KubesCommands::List => kubes::list_kubes(&client, format).await?,
            KubesCommands::Get { name } => kubes::get_kube(&client, &name, format).await?,
            KubesCommands::Create { file } => kubes::create_kube(&client, &file, format).await?,
            KubesCommands::Delete { name } => kubes::delete_kube(&client, &name, format).await?,
        },
        Commands::Nodes(nodes_cmd) => match nodes_cmd {
            NodesCommands::List { kube } => nodes::list_nodes(&client, &kube, format).await?,
            NodesCommands::Add { kube, size } => {
                nodes::add_node(&client, &kube, &size, format).await?;
            }
            NodesCommands::Remove { kube, node } => {
                nodes::remove_node(&client, &kube, &node, format).await?;
            }
        },
    }

    Ok(())
}
