//! CLI module for harbormaster
//!
//! Provides kubectl-like subcommands:
//! - `harbormaster serve` - Run the control plane
//! - `harbormaster apply` - Create a service from a manifest
//! - `harbormaster get` - List or show services and nodes
//! - `harbormaster scale` - Change a service's replica count
//! - `harbormaster delete` - Delete a service or drain and remove a node
//! - `harbormaster route` - Ask which container should take the next request

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

use crate::cluster::NodeStatus;
use crate::config::RuntimeKind;

mod commands;
mod display;

pub use commands::*;
pub use display::*;

/// Default control plane URL for client commands
pub const DEFAULT_SERVER: &str = "http://127.0.0.1:8080";

#[derive(Parser, Debug)]
#[command(name = "harbormaster")]
#[command(about = "Control plane for services, worker nodes and containers")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Control plane URL for client commands
    #[arg(long, global = true, env = "HARBORMASTER_SERVER", default_value = DEFAULT_SERVER)]
    pub server: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the control plane server
    Serve(ServeArgs),

    /// Get/list resources
    Get(GetArgs),

    /// Create a service from a manifest
    Apply(ApplyArgs),

    /// Scale a service
    Scale(ScaleArgs),

    /// Delete a resource
    Delete(DeleteArgs),

    /// Register a worker node
    AddNode(AddNodeArgs),

    /// Change a node's scheduling status
    NodeStatus(NodeStatusArgs),

    /// Pick a running container of a service
    Route(RouteArgs),

    /// Show cluster status
    Status,
}

/// Arguments for the serve command
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Path to config file (default: ~/.harbormaster/config.yaml)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Port to listen on (overrides the config file)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Bind address for the server (overrides the config file)
    #[arg(long)]
    pub bind_addr: Option<String>,

    /// Container runtime (overrides the config file)
    #[arg(long, value_name = "docker|simulated")]
    pub runtime: Option<RuntimeKind>,

    /// Register this host as a node at start-up
    #[arg(long)]
    pub register_local_node: bool,

    /// Path to a .env file to load before reading config
    #[arg(long, value_name = "FILE")]
    pub env_file: Option<PathBuf>,
}

/// Arguments for the get command
#[derive(Parser, Debug)]
pub struct GetArgs {
    /// Resource type to list
    #[command(subcommand)]
    pub resource: GetResource,
}

#[derive(Subcommand, Debug)]
pub enum GetResource {
    /// List services
    #[command(name = "services", visible_alias = "svc")]
    Services,

    /// Show one service and its containers
    #[command(name = "service")]
    Service {
        /// Service ID
        id: String,
    },

    /// List nodes
    #[command(name = "nodes", visible_alias = "no")]
    Nodes,

    /// Show one node
    #[command(name = "node")]
    Node {
        /// Node ID
        id: String,
    },

    /// Show container health
    #[command(name = "health")]
    Health,
}

/// Arguments for the apply command
#[derive(Parser, Debug)]
pub struct ApplyArgs {
    /// Path to the service manifest (JSON or YAML)
    pub file: PathBuf,
}

/// Arguments for the scale command
#[derive(Parser, Debug)]
pub struct ScaleArgs {
    /// Service ID
    pub id: String,

    /// Number of replicas
    #[arg(long, allow_negative_numbers = true)]
    pub replicas: i64,
}

/// Arguments for the delete command
#[derive(Parser, Debug)]
pub struct DeleteArgs {
    /// Resource type and ID (e.g., "service 3f2a...")
    #[command(subcommand)]
    pub resource: DeleteResource,
}

#[derive(Subcommand, Debug)]
pub enum DeleteResource {
    /// Delete a service and tear down its containers
    #[command(name = "service", visible_alias = "svc")]
    Service {
        /// Service ID
        id: String,
    },

    /// Drain and remove a node
    #[command(name = "node", visible_alias = "no")]
    Node {
        /// Node ID
        id: String,
    },
}

/// Arguments for the add-node command
#[derive(Parser, Debug)]
pub struct AddNodeArgs {
    /// Node name
    pub name: String,

    /// Address where the node's containers are reachable
    #[arg(long)]
    pub address: String,

    /// Labels as key=value (repeatable)
    #[arg(short, long = "label", value_name = "KEY=VALUE")]
    pub labels: Vec<String>,
}

/// Arguments for the node-status command
#[derive(Parser, Debug)]
pub struct NodeStatusArgs {
    /// Node ID
    pub id: String,

    /// New status: active, inactive, draining or error
    pub status: NodeStatus,
}

/// Arguments for the route command
#[derive(Parser, Debug)]
pub struct RouteArgs {
    /// Service ID
    pub service_id: String,
}
