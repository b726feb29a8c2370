use std::{path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::{
    coordinator::CoordinatorOptions,
    machine::DEFAULT_COMMAND_PORT,
    store::{DEFAULT_ROOT, FileTopologyStore},
};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "flowctl",
    about = "Token server/client assignment for flow-control clusters",
    version,
    disable_help_subcommand = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub config: Config,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Apply a full assignment plan (servers, their clients, and the remainder to unbind).
    Apply(ApplyArgs),

    /// Demote token servers and all of their clients to NOT_STARTED.
    Unbind(UnbindArgs),

    /// Publish or inspect rule lists.
    Rules {
        #[command(subcommand)]
        action: RulesAction,
    },

    /// Publish the cluster client config document.
    ClientConfig {
        #[command(subcommand)]
        action: ClientConfigAction,
    },

    /// Inspect the committed cluster map.
    ClusterMap {
        #[command(subcommand)]
        action: ClusterMapAction,
    },
}

#[derive(Args, Debug, Clone)]
pub struct ApplyArgs {
    #[arg(long, value_name = "APP")]
    pub app: String,

    /// JSON document `{"clusterMap": [...], "remainingList": [...]}`.
    #[arg(long, value_name = "PATH")]
    pub file: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct UnbindArgs {
    #[arg(long, value_name = "APP")]
    pub app: String,

    #[arg(value_name = "MACHINE_ID", required = true)]
    pub machine_ids: Vec<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKindArg {
    Flow,
    Degrade,
}

#[derive(Subcommand, Debug, Clone)]
pub enum RulesAction {
    Push {
        #[arg(long, value_name = "APP")]
        app: String,
        #[arg(long, value_enum)]
        kind: RuleKindArg,
        /// JSON array of rules.
        #[arg(long, value_name = "PATH")]
        file: PathBuf,
    },
    Show {
        #[arg(long, value_name = "APP")]
        app: String,
        #[arg(long, value_enum)]
        kind: RuleKindArg,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ClientConfigAction {
    Push {
        #[arg(long, value_name = "APP")]
        app: String,
        #[arg(long, value_name = "PATH")]
        file: PathBuf,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ClusterMapAction {
    Show {
        #[arg(long, value_name = "APP")]
        app: String,
    },
}

#[derive(Args, Debug, Clone)]
pub struct Config {
    #[arg(
        long,
        global = true,
        env = "FLOWCTL_STORE_DIR",
        value_name = "DIR",
        default_value = "./flowctl-data"
    )]
    pub store_dir: PathBuf,

    #[arg(
        long,
        global = true,
        env = "FLOWCTL_STORE_ROOT",
        value_name = "PATH",
        default_value = DEFAULT_ROOT
    )]
    pub store_root: String,

    /// Bound for each remote unit of work and for the cluster-state lookup.
    #[arg(
        long = "unit-timeout-secs",
        global = true,
        env = "FLOWCTL_UNIT_TIMEOUT_SECS",
        value_name = "SECS",
        default_value_t = 10,
        value_parser = clap::value_parser!(u64).range(1..=300)
    )]
    pub unit_timeout_secs: u64,

    #[arg(
        long = "default-command-port",
        global = true,
        env = "FLOWCTL_DEFAULT_COMMAND_PORT",
        value_name = "PORT",
        default_value_t = DEFAULT_COMMAND_PORT,
        value_parser = clap::value_parser!(u16).range(1..)
    )]
    pub default_command_port: u16,
}

impl Config {
    pub fn coordinator_options(&self) -> CoordinatorOptions {
        let timeout = Duration::from_secs(self.unit_timeout_secs);
        CoordinatorOptions {
            unit_timeout: timeout,
            state_query_timeout: timeout,
            default_command_port: self.default_command_port,
        }
    }

    pub fn topology_store(&self) -> FileTopologyStore {
        FileTopologyStore::new(self.store_dir.clone(), self.store_root.clone())
    }
}
