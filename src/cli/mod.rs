//! Command-line interface for coffer.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// coffer - Container metadata service for a distributed object-storage pool.
#[derive(Parser)]
#[command(name = "coffer")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "COFFER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "COFFER_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Start a pool service node
    Server {
        /// Node ID (rank of this replica)
        #[arg(short, long, env = "COFFER_NODE_ID")]
        node_id: Option<u64>,

        /// Bind address for the container service
        #[arg(long)]
        bind_addr: Option<String>,

        /// Pool UUID served by this node
        #[arg(long, env = "COFFER_POOL")]
        pool: Option<String>,

        /// Number of in-process targets
        #[arg(long)]
        targets: Option<u32>,

        /// Expose the in-process targets on this address
        #[arg(long)]
        target_addr: Option<String>,

        /// Remote targets (format: id=addr,id=addr)
        #[arg(long)]
        remote_targets: Option<String>,

        /// Keep metadata in RocksDB under this directory
        #[arg(long)]
        metadata_dir: Option<PathBuf>,
    },

    /// Container operations against a running node
    Cont {
        /// Container service address
        #[arg(short, long, default_value = "127.0.0.1:9400")]
        addr: String,

        /// Pool handle UUID to act through
        #[arg(short, long, env = "COFFER_POOL_HDL")]
        pool_hdl: String,

        #[command(subcommand)]
        command: ContCommands,
    },

    /// Check whether a node answers
    Health {
        /// Container service address
        #[arg(short, long, default_value = "127.0.0.1:9400")]
        addr: String,
    },

    /// Show version information
    Version,
}

/// Container subcommands.
#[derive(Subcommand)]
pub enum ContCommands {
    /// Connect the pool handle
    Connect {
        /// Capabilities: ro, rw or ex
        #[arg(long, default_value = "rw")]
        capas: String,
    },

    /// Revoke the pool handle and close its container handles
    Disconnect,

    /// Create a container
    Create {
        /// Container UUID (generated if omitted)
        cont: Option<String>,
    },

    /// Destroy a container
    Destroy {
        cont: String,

        /// Destroy even with open handles
        #[arg(short, long)]
        force: bool,
    },

    /// Open a container handle
    Open {
        cont: String,

        /// Handle UUID (generated if omitted)
        #[arg(long)]
        hdl: Option<String>,

        /// Open for writing
        #[arg(short, long)]
        write: bool,
    },

    /// Close a container handle
    Close { cont: String, hdl: String },

    /// Show epoch state of a container handle
    Query { cont: String, hdl: String },

    /// Set attributes (format: name=value)
    AttrSet {
        cont: String,
        hdl: String,
        #[arg(required = true)]
        attrs: Vec<String>,
    },

    /// Get attributes
    AttrGet {
        cont: String,
        hdl: String,
        #[arg(required = true)]
        names: Vec<String>,

        /// Bytes to fetch per value
        #[arg(long, default_value = "4096")]
        size: u64,
    },

    /// List attribute names
    AttrList {
        cont: String,
        hdl: String,

        /// Buffer size for names
        #[arg(long, default_value = "4096")]
        capacity: usize,
    },

    /// Commit an epoch
    EpochCommit {
        cont: String,
        hdl: String,
        epoch: u64,
    },

    /// Discard an uncommitted epoch
    EpochDiscard {
        cont: String,
        hdl: String,
        epoch: u64,
    },

    /// Commit an epoch and keep it as a snapshot
    SnapCreate {
        cont: String,
        hdl: String,
        epoch: u64,
    },

    /// List snapshots
    SnapList {
        cont: String,
        hdl: String,

        /// Maximum number of epochs returned
        #[arg(long, default_value = "64")]
        capacity: u32,
    },

    /// Destroy a snapshot
    SnapDestroy {
        cont: String,
        hdl: String,
        epoch: u64,
    },

    /// Reserve object ids
    OidAlloc {
        cont: String,
        hdl: String,
        count: u64,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_cont_command() {
        let cli = Cli::try_parse_from([
            "coffer",
            "cont",
            "--pool-hdl",
            "00000000-0000-0000-0000-000000000001",
            "oid-alloc",
            "c",
            "h",
            "10",
        ])
        .unwrap();
        match cli.command {
            Commands::Cont {
                command: ContCommands::OidAlloc { count, .. },
                ..
            } => assert_eq!(count, 10),
            _ => panic!("wrong command"),
        }
    }
}
