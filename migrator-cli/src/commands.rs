//! CLI Command Definitions

use clap::{Parser, Subcommand, ValueEnum};

/// Migration coordinator
#[derive(Parser, Debug)]
#[command(name = "migrator")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Token store backend
    #[arg(long, value_enum, default_value = "sled", env = "MIGRATOR_STORE", global = true)]
    pub store: StoreKind,

    /// Lock service and event bus backend
    #[arg(long, value_enum, default_value = "redis", env = "MIGRATOR_BACKEND", global = true)]
    pub backend: BackendKind,

    /// Shared store URL (required with --backend redis)
    #[arg(long, env = "MIGRATOR_REDIS_URL", global = true)]
    pub redis_url: Option<String>,

    /// Sled data directory
    #[arg(long, env = "MIGRATOR_DATA_DIR", global = true)]
    pub data_dir: Option<String>,

    /// Base URL of the external workflow executor
    #[arg(long, env = "MIGRATOR_EXECUTOR_URL", global = true)]
    pub executor_url: Option<String>,

    /// Log output format
    #[arg(long, value_enum, default_value = "text", env = "MIGRATOR_LOG_FORMAT", global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the API server, a startup recovery pass, the scheduler and the worker pool
    Start {
        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0", env = "MIGRATOR_API_HOST")]
        host: String,

        /// Port to listen on
        #[arg(short, long, default_value = "3000", env = "MIGRATOR_API_PORT")]
        port: u16,
    },

    /// Run one recovery pass over interrupted migrations and print the report
    Resume,

    /// Run one scheduler tick and drain the queue
    Tick,

    /// Query a token's migration record from a running coordinator
    Status {
        /// Token mint address
        #[arg(long)]
        mint: String,

        /// Coordinator API URL
        #[arg(long, default_value = "http://localhost:3000", env = "MIGRATOR_API_URL")]
        api_url: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    Memory,
    Sled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}
