//! Migration Coordinator CLI
//!
//! # Usage
//!
//! ```text
//! migrator [OPTIONS] <COMMAND>
//!
//! Commands:
//!   start    Run the API server, a startup recovery pass, the scheduler and the worker pool
//!   resume   Run one recovery pass over interrupted migrations and print the report
//!   tick     Run one scheduler tick and drain the queue
//!   status   Query a token's migration record from a running coordinator
//!
//! Options:
//!   --store <memory|sled>       Token store backend [default: sled]
//!   --backend <memory|redis>    Lock service and event bus backend [default: redis]
//!   --redis-url <URL>           Shared store URL
//!   --data-dir <DIR>            Sled data directory
//!   --executor-url <URL>        External workflow executor
//!   --log-format <text|json>    Log output format [default: text]
//! ```

pub mod client;
pub mod commands;
pub mod coordinator;
pub mod error;
pub mod handler;

pub use client::MigratorClient;
pub use commands::{BackendKind, Cli, Commands, LogFormat, StoreKind};
pub use coordinator::Coordinator;
pub use error::{CliError, CliResult};
