//! trap2json daemon library: configuration, logging, metrics endpoint,
//! and the pipeline supervisor. The binary in `main.rs` is a thin CLI
//! wrapper around these modules; integration tests drive them directly.

pub mod cli;
pub mod config;
pub mod logging;
pub mod metrics_server;
pub mod supervisor;
pub mod trapd_process;
