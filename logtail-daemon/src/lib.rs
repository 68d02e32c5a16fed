//! logtail daemon library.
//!
//! Exposes the daemon building blocks for integration testing.
//! In production, `logtail-daemon` is used as a binary (main.rs).

pub mod cli;
pub mod logging;
pub mod metrics_server;
pub mod pid_file;
pub mod runner;
