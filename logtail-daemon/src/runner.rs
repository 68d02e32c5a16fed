//! Server assembly and lifecycle management.
//!
//! The [`Runner`] is the central coordinator of `logtail-daemon`. It turns a
//! validated [`LogtailConfig`] into running servers, owns the root
//! [`Stopper`] and the PID file, and waits for a shutdown signal.
//!
//! # Startup order
//!
//! For every `[[servers]]` entry:
//! 1. Create the server
//! 2. Attach its routers (each with its own transfer)
//! 3. Start the workers, so the first command output is already routed
//!
//! # Shutdown
//!
//! Stopping the root stopper cancels every server, worker, filter and
//! router at once. The runner then waits until every transfer has
//! submitted its last segment.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use logtail_core::config::{LogtailConfig, ServerConfig};
use logtail_core::stopper::Stopper;
use logtail_engine::{EngineConfig, MatchPolicy, Server, transfer};

use crate::metrics_server;
use crate::pid_file;

/// The main daemon runner.
pub struct Runner {
    /// Loaded and validated configuration.
    config: LogtailConfig,
    /// Engine tuning shared by all servers.
    engine: Arc<EngineConfig>,
    /// Root of the cancellation tree.
    root: Stopper,
    /// Running servers, in configuration order.
    servers: Vec<Arc<Server>>,
}

impl Runner {
    /// Load configuration from `config_path` and build the runner.
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = LogtailConfig::load(config_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
        Self::build_from_config(config)
    }

    /// Build from an already-loaded configuration.
    ///
    /// Installs the metrics recorder when `[metrics].enabled`.
    pub fn build_from_config(config: LogtailConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        let engine = EngineConfig::from_core(&config.engine);
        engine
            .validate()
            .map_err(|e| anyhow::anyhow!("engine config validation failed: {}", e))?;

        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
        }

        tracing::info!(
            servers = config.servers.len(),
            routers = config.routers.len(),
            "runner initialized"
        );

        Ok(Self {
            config,
            engine: Arc::new(engine),
            root: Stopper::new(),
            servers: Vec::new(),
        })
    }

    /// Get a reference to the loaded configuration.
    pub fn config(&self) -> &LogtailConfig {
        &self.config
    }

    /// Running servers.
    pub fn servers(&self) -> &[Arc<Server>] {
        &self.servers
    }

    /// Root stopper. Stopping it cancels every server.
    pub fn stopper(&self) -> &Stopper {
        &self.root
    }

    /// Start every configured server.
    ///
    /// On failure the servers started so far are shut down again.
    pub async fn start(&mut self) -> Result<()> {
        if !self.servers.is_empty() {
            return Err(anyhow::anyhow!("runner already started"));
        }

        for server_config in &self.config.servers {
            match self.start_server(server_config).await {
                Ok(server) => self.servers.push(server),
                Err(e) => {
                    tracing::warn!(server = %server_config.id, "startup failed, stopping started servers");
                    self.shutdown().await;
                    return Err(e);
                }
            }
        }

        tracing::info!(servers = self.servers.len(), "all servers started");
        Ok(())
    }

    async fn start_server(&self, server_config: &ServerConfig) -> Result<Arc<Server>> {
        let command_gen = Some(server_config.command_gen.clone()).filter(|c| !c.trim().is_empty());
        let server = Server::new(
            server_config.id.clone(),
            Arc::clone(&self.engine),
            &self.root,
            command_gen,
        )?;

        for router_name in &server_config.routers {
            if let Err(e) = self.attach_router(&server, router_name).await {
                server.shutdown().await;
                return Err(e);
            }
        }

        if let Err(e) = server.start(&server_config.commands).await {
            server.shutdown().await;
            return Err(e.into());
        }

        Ok(server)
    }

    async fn attach_router(&self, server: &Server, router_name: &str) -> Result<()> {
        let router_config = self
            .config
            .router(router_name)
            .ok_or_else(|| anyhow::anyhow!("router '{}' not found", router_name))?;
        let transfer_config = self
            .config
            .transfer(&router_config.transfer)
            .ok_or_else(|| anyhow::anyhow!("transfer '{}' not found", router_config.transfer))?;

        let policy = MatchPolicy::from_config(router_name, &router_config.matchers)?;
        let transfer = transfer::build(transfer_config, &self.engine)?;
        server.add_router(router_name, policy, transfer).await?;

        Ok(())
    }

    /// Start all servers and block until a shutdown signal arrives.
    ///
    /// # Shutdown triggers
    ///
    /// - `SIGTERM` (from systemd, Docker, or `kill`)
    /// - `SIGINT` (Ctrl+C)
    pub async fn run(&mut self) -> Result<()> {
        let pid_path = (!self.config.general.pid_file.is_empty())
            .then(|| Path::new(&self.config.general.pid_file).to_path_buf());

        if let Some(path) = &pid_path {
            pid_file::write_pid_file(path)?;
        }

        if let Err(e) = self.start().await {
            tracing::error!(error = %e, "server startup failed");
            if let Some(path) = &pid_path {
                pid_file::remove_pid_file(path);
            }
            return Err(e);
        }

        tracing::info!("logtail-daemon running");
        let signal = wait_for_shutdown_signal().await;

        match signal {
            Ok(signal) => tracing::info!(signal = signal, "shutdown signal received"),
            Err(ref e) => tracing::error!(error = %e, "signal handling failed, shutting down"),
        }

        self.shutdown().await;

        if let Some(path) = &pid_path {
            pid_file::remove_pid_file(path);
        }

        signal.map(|_| ())
    }

    /// Stop every server and wait for their transfers to finish.
    pub async fn shutdown(&mut self) {
        tracing::info!("stopping all servers");
        self.root.stop();

        for server in self.servers.drain(..) {
            server.shutdown().await;
        }
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// Returns the name of the signal that triggered the shutdown.
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}
