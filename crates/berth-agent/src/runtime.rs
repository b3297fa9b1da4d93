// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for the berth agent.
//!
//! [`AgentRuntime`] serves the HTTP control surface of an existing [`Agent`]
//! inside the caller's tokio runtime.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use berth_agent::{Agent, AgentConfig, AgentRuntime};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let agent = Arc::new(Agent::from_config(&AgentConfig::new("slots")).await?);
//!
//!     let runtime = AgentRuntime::builder()
//!         .agent(agent)
//!         .bind_addr("0.0.0.0:7775".parse()?)
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::agent::Agent;
use crate::http;

/// Default listen address.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:7775";

/// Builder for an [`AgentRuntime`].
#[derive(Default)]
pub struct AgentRuntimeBuilder {
    agent: Option<Arc<Agent>>,
    bind_addr: Option<SocketAddr>,
}

impl AgentRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the agent to serve (required).
    pub fn agent(mut self, agent: Arc<Agent>) -> Self {
        self.agent = Some(agent);
        self
    }

    /// Set the listen address.
    ///
    /// Default: `0.0.0.0:7775`. Port 0 picks a free port; see
    /// [`AgentRuntime::local_addr`].
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = Some(addr);
        self
    }

    /// Validate the builder.
    pub fn build(self) -> Result<AgentRuntimeConfig> {
        let agent = self
            .agent
            .ok_or_else(|| anyhow::anyhow!("agent is required"))?;
        let bind_addr = match self.bind_addr {
            Some(addr) => addr,
            None => DEFAULT_BIND_ADDR.parse()?,
        };
        Ok(AgentRuntimeConfig { agent, bind_addr })
    }
}

/// Validated runtime configuration.
pub struct AgentRuntimeConfig {
    agent: Arc<Agent>,
    bind_addr: SocketAddr,
}

impl AgentRuntimeConfig {
    /// Bind the listener and spawn the HTTP server task.
    pub async fn start(self) -> Result<AgentRuntime> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        let shutdown = Arc::new(Notify::new());

        let app = http::router(self.agent.clone());
        let signal = shutdown.clone();
        let server_handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.notified().await })
                .await?;
            Ok::<_, anyhow::Error>(())
        });

        info!(
            bind_addr = %local_addr,
            agent_id = %self.agent.agent_id(),
            "AgentRuntime started"
        );

        Ok(AgentRuntime {
            server_handle,
            shutdown,
            agent: self.agent,
            local_addr,
        })
    }
}

/// A running HTTP server for one [`Agent`].
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct AgentRuntime {
    server_handle: JoinHandle<Result<()>>,
    shutdown: Arc<Notify>,
    agent: Arc<Agent>,
    local_addr: SocketAddr,
}

impl AgentRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> AgentRuntimeBuilder {
        AgentRuntimeBuilder::new()
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The served agent.
    pub fn agent(&self) -> &Arc<Agent> {
        &self.agent
    }

    /// Check if the server task is still running.
    pub fn is_running(&self) -> bool {
        !self.server_handle.is_finished()
    }

    /// Stop accepting connections, drain in-flight requests and wait for
    /// the server task.
    pub async fn shutdown(self) -> Result<()> {
        info!("AgentRuntime shutting down...");
        // notify_one stores a permit, so a server that has not yet polled
        // its shutdown future still observes it.
        self.shutdown.notify_one();

        match self.server_handle.await {
            Ok(Ok(())) => {
                info!("AgentRuntime shutdown complete");
                Ok(())
            }
            Ok(Err(e)) => {
                error!("AgentRuntime server error during shutdown: {}", e);
                Err(e)
            }
            Err(e) => {
                error!("AgentRuntime server task panicked: {}", e);
                Err(anyhow::anyhow!("server task panicked: {}", e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_requires_agent() {
        let err = AgentRuntime::builder().build().err().unwrap();
        assert!(err.to_string().contains("agent is required"));
    }
}
