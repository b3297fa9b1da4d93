// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Berth Agent - per-machine slot manager
//!
//! An HTTP server responsible for:
//! - Installing binary archives and config bundles into slots
//! - Driving slot lifecycle through the bundled launcher
//! - Reporting slot and agent status with version fingerprints

use std::sync::Arc;
use tracing::{info, warn};

use berth_agent::agent::Agent;
use berth_agent::config::Config;
use berth_agent::runtime::AgentRuntime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "berth_agent=info".into()),
        )
        .init();

    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        http_addr = %config.http_addr,
        location = %config.agent.location,
        slots_dir = %config.agent.slots_dir.display(),
        "Starting Berth Agent"
    );

    let agent = Arc::new(Agent::from_config(&config.agent).await?);

    let runtime = AgentRuntime::builder()
        .agent(agent)
        .bind_addr(config.http_addr)
        .build()?
        .start()
        .await?;

    info!(addr = %runtime.local_addr(), "Agent server ready");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    runtime.shutdown().await?;

    info!("Berth Agent shut down");

    Ok(())
}
