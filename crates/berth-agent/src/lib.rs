// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Berth Agent - Slot Deployment and Lifecycle Management
//!
//! The agent runs on every machine of a fleet. It owns a set of *slots*,
//! each holding at most one deployment of a service: a binary `.tar.gz`
//! archive plus a `.zip` config bundle. A remote controller installs,
//! reassigns, starts, stops and terminates slots over HTTP.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Fleet Controller                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │ HTTP (x-berth-*-version headers)
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      berth-agent (This Crate)                           │
//! │                           Port 7775                                     │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐   ┌─────────────┐  │
//! │  │    http     │──▶│    Agent    │──▶│    Slot     │──▶│  Lifecycle  │  │
//! │  │   router    │   │  registry   │   │ state+lock  │   │   Manager   │  │
//! │  └─────────────┘   └─────────────┘   └──────┬──────┘   └──────┬──────┘  │
//! │                                             │                 │         │
//! │                                             ▼                 ▼         │
//! │                                     ┌───────────────┐  ┌─────────────┐  │
//! │                                     │  Deployment   │  │ bin/launcher│  │
//! │                                     │   Manager     │  └─────────────┘  │
//! │                                     └───────┬───────┘                   │
//! └─────────────────────────────────────────────┼───────────────────────────┘
//!                                               ▼
//!                       <slots>/<name>/{slot-id.txt, deployment.json,
//!                                       installation/, data/}
//! ```
//!
//! # Slot State Machine
//!
//! ```text
//!                  assign (old stopped first)
//!              ┌───────────────────────────┐
//!              │                           ▼
//!        ┌──────────┐   start      ┌──────────┐
//!  ─────▶│ STOPPED  │─────────────▶│ RUNNING  │◀──┐
//!        └──────────┘◀─────────────└──────────┘   │ restart
//!              │        stop/kill        │        │
//!     terminate│                         └────────┘
//!              ▼
//!        ┌────────────┐
//!        │ TERMINATED │  (absorbing)
//!        └────────────┘
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `BERTH_HTTP_PORT` | No | `7775` | HTTP listen port |
//! | `BERTH_AGENT_ID` | No | persisted random id | Agent identity |
//! | `BERTH_LOCATION` | No | `/berth/<hostname>` | Agent location |
//! | `BERTH_INSTANCE_ID` | No | - | Host instance id in status |
//! | `BERTH_INTERNAL_URI` | No | `http://127.0.0.1:<port>` | Internal base URI |
//! | `BERTH_EXTERNAL_URI` | No | internal URI | External base URI |
//! | `BERTH_SLOTS_DIR` | No | `slots` | Slots root directory |
//! | `BERTH_RESOURCES_FILE` | No | `etc/resources.properties` | Resource inventory |
//! | `BERTH_ENVIRONMENT` | No | `development` | Environment written to node config |
//! | `BERTH_MAX_LOCK_WAIT_MS` | No | `1000` | Slot lock bounded wait |
//!
//! # Modules
//!
//! - [`agent`]: Slot registry, bootstrap and resource inventory
//! - [`archive`]: Download and extraction of deployment artifacts
//! - [`config`]: Configuration from environment variables
//! - [`deployment`]: Atomic slot directory installer and recovery
//! - [`http`]: HTTP control surface
//! - [`lifecycle`]: Process lifecycle backends
//! - [`slot`]: Per-slot state machine
//! - [`version`]: Content fingerprints for optimistic concurrency

#![deny(missing_docs)]

/// Slot registry.
pub mod agent;

/// Artifact download and extraction.
pub mod archive;

/// Agent configuration loaded from environment variables.
pub mod config;

/// Deployment managers: install, recover and remove slot directories.
pub mod deployment;

/// Error types for agent operations.
pub mod error;

/// HTTP router.
pub mod http;

/// Lifecycle managers driving deployed processes.
pub mod lifecycle;

/// Assignments, installations and deployments.
pub mod model;

/// Embeddable runtime serving the HTTP router.
pub mod runtime;

/// Slot state machine.
pub mod slot;

/// Timed per-slot lock.
pub mod slot_lock;

/// Slot and agent status snapshots.
pub mod status;

/// Version fingerprints and headers.
pub mod version;

pub use agent::Agent;
pub use config::{AgentConfig, Config};
pub use error::{Error, InstallError, Result};
pub use model::{Assignment, Deployment, Installation};
pub use runtime::AgentRuntime;
pub use slot::{Slot, SlotOperation};
pub use status::{AgentStatus, SlotLifecycleState, SlotStatus};
