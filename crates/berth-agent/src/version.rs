// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Version fingerprints for optimistic concurrency.
//!
//! A fingerprint is the lowercase hex SHA-256 of a `||`-joined canonical
//! string. A missing value is written as `--NULL--` so that "no assignment"
//! can never collide with an assignment whose coordinates happen to be empty.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::Assignment;
use crate::status::{AgentLifecycleState, SlotLifecycleState, SlotStatus};

/// Header carrying the agent fingerprint.
pub const AGENT_VERSION_HEADER: &str = "x-berth-agent-version";

/// Header carrying a slot fingerprint.
pub const SLOT_VERSION_HEADER: &str = "x-berth-slot-version";

const NULL: &str = "--NULL--";

fn digest<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.into_iter().enumerate() {
        if i > 0 {
            hasher.update(b"||");
        }
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Fingerprint of a slot's externally significant fields.
pub fn slot_version(
    id: Uuid,
    state: SlotLifecycleState,
    assignment: Option<&Assignment>,
) -> String {
    let id = id.to_string();
    match assignment {
        Some(a) => digest([id.as_str(), state.as_str(), &a.binary, &a.config]),
        None => digest([id.as_str(), state.as_str(), NULL]),
    }
}

/// Fingerprint over a set of slots, independent of their order.
pub fn slots_version(slots: &[SlotStatus]) -> String {
    let mut ordered: Vec<&SlotStatus> = slots.iter().collect();
    ordered.sort_by_key(|slot| slot.id());
    digest(ordered.iter().map(|slot| slot.version()))
}

/// Fingerprint of the agent: identity, state, slots and inventory.
pub fn agent_version(
    agent_id: Uuid,
    state: AgentLifecycleState,
    slots: &[SlotStatus],
    resources: &BTreeMap<String, u32>,
) -> String {
    let id = agent_id.to_string();
    let slots = slots_version(slots);
    let resources: Vec<String> = resources
        .iter()
        .map(|(name, amount)| format!("{name}={amount}"))
        .collect();
    digest(
        [id.as_str(), state.as_str(), slots.as_str()]
            .into_iter()
            .chain(resources.iter().map(String::as_str)),
    )
}

/// Compare a caller-supplied fingerprint with the current one. A missing
/// expectation always passes.
pub fn check_version(header: &'static str, expected: Option<&str>, actual: &str) -> Result<()> {
    match expected {
        Some(expected) if expected != actual => Err(Error::VersionConflict {
            header,
            expected: expected.to_string(),
            actual: actual.to_string(),
        }),
        _ => Ok(()),
    }
}
