// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Exclusive per-slot lock with a bounded wait.
//!
//! The lock remembers who holds it (operation name, acquisition time and,
//! when `RUST_BACKTRACE` is enabled, the acquiring call stack). That record
//! is only read to build [`Error::LockTimeout`] messages.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Who holds a slot lock.
#[derive(Debug, Clone)]
pub struct LockHolder {
    /// Operation that acquired the lock
    pub operation: &'static str,
    /// When it was acquired
    pub acquired_at: DateTime<Utc>,
    /// Acquiring call stack, if backtraces are enabled
    pub trace: Option<String>,
}

impl fmt::Display for LockHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} since {}",
            self.operation,
            self.acquired_at.to_rfc3339()
        )?;
        if let Some(trace) = &self.trace {
            write!(f, "\n{trace}")?;
        }
        Ok(())
    }
}

/// Exclusive lock around a slot's mutable state.
#[derive(Debug)]
pub struct SlotLock<T> {
    slot_id: Uuid,
    max_wait: Duration,
    inner: Mutex<T>,
    holder: StdMutex<Option<LockHolder>>,
}

impl<T> SlotLock<T> {
    /// Wrap `value`; acquisitions wait at most `max_wait`.
    pub fn new(slot_id: Uuid, max_wait: Duration, value: T) -> Self {
        Self {
            slot_id,
            max_wait,
            inner: Mutex::new(value),
            holder: StdMutex::new(None),
        }
    }

    /// Configured bounded wait.
    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    /// Acquire the lock for `operation`, failing with
    /// [`Error::LockTimeout`] after the bounded wait.
    pub async fn lock(&self, operation: &'static str) -> Result<SlotLockGuard<'_, T>> {
        let guard = match tokio::time::timeout(self.max_wait, self.inner.lock()).await {
            Ok(guard) => guard,
            Err(_) => {
                let holder = self
                    .holder()
                    .map(|h| h.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                debug!(slot_id = %self.slot_id, operation = operation, holder = %holder, "Slot lock timeout");
                return Err(Error::LockTimeout {
                    slot_id: self.slot_id,
                    waited: self.max_wait,
                    holder,
                });
            }
        };

        let backtrace = Backtrace::capture();
        let trace = (backtrace.status() == BacktraceStatus::Captured).then(|| backtrace.to_string());
        *self.holder_cell() = Some(LockHolder {
            operation,
            acquired_at: Utc::now(),
            trace,
        });

        Ok(SlotLockGuard {
            guard,
            holder: &self.holder,
        })
    }

    /// Current holder, if the lock is held.
    pub fn holder(&self) -> Option<LockHolder> {
        self.holder_cell().clone()
    }

    fn holder_cell(&self) -> std::sync::MutexGuard<'_, Option<LockHolder>> {
        self.holder.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Guard returned by [`SlotLock::lock`]. Clears the holder record on drop.
pub struct SlotLockGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    holder: &'a StdMutex<Option<LockHolder>>,
}

impl<T> Deref for SlotLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for SlotLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for SlotLockGuard<'_, T> {
    fn drop(&mut self) {
        // Runs before `guard` is released, so no new holder can be overwritten.
        *self.holder.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_lock_records_holder() {
        let lock = SlotLock::new(Uuid::new_v4(), Duration::from_millis(100), 0u32);
        assert!(lock.holder().is_none());

        {
            let mut guard = lock.lock("assign").await.unwrap();
            *guard += 1;
            let holder = lock.holder().unwrap();
            assert_eq!(holder.operation, "assign");
        }

        assert!(lock.holder().is_none());
        assert_eq!(*lock.lock("status").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_timeout_names_holder() {
        let slot_id = Uuid::new_v4();
        let lock = Arc::new(SlotLock::new(slot_id, Duration::from_millis(50), ()));
        let _held = lock.lock("restart").await.unwrap();

        let err = lock.lock("stop").await.err().unwrap();
        match err {
            Error::LockTimeout {
                slot_id: id,
                waited,
                holder,
            } => {
                assert_eq!(id, slot_id);
                assert_eq!(waited, Duration::from_millis(50));
                assert!(holder.starts_with("restart since "));
            }
            other => panic!("expected lock timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_waiter_gets_lock_after_release() {
        let lock = Arc::new(SlotLock::new(Uuid::new_v4(), Duration::from_secs(2), 0u32));
        let guard = lock.lock("install").await.unwrap();

        let waiter = {
            let lock = lock.clone();
            tokio::spawn(async move {
                let mut guard = lock.lock("start").await.unwrap();
                *guard += 1;
                lock.holder().map(|h| h.operation)
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(guard);

        assert_eq!(waiter.await.unwrap(), Some("start"));
        assert!(lock.holder().is_none());
    }
}
