//! Per-key async mutual exclusion and bounded waits.
//!
//! Writers to the same key queue on one `tokio::sync::Mutex`; different
//! keys never contend. Idle entries are pruned whenever a new lock is
//! handed out, so the table only holds keys with live guards.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::OwnedMutexGuard;
use tokio::time::Instant;

use hta_core::error::{HtaError, Result};

/// Run `fut` with a deadline, mapping expiry to [`HtaError::Timeout`].
///
/// The future is dropped on expiry, so no write it had not yet issued
/// can land afterwards.
pub async fn bounded<T, F>(operation: &str, key: &str, timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    bounded_until(operation, key, Instant::now() + timeout, timeout, fut).await
}

/// [`bounded`] against a deadline shared by several steps of one call.
///
/// `budget` is the caller's whole allowance and is what a timeout reports.
pub async fn bounded_until<T, F>(
    operation: &str,
    key: &str,
    deadline: Instant,
    budget: Duration,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout_at(deadline, fut).await {
        Ok(result) => result,
        Err(_) => {
            let timeout_ms = budget.as_millis() as u64;
            tracing::warn!(operation, key, timeout_ms, "operation timed out");
            Err(HtaError::Timeout {
                operation: operation.to_string(),
                key: key.to_string(),
                timeout_ms,
            })
        }
    }
}

pub struct KeyedLocks<K> {
    inner: Mutex<HashMap<K, Arc<tokio::sync::Mutex<()>>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Wait for exclusive access to `key`. Released when the guard drops.
    pub async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
        let slot = {
            // The map only holds Arcs; a panic elsewhere cannot leave it inconsistent.
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            map.retain(|k, m| k == key || Arc::strong_count(m) > 1);
            map.entry(key.clone()).or_default().clone()
        };
        slot.lock_owned().await
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}
