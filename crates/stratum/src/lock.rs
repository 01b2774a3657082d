//! Cross-process mutual exclusion through Postgres advisory locks.
//!
//! Only one process may create a tenant schema at a time. The creator holds a
//! session-level advisory lock for the duration of the run; anyone else who
//! fails to take it waits (bounded) for the creator's tables to appear.

use crate::traced::{Connection, ConnectionExt};
use crate::{Error, Result};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// A `bigint` advisory lock key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockKey(pub i64);

impl LockKey {
    /// Derive a key from a lock name: the first eight bytes of its blake3
    /// digest, big-endian.
    pub fn from_name(name: &str) -> Self {
        let digest = blake3::hash(name.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest.as_bytes()[..8]);
        LockKey(i64::from_be_bytes(bytes))
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The outcome of an acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockHandle {
    pub key: LockKey,
    pub acquired: bool,
}

/// Try to take the lock without blocking.
pub async fn try_acquire<C: Connection>(conn: &C, key: LockKey) -> Result<LockHandle> {
    let row = conn
        .traced()
        .query_one("SELECT pg_try_advisory_lock($1)", &[&key.0])
        .await?;
    let acquired: bool = row.try_get(0)?;
    tracing::debug!(key = %key, acquired, "advisory lock attempt");
    Ok(LockHandle { key, acquired })
}

/// Release a held lock. Failures are logged and swallowed: the lock dies
/// with the session anyway.
pub async fn release<C: Connection>(conn: &C, handle: &LockHandle) {
    if !handle.acquired {
        return;
    }
    let result = conn
        .traced()
        .query_one("SELECT pg_advisory_unlock($1)", &[&handle.key.0])
        .await;
    match result.and_then(|row| row.try_get::<_, bool>(0)) {
        Ok(true) => tracing::debug!(key = %handle.key, "advisory lock released"),
        Ok(false) => tracing::warn!(key = %handle.key, "advisory lock was not held at release"),
        Err(e) => tracing::warn!(key = %handle.key, error = %e, "failed to release advisory lock"),
    }
}

/// Progress is logged once every this many polls.
const PROGRESS_EVERY: u32 = 5;

/// Poll `probe` until it reports the peer's work is done, or fail with
/// [`Error::LockTimeout`] once `timeout` has elapsed.
///
/// Returns how long the wait took.
pub async fn wait_for_peer<F, Fut>(
    key: LockKey,
    timeout: Duration,
    interval: Duration,
    mut probe: F,
) -> Result<Duration>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let started = Instant::now();
    let mut polls = 0u32;
    loop {
        if probe().await? {
            let waited = started.elapsed();
            tracing::info!(key = %key, ?waited, "peer finished creating the schema");
            return Ok(waited);
        }

        let waited = started.elapsed();
        if waited >= timeout {
            tracing::error!(key = %key, ?waited, "gave up waiting for peer");
            return Err(Error::LockTimeout {
                key: key.0,
                waited,
            });
        }

        polls += 1;
        if polls % PROGRESS_EVERY == 0 {
            tracing::info!(key = %key, ?waited, ?timeout, "still waiting for peer to finish");
        }
        tokio::time::sleep(interval.min(timeout - waited)).await;
    }
}
