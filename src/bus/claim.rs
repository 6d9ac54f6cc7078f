//! Claim coordinator — makes an addressed message act on exactly one replica.
//!
//! Every replica of a service receives every message on the service channel.
//! Before acting, a replica writes a claim key named after the message id with
//! a conditional set. The first writer wins; everyone else sees the failed
//! set and skips. The winner deletes the claim once processing finishes, on
//! every exit path, so the same id can be processed again if republished.
//!
//! ```text
//!   replica A            store              replica B
//!      │  SET id A NX PX ──▶│                    │
//!      │◀──────── OK ───────│◀── SET id B NX PX ─│
//!      │                    │───── nil ─────────▶│  (skip)
//!      │  handler(...)      │                    │
//!      │  DEL id ──────────▶│                    │
//! ```
//!
//! The claim carries a TTL as well, so an instance that dies mid-handler does
//! not orphan the id forever.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::store::{KeyValueBus, SetMode, StoreError};

/// Result of a claim attempt.
pub enum ClaimOutcome<'a, S: KeyValueBus> {
    /// This instance owns the message until the guard is dropped.
    Won(ClaimGuard<'a, S>),
    /// Another instance already holds the claim. Not an error.
    Lost,
}

impl<S: KeyValueBus> ClaimOutcome<'_, S> {
    pub fn is_won(&self) -> bool {
        matches!(self, ClaimOutcome::Won(_))
    }
}

/// Counters for claim attempts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ClaimStats {
    pub won: u64,
    pub lost: u64,
}

/// Claims message ids on behalf of one instance.
pub struct ClaimCoordinator<S> {
    store: Arc<S>,
    instance_id: String,
    ttl: Duration,
    won: AtomicU64,
    lost: AtomicU64,
}

impl<S: KeyValueBus> ClaimCoordinator<S> {
    /// Create a coordinator; `ttl` bounds how long an abandoned claim survives.
    pub fn new(store: Arc<S>, instance_id: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store,
            instance_id: instance_id.into(),
            ttl,
            won: AtomicU64::new(0),
            lost: AtomicU64::new(0),
        }
    }

    /// Try to claim `message_id` with a single conditional write.
    pub fn claim(&self, message_id: &str) -> Result<ClaimOutcome<'_, S>, StoreError> {
        let written = self.store.set(
            message_id,
            &self.instance_id,
            Some(self.ttl),
            SetMode::IfNotExists,
        )?;

        if written {
            self.won.fetch_add(1, Ordering::Relaxed);
            debug!(message_id, instance = %self.instance_id, "claim won");
            Ok(ClaimOutcome::Won(ClaimGuard {
                store: self.store.as_ref(),
                key: message_id.to_string(),
                released: false,
            }))
        } else {
            self.lost.fetch_add(1, Ordering::Relaxed);
            debug!(message_id, instance = %self.instance_id, "claim held elsewhere, skipping");
            Ok(ClaimOutcome::Lost)
        }
    }

    /// Claim, run `f`, then release.
    ///
    /// Returns `Ok(None)` when another instance holds the claim. The claim is
    /// released after `f` returns or unwinds.
    pub fn process<T>(
        &self,
        message_id: &str,
        f: impl FnOnce() -> T,
    ) -> Result<Option<T>, StoreError> {
        match self.claim(message_id)? {
            ClaimOutcome::Won(guard) => {
                let result = f();
                guard.release()?;
                Ok(Some(result))
            }
            ClaimOutcome::Lost => Ok(None),
        }
    }

    pub fn stats(&self) -> ClaimStats {
        ClaimStats {
            won: self.won.load(Ordering::Relaxed),
            lost: self.lost.load(Ordering::Relaxed),
        }
    }
}

/// Ownership of a claimed message id. Deletes the claim key on drop.
pub struct ClaimGuard<'a, S: KeyValueBus> {
    store: &'a S,
    key: String,
    released: bool,
}

impl<S: KeyValueBus> ClaimGuard<'_, S> {
    pub fn message_id(&self) -> &str {
        &self.key
    }

    /// Delete the claim now, surfacing store errors.
    pub fn release(mut self) -> Result<(), StoreError> {
        self.released = true;
        self.store.del(&self.key)?;
        Ok(())
    }
}

impl<S: KeyValueBus> Drop for ClaimGuard<'_, S> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.store.del(&self.key) {
            warn!(message_id = %self.key, error = %e, "failed to release claim");
        }
    }
}
