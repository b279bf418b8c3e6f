//! Distributed Lock
//!
//! Cross-process mutual exclusion over the `SharedStore` lock primitives.
//! Acquisition is a single set-if-absent with an expiry; release is a
//! single compare-and-delete against the caller's token, so a caller whose
//! lease already expired can never delete a lock someone else now holds.
//!
//! Acquisition never waits: a held resource is reported immediately.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, instrument, warn};

use crate::domain::ports::{LockToken, ResourceKey, SharedStore};
use crate::error::Result;

/// Proof of one successful acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockLease {
    resource: ResourceKey,
    token: LockToken,
    expires_at: Instant,
}

impl LockLease {
    pub fn resource(&self) -> &ResourceKey {
        &self.resource
    }

    pub fn token(&self) -> &LockToken {
        &self.token
    }

    /// Local estimate of when the store drops the record
    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Token-owned lock records in a shared store.
pub struct DistributedLock {
    store: Arc<dyn SharedStore>,
    namespace: String,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn SharedStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    /// Store key for a resource (`"{namespace}:{resource}"`)
    pub fn store_key(&self, resource: &ResourceKey) -> String {
        if self.namespace.is_empty() {
            resource.as_str().to_string()
        } else {
            format!("{}:{}", self.namespace, resource)
        }
    }

    /// Try to take the lock.
    ///
    /// `Ok(None)` means another holder has it; `Err` means the store could
    /// not be asked.
    #[instrument(skip(self, resource), fields(resource = %resource))]
    pub async fn try_acquire(
        &self,
        resource: &ResourceKey,
        ttl: Duration,
    ) -> Result<Option<LockLease>> {
        let token = LockToken::generate();
        let acquired = self
            .store
            .set_if_absent(&self.store_key(resource), token.as_str(), ttl)
            .await?;

        if acquired {
            debug!("Lock acquired");
            Ok(Some(LockLease {
                resource: resource.clone(),
                token,
                expires_at: Instant::now() + ttl,
            }))
        } else {
            debug!("Lock held elsewhere");
            Ok(None)
        }
    }

    /// Take the lock, treating an unreachable store as not acquired.
    pub async fn acquire(&self, resource: &ResourceKey, ttl: Duration) -> Option<LockLease> {
        match self.try_acquire(resource, ttl).await {
            Ok(lease) => lease,
            Err(e) => {
                warn!(resource = %resource, store = self.store.name(), error = %e, "Lock store unavailable on acquire");
                None
            }
        }
    }

    /// Delete the lock only if `token` still owns it.
    #[instrument(skip(self, resource, token), fields(resource = %resource))]
    pub async fn try_release(&self, resource: &ResourceKey, token: &LockToken) -> Result<bool> {
        let released = self
            .store
            .compare_and_delete(&self.store_key(resource), token.as_str())
            .await?;

        if !released {
            debug!("Release skipped, token no longer owns the lock");
        }
        Ok(released)
    }

    /// Release, treating an unreachable store as not released.
    pub async fn release(&self, resource: &ResourceKey, token: &LockToken) -> bool {
        match self.try_release(resource, token).await {
            Ok(released) => released,
            Err(e) => {
                warn!(resource = %resource, store = self.store.name(), error = %e, "Lock store unavailable on release");
                false
            }
        }
    }

    /// Release a lease previously returned by `acquire`.
    pub async fn release_lease(&self, lease: &LockLease) -> bool {
        self.release(&lease.resource, &lease.token).await
    }
}

impl std::fmt::Debug for DistributedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedLock")
            .field("store", &self.store.name())
            .field("namespace", &self.namespace)
            .finish()
    }
}
