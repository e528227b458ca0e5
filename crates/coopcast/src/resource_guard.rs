//! Exclusive access to the single camera.
//!
//! At most one [`Lease`] exists at a time. Short-lived users (still capture)
//! take a [`ScopedLease`] that releases itself on every exit path; a broadcast
//! takes a plain [`Lease`] and holds it until the session stops.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

use crate::error::ReleaseMismatch;

/// Holder slot value when nobody owns the resource.
const VACANT: u64 = 0;

/// Identity of one grant of the resource. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeaseId(u64);

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lease-{}", self.0)
    }
}

/// Token proving exclusive ownership. Not `Clone`: giving it back is the only
/// way to release.
#[derive(Debug)]
#[must_use = "a dropped Lease keeps the resource held until force_release"]
pub struct Lease {
    id: LeaseId,
}

impl Lease {
    pub fn id(&self) -> LeaseId {
        self.id
    }
}

/// Result of an acquire attempt. `Busy` is expected contention, not a fault.
#[derive(Debug)]
pub enum Acquisition<L> {
    Acquired(L),
    Busy,
}

impl<L> Acquisition<L> {
    pub fn is_busy(&self) -> bool {
        matches!(self, Acquisition::Busy)
    }
}

/// Serializes access to a shared resource `R` behind lease tokens.
pub struct ExclusiveResourceGuard<R: ?Sized> {
    resource: Arc<R>,
    permits: Semaphore,
    holder: AtomicU64,
    next_id: AtomicU64,
}

impl<R: ?Sized> ExclusiveResourceGuard<R> {
    pub fn new(resource: Arc<R>) -> Self {
        Self {
            resource,
            permits: Semaphore::new(1),
            holder: AtomicU64::new(VACANT),
            next_id: AtomicU64::new(1),
        }
    }

    /// Acquire a long-lived lease, waiting at most `timeout`.
    ///
    /// A zero timeout never waits.
    pub async fn acquire(&self, timeout: Duration) -> Acquisition<Lease> {
        let permit = if timeout.is_zero() {
            self.permits.try_acquire().ok()
        } else {
            tokio::time::timeout(timeout, self.permits.acquire())
                .await
                .ok()
                .and_then(Result::ok)
        };

        let Some(permit) = permit else {
            debug!(
                timeout_ms = timeout.as_millis() as u64,
                holder = ?self.holder(),
                "Resource busy"
            );
            return Acquisition::Busy;
        };

        // Ownership is tracked by `holder`; the permit comes back in release().
        permit.forget();
        let id = LeaseId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.holder.store(id.0, Ordering::Release);
        debug!(lease.id = %id, "Lease acquired");

        Acquisition::Acquired(Lease { id })
    }

    /// Acquire a lease that is released when the returned scope ends.
    pub async fn acquire_scoped(&self, timeout: Duration) -> Acquisition<ScopedLease<'_, R>> {
        match self.acquire(timeout).await {
            Acquisition::Acquired(lease) => Acquisition::Acquired(ScopedLease {
                guard: self,
                lease: Some(lease),
            }),
            Acquisition::Busy => Acquisition::Busy,
        }
    }

    /// Give a lease back.
    ///
    /// Fails if `lease` is not the current holder, e.g. it was force-released
    /// and the resource has since been granted to someone else.
    pub fn release(&self, lease: Lease) -> Result<(), ReleaseMismatch> {
        match self
            .holder
            .compare_exchange(lease.id.0, VACANT, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                self.permits.add_permits(1);
                debug!(lease.id = %lease.id, "Lease released");
                Ok(())
            }
            Err(actual) => Err(ReleaseMismatch {
                presented: lease.id,
                holder: lease_id(actual),
            }),
        }
    }

    /// Borrow the resource on behalf of `lease`.
    pub fn resource(&self, lease: &Lease) -> Result<&R, ReleaseMismatch> {
        let actual = self.holder.load(Ordering::Acquire);
        if actual == lease.id.0 {
            Ok(&*self.resource)
        } else {
            Err(ReleaseMismatch {
                presented: lease.id,
                holder: lease_id(actual),
            })
        }
    }

    pub fn holder(&self) -> Option<LeaseId> {
        lease_id(self.holder.load(Ordering::Acquire))
    }

    pub fn is_held(&self) -> bool {
        self.holder().is_some()
    }

    /// Reclaim the resource from whoever holds it. Shutdown only.
    ///
    /// The evicted lease will fail its own release with [`ReleaseMismatch`].
    pub fn force_release(&self) -> Option<LeaseId> {
        let evicted = lease_id(self.holder.swap(VACANT, Ordering::AcqRel));
        if let Some(id) = evicted {
            self.permits.add_permits(1);
            warn!(lease.id = %id, "Lease force-released");
        }
        evicted
    }
}

fn lease_id(raw: u64) -> Option<LeaseId> {
    (raw != VACANT).then_some(LeaseId(raw))
}

/// A lease tied to a lexical scope. Dropping it releases the resource.
pub struct ScopedLease<'a, R: ?Sized> {
    guard: &'a ExclusiveResourceGuard<R>,
    lease: Option<Lease>,
}

impl<'a, R: ?Sized> ScopedLease<'a, R> {
    pub fn resource(&self) -> &'a R {
        &*self.guard.resource
    }

    /// Release now, surfacing a mismatch instead of logging it.
    pub fn release(mut self) -> Result<(), ReleaseMismatch> {
        match self.lease.take() {
            Some(lease) => self.guard.release(lease),
            None => Ok(()),
        }
    }
}

impl<R: ?Sized> Drop for ScopedLease<'_, R> {
    fn drop(&mut self) {
        if let Some(lease) = self.lease.take() {
            if let Err(e) = self.guard.release(lease) {
                error!(error = %e, "Scoped lease release failed");
            }
        }
    }
}
