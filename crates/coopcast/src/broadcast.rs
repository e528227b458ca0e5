//! Broadcast session state.
//!
//! The session owns the camera lease for as long as it is Active. Every way
//! out of Active (manual stop, duration expiry, stream failure, shutdown)
//! goes through [`BroadcastSession::deactivate`], which hands the lease out
//! exactly once. A stale stopper presenting an old generation gets nothing.
//! The session still reads as Active until the stopper has released the lease
//! and called [`BroadcastSession::mark_idle`].

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::publish::PostId;
use crate::resource_guard::{Lease, LeaseId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BroadcastState {
    Idle,
    Active,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Requested,
    Expired,
    /// The stream ended cleanly without being asked to.
    StreamEnded,
    StreamFailed,
    Shutdown,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopReason::Requested => "requested",
            StopReason::Expired => "expired",
            StopReason::StreamEnded => "stream_ended",
            StopReason::StreamFailed => "stream_failed",
            StopReason::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// Result of a start request.
#[derive(Debug, PartialEq, Eq)]
pub enum BroadcastStart {
    Started {
        generation: u64,
        announcement: PostId,
    },
    /// Camera was held by someone else; state stays Idle.
    ResourceBusy,
    AlreadyActive,
}

/// Result of a stop request.
#[derive(Debug, PartialEq, Eq)]
pub enum BroadcastStop {
    Stopped {
        generation: u64,
        reason: StopReason,
        ran_for: Duration,
    },
    NotActive,
}

/// Everything an Active session owns.
#[derive(Debug)]
pub(crate) struct ActiveBroadcast {
    pub(crate) generation: u64,
    pub(crate) lease: Lease,
    pub(crate) started_at: Instant,
    pub(crate) cancel: CancellationToken,
}

pub struct BroadcastSession {
    active_flag: AtomicBool,
    current: Mutex<Option<ActiveBroadcast>>,
    next_generation: AtomicU64,
}

impl Default for BroadcastSession {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastSession {
    pub fn new() -> Self {
        Self {
            active_flag: AtomicBool::new(false),
            current: Mutex::new(None),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Lock-free read used on the motion path.
    pub fn is_active(&self) -> bool {
        self.active_flag.load(Ordering::Acquire)
    }

    pub fn state(&self) -> BroadcastState {
        if self.is_active() {
            BroadcastState::Active
        } else {
            BroadcastState::Idle
        }
    }

    /// Idle→Active, taking ownership of `lease`.
    ///
    /// Holding the lease is what makes this the only session; if one were
    /// somehow already recorded, the new lease is handed back.
    pub(crate) async fn activate(
        &self,
        lease: Lease,
        now: Instant,
    ) -> Result<(u64, CancellationToken), Lease> {
        let mut current = self.current.lock().await;
        if current.is_some() {
            return Err(lease);
        }
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        *current = Some(ActiveBroadcast {
            generation,
            lease,
            started_at: now,
            cancel: cancel.clone(),
        });
        self.active_flag.store(true, Ordering::Release);
        Ok((generation, cancel))
    }

    /// Take the session record. `Some(generation)` only ends that particular
    /// session. The state stays Active until [`Self::mark_idle`].
    pub(crate) async fn deactivate(&self, generation: Option<u64>) -> Option<ActiveBroadcast> {
        let mut current = self.current.lock().await;
        let matches = match (current.as_ref(), generation) {
            (Some(active), Some(wanted)) => active.generation == wanted,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if !matches {
            return None;
        }
        current.take()
    }

    /// Report Idle once the stopper is done with the lease. Does nothing if a
    /// new session has been recorded in the meantime.
    pub(crate) async fn mark_idle(&self) {
        let current = self.current.lock().await;
        if current.is_none() {
            self.active_flag.store(false, Ordering::Release);
        }
    }

    /// Lease and running time of the current session, if any.
    pub async fn current(&self, now: Instant) -> Option<(LeaseId, Duration)> {
        self.current
            .lock()
            .await
            .as_ref()
            .map(|a| (a.lease.id(), now.saturating_duration_since(a.started_at)))
    }
}
