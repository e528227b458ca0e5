//! The event coordinator.
//!
//! Every trigger ends up here. The coordinator is the only code that touches
//! the camera guard and the rate limiter, and it is cheap to clone so each
//! worker (and each broadcast supervisor) can hold its own handle.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::broadcast::{BroadcastSession, BroadcastStart, BroadcastState, BroadcastStop, StopReason};
use crate::camera::{CameraResource, StreamExit, StreamTarget};
use crate::content::ContentProvider;
use crate::error::{ContentError, CoordinatorResult, HardwareError};
use crate::message::MessageComposer;
use crate::publish::{PostId, PublishSink};
use crate::rate_limiter::RateLimiter;
use crate::resource_guard::{Acquisition, ExclusiveResourceGuard, LeaseId};

/// Knobs the coordinator needs. Built from `coopconf::CoopConfig` by the daemon.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub capture_dir: PathBuf,
    pub capture_timeout: Duration,
    pub broadcast_acquire_timeout: Duration,
    pub min_publish_interval: Duration,
    pub max_broadcast_duration: Duration,
    pub stream_target: StreamTarget,
    pub bitrate: u32,
}

impl CoordinatorSettings {
    pub fn from_config(config: &coopconf::CoopConfig) -> Self {
        Self {
            capture_dir: config.paths.capture_dir.clone(),
            capture_timeout: config.camera.capture_timeout(),
            broadcast_acquire_timeout: config.camera.broadcast_acquire_timeout(),
            min_publish_interval: config.publish.min_interval(),
            max_broadcast_duration: config.broadcast.max_duration(),
            stream_target: StreamTarget {
                ingest_url: config.broadcast.ingest_url.clone(),
                stream_key: config.broadcast.stream_key.clone(),
            },
            bitrate: config.broadcast.bitrate,
        }
    }
}

/// Which trigger fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    MotionDetected,
    RefreshDue,
    BroadcastStartRequested,
    BroadcastStopRequested,
}

#[derive(Debug, Clone, Copy)]
pub struct TriggerEvent {
    pub kind: TriggerKind,
    pub at: Instant,
}

impl TriggerEvent {
    pub fn now(kind: TriggerKind) -> Self {
        Self {
            kind,
            at: Instant::now(),
        }
    }
}

/// Why a motion event produced no post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    ResourceBusy,
    RateLimited,
}

#[derive(Debug, PartialEq, Eq)]
pub enum MotionOutcome {
    Published { post_id: PostId, with_media: bool },
    Dropped(DropReason),
}

#[derive(Debug, PartialEq, Eq)]
pub enum TriggerOutcome {
    Motion(MotionOutcome),
    Refreshed(usize),
    BroadcastStart(BroadcastStart),
    BroadcastStop(BroadcastStop),
}

/// Point-in-time view for logs.
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorStatus {
    pub broadcast: BroadcastState,
    pub broadcast_running_secs: Option<u64>,
    pub resource_holder: Option<String>,
    pub content_items: usize,
    pub refresh_failures: u32,
    pub secs_since_last_publish: Option<u64>,
}

struct Inner {
    settings: CoordinatorSettings,
    guard: ExclusiveResourceGuard<dyn CameraResource>,
    limiter: RateLimiter,
    content: Option<Arc<ContentProvider>>,
    sink: Arc<dyn PublishSink>,
    composer: MessageComposer,
    broadcast: BroadcastSession,
}

#[derive(Clone)]
pub struct EventCoordinator {
    inner: Arc<Inner>,
}

impl EventCoordinator {
    /// `content` is `None` when content posting is disabled; captions then
    /// fall back to the configured fallback text.
    pub fn new(
        settings: CoordinatorSettings,
        camera: Arc<dyn CameraResource>,
        content: Option<Arc<ContentProvider>>,
        sink: Arc<dyn PublishSink>,
        composer: MessageComposer,
    ) -> Self {
        let limiter = RateLimiter::new(settings.min_publish_interval);
        Self {
            inner: Arc::new(Inner {
                settings,
                guard: ExclusiveResourceGuard::new(camera),
                limiter,
                content,
                sink,
                composer,
                broadcast: BroadcastSession::new(),
            }),
        }
    }

    /// Route a trigger to its handler.
    pub async fn dispatch(&self, event: TriggerEvent) -> CoordinatorResult<TriggerOutcome> {
        match event.kind {
            TriggerKind::MotionDetected => self
                .on_motion_detected(event.at)
                .await
                .map(TriggerOutcome::Motion),
            TriggerKind::RefreshDue => self.on_refresh_due().await.map(TriggerOutcome::Refreshed),
            TriggerKind::BroadcastStartRequested => self
                .on_broadcast_start(event.at)
                .await
                .map(TriggerOutcome::BroadcastStart),
            TriggerKind::BroadcastStopRequested => self
                .on_broadcast_stop()
                .await
                .map(TriggerOutcome::BroadcastStop),
        }
    }

    /// Handle one motion event that arrived at `now`.
    ///
    /// While broadcasting, a text announcement is posted without consulting the
    /// limiter. Otherwise a still is captured and, if the limiter admits it,
    /// posted with a caption. The camera lease is held until the post finishes
    /// and the capture file is removed.
    pub async fn on_motion_detected(&self, now: Instant) -> CoordinatorResult<MotionOutcome> {
        let inner = &self.inner;

        if inner.broadcast.is_active() {
            let post_id = inner
                .sink
                .publish_text(&inner.composer.live_announcement())
                .await?;
            info!(post.id = %post_id, "Announced live broadcast on motion");
            return Ok(MotionOutcome::Published {
                post_id,
                with_media: false,
            });
        }

        let scoped = match inner.guard.acquire_scoped(inner.settings.capture_timeout).await {
            Acquisition::Acquired(scoped) => scoped,
            Acquisition::Busy => {
                debug!(motion.path = "capture", "Motion dropped: camera busy");
                return Ok(MotionOutcome::Dropped(DropReason::ResourceBusy));
            }
        };

        let capture_path = self.next_capture_path();
        if let Err(e) = capture_still(scoped.resource(), &capture_path).await {
            discard_capture(&capture_path).await;
            scoped.release()?;
            return Err(e.into());
        }

        let outcome = if inner.limiter.try_admit(now) {
            let caption = self.compose_caption();
            inner
                .sink
                .publish_text_with_media(&caption, &capture_path)
                .await
                .map(|post_id| {
                    info!(post.id = %post_id, "Published motion capture");
                    MotionOutcome::Published {
                        post_id,
                        with_media: true,
                    }
                })
        } else {
            debug!(capture.path = %capture_path.display(), "Capture discarded: rate limited");
            Ok(MotionOutcome::Dropped(DropReason::RateLimited))
        };

        discard_capture(&capture_path).await;
        scoped.release()?;
        Ok(outcome?)
    }

    /// Reload the content collection. Disabled content is a no-op.
    pub async fn on_refresh_due(&self) -> CoordinatorResult<usize> {
        match &self.inner.content {
            Some(provider) => Ok(provider.refresh().await?),
            None => Ok(0),
        }
    }

    /// Try to go Idle→Active.
    ///
    /// The lease is taken with the broadcast acquire timeout (zero by default)
    /// and kept for the whole session. The start announcement bypasses the
    /// limiter and records no admission. If that announcement fails to post
    /// the broadcast stays Active and the error is returned.
    pub async fn on_broadcast_start(&self, now: Instant) -> CoordinatorResult<BroadcastStart> {
        let inner = &self.inner;
        if inner.broadcast.is_active() {
            return Ok(BroadcastStart::AlreadyActive);
        }

        let lease = match inner
            .guard
            .acquire(inner.settings.broadcast_acquire_timeout)
            .await
        {
            Acquisition::Acquired(lease) => lease,
            Acquisition::Busy => {
                info!("Broadcast start rejected: camera busy");
                return Ok(BroadcastStart::ResourceBusy);
            }
        };

        let started = inner
            .guard
            .resource(&lease)?
            .start_stream(&inner.settings.stream_target, inner.settings.bitrate)
            .await;
        let exit = match started {
            Ok(exit) => exit,
            Err(e) => {
                inner.guard.release(lease)?;
                return Err(e.into());
            }
        };

        let lease_id = lease.id();
        let (generation, cancel) = match inner.broadcast.activate(lease, now).await {
            Ok(activated) => activated,
            Err(lease) => {
                // Another session is recorded; undo our stream and lease.
                if let Err(e) = inner.guard.resource(&lease)?.stop_stream().await {
                    warn!(error = %e, "Failed to stop duplicate stream");
                }
                inner.guard.release(lease)?;
                return Ok(BroadcastStart::AlreadyActive);
            }
        };

        info!(
            broadcast.generation = generation,
            lease.id = %lease_id,
            broadcast.max_secs = inner.settings.max_broadcast_duration.as_secs(),
            "Broadcast started"
        );

        tokio::spawn(supervise(
            self.clone(),
            generation,
            cancel,
            exit,
            inner.settings.max_broadcast_duration,
        ));

        let announcement = inner
            .sink
            .publish_text(&inner.composer.start_announcement())
            .await?;
        Ok(BroadcastStart::Started {
            generation,
            announcement,
        })
    }

    /// Explicit stop. A no-op while Idle.
    pub async fn on_broadcast_stop(&self) -> CoordinatorResult<BroadcastStop> {
        self.stop_broadcast(None, StopReason::Requested).await
    }

    /// End the session (or only `generation`, if given): stop the stream,
    /// release the lease, then go Idle. Exactly one caller per session gets
    /// `Stopped`. Motion keeps seeing Active until the lease is back.
    async fn stop_broadcast(
        &self,
        generation: Option<u64>,
        reason: StopReason,
    ) -> CoordinatorResult<BroadcastStop> {
        let inner = &self.inner;
        let Some(active) = inner.broadcast.deactivate(generation).await else {
            return Ok(BroadcastStop::NotActive);
        };
        active.cancel.cancel();

        let ran_for = Instant::now().saturating_duration_since(active.started_at);
        let stopped = match inner.guard.resource(&active.lease) {
            Ok(camera) => camera.stop_stream().await,
            Err(e) => {
                inner.broadcast.mark_idle().await;
                return Err(e.into());
            }
        };
        let released = inner.guard.release(active.lease);
        inner.broadcast.mark_idle().await;
        released?;

        info!(
            broadcast.generation = active.generation,
            broadcast.reason = %reason,
            broadcast.ran_secs = ran_for.as_secs(),
            "Broadcast stopped"
        );
        stopped?;
        Ok(BroadcastStop::Stopped {
            generation: active.generation,
            reason,
            ran_for,
        })
    }

    /// Stop any broadcast and reclaim a lease nobody gave back.
    ///
    /// Returns the lease that had to be forced, if any.
    pub async fn shutdown(&self) -> Option<LeaseId> {
        match self.stop_broadcast(None, StopReason::Shutdown).await {
            Ok(BroadcastStop::Stopped { .. }) | Ok(BroadcastStop::NotActive) => {}
            Err(e) => error!(error = %e, "Failed to stop broadcast during shutdown"),
        }
        let forced = self.inner.guard.force_release();
        if let Some(id) = forced {
            warn!(lease.id = %id, "Force-released outstanding camera lease at shutdown");
        }
        forced
    }

    pub async fn status(&self) -> CoordinatorStatus {
        let inner = &self.inner;
        let now = Instant::now();
        let running = inner.broadcast.current(now).await;
        CoordinatorStatus {
            broadcast: inner.broadcast.state(),
            broadcast_running_secs: running.map(|(_, d)| d.as_secs()),
            resource_holder: inner.guard.holder().map(|id| id.to_string()),
            content_items: inner.content.as_ref().map_or(0, |c| c.len()),
            refresh_failures: inner
                .content
                .as_ref()
                .map_or(0, |c| c.consecutive_failures()),
            secs_since_last_publish: inner
                .limiter
                .since_last_admission(now)
                .map(|d| d.as_secs()),
        }
    }

    pub fn broadcast_state(&self) -> BroadcastState {
        self.inner.broadcast.state()
    }

    fn next_capture_path(&self) -> PathBuf {
        self.inner
            .settings
            .capture_dir
            .join(format!("capture-{}.jpg", Uuid::new_v4()))
    }

    fn compose_caption(&self) -> String {
        let inner = &self.inner;
        let Some(provider) = &inner.content else {
            return inner.composer.fallback_caption().to_string();
        };
        match provider.pick_random() {
            Ok(item) => inner.composer.caption(&item),
            Err(ContentError::EmptyCollection) => {
                warn!("No content loaded, using fallback caption");
                inner.composer.fallback_caption().to_string()
            }
            Err(e) => {
                warn!(error = %e, "Content pick failed, using fallback caption");
                inner.composer.fallback_caption().to_string()
            }
        }
    }
}

/// open → capture → close. Close always runs; its failure is logged and
/// never replaces the capture result.
async fn capture_still(camera: &dyn CameraResource, path: &Path) -> Result<(), HardwareError> {
    camera.open().await?;
    let captured = camera.capture_still(path).await;
    if let Err(e) = camera.close().await {
        warn!(error = %e, "Failed to close camera after capture");
    }
    captured
}

async fn discard_capture(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(capture.path = %path.display(), error = %e, "Failed to remove capture"),
    }
}

/// Ends one session on expiry or stream exit. Cancelled when someone else
/// stops it first.
async fn supervise(
    coordinator: EventCoordinator,
    generation: u64,
    cancel: CancellationToken,
    exit: StreamExit,
    max_duration: Duration,
) {
    let reason = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        _ = tokio::time::sleep(max_duration) => StopReason::Expired,
        result = exit.wait() => match result {
            Ok(()) => StopReason::StreamEnded,
            Err(e) => {
                error!(broadcast.generation = generation, error = %e, "Broadcast stream failed");
                StopReason::StreamFailed
            }
        },
    };

    match coordinator.stop_broadcast(Some(generation), reason).await {
        Ok(BroadcastStop::Stopped { .. }) => {}
        Ok(BroadcastStop::NotActive) => {
            debug!(broadcast.generation = generation, "Broadcast already stopped")
        }
        Err(e) => error!(broadcast.generation = generation, error = %e, "Broadcast auto-stop failed"),
    }
}
