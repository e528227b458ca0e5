//! Long-lived workers that feed the coordinator.
//!
//! The set is fixed at startup: motion (reader + handler), content refresh,
//! broadcast scheduling and a status logger. All of them stop on one
//! `CancellationToken`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use coopconf::CoopConfig;

use crate::broadcast::BroadcastStart;
use crate::camera::{CameraResource, CameraSettings, RpicamCamera};
use crate::content::{content_source_for, ContentProvider};
use crate::coordinator::{CoordinatorSettings, EventCoordinator, MotionOutcome};
use crate::message::MessageComposer;
use crate::motion::{MotionSource, SysfsMotionSensor};
use crate::publish::{LogSink, MastodonSink, PublishSink};

/// How often the status line is logged.
const STATUS_INTERVAL: Duration = Duration::from_secs(60);

/// Upper bound on waiting for workers after cancel.
const WORKER_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Schedules for the non-motion workers.
#[derive(Debug, Clone)]
pub struct WorkerSchedule {
    pub refresh_period: Option<Duration>,
    pub broadcast_start_delay: Option<Duration>,
    pub broadcast_repeat_every: Option<Duration>,
    pub status_interval: Duration,
}

impl WorkerSchedule {
    pub fn from_config(config: &CoopConfig) -> Self {
        Self {
            refresh_period: config
                .content
                .enabled
                .then(|| config.content.refresh_period()),
            broadcast_start_delay: config
                .broadcast
                .enabled
                .then(|| config.broadcast.start_delay()),
            broadcast_repeat_every: config.broadcast.repeat_every(),
            status_interval: STATUS_INTERVAL,
        }
    }
}

/// Build the coordinator and its collaborators from configuration.
///
/// `dry_run` (or a disabled publish section) swaps the network sink for
/// [`LogSink`].
pub fn build_coordinator(config: &CoopConfig, dry_run: bool) -> Result<EventCoordinator> {
    let camera: Arc<dyn CameraResource> =
        Arc::new(RpicamCamera::new(CameraSettings::from(&config.camera)));

    let content = if config.content.enabled {
        let source = content_source_for(&config.content.url)
            .with_context(|| format!("Invalid content location {}", config.content.url))?;
        Some(Arc::new(ContentProvider::new(
            source,
            config.content.stale_after_periods,
        )))
    } else {
        None
    };

    let sink: Arc<dyn PublishSink> = if dry_run || !config.publish.enabled {
        info!("Publishing to log only");
        Arc::new(LogSink::new())
    } else {
        Arc::new(
            MastodonSink::new(&config.publish.instance_url, &config.publish.access_token)
                .context("Failed to create publish client")?,
        )
    };

    let composer = MessageComposer::new(
        config.content.subject.clone(),
        config.broadcast.feed_url.clone(),
        config.publish.fallback_caption.clone(),
    );

    Ok(EventCoordinator::new(
        CoordinatorSettings::from_config(config),
        camera,
        content,
        sink,
        composer,
    ))
}

/// Open the configured motion sensor, if motion is enabled.
pub async fn open_motion_source(config: &CoopConfig) -> Result<Option<Box<dyn MotionSource>>> {
    if !config.motion.enabled {
        return Ok(None);
    }
    let sensor = SysfsMotionSensor::open(
        &config.motion.gpio_root,
        config.motion.gpio_pin,
        config.motion.poll_interval(),
    )
    .await
    .with_context(|| format!("Failed to open motion sensor on GPIO {}", config.motion.gpio_pin))?;
    Ok(Some(Box::new(sensor)))
}

/// Running workers around one coordinator.
pub struct Daemon {
    coordinator: EventCoordinator,
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl Daemon {
    pub fn start(
        coordinator: EventCoordinator,
        motion: Option<Box<dyn MotionSource>>,
        schedule: WorkerSchedule,
    ) -> Self {
        let cancel = CancellationToken::new();
        let mut workers = Vec::new();

        if let Some(source) = motion {
            workers.push(spawn_motion_worker(coordinator.clone(), source, cancel.clone()));
        }
        if let Some(period) = schedule.refresh_period {
            workers.push(spawn_refresh_worker(coordinator.clone(), period, cancel.clone()));
        }
        if let Some(delay) = schedule.broadcast_start_delay {
            workers.push(spawn_broadcast_scheduler(
                coordinator.clone(),
                delay,
                schedule.broadcast_repeat_every,
                cancel.clone(),
            ));
        }
        workers.push(spawn_status_logger(
            coordinator.clone(),
            schedule.status_interval,
            cancel.clone(),
        ));

        info!(workers = workers.len(), "Daemon started");
        Self {
            coordinator,
            cancel,
            workers,
        }
    }

    pub fn coordinator(&self) -> &EventCoordinator {
        &self.coordinator
    }

    /// Cancel workers, wait for them, then stop any broadcast and reclaim
    /// the camera.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for worker in self.workers {
            match tokio::time::timeout(WORKER_SHUTDOWN_GRACE, worker).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "Worker ended abnormally"),
                Err(_) => warn!("Worker did not stop in time"),
            }
        }
        self.coordinator.shutdown().await;
        info!("Daemon stopped");
    }
}

/// Motion events go through a one-slot queue: while one is being handled, at
/// most one more waits and the rest are dropped.
pub fn spawn_motion_worker(
    coordinator: EventCoordinator,
    mut source: Box<dyn MotionSource>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let (tx, mut rx) = mpsc::channel::<Instant>(1);

    let reader_cancel = cancel.clone();
    let reader = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = reader_cancel.cancelled() => break,
                seen = source.next_motion() => match seen {
                    Ok(at) => {
                        if tx.try_send(at).is_err() {
                            debug!("Motion event dropped: handler busy");
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Motion sensor failed, motion worker stopping");
                        break;
                    }
                },
            }
        }
    });

    tokio::spawn(async move {
        info!("Motion worker started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = rx.recv() => {
                    let Some(at) = next else { break };
                    match coordinator.on_motion_detected(at).await {
                        Ok(MotionOutcome::Published { post_id, with_media }) => {
                            info!(post.id = %post_id, post.media = with_media, "Motion published")
                        }
                        Ok(MotionOutcome::Dropped(reason)) => {
                            debug!(motion.dropped = ?reason, "Motion event dropped")
                        }
                        Err(e) => error!(error = %e, "Motion handling failed"),
                    }
                }
            }
        }
        if let Err(e) = reader.await {
            error!(error = %e, "Motion reader ended abnormally");
        }
        info!("Motion worker shutting down");
    })
}

/// Refreshes content every `period`, starting immediately.
pub fn spawn_refresh_worker(
    coordinator: EventCoordinator,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Refresh worker shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    // Failures are logged by the provider; the next tick is the retry.
                    if let Ok(count) = coordinator.on_refresh_due().await {
                        debug!(content.count = count, "Refresh tick complete");
                    }
                }
            }
        }
    })
}

/// Starts a broadcast after `delay`, then every `repeat_every` if set.
pub fn spawn_broadcast_scheduler(
    coordinator: EventCoordinator,
    delay: Duration,
    repeat_every: Option<Duration>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut wait = delay;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }

            match coordinator.on_broadcast_start(Instant::now()).await {
                Ok(BroadcastStart::Started { generation, announcement }) => {
                    info!(broadcast.generation = generation, post.id = %announcement, "Scheduled broadcast started")
                }
                Ok(other) => info!(broadcast.outcome = ?other, "Scheduled broadcast not started"),
                Err(e) => error!(error = %e, "Scheduled broadcast failed"),
            }

            match repeat_every {
                Some(period) => wait = period,
                None => break,
            }
        }
        info!("Broadcast scheduler shutting down");
    })
}

fn spawn_status_logger(
    coordinator: EventCoordinator,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // Skip the immediate first tick; nothing interesting has happened yet.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let status = coordinator.status().await;
                    info!(
                        broadcast.state = ?status.broadcast,
                        broadcast.running_secs = ?status.broadcast_running_secs,
                        camera.holder = ?status.resource_holder,
                        content.items = status.content_items,
                        content.failures = status.refresh_failures,
                        publish.secs_since_last = ?status.secs_since_last_publish,
                        "Coordinator status"
                    );
                }
            }
        }
    })
}
