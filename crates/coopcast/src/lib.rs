//! coopcast: one camera, three triggers.
//!
//! Motion captures, content refreshes and live broadcasts fire independently
//! and share a single exclusive camera and a rate-limited publish sink. The
//! [`EventCoordinator`] arbitrates between them; the [`daemon`] module wires
//! it to long-lived workers.

pub mod broadcast;
pub mod camera;
pub mod content;
pub mod coordinator;
pub mod daemon;
pub mod error;
pub mod message;
pub mod motion;
pub mod publish;
pub mod rate_limiter;
pub mod resource_guard;
pub mod telemetry;

pub use broadcast::{BroadcastSession, BroadcastStart, BroadcastState, BroadcastStop, StopReason};
pub use camera::{CameraResource, CameraSettings, RpicamCamera, StreamExit, StreamExitReporter, StreamTarget};
pub use content::{ContentItem, ContentKind, ContentProvider, ContentSource};
pub use coordinator::{
    CoordinatorSettings, CoordinatorStatus, DropReason, EventCoordinator, MotionOutcome,
    TriggerEvent, TriggerKind, TriggerOutcome,
};
pub use daemon::{Daemon, WorkerSchedule};
pub use error::{
    ContentError, CoordinatorError, CoordinatorResult, HardwareError, PublishError,
    ReleaseMismatch,
};
pub use message::MessageComposer;
pub use motion::{MotionSource, SysfsMotionSensor};
pub use publish::{LogSink, MastodonSink, PostId, PublishSink};
pub use rate_limiter::RateLimiter;
pub use resource_guard::{Acquisition, ExclusiveResourceGuard, Lease, LeaseId, ScopedLease};
