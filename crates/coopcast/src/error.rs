//! Error types for the coordination engine.
//!
//! Contention (camera busy, interval not elapsed) is not an error here; those
//! are returned as outcome enums by the guard and the coordinator.

use std::path::PathBuf;

use thiserror::Error;

use crate::resource_guard::LeaseId;

/// Camera driver failures.
#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("Failed to launch {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("{program} exited with {status}")]
    CommandFailed { program: String, status: String },

    #[error("Capture did not produce {0}")]
    MissingCapture(PathBuf),

    #[error("Stream already running")]
    AlreadyStreaming,

    #[error("Stream exited unexpectedly: {0}")]
    StreamExited(String),

    #[error("GPIO error on pin {pin}: {source}")]
    Gpio { pin: u32, source: std::io::Error },

    #[error("Camera fault: {0}")]
    Fault(String),
}

/// Content refresh and selection failures.
#[derive(Debug, Error)]
pub enum ContentError {
    #[error("Failed to fetch content: {0}")]
    Fetch(String),

    #[error("Failed to parse content: {0}")]
    Parse(String),

    #[error("No content loaded")]
    EmptyCollection,
}

/// Publish sink failures.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Request to publish sink failed: {0}")]
    Transport(String),

    #[error("Publish sink rejected credentials ({status})")]
    Unauthorized { status: u16 },

    #[error("Publish sink returned {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Failed to read media {path}: {source}")]
    Media {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A lease was released that does not belong to the current holder.
///
/// This means two code paths believed they owned the camera and is never
/// absorbed by the coordinator.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Lease {presented} released but current holder is {holder:?}")]
pub struct ReleaseMismatch {
    pub presented: LeaseId,
    pub holder: Option<LeaseId>,
}

/// Anything an entry point on the coordinator can surface.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Hardware(#[from] HardwareError),

    #[error(transparent)]
    Content(#[from] ContentError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Release(#[from] ReleaseMismatch),
}

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;
