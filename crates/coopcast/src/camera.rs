//! Camera driver boundary and the rpicam/ffmpeg implementation.
//!
//! The coordinator only talks to [`CameraResource`]; all calls happen while
//! holding a lease from the resource guard.

use std::fmt;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::HardwareError;

/// How long stop_stream waits for the pipeline to die after kill.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Where a broadcast is sent.
#[derive(Clone)]
pub struct StreamTarget {
    pub ingest_url: String,
    pub stream_key: String,
}

impl StreamTarget {
    pub fn url(&self) -> String {
        format!("{}{}", self.ingest_url, self.stream_key)
    }
}

// The key is a credential; keep it out of logs.
impl fmt::Debug for StreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamTarget")
            .field("ingest_url", &self.ingest_url)
            .field("stream_key", &"<redacted>")
            .finish()
    }
}

/// Resolves when a running stream ends on its own.
///
/// `Ok(())` is a clean end of stream, `Err` a driver failure. If the driver
/// drops its reporter without reporting, `wait` never resolves.
pub struct StreamExit {
    rx: oneshot::Receiver<Result<(), HardwareError>>,
}

/// Driver half of [`StreamExit`].
pub struct StreamExitReporter {
    tx: oneshot::Sender<Result<(), HardwareError>>,
}

impl StreamExit {
    pub fn channel() -> (StreamExitReporter, StreamExit) {
        let (tx, rx) = oneshot::channel();
        (StreamExitReporter { tx }, StreamExit { rx })
    }

    pub async fn wait(self) -> Result<(), HardwareError> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => std::future::pending().await,
        }
    }
}

impl StreamExitReporter {
    pub fn report(self, result: Result<(), HardwareError>) {
        // Receiver gone means the session already stopped; nothing to tell.
        let _ = self.tx.send(result);
    }
}

/// Operations the coordinator needs from a camera.
#[async_trait]
pub trait CameraResource: Send + Sync {
    /// Power up / claim the sensor for a still capture.
    async fn open(&self) -> Result<(), HardwareError>;

    /// Write a still image to `path`.
    async fn capture_still(&self, path: &Path) -> Result<(), HardwareError>;

    /// Start streaming to `target`. Returns a monitor for unexpected exit.
    async fn start_stream(
        &self,
        target: &StreamTarget,
        bitrate: u32,
    ) -> Result<StreamExit, HardwareError>;

    /// Stop a running stream. Stopping when nothing runs is not an error.
    async fn stop_stream(&self) -> Result<(), HardwareError>;

    /// Release the sensor after a still capture.
    async fn close(&self) -> Result<(), HardwareError>;
}

/// Static settings for [`RpicamCamera`].
#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub annotate_text: String,
    pub still_program: String,
    pub stream_program: String,
}

impl From<&coopconf::CameraConfig> for CameraSettings {
    fn from(config: &coopconf::CameraConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            framerate: config.framerate,
            annotate_text: config.annotate_text.clone(),
            still_program: config.still_program.clone(),
            stream_program: config.stream_program.clone(),
        }
    }
}

struct RunningStream {
    kill: oneshot::Sender<()>,
    supervisor: JoinHandle<()>,
}

/// Raspberry Pi camera driven through `rpicam-still` / `rpicam-vid | ffmpeg`.
pub struct RpicamCamera {
    settings: CameraSettings,
    stream: Mutex<Option<RunningStream>>,
}

impl RpicamCamera {
    pub fn new(settings: CameraSettings) -> Self {
        Self {
            settings,
            stream: Mutex::new(None),
        }
    }

    fn still_args(&self, path: &Path) -> Vec<String> {
        let mut args = vec![
            "--nopreview".to_string(),
            "--timeout".to_string(),
            // Let exposure settle, as the old preview warm-up did
            "2000".to_string(),
            "--width".to_string(),
            self.settings.width.to_string(),
            "--height".to_string(),
            self.settings.height.to_string(),
            "--output".to_string(),
            path.display().to_string(),
        ];
        if !self.settings.annotate_text.is_empty() {
            args.push("--exif".to_string());
            args.push(format!("IFD0.ImageDescription={}", self.settings.annotate_text));
        }
        args
    }

    fn video_args(&self, bitrate: u32) -> Vec<String> {
        vec![
            "--nopreview".to_string(),
            "--timeout".to_string(),
            "0".to_string(),
            "--inline".to_string(),
            "--width".to_string(),
            self.settings.width.to_string(),
            "--height".to_string(),
            self.settings.height.to_string(),
            "--framerate".to_string(),
            self.settings.framerate.to_string(),
            "--bitrate".to_string(),
            bitrate.to_string(),
            "--output".to_string(),
            "-".to_string(),
        ]
    }

    fn ffmpeg_args(&self, target: &StreamTarget) -> Vec<String> {
        let framerate = self.settings.framerate.to_string();
        let url = target.url();
        // Ingest services reject video-only streams, so mux in silence.
        [
            "-hide_banner", "-loglevel", "error",
            "-f", "h264", "-r", framerate.as_str(), "-i", "-",
            "-f", "lavfi", "-i", "anullsrc=channel_layout=mono:sample_rate=44100",
            "-map", "0:v:0", "-map", "1:a:0",
            "-c:v", "copy", "-c:a", "aac", "-b:a", "32k",
            "-f", "flv", url.as_str(),
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }
}

#[async_trait]
impl CameraResource for RpicamCamera {
    async fn open(&self) -> Result<(), HardwareError> {
        if self.stream.lock().await.is_some() {
            return Err(HardwareError::Fault(
                "sensor is busy streaming".to_string(),
            ));
        }
        debug!("Camera opened for still capture");
        Ok(())
    }

    async fn capture_still(&self, path: &Path) -> Result<(), HardwareError> {
        let program = &self.settings.still_program;
        let status = Command::new(program)
            .args(self.still_args(path))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|source| HardwareError::Spawn {
                program: program.clone(),
                source,
            })?;

        if !status.success() {
            return Err(HardwareError::CommandFailed {
                program: program.clone(),
                status: status.to_string(),
            });
        }

        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(HardwareError::MissingCapture(path.to_path_buf()));
        }

        info!(capture.path = %path.display(), "Captured still image");
        Ok(())
    }

    async fn start_stream(
        &self,
        target: &StreamTarget,
        bitrate: u32,
    ) -> Result<StreamExit, HardwareError> {
        let mut slot = self.stream.lock().await;
        if slot.is_some() {
            return Err(HardwareError::AlreadyStreaming);
        }

        let camera_program = &self.settings.stream_program;
        let mut camera = Command::new(camera_program)
            .args(self.video_args(bitrate))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| HardwareError::Spawn {
                program: camera_program.clone(),
                source,
            })?;

        let video: Stdio = camera
            .stdout
            .take()
            .ok_or_else(|| HardwareError::Fault("camera stdout not captured".to_string()))?
            .try_into()
            .map_err(|source| HardwareError::Spawn {
                program: camera_program.clone(),
                source,
            })?;

        let encoder = Command::new("ffmpeg")
            .args(self.ffmpeg_args(target))
            .stdin(video)
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| HardwareError::Spawn {
                program: "ffmpeg".to_string(),
                source,
            })?;

        let (kill, killed) = oneshot::channel();
        let (reporter, exit) = StreamExit::channel();
        let supervisor = tokio::spawn(supervise_pipeline(camera, encoder, killed, reporter));

        *slot = Some(RunningStream { kill, supervisor });
        info!(stream.target = ?target, stream.bitrate = bitrate, "Stream pipeline started");
        Ok(exit)
    }

    async fn stop_stream(&self) -> Result<(), HardwareError> {
        let Some(running) = self.stream.lock().await.take() else {
            return Ok(());
        };

        let _ = running.kill.send(());
        match tokio::time::timeout(STOP_GRACE, running.supervisor).await {
            Ok(Ok(())) => {
                info!("Stream pipeline stopped");
                Ok(())
            }
            Ok(Err(join_error)) => Err(HardwareError::Fault(format!(
                "stream supervisor panicked: {}",
                join_error
            ))),
            Err(_) => Err(HardwareError::Fault(
                "stream pipeline did not exit after kill".to_string(),
            )),
        }
    }

    async fn close(&self) -> Result<(), HardwareError> {
        debug!("Camera closed");
        Ok(())
    }
}

/// Owns both pipeline processes until one dies or a kill is requested.
async fn supervise_pipeline(
    mut camera: Child,
    mut encoder: Child,
    killed: oneshot::Receiver<()>,
    reporter: StreamExitReporter,
) {
    let outcome = tokio::select! {
        status = camera.wait() => Some(("camera", status)),
        status = encoder.wait() => Some(("ffmpeg", status)),
        _ = killed => None,
    };

    for child in [&mut camera, &mut encoder] {
        if let Err(e) = child.kill().await {
            debug!(error = %e, "Pipeline process already gone");
        }
    }

    if let Some((which, status)) = outcome {
        let result = describe_exit(which, status);
        if let Err(e) = &result {
            warn!(error = %e, "Stream pipeline exited on its own");
        }
        reporter.report(result);
    }
}

fn describe_exit(which: &str, status: std::io::Result<ExitStatus>) -> Result<(), HardwareError> {
    match status {
        Ok(status) if status.success() => Ok(()),
        Ok(status) => Err(HardwareError::StreamExited(format!("{} exited with {}", which, status))),
        Err(e) => Err(HardwareError::StreamExited(format!("{} wait failed: {}", which, e))),
    }
}
