//! Fakes shared by the coordinator integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Notify;

use coopcast::{
    CameraResource, ContentError, ContentItem, ContentKind, ContentProvider, ContentSource,
    CoordinatorSettings, EventCoordinator, HardwareError, MessageComposer, PostId, PublishError,
    PublishSink, StreamExit, StreamExitReporter, StreamTarget,
};

pub const FEED_URL: &str = "https://youtube.com/coop/live";
pub const FALLBACK: &str = "Someone is wandering around the coop!";

/// Camera double that counts calls and can be paused mid-capture.
#[derive(Default)]
pub struct FakeCamera {
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub captures: AtomicUsize,
    pub stream_starts: AtomicUsize,
    pub stream_stops: AtomicUsize,
    pub fail_capture: AtomicBool,
    /// Signalled when a capture begins.
    pub capture_started: Notify,
    /// If set, captures wait for this before writing.
    pub capture_gate: Option<Notify>,
    /// Signalled when a stream stop begins.
    pub stop_started: Notify,
    /// If set, stopping the stream waits for this.
    pub stop_gate: Option<Notify>,
    /// Report a failed exit when stopped, as a killed encoder would.
    pub fail_on_stop: AtomicBool,
    exit_reporter: Mutex<Option<StreamExitReporter>>,
}

impl FakeCamera {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn gated() -> Arc<Self> {
        Arc::new(Self {
            capture_gate: Some(Notify::new()),
            ..Self::default()
        })
    }

    pub fn with_stop_gate() -> Arc<Self> {
        Arc::new(Self {
            stop_gate: Some(Notify::new()),
            ..Self::default()
        })
    }

    pub fn open_gate(&self) {
        if let Some(gate) = &self.capture_gate {
            gate.notify_one();
        }
    }

    pub fn open_stop_gate(&self) {
        if let Some(gate) = &self.stop_gate {
            gate.notify_one();
        }
    }

    /// Make the running stream report an exit, as a crashed encoder would.
    pub fn fail_stream(&self, reason: &str) -> bool {
        match self.exit_reporter.lock().unwrap().take() {
            Some(reporter) => {
                reporter.report(Err(HardwareError::StreamExited(reason.to_string())));
                true
            }
            None => false,
        }
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CameraResource for FakeCamera {
    async fn open(&self) -> Result<(), HardwareError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn capture_still(&self, path: &Path) -> Result<(), HardwareError> {
        self.capture_started.notify_one();
        if let Some(gate) = &self.capture_gate {
            gate.notified().await;
        }
        self.captures.fetch_add(1, Ordering::SeqCst);
        if self.fail_capture.load(Ordering::SeqCst) {
            return Err(HardwareError::Fault("sensor timeout".to_string()));
        }
        std::fs::write(path, b"\xff\xd8\xff\xe0fake-jpeg").map_err(|e| {
            HardwareError::Fault(format!("fake write failed: {}", e))
        })
    }

    async fn start_stream(
        &self,
        _target: &StreamTarget,
        _bitrate: u32,
    ) -> Result<StreamExit, HardwareError> {
        self.stream_starts.fetch_add(1, Ordering::SeqCst);
        let (reporter, exit) = StreamExit::channel();
        *self.exit_reporter.lock().unwrap() = Some(reporter);
        Ok(exit)
    }

    async fn stop_stream(&self) -> Result<(), HardwareError> {
        self.stream_stops.fetch_add(1, Ordering::SeqCst);
        self.stop_started.notify_one();
        if let Some(gate) = &self.stop_gate {
            gate.notified().await;
        }
        let reporter = self.exit_reporter.lock().unwrap().take();
        if let Some(reporter) = reporter {
            if self.fail_on_stop.load(Ordering::SeqCst) {
                reporter.report(Err(HardwareError::StreamExited("killed by signal 15".to_string())));
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), HardwareError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub message: String,
    pub media: Option<PathBuf>,
    /// Whether the media file existed at publish time.
    pub media_present: bool,
}

/// Sink that keeps every post in memory. Media posts can be held open.
#[derive(Default)]
pub struct RecordingSink {
    posts: Mutex<Vec<Post>>,
    pub fail: AtomicBool,
    /// Signalled when a media post begins.
    pub media_started: Notify,
    /// If set, media posts wait for this before recording.
    pub media_gate: Option<Notify>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn gated() -> Arc<Self> {
        Arc::new(Self {
            media_gate: Some(Notify::new()),
            ..Self::default()
        })
    }

    pub fn open_gate(&self) {
        if let Some(gate) = &self.media_gate {
            gate.notify_one();
        }
    }

    pub fn posts(&self) -> Vec<Post> {
        self.posts.lock().unwrap().clone()
    }

    fn record(&self, message: &str, media: Option<&Path>) -> Result<PostId, PublishError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PublishError::Rejected {
                status: 503,
                body: "down for maintenance".to_string(),
            });
        }
        let mut posts = self.posts.lock().unwrap();
        posts.push(Post {
            message: message.to_string(),
            media: media.map(Path::to_path_buf),
            media_present: media.map(Path::exists).unwrap_or(false),
        });
        Ok(PostId(format!("post-{}", posts.len())))
    }
}

#[async_trait]
impl PublishSink for RecordingSink {
    async fn publish_text(&self, message: &str) -> Result<PostId, PublishError> {
        self.record(message, None)
    }

    async fn publish_text_with_media(
        &self,
        message: &str,
        media_path: &Path,
    ) -> Result<PostId, PublishError> {
        self.media_started.notify_one();
        if let Some(gate) = &self.media_gate {
            gate.notified().await;
        }
        self.record(message, Some(media_path))
    }
}

/// Content source that always returns the same collection.
pub struct StaticSource(pub Vec<ContentItem>);

#[async_trait]
impl ContentSource for StaticSource {
    async fn fetch(&self) -> Result<Vec<ContentItem>, ContentError> {
        Ok(self.0.clone())
    }

    fn describe(&self) -> String {
        "static".to_string()
    }
}

pub fn fact(n: usize, text: &str) -> ContentItem {
    ContentItem {
        kind: ContentKind::Fact,
        text: text.to_string(),
        source: "Backyard Almanac".to_string(),
        sequence_number: n,
    }
}

/// A coordinator over fakes, plus handles to inspect them.
pub struct Harness {
    pub coordinator: EventCoordinator,
    pub camera: Arc<FakeCamera>,
    pub sink: Arc<RecordingSink>,
    pub content: Option<Arc<ContentProvider>>,
    pub capture_dir: TempDir,
}

pub struct HarnessBuilder {
    min_interval: Duration,
    max_broadcast: Duration,
    capture_timeout: Duration,
    camera: Arc<FakeCamera>,
    sink: Arc<RecordingSink>,
    content: Option<Vec<ContentItem>>,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(60),
            max_broadcast: Duration::from_secs(3600),
            capture_timeout: Duration::from_millis(200),
            camera: FakeCamera::new(),
            sink: RecordingSink::new(),
            content: None,
        }
    }
}

impl HarnessBuilder {
    pub fn min_interval(mut self, d: Duration) -> Self {
        self.min_interval = d;
        self
    }

    pub fn max_broadcast(mut self, d: Duration) -> Self {
        self.max_broadcast = d;
        self
    }

    pub fn camera(mut self, camera: Arc<FakeCamera>) -> Self {
        self.camera = camera;
        self
    }

    pub fn sink(mut self, sink: Arc<RecordingSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn content(mut self, items: Vec<ContentItem>) -> Self {
        self.content = Some(items);
        self
    }

    pub fn build(self) -> Harness {
        let capture_dir = TempDir::new().unwrap();
        let sink = self.sink;
        let content = self.content.map(|items| {
            Arc::new(ContentProvider::new(Arc::new(StaticSource(items)), 3))
        });
        let settings = CoordinatorSettings {
            capture_dir: capture_dir.path().to_path_buf(),
            capture_timeout: self.capture_timeout,
            broadcast_acquire_timeout: Duration::ZERO,
            min_publish_interval: self.min_interval,
            max_broadcast_duration: self.max_broadcast,
            stream_target: StreamTarget {
                ingest_url: "rtmp://ingest.test/live2/".to_string(),
                stream_key: "test-key".to_string(),
            },
            bitrate: 2_000_000,
        };
        let coordinator = EventCoordinator::new(
            settings,
            self.camera.clone(),
            content.clone(),
            sink.clone(),
            MessageComposer::new("Chicken", FEED_URL, FALLBACK),
        );
        Harness {
            coordinator,
            camera: self.camera,
            sink,
            content,
            capture_dir,
        }
    }
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }

    /// Files still sitting in the capture directory.
    pub fn leftover_captures(&self) -> usize {
        std::fs::read_dir(self.capture_dir.path()).unwrap().count()
    }
}

/// Log sink for asserting on what the coordinator reported.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Poll `check` until it holds, sleeping between tries. Works under paused time.
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}
