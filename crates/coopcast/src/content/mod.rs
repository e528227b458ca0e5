//! Postable facts and quotes.
//!
//! The provider keeps the current collection behind a `watch` channel: a
//! refresh swaps in a whole new `Arc<Vec<_>>` with `send_replace`, readers
//! clone the `Arc` they see. A reader can only ever hold one complete
//! collection, old or new.

mod source;

pub use source::{content_source_for, parse_collection, FileContentSource, HttpContentSource};

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::ContentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Fact,
    Quote,
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentKind::Fact => write!(f, "fact"),
            ContentKind::Quote => write!(f, "quote"),
        }
    }
}

/// One postable item. `sequence_number` is its position in the collection
/// it was loaded with and shows up in captions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentItem {
    pub kind: ContentKind,
    pub text: String,
    pub source: String,
    pub sequence_number: usize,
}

/// Where collections come from.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Fetch and parse a complete collection.
    async fn fetch(&self) -> Result<Vec<ContentItem>, ContentError>;

    /// Human-readable origin for logs.
    fn describe(&self) -> String;
}

/// Cached collection with atomic replacement on refresh.
pub struct ContentProvider {
    source: Arc<dyn ContentSource>,
    items: watch::Sender<Arc<Vec<ContentItem>>>,
    consecutive_failures: AtomicU32,
    stale_after_periods: u32,
}

impl ContentProvider {
    pub fn new(source: Arc<dyn ContentSource>, stale_after_periods: u32) -> Self {
        let (items, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            source,
            items,
            consecutive_failures: AtomicU32::new(0),
            stale_after_periods,
        }
    }

    /// Fetch a new collection and swap it in.
    ///
    /// On failure the previous collection stays in place and the failure
    /// streak grows; past `stale_after_periods` a degradation warning is logged
    /// on every further failure.
    pub async fn refresh(&self) -> Result<usize, ContentError> {
        match self.source.fetch().await {
            Ok(items) => {
                let count = items.len();
                self.items.send_replace(Arc::new(items));
                let previous_failures = self.consecutive_failures.swap(0, Ordering::AcqRel);
                info!(
                    content.source = %self.source.describe(),
                    content.count = count,
                    content.recovered_after = previous_failures,
                    "Content refreshed"
                );
                Ok(count)
            }
            Err(e) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                warn!(
                    content.source = %self.source.describe(),
                    content.failures = failures,
                    error = %e,
                    "Content refresh failed, keeping previous collection"
                );
                if failures > self.stale_after_periods {
                    warn!(
                        content.failures = failures,
                        content.count = self.len(),
                        "Content is stale: refresh has not succeeded for {} periods",
                        failures
                    );
                }
                Err(e)
            }
        }
    }

    /// Uniformly random item from the current collection.
    pub fn pick_random(&self) -> Result<ContentItem, ContentError> {
        let items = self.snapshot();
        if items.is_empty() {
            return Err(ContentError::EmptyCollection);
        }
        let index = rand::thread_rng().gen_range(0..items.len());
        Ok(items[index].clone())
    }

    /// The collection as currently published.
    pub fn snapshot(&self) -> Arc<Vec<ContentItem>> {
        Arc::clone(&self.items.borrow())
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }
}
