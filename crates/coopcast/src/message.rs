//! Caption and announcement text.

use crate::content::{ContentItem, ContentKind};

#[derive(Debug, Clone)]
pub struct MessageComposer {
    subject: String,
    feed_url: String,
    fallback_caption: String,
}

impl MessageComposer {
    pub fn new(
        subject: impl Into<String>,
        feed_url: impl Into<String>,
        fallback_caption: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            feed_url: feed_url.into(),
            fallback_caption: fallback_caption.into(),
        }
    }

    pub fn caption(&self, item: &ContentItem) -> String {
        match item.kind {
            ContentKind::Fact => format!(
                "{} fact {}: {} source: {}",
                self.subject, item.sequence_number, item.text, item.source
            ),
            ContentKind::Quote => format!(
                "{} Quote {}: {} --{}",
                self.subject, item.sequence_number, item.text, item.source
            ),
        }
    }

    /// Used when there is no content to pick from.
    pub fn fallback_caption(&self) -> &str {
        &self.fallback_caption
    }

    /// Posted on motion while a broadcast is live.
    pub fn live_announcement(&self) -> String {
        format!(
            "Hey! We're running a livestream right now! Come check us out at {}",
            self.feed_url
        )
    }

    pub fn start_announcement(&self) -> String {
        format!("We're live! Watch the coop at {}", self.feed_url)
    }
}
