//! Progress events emitted by ingestion runs.
//!
//! Events are pushed through a [`ProgressReporter`] in the exact order they
//! are produced: `start`, then `found`, then one `tender` per record. Run
//! completion is signaled by the run call returning.

use serde::{Deserialize, Serialize};
use tenderwatch_shared::SourceDescriptor;
use tokio::sync::mpsc;

/// The source a run resolved to, as reported in the `start` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSummary {
    pub label: String,
    pub url: String,
}

impl From<&SourceDescriptor> for SourceSummary {
    fn from(source: &SourceDescriptor) -> Self {
        Self {
            label: source.label().to_string(),
            url: source.listing_url().to_string(),
        }
    }
}

/// One notable state transition of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "lowercase")]
pub enum ProgressEvent {
    Start {
        source: SourceSummary,
    },
    /// All pages fetched; `count` records will be persisted.
    Found {
        count: usize,
    },
    /// One record persisted (or recognized as a duplicate). `index` is 1-based.
    Tender {
        title: String,
        index: usize,
        total: usize,
        inserted: bool,
    },
}

/// Receives run progress. `source_key` is set for named runs.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, source_key: Option<&str>, event: ProgressEvent);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn report(&self, _source_key: Option<&str>, _event: ProgressEvent) {}
}

/// A progress event tagged with the source it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressMessage {
    pub source_key: Option<String>,
    pub event: ProgressEvent,
}

/// Forwards events to an unbounded channel the caller drains.
///
/// A dropped receiver is not an error: the run keeps going and further
/// events are discarded.
pub struct ChannelProgress {
    tx: mpsc::UnboundedSender<ProgressMessage>,
}

impl ChannelProgress {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressReporter for ChannelProgress {
    fn report(&self, source_key: Option<&str>, event: ProgressEvent) {
        let message = ProgressMessage {
            source_key: source_key.map(str::to_string),
            event,
        };
        if self.tx.send(message).is_err() {
            tracing::trace!("progress receiver dropped, discarding event");
        }
    }
}
