//! Listing adapter trait and the built-in extraction strategies.
//!
//! Each [`Strategy`] variant maps to exactly one adapter. Dispatch is a closed
//! `match`: adding a format means one new variant and one new arm.

mod article;
mod block;
mod card;
mod feed;
mod table;

use tenderwatch_shared::{ExtractedRecord, Strategy};
use tracing::debug;

pub use article::ArticleAdapter;
pub use card::CardAdapter;
pub use feed::FeedAdapter;
pub use table::TableAdapter;

pub(crate) use block::usable_href;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Converts one raw listing page into zero or more records.
///
/// Extraction is best-effort per block: malformed blocks are dropped and never
/// fail the page.
pub trait ListingAdapter: Send + Sync {
    /// Extract every well-formed record from `body`, in page order.
    fn extract(&self, body: &str) -> Vec<ExtractedRecord>;

    /// Human-readable adapter name for tracing.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Holds one adapter per registered strategy.
pub struct AdapterRegistry {
    card: CardAdapter,
    table: TableAdapter,
    article: ArticleAdapter,
    feed: FeedAdapter,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            card: CardAdapter,
            table: TableAdapter,
            article: ArticleAdapter,
            feed: FeedAdapter,
        }
    }

    /// The adapter registered for `strategy`.
    pub fn for_strategy(&self, strategy: Strategy) -> &dyn ListingAdapter {
        match strategy {
            Strategy::Card => &self.card,
            Strategy::Table => &self.table,
            Strategy::Article => &self.article,
            Strategy::Feed => &self.feed,
        }
    }

    /// Run the adapter for `strategy` over one page body.
    pub fn extract(&self, strategy: Strategy, body: &str) -> Vec<ExtractedRecord> {
        let adapter = self.for_strategy(strategy);
        let records = adapter.extract(body);
        debug!(adapter = adapter.name(), count = records.len(), "extracted records");
        records
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Single dispatch entry point: extract records from `body` with `strategy`.
pub fn extract_records(strategy: Strategy, body: &str) -> Vec<ExtractedRecord> {
    AdapterRegistry::new().extract(strategy, body)
}
