//! Card listings: one container element per notice, marked by a class or `data-ocid`.
//!
//! This is the default strategy and matches the search-results layout used by
//! most government procurement portals.

use std::sync::LazyLock;

use scraper::{Html, Selector};
use tenderwatch_shared::ExtractedRecord;

use super::ListingAdapter;
use super::block::{PARAGRAPH, extract_block, outermost};

static CARD: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(
        "[data-ocid], .search-result, .tender, .notice, .opportunity, .award",
    )
    .expect("card selector must parse")
});

/// Extracts records from marker-class container blocks.
pub struct CardAdapter;

impl ListingAdapter for CardAdapter {
    fn extract(&self, body: &str) -> Vec<ExtractedRecord> {
        let doc = Html::parse_document(body);
        outermost(&doc, &CARD)
            .into_iter()
            .filter_map(|block| extract_block(block, &PARAGRAPH))
            .collect()
    }

    fn name(&self) -> &str {
        "card"
    }
}
