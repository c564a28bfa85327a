//! Article listings: one notice per `<article>` element.

use std::sync::LazyLock;

use scraper::{Html, Selector};
use tenderwatch_shared::ExtractedRecord;

use super::ListingAdapter;
use super::block::{PARAGRAPH, extract_block, outermost};

static ARTICLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("article").expect("article selector"));

pub struct ArticleAdapter;

impl ListingAdapter for ArticleAdapter {
    fn extract(&self, body: &str) -> Vec<ExtractedRecord> {
        let doc = Html::parse_document(body);
        outermost(&doc, &ARTICLE)
            .into_iter()
            .filter_map(|block| extract_block(block, &PARAGRAPH))
            .collect()
    }

    fn name(&self) -> &str {
        "article"
    }
}
