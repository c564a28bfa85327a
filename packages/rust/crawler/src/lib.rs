//! Listing page fetching and record extraction.
//!
//! This crate provides:
//! - [`adapters`]: Strategy-specific record extractors (card, table, article, feed)
//! - [`AdapterRegistry`]: Maps a [`Strategy`](tenderwatch_shared::Strategy) to its adapter
//! - [`engine`]: Sequential, cycle-guarded listing paginator

pub mod adapters;
pub mod engine;

pub use adapters::{
    AdapterRegistry, ArticleAdapter, CardAdapter, FeedAdapter, ListingAdapter, TableAdapter,
    extract_records,
};
pub use engine::{Paginator, build_client, find_next_href};

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;
    use tenderwatch_shared::Strategy;

    const CARD_PAGE: &str = include_str!("../fixtures/card.html");
    const TABLE_PAGE: &str = include_str!("../fixtures/table.html");
    const ARTICLE_PAGE: &str = include_str!("../fixtures/article.html");
    const FEED_PAGE: &str = include_str!("../fixtures/feed.xml");

    // -----------------------------------------------------------------------
    // Registry dispatch
    // -----------------------------------------------------------------------

    #[test]
    fn registry_maps_every_strategy() {
        let registry = AdapterRegistry::new();
        for strategy in Strategy::ALL {
            assert_eq!(registry.for_strategy(strategy).name(), strategy.as_str());
        }
    }

    #[test]
    fn empty_body_yields_nothing() {
        for strategy in Strategy::ALL {
            assert!(extract_records(strategy, "").is_empty());
        }
    }

    // -----------------------------------------------------------------------
    // Strategy extraction
    // -----------------------------------------------------------------------

    #[test]
    fn card_listing() {
        let records = extract_records(Strategy::Card, CARD_PAGE);
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.title, "Provision of School Catering Services");
        assert_eq!(first.link, "/Notice/012345-2024");
        assert_eq!(first.published, "12 March 2024");
        assert_eq!(first.organisation.as_deref(), Some("Northshire County Council"));
        assert_eq!(first.ocid.as_deref(), Some("ocds-h6vhtk-04a1b2"));
        assert_eq!(
            first.description,
            "Hot meals and snacks for 42 primary schools across the county."
        );

        let second = &records[1];
        assert_eq!(second.published, "2024-03-13T09:30:00Z");
        assert_eq!(second.organisation.as_deref(), Some("Eastvale Borough Council"));
        assert_eq!(second.supplier.as_deref(), Some("Roadworks Partners Ltd"));
        assert!(second.description.starts_with("Resurfacing"));
        assert_eq!(second.ocid, None);
    }

    #[test]
    fn table_listing() {
        let records = extract_records(Strategy::Table, TABLE_PAGE);
        assert_eq!(records.len(), 2);

        assert_eq!(records[0].title, "Fleet Vehicle Leasing");
        assert_eq!(records[0].link, "contracts/CR-1001");
        assert_eq!(records[0].published, "01/04/2024");
        assert_eq!(records[0].organisation.as_deref(), Some("Westmoor NHS Trust"));
        assert_eq!(records[0].description, "Lease of 120 light commercial vehicles.");

        assert_eq!(records[1].ocid.as_deref(), Some("ocds-b5fd17-cr1002"));
    }

    #[test]
    fn article_listing() {
        let records = extract_records(Strategy::Article, ARTICLE_PAGE);
        assert_eq!(records.len(), 2);

        assert_eq!(records[0].title, "Bridge Inspection Programme");
        assert_eq!(records[0].published, "2024-02-20");
        assert_eq!(records[0].organisation.as_deref(), Some("Riverside Authority"));

        assert_eq!(records[1].link, "/opportunities/library-fit-out");
        assert_eq!(records[1].published, "2 April 2024");
        assert_eq!(
            records[1].description,
            "Shelving, furniture and IT for the new central library."
        );
    }

    #[test]
    fn feed_listing() {
        let records = extract_records(Strategy::Feed, FEED_PAGE);
        assert_eq!(records.len(), 2);

        assert_eq!(records[0].title, "Managed Print Services");
        assert_eq!(records[0].ocid.as_deref(), Some("ocds-b5fd17-000451"));
        assert_eq!(
            records[0].description,
            "Multi-function devices & support for council offices."
        );
        assert_eq!(records[1].description, "Grass cutting and hedge trimming.");
        assert_eq!(records[1].ocid, None);
    }

    #[test]
    fn malformed_block_does_not_hide_well_formed_one() {
        let body = r#"<div class="tender"><p>no title, no link</p></div>
            <div class="tender"><h3><a href="/n/2">Pest control</a></h3></div>"#;
        let records = extract_records(Strategy::Card, body);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "Pest control");
    }

    #[test]
    fn nested_cards_count_once() {
        let body = r#"<div class="notice"><div class="tender">
            <h3><a href="/n/3">Window cleaning</a></h3></div></div>"#;
        assert_eq!(extract_records(Strategy::Card, body).len(), 1);
    }

    #[test]
    fn wrong_strategy_finds_nothing() {
        assert!(extract_records(Strategy::Table, CARD_PAGE).is_empty());
        assert!(extract_records(Strategy::Feed, TABLE_PAGE).is_empty());
    }

    // -----------------------------------------------------------------------
    // Next-page hints in fixtures
    // -----------------------------------------------------------------------

    #[test]
    fn fixture_next_links() {
        let card = Html::parse_document(CARD_PAGE);
        assert_eq!(find_next_href(&card).as_deref(), Some("/Search/Results?page=2"));

        let table = Html::parse_document(TABLE_PAGE);
        assert_eq!(find_next_href(&table).as_deref(), Some("?page=2"));

        let article = Html::parse_document(ARTICLE_PAGE);
        assert_eq!(find_next_href(&article), None);
    }
}
