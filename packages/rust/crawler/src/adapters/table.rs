//! Tabular listings: one notice per `<tr>`.

use std::sync::LazyLock;

use scraper::{Html, Selector};
use tenderwatch_shared::ExtractedRecord;

use super::ListingAdapter;
use super::block::extract_block;

static ROW: LazyLock<Selector> = LazyLock::new(|| Selector::parse("tr").expect("row selector"));
static CELL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("td").expect("cell selector"));
static DESCRIPTION: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"td[class*="desc"], p"#).expect("description selector")
});

/// Extracts one record per data row; header rows have no `<td>` and are skipped.
pub struct TableAdapter;

impl ListingAdapter for TableAdapter {
    fn extract(&self, body: &str) -> Vec<ExtractedRecord> {
        let doc = Html::parse_document(body);
        doc.select(&ROW)
            .filter(|row| row.select(&CELL).next().is_some())
            .filter_map(|row| extract_block(row, &DESCRIPTION))
            .collect()
    }

    fn name(&self) -> &str {
        "table"
    }
}
