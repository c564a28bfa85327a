//! Per-block field extraction shared by the markup strategies.
//!
//! A "block" is the element a strategy identified as one record boundary
//! (a card, a table row, an article). Everything here is best-effort: a
//! missing field yields an empty value, and only a missing title or link
//! makes the whole block unusable.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tenderwatch_shared::ExtractedRecord;
use tracing::debug;

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector must parse")
}

static HEADING: LazyLock<Selector> = LazyLock::new(|| selector("h1, h2, h3, h4, h5, h6"));
static ANCHOR: LazyLock<Selector> = LazyLock::new(|| selector("a[href]"));
static TIME: LazyLock<Selector> = LazyLock::new(|| selector("time"));
static DATE_LABELLED: LazyLock<Selector> = LazyLock::new(|| {
    selector(r#"[class*="date"], [data-label*="date"], [class*="published"]"#)
});
static ORGANISATION: LazyLock<Selector> = LazyLock::new(|| {
    selector(
        r#"[class*="organisation"], [class*="organization"], [class*="buyer"], [data-label*="organisation"], [data-label*="buyer"]"#,
    )
});
static SUPPLIER: LazyLock<Selector> =
    LazyLock::new(|| selector(r#"[class*="supplier"], [data-label*="supplier"]"#));
static DATA_OCID: LazyLock<Selector> = LazyLock::new(|| selector("[data-ocid]"));

/// Paragraph-like description candidates for card and article blocks.
pub(crate) static PARAGRAPH: LazyLock<Selector> = LazyLock::new(|| selector("p"));

static DATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(\d{4}-\d{2}-\d{2}|\d{1,2}[/.]\d{1,2}[/.]\d{2,4}|\d{1,2} (?:january|february|march|april|may|june|july|august|september|october|november|december|jan|feb|mar|apr|jun|jul|aug|sept|sep|oct|nov|dec) \d{4})\b",
    )
    .expect("date pattern must compile")
});

static OCID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"ocds-[a-z0-9]{6}-[A-Za-z0-9][A-Za-z0-9-]*").expect("ocid pattern must compile")
});

/// Class fragments that mark an element as a labelled field rather than prose.
const FIELD_CLASS_MARKERS: [&str; 6] = [
    "date",
    "published",
    "organisation",
    "organization",
    "buyer",
    "supplier",
];

/// Extract one record from a block, or `None` when title or link is missing.
pub(crate) fn extract_block(block: ElementRef<'_>, description: &Selector) -> Option<ExtractedRecord> {
    let heading = block
        .select(&HEADING)
        .map(|h| (h, inline_text(h)))
        .find(|(_, text)| !text.is_empty());

    // Prefer the heading's own anchor; some formats put "View" in a separate link.
    let anchor = heading
        .as_ref()
        .and_then(|(h, _)| h.select(&ANCHOR).find(|a| usable_anchor(a)))
        .or_else(|| block.select(&ANCHOR).find(|a| usable_anchor(a)));

    let title = match (&heading, anchor) {
        (Some((_, text)), _) => text.clone(),
        (None, Some(a)) => inline_text(a),
        (None, None) => String::new(),
    };
    let link = anchor
        .and_then(|a| a.value().attr("href"))
        .map(|href| href.trim().to_string())
        .unwrap_or_default();

    if title.is_empty() || link.is_empty() {
        debug!(
            has_title = !title.is_empty(),
            has_link = !link.is_empty(),
            "dropping block without title or link"
        );
        return None;
    }

    Some(ExtractedRecord {
        title,
        link,
        published: published_text(block),
        description: block
            .select(description)
            .filter(|el| !is_labelled_field(el))
            .map(inline_text)
            .find(|text| !text.is_empty())
            .unwrap_or_default(),
        organisation: labelled_text(block, &ORGANISATION),
        supplier: labelled_text(block, &SUPPLIER),
        ocid: find_ocid(block),
    })
}

/// Date-like value: `<time>`, then a date-labelled element, then a raw pattern.
fn published_text(block: ElementRef<'_>) -> String {
    if let Some(time) = block.select(&TIME).next() {
        let value = time
            .value()
            .attr("datetime")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| inline_text(time));
        if !value.is_empty() {
            return value;
        }
    }

    if let Some(text) = labelled_text(block, &DATE_LABELLED) {
        return text;
    }

    DATE_PATTERN
        .find(&block_text(block))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

/// Text of the first non-empty element matching `sel`, minus a `Label:` prefix.
fn labelled_text(block: ElementRef<'_>, sel: &Selector) -> Option<String> {
    block
        .select(sel)
        .map(|el| strip_label(&inline_text(el)).to_string())
        .find(|text| !text.is_empty())
}

fn find_ocid(block: ElementRef<'_>) -> Option<String> {
    let attr = block
        .value()
        .attr("data-ocid")
        .or_else(|| {
            block
                .select(&DATA_OCID)
                .find_map(|el| el.value().attr("data-ocid"))
        })
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ocid) = attr {
        return Some(ocid.to_string());
    }

    if let Some(m) = OCID_PATTERN.find(&block_text(block)) {
        return Some(m.as_str().to_string());
    }

    block
        .select(&ANCHOR)
        .filter_map(|a| a.value().attr("href"))
        .find_map(|href| OCID_PATTERN.find(href).map(|m| m.as_str().to_string()))
}

/// Find an open-contracting identifier anywhere in `text`.
pub(crate) fn ocid_in(text: &str) -> Option<String> {
    OCID_PATTERN.find(text).map(|m| m.as_str().to_string())
}

fn is_labelled_field(el: &ElementRef<'_>) -> bool {
    el.value().attr("class").is_some_and(|class| {
        let class = class.to_lowercase();
        FIELD_CLASS_MARKERS.iter().any(|m| class.contains(m))
    })
}

pub(crate) fn usable_anchor(anchor: &ElementRef<'_>) -> bool {
    anchor.value().attr("href").is_some_and(usable_href)
}

/// Whether an href points at a real document rather than a fragment or script.
pub(crate) fn usable_href(href: &str) -> bool {
    let href = href.trim();
    !(href.is_empty()
        || href.starts_with('#')
        || href.starts_with("javascript:")
        || href.starts_with("mailto:"))
}

/// Strip a short alphabetic `Label:` prefix ("Published: 12 March 2024").
pub(crate) fn strip_label(text: &str) -> &str {
    match text.split_once(':') {
        Some((label, rest))
            if label.len() <= 32
                && !label.trim().is_empty()
                && label.chars().all(|c| c.is_alphabetic() || c == ' ' || c == '-') =>
        {
            rest.trim()
        }
        _ => text.trim(),
    }
}

/// Inline text of an element with whitespace collapsed.
pub(crate) fn inline_text(el: ElementRef<'_>) -> String {
    collapse_whitespace(&el.text().collect::<String>())
}

/// Text of a whole block, with a space between text nodes so cells don't run together.
fn block_text(el: ElementRef<'_>) -> String {
    collapse_whitespace(&el.text().collect::<Vec<_>>().join(" "))
}

pub(crate) fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Flatten an HTML fragment (e.g. a feed description) to plain text.
pub(crate) fn fragment_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    collapse_whitespace(&fragment.root_element().text().collect::<Vec<_>>().join(" "))
}

/// Blocks matching `sel`, skipping any nested inside another match.
pub(crate) fn outermost<'a>(doc: &'a Html, sel: &Selector) -> Vec<ElementRef<'a>> {
    doc.select(sel)
        .filter(|el| {
            !el.ancestors()
                .filter_map(ElementRef::wrap)
                .any(|ancestor| sel.matches(&ancestor))
        })
        .collect()
}
