//! Syndication feeds (RSS 2.0 and Atom).
//!
//! The document is walked with a `quick-xml` reader and every item is
//! deserialized separately via its serde support. Items that fail to parse or
//! lack a title or link are skipped.

use quick_xml::Reader;
use quick_xml::de::from_str;
use quick_xml::events::Event;
use quick_xml::name::QName;
use serde::Deserialize;
use tenderwatch_shared::{ExtractedRecord, Result, TenderwatchError};
use tracing::{debug, warn};

use super::ListingAdapter;
use super::block::{collapse_whitespace, fragment_text, ocid_in};

// ---------------------------------------------------------------------------
// RSS 2.0
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RssItem {
    title: Option<Text>,
    link: Option<Text>,
    #[serde(rename = "pubDate")]
    pub_date: Option<Text>,
    description: Option<Text>,
    guid: Option<Text>,
    ocid: Option<Text>,
}

// ---------------------------------------------------------------------------
// Atom
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<Text>,
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
    published: Option<Text>,
    updated: Option<Text>,
    summary: Option<Text>,
    content: Option<Text>,
    id: Option<Text>,
    ocid: Option<Text>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

/// Element text content; attributes such as `isPermaLink` or `type` are ignored.
#[derive(Debug, Default, Deserialize)]
struct Text {
    #[serde(rename = "$text", default)]
    value: String,
}

fn text(field: &Option<Text>) -> String {
    field
        .as_ref()
        .map(|t| collapse_whitespace(&t.value))
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// Extracts records from RSS `<item>` or Atom `<entry>` elements.
///
/// Each item is deserialized on its own, so one malformed item costs only
/// that item.
pub struct FeedAdapter;

impl ListingAdapter for FeedAdapter {
    fn extract(&self, body: &str) -> Vec<ExtractedRecord> {
        let xml = scrub_html_entities_for_xml(body);
        let mut records = Vec::new();

        for (kind, fragment) in item_fragments(&xml) {
            let parsed = match kind {
                ItemKind::Rss => parse_rss_item(fragment),
                ItemKind::Atom => parse_atom_entry(fragment),
            };
            match parsed {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => debug!(error = %e, "skipping unreadable feed item"),
            }
        }

        records
    }

    fn name(&self) -> &str {
        "feed"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemKind {
    Rss,
    Atom,
}

/// Raw `<item>`/`<entry>` elements in document order.
///
/// Stops at the first structural error in the document; items read before it
/// are kept.
fn item_fragments(xml: &str) -> Vec<(ItemKind, &str)> {
    let mut reader = Reader::from_str(xml);
    let mut fragments = Vec::new();

    loop {
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, items = fragments.len(), "feed markup ended early");
                break;
            }
        };

        match event {
            Event::Start(e) => {
                let kind = match e.local_name().as_ref() {
                    b"item" => ItemKind::Rss,
                    b"entry" => ItemKind::Atom,
                    _ => continue,
                };
                // `<` + tag content + `>` ends at the current position.
                let start = (reader.buffer_position() as usize).saturating_sub(e.len() + 2);
                let end_name = e.name().as_ref().to_vec();
                if let Err(e) = reader.read_to_end(QName(&end_name)) {
                    warn!(error = %e, items = fragments.len(), "feed item left unclosed");
                    break;
                }
                let end = reader.buffer_position() as usize;
                if let Some(fragment) = xml.get(start..end) {
                    fragments.push((kind, fragment));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    fragments
}

fn parse_rss_item(fragment: &str) -> Result<Option<ExtractedRecord>> {
    let item: RssItem = from_str(fragment)
        .map_err(|e| TenderwatchError::parse(format!("invalid RSS item: {e}")))?;
    Ok(build_record(
        text(&item.title),
        text(&item.link),
        text(&item.pub_date),
        item.description.as_ref().map(|d| d.value.as_str()),
        [text(&item.ocid), text(&item.guid)],
    ))
}

fn parse_atom_entry(fragment: &str) -> Result<Option<ExtractedRecord>> {
    let entry: AtomEntry = from_str(fragment)
        .map_err(|e| TenderwatchError::parse(format!("invalid Atom entry: {e}")))?;

    let link = entry
        .links
        .iter()
        .find(|l| l.rel.as_deref().is_none_or(|rel| rel == "alternate"))
        .or_else(|| entry.links.first())
        .and_then(|l| l.href.clone())
        .unwrap_or_default();
    let published = Some(text(&entry.published))
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| text(&entry.updated));
    let description = entry
        .summary
        .as_ref()
        .or(entry.content.as_ref())
        .map(|d| d.value.as_str());

    Ok(build_record(
        text(&entry.title),
        link.trim().to_string(),
        published,
        description,
        [text(&entry.ocid), text(&entry.id)],
    ))
}

/// Assemble a record from feed fields. `identifiers` are tried in order: an
/// explicit `<ocid>` is taken as-is, the others only when they look like one.
fn build_record(
    title: String,
    link: String,
    published: String,
    description_html: Option<&str>,
    identifiers: [String; 2],
) -> Option<ExtractedRecord> {
    if title.is_empty() || link.is_empty() {
        debug!(%title, %link, "dropping feed item without title or link");
        return None;
    }

    let description = description_html.map(fragment_text).unwrap_or_default();
    let [explicit, other] = identifiers;
    let ocid = Some(explicit)
        .filter(|id| !id.is_empty())
        .or_else(|| ocid_in(&other))
        .or_else(|| ocid_in(&link))
        .or_else(|| ocid_in(&description));

    Some(ExtractedRecord {
        title,
        link,
        published,
        description,
        organisation: None,
        supplier: None,
        ocid,
    })
}

/// Replace HTML named entities that are not valid XML.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&pound;", "£")
        .replace("&euro;", "€")
}
