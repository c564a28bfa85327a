//! Core domain types for tenderwatch ingestion runs.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::{Host, Url};

use crate::error::{Result, TenderwatchError};

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

/// Named extraction strategy selecting how a listing page is turned into records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Container elements carrying a recognizable marker class or `data-ocid`.
    #[default]
    Card,
    /// One record per table row.
    Table,
    /// One record per `<article>` element.
    Article,
    /// RSS 2.0 or Atom syndication feed.
    Feed,
}

impl Strategy {
    /// All registered strategies, in dispatch order.
    pub const ALL: [Strategy; 4] = [
        Strategy::Card,
        Strategy::Table,
        Strategy::Article,
        Strategy::Feed,
    ];

    /// Look up a strategy by its registered name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|s| s.as_str().eq_ignore_ascii_case(name))
    }

    /// Resolve a configured name, falling back to the default strategy.
    pub fn resolve(name: &str) -> Self {
        match Self::from_name(name) {
            Some(strategy) => strategy,
            None => {
                tracing::warn!(
                    strategy = name,
                    fallback = Self::default().as_str(),
                    "unknown extraction strategy, using fallback"
                );
                Self::default()
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Card => "card",
            Strategy::Table => "table",
            Strategy::Article => "article",
            Strategy::Feed => "feed",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// SourceDescriptor
// ---------------------------------------------------------------------------

/// Immutable definition of one listing endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    key: String,
    label: String,
    listing_url: Url,
    base_url: Url,
    strategy: Strategy,
}

impl SourceDescriptor {
    /// Build a validated descriptor.
    ///
    /// Both URLs must use `https`; plain `http` is only accepted for loopback
    /// hosts. Unknown strategy names fall back to [`Strategy::default`].
    pub fn new(
        key: impl Into<String>,
        label: impl Into<String>,
        listing_url: &str,
        base_url: &str,
        strategy: &str,
    ) -> Result<Self> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(TenderwatchError::validation("source key must not be empty"));
        }

        let listing_url = parse_source_url(&key, "listing_url", listing_url)?;
        let base_url = parse_source_url(&key, "base_url", base_url)?;

        Ok(Self {
            key,
            label: label.into(),
            listing_url,
            base_url,
            strategy: Strategy::resolve(strategy),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn listing_url(&self) -> &Url {
        &self.listing_url
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Resolve a possibly-relative record link against the base URL.
    pub fn resolve_link(&self, link: &str) -> String {
        match self.base_url.join(link.trim()) {
            Ok(url) => url.to_string(),
            Err(_) => link.trim().to_string(),
        }
    }
}

fn parse_source_url(key: &str, field: &str, raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim()).map_err(|e| {
        TenderwatchError::validation(format!("source '{key}': invalid {field} '{raw}': {e}"))
    })?;

    match url.scheme() {
        "https" => Ok(url),
        "http" if is_loopback(&url) => Ok(url),
        scheme => Err(TenderwatchError::validation(format!(
            "source '{key}': {field} must use https (got '{scheme}')"
        ))),
    }
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

// ---------------------------------------------------------------------------
// Pages and records
// ---------------------------------------------------------------------------

/// One fetched listing page: raw markup plus the URL it came from.
#[derive(Debug, Clone)]
pub struct RawPage {
    pub url: Url,
    pub body: String,
}

/// A record produced by an extraction strategy, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedRecord {
    pub title: String,
    /// Relative or absolute link as it appeared in the markup.
    pub link: String,
    /// Date text as published (empty when none was found).
    pub published: String,
    /// First paragraph-like block (empty when none was found).
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organisation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supplier: Option<String>,
    /// Open-contracting identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocid: Option<String>,
}

/// The persisted unit: an extracted record plus run metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedTender {
    pub title: String,
    /// Absolute link, resolved against the source base URL.
    pub link: String,
    pub published: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organisation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supplier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocid: Option<String>,
    pub source_label: String,
    pub scraped_at: DateTime<Utc>,
    pub tags: Vec<String>,
}

impl NormalizedTender {
    /// Normalize an extracted record for `source`, stamping the run timestamp.
    pub fn from_record(
        record: &ExtractedRecord,
        source: &SourceDescriptor,
        scraped_at: DateTime<Utc>,
        tags: Vec<String>,
    ) -> Self {
        Self {
            title: record.title.clone(),
            link: source.resolve_link(&record.link),
            published: record.published.clone(),
            description: record.description.clone(),
            organisation: non_empty(record.organisation.as_deref()),
            supplier: non_empty(record.supplier.as_deref()),
            ocid: non_empty(record.ocid.as_deref()),
            source_label: source.label().to_string(),
            scraped_at,
            tags,
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

// ---------------------------------------------------------------------------
// Tag rules
// ---------------------------------------------------------------------------

/// One classification rule: a tag name and the keywords that trigger it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRule {
    pub name: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Ordered rule set; output tag order follows declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagRules(pub Vec<TagRule>);

impl TagRules {
    pub fn iter(&self) -> impl Iterator<Item = &TagRule> {
        self.0.iter()
    }
}

impl<N: Into<String>, K: Into<String>> FromIterator<(N, Vec<K>)> for TagRules {
    fn from_iter<I: IntoIterator<Item = (N, Vec<K>)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(name, keywords)| TagRule {
                    name: name.into(),
                    keywords: keywords.into_iter().map(Into::into).collect(),
                })
                .collect(),
        )
    }
}

// ---------------------------------------------------------------------------
// Organisations and stats
// ---------------------------------------------------------------------------

/// Role an organisation plays in a notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrganisationKind {
    Buyer,
    Supplier,
}

impl OrganisationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrganisationKind::Buyer => "buyer",
            OrganisationKind::Supplier => "supplier",
        }
    }
}

impl fmt::Display for OrganisationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate per-source statistics kept by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStats {
    pub source_key: String,
    pub last_run_at: DateTime<Utc>,
    pub last_added: u64,
    pub total_added: u64,
}

// ---------------------------------------------------------------------------
// RunResult
// ---------------------------------------------------------------------------

/// Outcome of one source run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub source_key: String,
    /// Records discovered across all pages.
    pub discovered: usize,
    /// Records newly inserted.
    pub added: usize,
    /// Records the store rejected with an error.
    #[serde(default)]
    pub failed: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Completion classification of a [`RunResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Failed,
    /// The run completed but the store rejected some records.
    StoreErrors,
    /// Nothing was discovered on the listing pages.
    NothingFound,
    /// Records were discovered but every one was already stored.
    AllDuplicates,
    Added,
}

impl RunResult {
    pub fn completed(source_key: impl Into<String>, discovered: usize, added: usize) -> Self {
        Self {
            source_key: source_key.into(),
            discovered,
            added,
            failed: 0,
            error: None,
        }
    }

    /// Record how many of the discovered records failed to store.
    pub fn with_failed(mut self, failed: usize) -> Self {
        self.failed = failed;
        self
    }

    pub fn failed(source_key: impl Into<String>, error: impl fmt::Display) -> Self {
        Self {
            source_key: source_key.into(),
            discovered: 0,
            added: 0,
            failed: 0,
            error: Some(error.to_string()),
        }
    }

    pub fn status(&self) -> RunStatus {
        if self.error.is_some() {
            RunStatus::Failed
        } else if self.failed > 0 {
            RunStatus::StoreErrors
        } else if self.discovered == 0 {
            RunStatus::NothingFound
        } else if self.added == 0 {
            RunStatus::AllDuplicates
        } else {
            RunStatus::Added
        }
    }
}
