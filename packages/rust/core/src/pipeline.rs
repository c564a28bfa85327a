//! Ingestion runs: listing pages → records → tagged tenders → store.
//!
//! A run moves through `start → fetching → extracting → persisting` and ends
//! in `complete` or `failed`. All pages are fetched and extracted before any
//! record is persisted, so the discovered count is known up front.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

use chrono::Utc;
use reqwest::Client;
use tracing::{debug, error, info, instrument, warn};

use tenderwatch_crawler::{AdapterRegistry, Paginator, build_client};
use tenderwatch_shared::{
    AppConfig, ExtractedRecord, FetchOptions, NormalizedTender, Result, RunResult,
    SourceDescriptor, SourceRegistry, TagRules, TenderwatchError,
};
use tenderwatch_storage::TenderStore;

use crate::progress::{ProgressEvent, ProgressReporter, SourceSummary};
use crate::tags;
use crate::writer::{DedupWriter, WriteOutcome};

/// Result key used when a default-source run cannot resolve any source.
const DEFAULT_RUN_KEY: &str = "default";

/// Immutable configuration snapshot shared by every run.
pub struct RunContext {
    sources: SourceRegistry,
    tags: TagRules,
    fetch: FetchOptions,
    client: Client,
    adapters: AdapterRegistry,
}

impl RunContext {
    pub fn new(sources: SourceRegistry, tags: TagRules, fetch: FetchOptions) -> Result<Self> {
        let client = build_client(&fetch)?;
        Ok(Self {
            sources,
            tags,
            fetch,
            client,
            adapters: AdapterRegistry::new(),
        })
    }

    /// Validate the configured sources and build the context once.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Self::new(
            SourceRegistry::from_config(config)?,
            config.tag_rules(),
            FetchOptions::from(config),
        )
    }

    pub fn sources(&self) -> &SourceRegistry {
        &self.sources
    }
}

/// Lifecycle phase of a single run, for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunPhase {
    Start,
    Fetching,
    Extracting,
    Persisting,
    Complete,
    Failed,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunPhase::Start => "start",
            RunPhase::Fetching => "fetching",
            RunPhase::Extracting => "extracting",
            RunPhase::Persisting => "persisting",
            RunPhase::Complete => "complete",
            RunPhase::Failed => "failed",
        })
    }
}

/// Run one source end to end.
///
/// `source_key = None` runs the configured default source; such runs update
/// the last-run timestamp but not per-source statistics. Fetch failures end
/// the run and are reported in [`RunResult::error`]; nothing is persisted.
#[instrument(skip_all, fields(source = source_key.unwrap_or(DEFAULT_RUN_KEY)))]
pub async fn run_source(
    ctx: &RunContext,
    source_key: Option<&str>,
    store: &dyn TenderStore,
    progress: &dyn ProgressReporter,
) -> RunResult {
    let started = Instant::now();
    debug!(phase = %RunPhase::Start, "run phase");

    let source = match resolve_source(&ctx.sources, source_key) {
        Ok(source) => source,
        Err(e) => {
            error!(phase = %RunPhase::Failed, error = %e, "run failed");
            return RunResult::failed(source_key.unwrap_or(DEFAULT_RUN_KEY), e);
        }
    };

    info!(
        source = source.key(),
        label = source.label(),
        strategy = %source.strategy(),
        "starting run"
    );
    progress.report(
        source_key,
        ProgressEvent::Start {
            source: SourceSummary::from(source),
        },
    );

    debug!(phase = %RunPhase::Fetching, "run phase");
    let records = match collect_records(ctx, source).await {
        Ok(records) => records,
        Err(e) => {
            error!(
                phase = %RunPhase::Failed,
                source = source.label(),
                error = %e,
                "run failed"
            );
            return RunResult::failed(source.key(), e);
        }
    };

    let total = records.len();
    progress.report(source_key, ProgressEvent::Found { count: total });

    debug!(phase = %RunPhase::Persisting, total, "run phase");
    let scraped_at = Utc::now();
    let writer = DedupWriter::new(store);
    let mut added = 0usize;
    let mut failed = 0usize;

    for (i, record) in records.iter().enumerate() {
        let tags = tags::classify(&record.title, &record.description, &ctx.tags);
        let tender = NormalizedTender::from_record(record, source, scraped_at, tags);
        let outcome = writer.write(&tender).await;
        match outcome {
            WriteOutcome::Inserted => added += 1,
            WriteOutcome::Failed => failed += 1,
            WriteOutcome::Duplicate => {}
        }
        progress.report(
            source_key,
            ProgressEvent::Tender {
                title: tender.title,
                index: i + 1,
                total,
                inserted: outcome.is_inserted(),
            },
        );
    }

    let completed_at = Utc::now();
    if let Err(e) = store.set_last_run_timestamp(completed_at).await {
        warn!(error = %e, "failed to record last run timestamp");
    }
    if source_key.is_some() {
        if let Err(e) = store
            .update_source_stats(source.key(), completed_at, added as u64)
            .await
        {
            warn!(error = %e, "failed to update source statistics");
        }
    }

    if failed > 0 {
        warn!(failed, total, "some records could not be stored");
    }
    info!(
        phase = %RunPhase::Complete,
        discovered = total,
        added,
        failed,
        elapsed_ms = started.elapsed().as_millis(),
        "run complete"
    );
    RunResult::completed(source.key(), total, added).with_failed(failed)
}

/// Run every configured source sequentially, in declaration order.
///
/// A failing source is recorded in its [`RunResult`] and does not stop the
/// remaining sources. Entries rejected at configuration time are reported as
/// failed without being fetched.
#[instrument(skip_all, fields(sources = ctx.sources.len()))]
pub async fn run_all(
    ctx: &RunContext,
    store: &dyn TenderStore,
    progress: &dyn ProgressReporter,
) -> BTreeMap<String, RunResult> {
    let mut results = BTreeMap::new();

    for rejected in ctx.sources.rejected() {
        let e = rejected_source_error(&rejected.key, &rejected.reason);
        error!(source = %rejected.key, error = %e, "skipping invalid source");
        results.insert(rejected.key.clone(), RunResult::failed(&rejected.key, e));
    }

    for source in ctx.sources.iter() {
        let result = run_source(ctx, Some(source.key()), store, progress).await;
        results.insert(source.key().to_string(), result);
    }

    let failed = results.values().filter(|r| r.error.is_some()).count();
    info!(runs = results.len(), failed, "all sources processed");
    results
}

fn resolve_source<'a>(
    sources: &'a SourceRegistry,
    source_key: Option<&str>,
) -> Result<&'a SourceDescriptor> {
    let Some(key) = source_key.or_else(|| sources.default_key()) else {
        return Err(TenderwatchError::config("no sources are configured"));
    };
    if let Some(reason) = sources.rejection(key) {
        return Err(rejected_source_error(key, reason));
    }
    sources
        .get(key)
        .ok_or_else(|| TenderwatchError::config(format!("unknown source '{key}'")))
}

fn rejected_source_error(key: &str, reason: &str) -> TenderwatchError {
    TenderwatchError::config(format!("source '{key}' is invalid: {reason}"))
}

/// Fetch every listing page of `source` and extract its records in page order.
async fn collect_records(
    ctx: &RunContext,
    source: &SourceDescriptor,
) -> Result<Vec<ExtractedRecord>> {
    let mut pages = Paginator::new(
        ctx.client.clone(),
        source.listing_url(),
        source.base_url(),
        ctx.fetch.max_pages,
    );
    let mut records = Vec::new();

    while let Some(page) = pages.next_page().await? {
        let found = ctx.adapters.extract(source.strategy(), &page.body);
        debug!(phase = %RunPhase::Extracting, url = %page.url, count = found.len(), "page extracted");
        records.extend(found);
    }

    info!(
        pages = pages.pages_fetched(),
        records = records.len(),
        "listing pages fetched"
    );
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{ChannelProgress, ProgressMessage, SilentProgress};
    use async_trait::async_trait;
    use chrono::DateTime;
    use tenderwatch_shared::{OrganisationKind, RunStatus, SourceEntry};
    use tenderwatch_storage::Storage;
    use tokio::sync::mpsc::UnboundedReceiver;
    use uuid::Uuid;
    use wiremock::matchers::path;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PAGE_ONE: &str = r#"<html><head><link rel="next" href="/list/2"></head><body>
        <div class="tender" data-ocid="ocds-b5fd17-000001">
          <h3><a href="/notice/1">Cloud hosting renewal</a></h3>
          <p class="buyer">Buyer: Northshire County Council</p>
          <p>Managed cloud platform for council services.</p>
        </div>
        <div class="tender">
          <h3><a href="/notice/2">Highway resurfacing</a></h3>
          <p>Resurfacing of the A-road network.</p>
        </div>
        <div class="tender"><p>Broken card without title or link</p></div>
    </body></html>"#;

    const PAGE_TWO: &str = r#"<html><body>
        <div class="tender">
          <h3><a href="https://elsewhere.example.gov/notice/3">NHS clinical waste</a></h3>
          <p class="supplier">Supplier: Clean Disposal Ltd</p>
        </div>
    </body></html>"#;

    const EMPTY_PAGE: &str = "<html><body><p>No notices match your search.</p></body></html>";

    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("tw_core_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    async fn mount(server: &MockServer, route: &str, status: u16, body: &str) {
        Mock::given(path(route))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(server)
            .await;
    }

    fn source(server: &MockServer, key: &str, listing: &str) -> SourceDescriptor {
        let base = format!("{}/", server.uri());
        SourceDescriptor::new(key, key.to_uppercase(), &format!("{base}{listing}"), &base, "card")
            .unwrap()
    }

    fn context(sources: Vec<SourceDescriptor>) -> RunContext {
        let rules: TagRules = [
            ("it", vec!["cloud", "software"]),
            ("construction", vec!["resurfacing"]),
            ("health", vec!["nhs"]),
        ]
        .into_iter()
        .collect();
        RunContext::new(
            SourceRegistry::new(sources).unwrap(),
            rules,
            FetchOptions::default(),
        )
        .unwrap()
    }

    fn drain(rx: &mut UnboundedReceiver<ProgressMessage>) -> Vec<ProgressMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    #[tokio::test]
    async fn two_page_listing_end_to_end() {
        let server = MockServer::start().await;
        mount(&server, "/list", 200, PAGE_ONE).await;
        mount(&server, "/list/2", 200, PAGE_TWO).await;

        let ctx = context(vec![source(&server, "portal", "list")]);
        let store = test_storage().await;
        let (progress, mut rx) = ChannelProgress::new();

        let result = run_source(&ctx, Some("portal"), &store, &progress).await;
        assert_eq!(result.error, None);
        assert_eq!(result.discovered, 3);
        assert_eq!(result.added, 3);
        assert_eq!(result.status(), RunStatus::Added);

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 5);
        assert!(messages.iter().all(|m| m.source_key.as_deref() == Some("portal")));
        assert!(matches!(messages[0].event, ProgressEvent::Start { .. }));
        assert_eq!(messages[1].event, ProgressEvent::Found { count: 3 });
        for (i, message) in messages[2..].iter().enumerate() {
            match &message.event {
                ProgressEvent::Tender {
                    index,
                    total,
                    inserted,
                    ..
                } => {
                    assert_eq!(*index, i + 1);
                    assert_eq!(*total, 3);
                    assert!(inserted);
                }
                other => panic!("unexpected event {other:?}"),
            }
        }

        let first = store
            .get_tender_by_link(&format!("{}/notice/1", server.uri()))
            .await
            .unwrap()
            .expect("relative link resolved against base");
        assert_eq!(first.tags, ["it"]);
        assert_eq!(first.ocid.as_deref(), Some("ocds-b5fd17-000001"));
        assert_eq!(first.source_label, "PORTAL");

        let third = store
            .get_tender_by_link("https://elsewhere.example.gov/notice/3")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(third.tags, ["health"]);
        assert_eq!(third.scraped_at, first.scraped_at);

        assert_eq!(store.count_organisations(Some(OrganisationKind::Buyer)).await.unwrap(), 1);
        assert_eq!(store.count_organisations(Some(OrganisationKind::Supplier)).await.unwrap(), 1);

        let stats = store.get_source_stats("portal").await.unwrap().unwrap();
        assert_eq!(stats.total_added, 3);
        let last_run = store.last_run_at().await.unwrap().unwrap();
        assert!(last_run >= first.scraped_at);
        assert_eq!(stats.last_run_at, last_run);
    }

    #[tokio::test]
    async fn rerun_reports_all_duplicates() {
        let server = MockServer::start().await;
        mount(&server, "/list", 200, PAGE_ONE).await;
        mount(&server, "/list/2", 200, PAGE_TWO).await;

        let ctx = context(vec![source(&server, "portal", "list")]);
        let store = test_storage().await;

        run_source(&ctx, Some("portal"), &store, &SilentProgress).await;
        let again = run_source(&ctx, Some("portal"), &store, &SilentProgress).await;

        assert_eq!(again.discovered, 3);
        assert_eq!(again.added, 0);
        assert_eq!(again.status(), RunStatus::AllDuplicates);
        assert_eq!(store.count_tenders().await.unwrap(), 3);

        let stats = store.get_source_stats("portal").await.unwrap().unwrap();
        assert_eq!(stats.last_added, 0);
        assert_eq!(stats.total_added, 3);
    }

    #[tokio::test]
    async fn empty_listing_reports_nothing_found() {
        let server = MockServer::start().await;
        mount(&server, "/empty", 200, EMPTY_PAGE).await;

        let ctx = context(vec![source(&server, "quiet", "empty")]);
        let store = test_storage().await;

        let result = run_source(&ctx, None, &store, &SilentProgress).await;
        assert_eq!(result.source_key, "quiet");
        assert_eq!(result.status(), RunStatus::NothingFound);
        assert!(store.last_run_at().await.unwrap().is_some());
        // Default-source runs do not touch per-source statistics.
        assert!(store.get_source_stats("quiet").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fetch_failure_persists_nothing() {
        let server = MockServer::start().await;
        mount(&server, "/list", 200, PAGE_ONE).await;
        mount(&server, "/list/2", 500, "").await;

        let ctx = context(vec![source(&server, "flaky", "list")]);
        let store = test_storage().await;
        let (progress, mut rx) = ChannelProgress::new();

        let result = run_source(&ctx, Some("flaky"), &store, &progress).await;
        assert_eq!(result.status(), RunStatus::Failed);
        assert_eq!(result.added, 0);
        assert!(result.error.unwrap().contains("500"));

        assert_eq!(store.count_tenders().await.unwrap(), 0);
        assert!(store.last_run_at().await.unwrap().is_none());
        assert!(store.get_source_stats("flaky").await.unwrap().is_none());

        // Only the start event precedes the failure.
        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 1);
        assert!(matches!(messages[0].event, ProgressEvent::Start { .. }));
    }

    #[tokio::test]
    async fn unknown_source_fails_without_fetching() {
        let server = MockServer::start().await;
        Mock::given(path("/list"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE_TWO))
            .expect(0)
            .mount(&server)
            .await;

        let ctx = context(vec![source(&server, "portal", "list")]);
        let store = test_storage().await;

        let result = run_source(&ctx, Some("nope"), &store, &SilentProgress).await;
        assert_eq!(result.source_key, "nope");
        assert!(result.error.unwrap().contains("unknown source"));
    }

    #[tokio::test]
    async fn run_all_isolates_failures() {
        let server = MockServer::start().await;
        mount(&server, "/broken", 503, "").await;
        mount(&server, "/list", 200, PAGE_ONE).await;
        mount(&server, "/list/2", 200, PAGE_TWO).await;

        let ctx = context(vec![
            source(&server, "broken", "broken"),
            source(&server, "portal", "list"),
        ]);
        let store = test_storage().await;
        let (progress, mut rx) = ChannelProgress::new();

        let results = run_all(&ctx, &store, &progress).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results["broken"].status(), RunStatus::Failed);
        assert_eq!(results["portal"].added, 3);

        let keys: Vec<Option<String>> = drain(&mut rx).into_iter().map(|m| m.source_key).collect();
        assert_eq!(keys[0].as_deref(), Some("broken"));
        assert!(keys[1..].iter().all(|k| k.as_deref() == Some("portal")));
    }

    /// Store whose inserts always fail, as during a database outage.
    struct UnavailableStore;

    #[async_trait]
    impl TenderStore for UnavailableStore {
        async fn insert_if_absent(&self, _tender: &NormalizedTender) -> Result<bool> {
            Err(TenderwatchError::Storage("database is locked".into()))
        }

        async fn insert_organisation_if_absent(
            &self,
            _name: &str,
            _kind: OrganisationKind,
        ) -> Result<bool> {
            Ok(false)
        }

        async fn set_last_run_timestamp(&self, _at: DateTime<Utc>) -> Result<()> {
            Ok(())
        }

        async fn update_source_stats(
            &self,
            _source_key: &str,
            _at: DateTime<Utc>,
            _added: u64,
        ) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn store_outage_is_not_reported_as_duplicates() {
        let server = MockServer::start().await;
        mount(&server, "/list", 200, PAGE_TWO).await;

        let ctx = context(vec![source(&server, "portal", "list")]);
        let (progress, mut rx) = ChannelProgress::new();

        let result = run_source(&ctx, Some("portal"), &UnavailableStore, &progress).await;
        assert_eq!(result.error, None);
        assert_eq!(result.discovered, 1);
        assert_eq!(result.added, 0);
        assert_eq!(result.failed, 1);
        assert_eq!(result.status(), RunStatus::StoreErrors);

        let messages = drain(&mut rx);
        assert!(matches!(
            messages.last().map(|m| &m.event),
            Some(ProgressEvent::Tender { inserted: false, .. })
        ));
    }

    #[tokio::test]
    async fn invalid_source_entry_fails_alone() {
        let server = MockServer::start().await;
        mount(&server, "/list", 200, PAGE_TWO).await;

        let base = format!("{}/", server.uri());
        let mut config = AppConfig::default();
        config.defaults.default_source = None;
        config.sources = vec![
            SourceEntry {
                key: "legacy".into(),
                label: "Legacy portal".into(),
                listing_url: "http://legacy.example.gov/list".into(),
                base_url: "http://legacy.example.gov/".into(),
                strategy: "card".into(),
            },
            SourceEntry {
                key: "portal".into(),
                label: "Portal".into(),
                listing_url: format!("{base}list"),
                base_url: base.clone(),
                strategy: "card".into(),
            },
        ];
        let ctx = RunContext::from_config(&config).expect("valid entries still load");
        let store = test_storage().await;

        let results = run_all(&ctx, &store, &SilentProgress).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results["legacy"].status(), RunStatus::Failed);
        assert!(results["legacy"].error.as_deref().unwrap().contains("is invalid"));
        assert_eq!(results["portal"].added, 1);

        let single = run_source(&ctx, Some("legacy"), &store, &SilentProgress).await;
        assert_eq!(single.status(), RunStatus::Failed);
    }
}
