//! Sequential, cycle-guarded listing paginator.
//!
//! Starting from a source's listing URL, the paginator fetches one page at a
//! time and follows the page's "next" hint until there is none, the hint
//! points somewhere already visited, or the page cap is reached.

use std::collections::HashSet;
use std::sync::LazyLock;

use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use tenderwatch_shared::{FetchOptions, RawPage, Result, TenderwatchError};
use tracing::{debug, info, instrument};
use url::Url;

use crate::adapters::usable_href;

static REL_LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("link[rel][href], a[rel][href]").expect("static selector"));
static ANCHOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("static selector"));

/// Glyphs commonly used as the visible text of a "next page" link.
const NEXT_GLYPHS: [char; 4] = ['›', '»', '→', '>'];

/// Build the HTTP client used for every listing request of a run.
pub fn build_client(options: &FetchOptions) -> Result<Client> {
    Client::builder()
        .user_agent(options.user_agent.as_str())
        .redirect(reqwest::redirect::Policy::limited(5))
        .timeout(options.timeout)
        .build()
        .map_err(|e| TenderwatchError::Network(format!("failed to build HTTP client: {e}")))
}

// ---------------------------------------------------------------------------
// Paginator
// ---------------------------------------------------------------------------

/// Lazy, finite sequence of listing pages for one run. Not restartable.
pub struct Paginator {
    client: Client,
    base_url: Url,
    next: Option<Url>,
    visited: HashSet<String>,
    max_pages: u32,
    fetched: u32,
}

impl Paginator {
    /// Start a new page sequence at `start_url`; next-page hrefs resolve against `base_url`.
    pub fn new(client: Client, start_url: &Url, base_url: &Url, max_pages: u32) -> Self {
        Self {
            client,
            base_url: base_url.clone(),
            next: Some(start_url.clone()),
            visited: HashSet::new(),
            max_pages: max_pages.max(1),
            fetched: 0,
        }
    }

    /// Fetch the next page, or `Ok(None)` once the sequence is exhausted.
    ///
    /// Any transport failure or non-success status is returned as
    /// [`TenderwatchError::Network`]; there are no retries.
    pub async fn next_page(&mut self) -> Result<Option<RawPage>> {
        let Some(url) = self.next.take() else {
            return Ok(None);
        };

        if self.fetched >= self.max_pages {
            info!(max_pages = self.max_pages, %url, "page cap reached, stopping pagination");
            return Ok(None);
        }

        self.visited.insert(normalize_url(&url));
        let body = fetch_page(&self.client, &url).await?;
        self.fetched += 1;

        self.next = self.discover_next(&body);
        Ok(Some(RawPage { url, body }))
    }

    /// Number of pages fetched so far.
    pub fn pages_fetched(&self) -> u32 {
        self.fetched
    }

    fn discover_next(&self, body: &str) -> Option<Url> {
        let doc = Html::parse_document(body);
        let href = find_next_href(&doc)?;

        let next = match self.base_url.join(&href) {
            Ok(url) => url,
            Err(e) => {
                debug!(%href, error = %e, "unresolvable next-page href");
                return None;
            }
        };

        if self.visited.contains(&normalize_url(&next)) {
            debug!(%next, "next page already visited, stopping pagination");
            return None;
        }

        debug!(%next, "discovered next page");
        Some(next)
    }
}

// ---------------------------------------------------------------------------
// Page fetching
// ---------------------------------------------------------------------------

#[instrument(skip(client), fields(%url))]
async fn fetch_page(client: &Client, url: &Url) -> Result<String> {
    debug!("fetching listing page");

    let response = client
        .get(url.as_str())
        .send()
        .await
        .map_err(|e| TenderwatchError::Network(format!("{url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(TenderwatchError::Network(format!("{url}: HTTP {status}")));
    }

    response
        .text()
        .await
        .map_err(|e| TenderwatchError::Network(format!("{url}: body read failed: {e}")))
}

// ---------------------------------------------------------------------------
// Next-page discovery
// ---------------------------------------------------------------------------

/// Find the raw href of the "next page" hint, trying heuristics in priority order:
/// an explicit `rel="next"`, then an anchor whose attributes mention "next",
/// then an anchor whose visible text is "Next" or a next-glyph.
pub fn find_next_href(doc: &Html) -> Option<String> {
    let by_rel = doc.select(&REL_LINK).find(|el| {
        el.value()
            .attr("rel")
            .is_some_and(|rel| rel.split_whitespace().any(|r| r.eq_ignore_ascii_case("next")))
    });

    let by_attribute = || {
        doc.select(&ANCHOR).find(|a| {
            a.value()
                .attrs()
                .any(|(name, value)| name != "href" && value.to_lowercase().contains("next"))
        })
    };

    let by_text = || doc.select(&ANCHOR).find(|a| is_next_text(a));

    [by_rel]
        .into_iter()
        .flatten()
        .chain(by_attribute())
        .chain(by_text())
        .filter_map(|el| el.value().attr("href"))
        .find(|href| usable_href(href))
        .map(|href| href.trim().to_string())
}

fn is_next_text(anchor: &ElementRef<'_>) -> bool {
    let text = anchor.text().collect::<String>();
    let text = text.trim();
    if text.is_empty() {
        return false;
    }

    let core = text.trim_matches(|c: char| c.is_whitespace() || NEXT_GLYPHS.contains(&c));
    core.is_empty() || core.eq_ignore_ascii_case("next") || core.eq_ignore_ascii_case("next page")
}

/// Normalize a URL for the visited set (strip fragment and trailing slash).
fn normalize_url(url: &Url) -> String {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    let mut s = normalized.to_string();
    if s.ends_with('/') && s.matches('/').count() > 3 {
        s.pop();
    }
    s
}

#[cfg(test)]
mod paginator_tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn next_of(html: &str) -> Option<String> {
        find_next_href(&Html::parse_document(html))
    }

    fn test_client() -> Client {
        build_client(&FetchOptions::default()).unwrap()
    }

    #[test]
    fn rel_next_has_priority() {
        let html = r#"<html><head><link rel="next" href="/p/3"></head>
            <body><a class="pager-next" href="/p/2">Next</a></body></html>"#;
        assert_eq!(next_of(html).as_deref(), Some("/p/3"));
    }

    #[test]
    fn attribute_mentioning_next_beats_text() {
        let html = r#"<a href="/by-text">Next</a>
            <a aria-label="Next page" href="/by-attr">2</a>"#;
        assert_eq!(next_of(html).as_deref(), Some("/by-attr"));
    }

    #[test]
    fn visible_text_and_glyphs() {
        assert_eq!(next_of(r#"<a href="/a">Prev</a><a href="/b"> next </a>"#).as_deref(), Some("/b"));
        assert_eq!(next_of(r#"<a href="/c">»</a>"#).as_deref(), Some("/c"));
        assert_eq!(next_of(r#"<a href="/d">Next ›</a>"#).as_deref(), Some("/d"));
        assert_eq!(next_of(r#"<a href="/e">‹ Previous</a>"#), None);
    }

    #[test]
    fn ignores_unusable_hrefs() {
        assert_eq!(next_of(r##"<a rel="next" href="#">Next</a>"##), None);
        assert_eq!(next_of(r#"<a class="next" href="javascript:void(0)">Next</a>"#), None);
    }

    #[test]
    fn normalize_strips_fragment() {
        let url = Url::parse("https://tenders.example.gov/list/?page=2#results").unwrap();
        assert!(!normalize_url(&url).contains('#'));
    }

    #[tokio::test]
    async fn follows_next_links_until_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/list"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<html><body><a rel="next" href="/list/2">Next</a></body></html>"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/list/2"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("<html><body>last</body></html>"),
            )
            .mount(&server)
            .await;

        let base = Url::parse(&format!("{}/", server.uri())).unwrap();
        let start = base.join("list").unwrap();
        let mut pages = Paginator::new(test_client(), &start, &base, 10);

        let first = pages.next_page().await.unwrap().unwrap();
        assert_eq!(first.url.path(), "/list");
        let second = pages.next_page().await.unwrap().unwrap();
        assert_eq!(second.url.path(), "/list/2");
        assert!(pages.next_page().await.unwrap().is_none());
        assert!(pages.next_page().await.unwrap().is_none());
        assert_eq!(pages.pages_fetched(), 2);
    }

    #[tokio::test]
    async fn cyclic_pagination_terminates() {
        let server = MockServer::start().await;
        for (from, to) in [("/a", "/b"), ("/b", "/c"), ("/c", "/a")] {
            Mock::given(path(from))
                .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                    r#"<html><body><a href="{to}">Next</a></body></html>"#
                )))
                .expect(1)
                .mount(&server)
                .await;
        }

        let base = Url::parse(&format!("{}/", server.uri())).unwrap();
        let start = base.join("a").unwrap();
        let mut pages = Paginator::new(test_client(), &start, &base, 50);

        let mut count = 0;
        while pages.next_page().await.unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn page_cap_bounds_unending_pagination() {
        let server = MockServer::start().await;
        for i in 0..10 {
            Mock::given(path(format!("/p/{i}")))
                .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                    r#"<a rel="next" href="/p/{}">more</a>"#,
                    i + 1
                )))
                .mount(&server)
                .await;
        }

        let base = Url::parse(&format!("{}/", server.uri())).unwrap();
        let start = base.join("p/0").unwrap();
        let mut pages = Paginator::new(test_client(), &start, &base, 4);

        let mut count = 0;
        while pages.next_page().await.unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 4);
    }

    #[tokio::test]
    async fn http_error_fails_fast() {
        let server = MockServer::start().await;
        Mock::given(path("/broken"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let base = Url::parse(&format!("{}/", server.uri())).unwrap();
        let start = base.join("broken").unwrap();
        let mut pages = Paginator::new(test_client(), &start, &base, 5);

        let err = pages.next_page().await.unwrap_err();
        assert!(matches!(err, TenderwatchError::Network(_)));
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn relative_next_resolves_against_base_url() {
        let server = MockServer::start().await;
        Mock::given(path("/search/results"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<a class="next" href="search/results?page=2">2</a>"#,
            ))
            .mount(&server)
            .await;

        let base = Url::parse(&format!("{}/", server.uri())).unwrap();
        let start = base.join("search/results").unwrap();
        let mut pages = Paginator::new(test_client(), &start, &base, 5);

        pages.next_page().await.unwrap();
        let next = pages.next.clone().unwrap();
        assert_eq!(next.path(), "/search/results");
        assert_eq!(next.query(), Some("page=2"));
    }
}
