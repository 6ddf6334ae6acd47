//! DuckDuckGo search implementation.
//!
//! This module provides web search functionality using DuckDuckGo's
//! HTML interface, dialed through the anti-censorship transport.

use crate::cache::ResolutionCache;
use crate::limiter::RateLimiter;
use crate::transport::{TransportConfig, build_client, with_deadline};
use crate::types::{SafeSearchLevel, SearchArgs, SearchResult, TarnhelmError, TarnhelmResult};
use lazy_static::lazy_static;
use reqwest::{Client, StatusCode};
use scraper::{Html, Selector};
use std::fmt::Write as _;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// DuckDuckGo HTML search URL
pub const DDG_HTML_URL: &str = "https://html.duckduckgo.com/html";

/// Marker found in sponsored result links
const AD_MARKER: &str = "y.js";

/// Host and path of DuckDuckGo's redirect wrapper
const REDIRECT_WRAPPER: &str = "//duckduckgo.com/l/?";

/// Query parameter carrying the wrapped destination
const REDIRECT_PARAM: &str = "uddg=";

lazy_static! {
    /// Selector for search results
    static ref RESULT_SELECTOR: Selector = Selector::parse(".result").unwrap();

    /// Selector for the result title container
    static ref TITLE_SELECTOR: Selector = Selector::parse(".result__title").unwrap();

    /// Selector for the title link
    static ref LINK_SELECTOR: Selector = Selector::parse("a").unwrap();

    /// Selector for result snippet
    static ref SNIPPET_SELECTOR: Selector = Selector::parse(".result__snippet").unwrap();
}

/// HTTP client for making search requests
#[derive(Clone, Debug)]
pub struct SearchClient {
    client: Client,
    limiter: RateLimiter,
    endpoint: String,
}

impl SearchClient {
    /// Create a search client with the default transport and rate limit
    pub fn new() -> TarnhelmResult<Self> {
        let client = build_client(&TransportConfig::default(), ResolutionCache::new())?;
        Ok(Self::with_client(client, RateLimiter::search(), DDG_HTML_URL))
    }

    /// Create a search client from its parts
    pub fn with_client(client: Client, limiter: RateLimiter, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            limiter,
            endpoint: endpoint.into(),
        }
    }

    /// Perform a DuckDuckGo search
    #[instrument(skip(self, deadline), fields(query = %args.query))]
    pub async fn search(
        &self,
        args: &SearchArgs,
        deadline: Option<Instant>,
    ) -> TarnhelmResult<Vec<SearchResult>> {
        self.limiter.admit(deadline).await?;

        info!(
            query = %args.query,
            max_results = args.max_results,
            safe_search = %args.safe_search,
            "Performing search"
        );

        let form = build_search_form(&args.query, args.safe_search);
        let html = with_deadline(deadline, self.execute_search(&form)).await?;
        let results = parse_search_results(&html, args.max_results);

        info!(
            query = %args.query,
            result_count = results.len(),
            "Search completed"
        );

        Ok(results)
    }

    /// Submit the search form and read the result page
    async fn execute_search(&self, form: &[(&str, &str)]) -> TarnhelmResult<String> {
        let response = self.client.post(&self.endpoint).form(form).send().await?;

        let status = response.status();
        if status != StatusCode::OK {
            warn!(status = %status, "Search returned non-OK status");
            return Err(TarnhelmError::UpstreamStatus(status.as_u16()));
        }

        Ok(response.text().await?)
    }
}

/// Form fields for DuckDuckGo's HTML endpoint
fn build_search_form(query: &str, safe_search: SafeSearchLevel) -> Vec<(&str, &str)> {
    vec![
        ("q", query),
        ("b", ""),
        ("kl", ""),
        ("kp", safe_search.kp_code()),
    ]
}

/// Perform a search with a freshly built client
///
/// # Example
///
/// ```rust,no_run
/// use tarnhelm::{SearchArgs, tools::search::perform_search};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let results = perform_search(&SearchArgs::new("Rust programming")).await?;
///     println!("Found {} results", results.len());
///     Ok(())
/// }
/// ```
pub async fn perform_search(args: &SearchArgs) -> TarnhelmResult<Vec<SearchResult>> {
    let client = SearchClient::new()?;
    client.search(args, None).await
}

/// Parse up to `max_results` results from a DuckDuckGo HTML page.
///
/// Results without a title link and sponsored results are skipped. Parsing
/// stops as soon as `max_results` results have been accepted.
pub fn parse_search_results(html: &str, max_results: usize) -> Vec<SearchResult> {
    let document = Html::parse_document(html);
    let mut results = Vec::new();

    for element in document.select(&RESULT_SELECTOR) {
        if results.len() >= max_results {
            break;
        }

        let Some(title_element) = element.select(&TITLE_SELECTOR).next() else {
            continue;
        };
        let Some(link_element) = title_element.select(&LINK_SELECTOR).next() else {
            continue;
        };
        let Some(href) = link_element.value().attr("href") else {
            continue;
        };

        if href.contains(AD_MARKER) {
            debug!(href = %href, "Skipping sponsored result");
            continue;
        }

        let title = link_element.text().collect::<String>().trim().to_string();
        let link = resolve_result_link(href);

        let snippet = element
            .select(&SNIPPET_SELECTOR)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .unwrap_or_default();

        results.push(SearchResult {
            title,
            link,
            snippet,
            position: results.len() + 1,
        });
    }

    if results.is_empty() {
        warn!("No search results found in response");
    }

    results
}

/// Turn a result href into the link handed to callers
fn resolve_result_link(href: &str) -> String {
    if is_redirect_wrapper(href) {
        return match unwrap_redirect_link(href) {
            Ok(destination) => destination,
            Err(e) => {
                debug!(href = %href, error = %e, "Keeping undecodable redirect link");
                href.to_string()
            },
        };
    }

    if href.starts_with("//") {
        return format!("https:{}", href);
    }

    href.to_string()
}

/// Whether `href` is DuckDuckGo's redirect wrapper form
pub fn is_redirect_wrapper(href: &str) -> bool {
    href.trim_start_matches("https:").starts_with(REDIRECT_WRAPPER) && href.contains(REDIRECT_PARAM)
}

/// Extract the destination wrapped in a DuckDuckGo redirect link.
///
/// `//duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.com&rut=abc` yields
/// `https://example.com`.
pub fn unwrap_redirect_link(href: &str) -> TarnhelmResult<String> {
    let encoded = href
        .split(REDIRECT_PARAM)
        .nth(1)
        .and_then(|rest| rest.split('&').next())
        .ok_or_else(|| TarnhelmError::DecodeError(format!("no {} parameter", REDIRECT_PARAM)))?;

    query_unescape(encoded)
}

/// Decode a query component: `+` is a space and every `%` must start a
/// two-digit hex escape.
fn query_unescape(component: &str) -> TarnhelmResult<String> {
    let bytes = component.as_bytes();
    for (i, byte) in bytes.iter().enumerate() {
        if *byte == b'%' {
            let valid = bytes.len() > i + 2
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit();
            if !valid {
                let escape: String = component[i..].chars().take(3).collect();
                return Err(TarnhelmError::DecodeError(format!(
                    "invalid URL escape {:?}",
                    escape
                )));
            }
        }
    }

    let spaced = component.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|decoded| decoded.into_owned())
        .map_err(|e| TarnhelmError::DecodeError(e.to_string()))
}

/// Render search results as Markdown for an LLM
pub fn format_results(query: &str, results: &[SearchResult]) -> String {
    if results.is_empty() {
        return format!(
            "# DuckDuckGo Search Results\n\nNo results found for query: \"{}\"",
            query
        );
    }

    let mut output = format!(
        "# DuckDuckGo Search Results\n\nFound {} results for: \"{}\"\n\n---\n\n",
        results.len(),
        query
    );

    for result in results {
        let _ = write!(
            output,
            "### {}\n{}\n\n🔗 [Read More]({})\n\n",
            result.title, result.snippet, result.link
        );
    }

    output
}
