//! Page fetching and content extraction implementation.
//!
//! This module fetches web pages through the anti-censorship transport and
//! reduces them to a compact block of visible text.

use crate::cache::ResolutionCache;
use crate::limiter::RateLimiter;
use crate::transport::{TransportConfig, build_client, with_deadline};
use crate::types::{FetchArgs, TarnhelmError, TarnhelmResult};
use lazy_static::lazy_static;
use reqwest::{Client, StatusCode};
use scraper::{Html, Selector};
use tokio::time::Instant;
use tracing::{info, instrument, warn};
use url::Url;

/// Maximum content size (10MB)
const MAX_CONTENT_SIZE: u64 = 10 * 1024 * 1024;

/// Characters of cleaned text kept before truncation
pub const MAX_CONTENT_CHARS: usize = 8000;

/// Appended to truncated content
pub const TRUNCATION_MARKER: &str = "... [truncated]";

lazy_static! {
    // Elements that never carry page content
    static ref NOISE_SELECTOR: Selector =
        Selector::parse("script, style, nav, header, footer").unwrap();
}

/// HTTP client for fetching pages
#[derive(Clone, Debug)]
pub struct FetchClient {
    client: Client,
    limiter: RateLimiter,
    max_body_bytes: u64,
}

impl FetchClient {
    /// Create a fetch client with the default transport and rate limit
    pub fn new() -> TarnhelmResult<Self> {
        let client = build_client(&TransportConfig::default(), ResolutionCache::new())?;
        Ok(Self::with_client(client, RateLimiter::fetch()))
    }

    /// Create a fetch client from its parts
    pub fn with_client(client: Client, limiter: RateLimiter) -> Self {
        Self {
            client,
            limiter,
            max_body_bytes: MAX_CONTENT_SIZE,
        }
    }

    /// Replace the body size cap
    pub fn with_max_body_bytes(mut self, max_body_bytes: u64) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    /// Fetch a page and return its cleaned text, prefixed with its length.
    ///
    /// Bodies larger than the size cap (10 MiB unless replaced) are rejected
    /// with [`TarnhelmError::ContentTooLarge`] whether or not the server sends
    /// a `Content-Length`.
    #[instrument(skip(self, deadline), fields(url = %args.url))]
    pub async fn fetch(&self, args: &FetchArgs, deadline: Option<Instant>) -> TarnhelmResult<String> {
        let parsed_url = parse_fetch_url(&args.url)?;

        self.limiter.admit(deadline).await?;

        info!(url = %args.url, "Fetching page");

        let html = with_deadline(deadline, self.fetch_html(parsed_url)).await?;
        let text = truncate_content(&clean_page_text(&html));
        let char_count = text.chars().count();

        info!(url = %args.url, char_count, "Page fetched successfully");

        Ok(format!(
            "Successfully fetched and parsed content ({} characters):\n{}",
            char_count, text
        ))
    }

    async fn fetch_html(&self, url: Url) -> TarnhelmResult<String> {
        let mut response = self.client.get(url).send().await?;

        let status = response.status();
        if status != StatusCode::OK {
            warn!(status = %status, "Fetch returned non-OK status");
            return Err(TarnhelmError::UpstreamStatus(status.as_u16()));
        }

        let limit = self.max_body_bytes;
        if response.content_length().is_some_and(|len| len > limit) {
            return Err(TarnhelmError::ContentTooLarge(limit));
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if body.len() as u64 + chunk.len() as u64 > limit {
                warn!(limit, "Fetch body exceeded size cap");
                return Err(TarnhelmError::ContentTooLarge(limit));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

/// Fetch a page with a freshly built client
///
/// # Example
///
/// ```rust,no_run
/// use tarnhelm::{FetchArgs, tools::fetch::fetch_content};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let args = FetchArgs { url: "https://example.com".to_string() };
///     println!("{}", fetch_content(&args).await?);
///     Ok(())
/// }
/// ```
pub async fn fetch_content(args: &FetchArgs) -> TarnhelmResult<String> {
    let client = FetchClient::new()?;
    client.fetch(args, None).await
}

/// Parse a fetch target, accepting only http and https
fn parse_fetch_url(raw: &str) -> TarnhelmResult<Url> {
    let url = Url::parse(raw)?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        _ => Err(TarnhelmError::InvalidArguments(
            "Only HTTP(S) URLs are supported".to_string(),
        )),
    }
}

/// Visible text of an HTML document as a single whitespace-normalized line.
///
/// Scripts, styles, navigation, headers and footers are removed first.
pub fn clean_page_text(html: &str) -> String {
    let mut document = Html::parse_document(html);

    let noise: Vec<_> = document.select(&NOISE_SELECTOR).map(|el| el.id()).collect();
    for id in noise {
        if let Some(mut node) = document.tree.get_mut(id) {
            node.detach();
        }
    }

    let text: String = document.root_element().text().collect();
    normalize_whitespace(&text)
}

/// Trim every line, collapse whitespace runs, drop empty lines and join the
/// rest with single spaces
fn normalize_whitespace(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Keep the first [`MAX_CONTENT_CHARS`] characters, marking the cut
pub fn truncate_content(text: &str) -> String {
    match text.char_indices().nth(MAX_CONTENT_CHARS) {
        Some((cut, _)) => format!("{}{}", &text[..cut], TRUNCATION_MARKER),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fetch_url() {
        assert!(parse_fetch_url("https://example.com").is_ok());
        assert_eq!(
            parse_fetch_url("http://example.com/a?b=1").unwrap().path(),
            "/a"
        );
        for unsupported in ["ftp://example.com", "javascript:alert(1)", "file:///etc/hosts"] {
            assert!(matches!(
                parse_fetch_url(unsupported),
                Err(TarnhelmError::InvalidArguments(_))
            ));
        }
        assert!(matches!(
            parse_fetch_url("not a url"),
            Err(TarnhelmError::UrlParseError(_))
        ));
    }

    #[test]
    fn test_clean_page_text_strips_script() {
        let html = "<html><script>x</script><body>  Hello   World  </body></html>";
        assert_eq!(clean_page_text(html), "Hello World");
    }

    #[test]
    fn test_clean_page_text_strips_noise_elements() {
        let html = r#"<html>
            <head><style>body { color: red; }</style><title>Page</title></head>
            <body>
                <header>Site header</header>
                <nav><a href="/">Home</a></nav>
                <article>
                    <h1>Heading</h1>
                    <p>First   paragraph.</p>
                    <script>var tracking = 1;</script>
                </article>
                <footer>Copyright</footer>
            </body>
        </html>"#;

        let text = clean_page_text(html);

        assert_eq!(text, "Page Heading First paragraph.");
    }

    #[test]
    fn test_normalize_whitespace() {
        let input = "  first   line  \n\n   \t  \nsecond\tline\n";
        assert_eq!(normalize_whitespace(input), "first line second line");
    }

    #[test]
    fn test_whitespace_only_input() {
        assert_eq!(normalize_whitespace(" \n\t\n   "), "");
    }

    #[test]
    fn test_truncate_content() {
        let long = "a".repeat(9000);
        let truncated = truncate_content(&long);

        assert!(truncated.ends_with(TRUNCATION_MARKER));
        assert_eq!(
            truncated.chars().count(),
            MAX_CONTENT_CHARS + TRUNCATION_MARKER.chars().count()
        );
        assert_eq!(&truncated[..MAX_CONTENT_CHARS], "a".repeat(MAX_CONTENT_CHARS));
    }

    #[test]
    fn test_truncate_content_exact_limit() {
        let exact = "b".repeat(MAX_CONTENT_CHARS);
        assert_eq!(truncate_content(&exact), exact);
    }

    #[test]
    fn test_truncate_content_counts_characters() {
        let wide = "é".repeat(MAX_CONTENT_CHARS + 1);
        let truncated = truncate_content(&wide);
        assert_eq!(
            truncated.trim_end_matches(TRUNCATION_MARKER).chars().count(),
            MAX_CONTENT_CHARS
        );
    }
}
