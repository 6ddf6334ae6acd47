//! Basic usage example for Tarnhelm
//!
//! Run with: cargo run --example basic_usage

use futures::future::join_all;
use tarnhelm::cache::ResolutionCache;
use tarnhelm::dns::{DEFAULT_DOH_ENDPOINT, DOH_TIMEOUT, DohResolver};
use tarnhelm::limiter::RateLimiter;
use tarnhelm::tools::{fetch, search};
use tarnhelm::transport::{TransportConfig, build_client};
use tarnhelm::types::{FetchArgs, SafeSearchLevel, SearchArgs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("Tarnhelm Basic Usage Example\n");

    // Example 1: Resolve DuckDuckGo over DoH
    println!("=== Example 1: DNS-over-HTTPS ===\n");

    let resolver = DohResolver::new(DEFAULT_DOH_ENDPOINT, DOH_TIMEOUT)?;
    match resolver.resolve("html.duckduckgo.com").await {
        Ok(ip) => println!("html.duckduckgo.com -> {}", ip),
        Err(e) => eprintln!("DoH lookup failed: {}", e),
    }

    // Both clients dial through the same resolution cache
    let cache = ResolutionCache::new();
    let config = TransportConfig::default();

    let search_client = search::SearchClient::with_client(
        build_client(&config, cache.clone())?,
        RateLimiter::search(),
        search::DDG_HTML_URL,
    );
    let fetch_client =
        fetch::FetchClient::with_client(build_client(&config, cache.clone())?, RateLimiter::fetch());

    // Example 2: Basic search
    println!("\n=== Example 2: Basic Search ===\n");

    let search_args = SearchArgs {
        max_results: 5,
        safe_search: SafeSearchLevel::Moderate,
        ..SearchArgs::new("Rust programming language")
    };

    let first_link = match search_client.search(&search_args, None).await {
        Ok(results) => {
            println!("{}", search::format_results(&search_args.query, &results));
            results.first().map(|r| r.link.clone())
        },
        Err(e) => {
            eprintln!("Search failed: {}", e);
            None
        },
    };

    println!("Cached resolutions: {}", cache.len().await);

    // Example 3: Fetch the top result
    println!("\n=== Example 3: Fetch Webpage ===\n");

    let fetch_args = FetchArgs {
        url: first_link.unwrap_or_else(|| "https://www.rust-lang.org".to_string()),
    };

    match fetch_client.fetch(&fetch_args, None).await {
        Ok(content) => {
            println!("Content preview (first 500 chars):");
            println!("{}", content.chars().take(500).collect::<String>());
        },
        Err(e) => {
            eprintln!("Fetch failed: {}", e);
        },
    }

    // Example 4: Concurrent searches share the search rate limit
    println!("\n=== Example 4: Concurrent Searches ===\n");

    let queries = ["tokio async runtime", "serde serialization", "reqwest http client"]
        .map(|q| SearchArgs {
            max_results: 2,
            ..SearchArgs::new(q)
        });

    let started = std::time::Instant::now();
    let results = join_all(queries.iter().map(|args| search_client.search(args, None))).await;

    for (args, result) in queries.iter().zip(results) {
        match result {
            Ok(results) => println!("'{}' - {} results", args.query, results.len()),
            Err(e) => println!("'{}' failed: {}", args.query, e),
        }
    }
    println!("Took {:?}", started.elapsed());

    println!("\nExamples completed!");
    Ok(())
}
