//! # Tarnhelm - Censorship-Resistant Search and Fetch MCP Server
//!
//! Tarnhelm is a Model Context Protocol (MCP) server that searches DuckDuckGo
//! and fetches web pages on networks where the search engine's hostname is
//! blocked or tampered with at the DNS level. It can be used as a library or
//! as a standalone CLI binary.
//!
//! ## Features
//!
//! - **DNS-over-HTTPS**: DuckDuckGo hosts are resolved through an IP-addressed
//!   DoH endpoint instead of the system resolver
//! - **Resolution cache**: successful lookups are shared by every client and
//!   reused for the life of the process
//! - **Rate limiting**: independent token buckets for search and fetch
//! - **Extraction**: ranked search results and cleaned page text
//! - **Dual Transport**: STDIO and HTTP (SSE) transports
//!
//! ## Quick Start
//!
//! ### As a Library
//!
//! ```rust,no_run
//! use tarnhelm::{ServerConfig, TarnhelmServer, TransportType};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = TarnhelmServer::new(ServerConfig::default())?;
//!     server.run(TransportType::Stdio).await?;
//!     Ok(())
//! }
//! ```
//!
//! ### Direct Tool Usage
//!
//! ```rust,no_run
//! use tarnhelm::{SearchArgs, tools::search};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = SearchArgs::new("Rust programming");
//!     let results = search::perform_search(&args).await?;
//!     println!("{}", search::format_results(&args.query, &results));
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`dns`]: DNS-over-HTTPS lookups
//! - [`cache`]: hostname to IP resolution cache
//! - [`transport`]: HTTP client whose resolution hook uses the cache and DoH
//! - [`limiter`]: per-operation rate limiting
//! - [`tools`]: search and content extraction
//! - [`server`]: MCP server implementation with transport handling
//! - [`types`]: common types, schemas and errors

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod cache;
pub mod dns;
pub mod limiter;
pub mod server;
pub mod tools;
pub mod transport;
pub mod types;

// Re-export commonly used items at crate root
pub use cache::ResolutionCache;
pub use server::{ServerConfig, TarnhelmServer, TransportType};
pub use types::{
    FetchArgs, SafeSearchLevel, SearchArgs, SearchResult, TarnhelmError, TarnhelmResult,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Server name for MCP protocol
pub const SERVER_NAME: &str = "tarnhelm";

/// Server description
pub const SERVER_DESCRIPTION: &str = "Censorship-resistant DuckDuckGo search and fetch MCP server";
