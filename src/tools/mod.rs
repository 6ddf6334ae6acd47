//! Tool implementations for Tarnhelm.
//!
//! `search` turns DuckDuckGo's HTML endpoint into ranked results and `fetch`
//! reduces arbitrary pages to their visible text. Both go through the
//! anti-censorship transport and their own rate limiter.

pub mod fetch;
pub mod search;

pub use fetch::{FetchClient, clean_page_text, truncate_content};
pub use search::{SearchClient, format_results, parse_search_results, unwrap_redirect_link};
