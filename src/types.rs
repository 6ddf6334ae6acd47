//! Common types and data structures used throughout Tarnhelm.
//!
//! This module contains all the shared types including:
//! - Search and fetch tool arguments
//! - Search results
//! - Error types

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for Tarnhelm operations
pub type TarnhelmResult<T> = Result<T, TarnhelmError>;

/// Errors that can occur during Tarnhelm operations
#[derive(Error, Debug)]
pub enum TarnhelmError {
    /// HTTP request failed (dial, TLS, connection or body read)
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// URL parsing failed
    #[error("Invalid URL: {0}")]
    UrlParseError(#[from] url::ParseError),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// The caller's deadline fired while waiting for a rate limit token
    #[error("rate limit: wait cancelled before a request slot was available")]
    RateLimitCancelled,

    /// Upstream answered with a non-200 status
    #[error("status: {0}")]
    UpstreamStatus(u16),

    /// DNS-over-HTTPS lookup failed
    #[error("DoH lookup failed: {0}")]
    DohError(String),

    /// Redirect wrapper parameter could not be decoded
    #[error("Failed to decode redirect link: {0}")]
    DecodeError(String),

    /// Invalid arguments provided
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// Response body exceeded the fetch size cap
    #[error("Content too large: more than {0} bytes")]
    ContentTooLarge(u64),

    /// Server error
    #[error("Server error: {0}")]
    ServerError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// The caller's deadline fired during a network call
    #[error("Operation timed out")]
    Timeout,
}

/// Safe search filtering levels.
///
/// Conversion from text is case-insensitive and never fails: anything that is
/// not `strict` or `off` maps to [`SafeSearchLevel::Moderate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum SafeSearchLevel {
    /// No filtering
    Off,
    /// Moderate filtering (default)
    #[default]
    Moderate,
    /// Strict filtering
    Strict,
}

impl SafeSearchLevel {
    /// DuckDuckGo `kp` form value
    pub fn kp_code(&self) -> &'static str {
        match self {
            SafeSearchLevel::Off => "-2",
            SafeSearchLevel::Moderate => "-1",
            SafeSearchLevel::Strict => "1",
        }
    }
}

impl From<&str> for SafeSearchLevel {
    fn from(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "strict" => SafeSearchLevel::Strict,
            "off" => SafeSearchLevel::Off,
            _ => SafeSearchLevel::Moderate,
        }
    }
}

impl From<String> for SafeSearchLevel {
    fn from(value: String) -> Self {
        SafeSearchLevel::from(value.as_str())
    }
}

impl std::fmt::Display for SafeSearchLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SafeSearchLevel::Off => write!(f, "off"),
            SafeSearchLevel::Moderate => write!(f, "moderate"),
            SafeSearchLevel::Strict => write!(f, "strict"),
        }
    }
}

fn default_max_results() -> usize {
    10
}

/// Arguments for the search tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchArgs {
    /// The search query string
    pub query: String,

    /// Maximum number of results to return
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Safe search filtering level
    #[serde(default)]
    pub safe_search: SafeSearchLevel,
}

impl SearchArgs {
    /// Search arguments with default limits
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            max_results: default_max_results(),
            safe_search: SafeSearchLevel::default(),
        }
    }
}

/// Arguments for the fetch_content tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchArgs {
    /// URL of the page to fetch
    pub url: String,
}

/// A single search result.
///
/// `position` is the 1-based rank within the returned set and `link` is
/// always the real destination, never DuckDuckGo's redirect wrapper (unless
/// the wrapper could not be decoded).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Title of the result
    pub title: String,

    /// Destination URL
    pub link: String,

    /// Snippet text, empty when the result has none
    pub snippet: String,

    /// 1-based rank
    pub position: usize,
}

/// JSON Schema for search arguments (used for MCP tool definition)
pub fn search_args_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "query": {
                "type": "string",
                "description": "The search query string"
            },
            "max_results": {
                "type": "integer",
                "description": "Maximum number of results to return (default: 10)",
                "default": 10,
                "minimum": 1
            },
            "safe_search": {
                "type": "string",
                "enum": ["strict", "moderate", "off"],
                "description": "SafeSearch level: 'strict', 'moderate', or 'off' (default: 'moderate')",
                "default": "moderate"
            }
        },
        "required": ["query"]
    })
}

/// JSON Schema for fetch_content arguments
pub fn fetch_args_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "url": {
                "type": "string",
                "format": "uri",
                "description": "The webpage URL to fetch content from"
            }
        },
        "required": ["url"]
    })
}
