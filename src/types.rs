//! Core types and errors for the script auditor.

use crate::resource::ResourceRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while auditing a target.
#[derive(Error, Debug)]
pub enum MagescopeError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, MagescopeError>;

/// Configuration for the static markup fetcher.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Requests per second across one fetcher.
    pub rate_limit: u32,
}

/// Desktop Chrome User-Agent sent with every static fetch.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            rate_limit: 10,
        }
    }
}

/// Reconciled view of one target, ready for JSON or table rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteReport {
    /// Page under analysis.
    pub target_url: String,
    pub resource_count: usize,
    /// Resources seen in the static markup.
    pub html_resource_count: usize,
    /// Resources seen in the rendered DOM.
    pub dom_resource_count: usize,
    /// Resources whose body was fetched.
    pub resource_resource_count: usize,
    pub resources: Vec<ResourceRecord>,
    /// Recovered failures encountered during the run.
    #[serde(default)]
    pub errors: Vec<String>,
}

impl SiteReport {
    /// Report for a target whose run could not even start.
    pub fn failed(target: &str, error: String) -> Self {
        Self {
            target_url: target.to_string(),
            resource_count: 0,
            html_resource_count: 0,
            dom_resource_count: 0,
            resource_resource_count: 0,
            resources: Vec::new(),
            errors: vec![error],
        }
    }

    /// Records present in the rendered DOM but absent from the static markup.
    pub fn injected(&self) -> impl Iterator<Item = &ResourceRecord> {
        self.resources.iter().filter(|r| r.in_dom && !r.in_html)
    }
}

/// Pretty-printed JSON array of `reports`.
pub fn reports_to_json(reports: &[SiteReport]) -> Result<String> {
    Ok(serde_json::to_string_pretty(reports)?)
}
