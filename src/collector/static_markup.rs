//! Static markup collection: raw HTTP fetch and `<script>` extraction.

use crate::collector::{FetchedPage, MarkupFetcher, ScriptElement};
use crate::types::{HttpConfig, Result};
use governor::{Quota, RateLimiter};
use reqwest::Client;
use scraper::{Html, Selector};
use std::num::NonZeroU32;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, trace};
use url::Url;

static SCRIPT_SELECTOR: OnceLock<Option<Selector>> = OnceLock::new();

fn script_selector() -> Option<&'static Selector> {
    SCRIPT_SELECTOR
        .get_or_init(|| Selector::parse("script").ok())
        .as_ref()
}

/// HTTP fetcher for page markup and script bodies.
pub struct HttpFetcher {
    client: Client,
    rate_limiter: Arc<RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>>,
}

impl HttpFetcher {
    /// Create a new fetcher.
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(10))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()?;

        let quota = Quota::per_second(NonZeroU32::new(config.rate_limit).unwrap_or(NonZeroU32::MIN));
        let rate_limiter = Arc::new(RateLimiter::direct(quota));

        Ok(Self { client, rate_limiter })
    }
}

impl MarkupFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage> {
        self.rate_limiter.until_ready().await;

        trace!("GET {}", url);
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();

        debug!("Fetched {} ({} bytes, status {})", url, body.len(), status);
        Ok(FetchedPage { status, body })
    }
}

/// Extract every `<script>` element from raw markup, in document order.
pub fn extract_script_elements(html: &str) -> Vec<ScriptElement> {
    let Some(selector) = script_selector() else {
        return Vec::new();
    };

    let document = Html::parse_document(html);
    document
        .select(selector)
        .map(|element| {
            let attrs = element.value();
            ScriptElement {
                src: attrs.attr("src").map(String::from),
                integrity: attrs.attr("integrity").map(String::from),
                outer_html: element.html(),
            }
        })
        .collect()
}
