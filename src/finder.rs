//! Reconciliation engine: collects scripts from the static markup and the
//! rendered DOM of one target and merges them by absolute URL.
//!
//! A run moves through its phases strictly once and in order:
//!
//! 1. static collection (HTTP fetch, recoverable on failure)
//! 2. dynamic collection (browser render, fatal for the DOM phase on failure)
//! 3. optional content fetch (script bodies, hashed for integrity checks)
//!
//! Failures never abort the run; they are logged and kept in the report's
//! `errors` list so callers always receive a best-effort report.

use crate::collector::{
    extract_script_elements, DomRenderer, MarkupFetcher, RenderSession, ScriptElement,
};
use crate::resource::{Channel, ScriptResource};
use crate::types::{MagescopeError, Result, SiteReport};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Default browser page-load timeout.
pub const DEFAULT_PAGE_TIMEOUT: Duration = Duration::from_secs(90);

/// Default wait after navigation for deferred and async scripts to land.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(20);

/// Per-run settings.
#[derive(Debug, Clone)]
pub struct FinderConfig {
    pub page_timeout: Duration,
    pub settle_delay: Duration,
    /// Log every observed script at info level.
    pub debug: bool,
    /// Fetch each script body after the DOM phase.
    pub fetch_scripts: bool,
}

impl Default for FinderConfig {
    fn default() -> Self {
        Self {
            page_timeout: DEFAULT_PAGE_TIMEOUT,
            settle_delay: DEFAULT_SETTLE_DELAY,
            debug: false,
            fetch_scripts: false,
        }
    }
}

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    StaticCollection,
    DynamicCollection,
    ContentFetch,
    Done,
}

/// Collects and reconciles the scripts of a single target page.
pub struct ScriptFinder {
    target: Url,
    config: FinderConfig,
    phase: Phase,
    resources: Vec<ScriptResource>,
    /// Absolute URL -> position in `resources`.
    index: HashMap<String, usize>,
    page_data: Option<Vec<u8>>,
    rendered_markup: Option<String>,
    errors: Vec<String>,
}

impl ScriptFinder {
    pub fn new(target: Url, config: FinderConfig) -> Self {
        Self {
            target,
            config,
            phase: Phase::Idle,
            resources: Vec::new(),
            index: HashMap::new(),
            page_data: None,
            rendered_markup: None,
            errors: Vec::new(),
        }
    }

    pub fn target(&self) -> &Url {
        &self.target
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Run every phase once. A finder cannot be run twice.
    pub async fn run<F, R>(&mut self, fetcher: &F, renderer: &R) -> Result<()>
    where
        F: MarkupFetcher,
        R: DomRenderer,
    {
        if self.phase != Phase::Idle {
            return Err(MagescopeError::Config(format!(
                "{} has already been analysed",
                self.target
            )));
        }

        self.collect_static(fetcher).await;
        self.collect_rendered(renderer).await;
        if self.config.fetch_scripts {
            self.fetch_contents(fetcher).await;
        }

        self.phase = Phase::Done;
        info!(
            "{}: {} scripts ({} in markup, {} in DOM)",
            self.target,
            self.resource_count(),
            self.html_resource_count(),
            self.dom_resource_count()
        );
        Ok(())
    }

    async fn collect_static<F: MarkupFetcher>(&mut self, fetcher: &F) {
        self.phase = Phase::StaticCollection;
        debug!("Fetching static markup: {}", self.target);

        let page = match fetcher.fetch(&self.target).await {
            Ok(page) => page,
            Err(e) => {
                self.record_error(format!("Static fetch failed: {}", e));
                return;
            }
        };

        if !page.is_success() {
            self.record_error(format!(
                "Non-success status code {} received for {}",
                page.status, self.target
            ));
            return;
        }

        let elements = extract_script_elements(&String::from_utf8_lossy(&page.body));
        self.page_data = Some(page.body);
        self.merge_static(&elements);
    }

    async fn collect_rendered<R: DomRenderer>(&mut self, renderer: &R) {
        self.phase = Phase::DynamicCollection;

        let mut session = match renderer.launch().await {
            Ok(session) => session,
            Err(e) => {
                self.record_error(format!("Browser launch failed: {}", e));
                return;
            }
        };

        let outcome = self.observe_dom(&mut session).await;
        session.shutdown().await;

        if let Err(e) = outcome {
            self.record_error(format!("DOM collection failed: {}", e));
        }
    }

    /// Navigate, settle, enumerate. Nothing is merged unless every step succeeds.
    async fn observe_dom<S: RenderSession>(&mut self, session: &mut S) -> Result<()> {
        session.navigate(&self.target, self.config.page_timeout).await?;

        if !self.config.settle_delay.is_zero() {
            debug!(
                "Waiting {}s for the DOM to settle",
                self.config.settle_delay.as_secs()
            );
            tokio::time::sleep(self.config.settle_delay).await;
        }

        self.rendered_markup = Some(session.page_source().await?);
        let elements = session.script_elements().await?;
        self.merge_rendered(&elements);
        Ok(())
    }

    async fn fetch_contents<F: MarkupFetcher>(&mut self, fetcher: &F) {
        self.phase = Phase::ContentFetch;

        for resource in self.resources.iter_mut() {
            match fetcher.fetch(&resource.url).await {
                Ok(page) if page.is_success() => {
                    resource.set_content(page.body);
                    resource.mark_observed_in(Channel::FetchedResource);
                }
                Ok(page) => debug!("Script {} returned status {}", resource.url, page.status),
                Err(e) => debug!("Failed to fetch script {}: {}", resource.url, e),
            }
        }
    }

    /// Seed the resource set from markup `<script>` elements.
    pub fn merge_static(&mut self, elements: &[ScriptElement]) {
        for element in elements {
            let Some(url) = element.resolve(&self.target) else {
                continue;
            };
            log_observation(self.config.debug, Channel::StaticHtml, &url, element);

            let resource = self.upsert(url, element);
            resource.mark_observed_in(Channel::StaticHtml);
        }
    }

    /// Merge live DOM `<script>` elements into the resource set.
    pub fn merge_rendered(&mut self, elements: &[ScriptElement]) {
        for element in elements {
            let Some(url) = element.resolve(&self.target) else {
                continue;
            };
            log_observation(self.config.debug, Channel::RenderedDom, &url, element);

            let known = self.index.contains_key(url.as_str());
            let resource = self.upsert(url, element);

            if !known {
                warn!("Script present only after render: {}", resource.url);
            } else if resource.in_static_html()
                && element
                    .integrity
                    .as_deref()
                    .is_some_and(|sri| !sri.trim().is_empty())
                && element.integrity != resource.declared_integrity
            {
                warn!(
                    "Integrity of {} changed after render: {:?} -> {:?}",
                    resource.url, resource.declared_integrity, element.integrity
                );
            }
            resource.mark_observed_in(Channel::RenderedDom);
        }
    }

    /// The existing resource for `url`, or a new one built from `element`.
    fn upsert(&mut self, url: Url, element: &ScriptElement) -> &mut ScriptResource {
        let position = match self.index.get(url.as_str()) {
            Some(&position) => position,
            None => {
                let position = self.resources.len();
                self.index.insert(url.to_string(), position);
                self.resources.push(ScriptResource::new(
                    url,
                    element.integrity.clone(),
                    element.outer_html.clone(),
                ));
                position
            }
        };
        &mut self.resources[position]
    }

    fn record_error(&mut self, message: String) {
        warn!("{}", message);
        self.errors.push(message);
    }

    /// Resources in discovery order.
    pub fn resources(&self) -> &[ScriptResource] {
        &self.resources
    }

    pub fn resource_for(&self, url: &Url) -> Option<&ScriptResource> {
        self.index
            .get(url.as_str())
            .map(|&position| &self.resources[position])
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn count_observed_in(&self, channel: Channel) -> usize {
        self.resources
            .iter()
            .filter(|r| r.is_observed_in(channel))
            .count()
    }

    pub fn html_resource_count(&self) -> usize {
        self.count_observed_in(Channel::StaticHtml)
    }

    pub fn dom_resource_count(&self) -> usize {
        self.count_observed_in(Channel::RenderedDom)
    }

    pub fn fetched_resource_count(&self) -> usize {
        self.count_observed_in(Channel::FetchedResource)
    }

    /// Raw bytes of the last successful static fetch.
    pub fn page_data(&self) -> Option<&[u8]> {
        self.page_data.as_deref()
    }

    /// Live document markup, captured once the DOM has settled.
    pub fn rendered_markup(&self) -> Option<&str> {
        self.rendered_markup.as_deref()
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn report(&self) -> SiteReport {
        SiteReport {
            target_url: self.target.to_string(),
            resource_count: self.resource_count(),
            html_resource_count: self.html_resource_count(),
            dom_resource_count: self.dom_resource_count(),
            resource_resource_count: self.fetched_resource_count(),
            resources: self.resources.iter().map(ScriptResource::to_record).collect(),
            errors: self.errors.clone(),
        }
    }
}

fn log_observation(verbose: bool, channel: Channel, url: &Url, element: &ScriptElement) {
    if verbose {
        info!(
            "{:?} script at {} with integrity {:?} and tag {}",
            channel, url, element.integrity, element.outer_html
        );
    } else {
        debug!("{:?} script at {}", channel, url);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::testing::{dom_script, inline_script, Failure, ScriptedFetcher, ScriptedRenderer};
    use crate::hashing::HashAlgorithm;
    use crate::resource::IntegrityStatus;
    use std::sync::atomic::Ordering;

    const TARGET: &str = "https://example.com/shop";

    fn test_config() -> FinderConfig {
        FinderConfig {
            settle_delay: Duration::ZERO,
            ..FinderConfig::default()
        }
    }

    fn make_finder() -> ScriptFinder {
        ScriptFinder::new(Url::parse(TARGET).unwrap(), test_config())
    }

    fn find<'a>(finder: &'a ScriptFinder, url: &str) -> &'a ScriptResource {
        finder
            .resource_for(&Url::parse(url).unwrap())
            .unwrap_or_else(|| panic!("no resource for {}", url))
    }

    #[tokio::test]
    async fn test_injected_script_is_reported() {
        let fetcher = ScriptedFetcher::page(TARGET, 200, r#"<script src="/a.js"></script>"#);
        let renderer = ScriptedRenderer::new(vec![
            dom_script("/a.js"),
            dom_script("https://evil.cdn/x.js"),
        ]);

        let mut finder = make_finder();
        finder.run(&fetcher, &renderer).await.unwrap();

        let report = finder.report();
        assert_eq!(report.resource_count, 2);
        assert_eq!(report.html_resource_count, 1);
        assert_eq!(report.dom_resource_count, 2);
        assert_eq!(report.resource_resource_count, 0);
        assert!(report.errors.is_empty());

        let evil = find(&finder, "https://evil.cdn/x.js");
        assert!(!evil.in_static_html());
        assert!(evil.in_rendered_dom());

        let injected: Vec<_> = report.injected().map(|r| r.url.as_str()).collect();
        assert_eq!(injected, vec!["https://evil.cdn/x.js"]);
    }

    #[tokio::test]
    async fn test_static_and_dom_merge_into_one_resource() {
        let fetcher = ScriptedFetcher::page(
            TARGET,
            200,
            r#"<script src="/lib/app.js" integrity="sha384-abc"></script>"#,
        );
        let renderer = ScriptedRenderer::new(vec![dom_script("https://example.com/lib/app.js")]);

        let mut finder = make_finder();
        finder.run(&fetcher, &renderer).await.unwrap();

        assert_eq!(finder.resource_count(), 1);
        let app = find(&finder, "https://example.com/lib/app.js");
        assert!(app.in_static_html());
        assert!(app.in_rendered_dom());
        // Static declaration wins for integrity and tag
        assert_eq!(app.declared_integrity.as_deref(), Some("sha384-abc"));
        assert!(app.tag.contains("integrity"));
    }

    #[tokio::test]
    async fn test_relative_src_resolves_identically_in_both_phases() {
        let fetcher = ScriptedFetcher::page(TARGET, 200, r#"<script src="/lib/app.js"></script>"#);
        let renderer = ScriptedRenderer::new(vec![dom_script("/lib/app.js")]);

        let mut finder = make_finder();
        finder.run(&fetcher, &renderer).await.unwrap();

        assert_eq!(finder.resource_count(), 1);
        assert_eq!(
            finder.resources()[0].url.as_str(),
            "https://example.com/lib/app.js"
        );
        assert!(finder.resources()[0].in_static_html());
        assert!(finder.resources()[0].in_rendered_dom());
    }

    #[tokio::test]
    async fn test_static_404_still_runs_dom_phase() {
        let fetcher = ScriptedFetcher::page(TARGET, 404, r#"<script src="/a.js"></script>"#);
        let renderer = ScriptedRenderer::new(vec![dom_script("/a.js"), dom_script("/b.js")]);

        let mut finder = make_finder();
        finder.run(&fetcher, &renderer).await.unwrap();

        let report = finder.report();
        assert_eq!(report.html_resource_count, 0);
        assert_eq!(report.dom_resource_count, 2);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("404"));
        assert!(finder.page_data().is_none());
        assert_eq!(renderer.launches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unreachable_static_still_runs_dom_phase() {
        let fetcher = ScriptedFetcher::default();
        let renderer = ScriptedRenderer::new(vec![dom_script("/a.js")]);

        let mut finder = make_finder();
        finder.run(&fetcher, &renderer).await.unwrap();

        assert_eq!(finder.html_resource_count(), 0);
        assert_eq!(finder.dom_resource_count(), 1);
        assert!(finder.errors()[0].starts_with("Static fetch failed"));
    }

    #[tokio::test]
    async fn test_navigation_failure_keeps_static_and_releases_driver() {
        let fetcher = ScriptedFetcher::page(
            TARGET,
            200,
            r#"<script src="/a.js"></script><script src="/b.js"></script>"#,
        );
        let renderer =
            ScriptedRenderer::new(vec![dom_script("/a.js"), dom_script("/c.js")]).failing(Failure::Navigation);

        let mut finder = make_finder();
        finder.run(&fetcher, &renderer).await.unwrap();

        let report = finder.report();
        assert_eq!(report.resource_count, 2);
        assert_eq!(report.html_resource_count, 2);
        assert_eq!(report.dom_resource_count, 0);
        assert!(report.errors[0].contains("timed out"));
        assert!(finder.rendered_markup().is_none());
        assert_eq!(renderer.launches.load(Ordering::SeqCst), 1);
        assert_eq!(renderer.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_enumeration_failure_yields_no_dom_resources() {
        let fetcher = ScriptedFetcher::page(TARGET, 200, r#"<script src="/a.js"></script>"#);
        let renderer = ScriptedRenderer::new(vec![dom_script("/a.js")]).failing(Failure::Enumeration);

        let mut finder = make_finder();
        finder.run(&fetcher, &renderer).await.unwrap();

        let a = find(&finder, "https://example.com/a.js");
        assert!(a.in_static_html());
        assert!(!a.in_rendered_dom());
        assert_eq!(finder.dom_resource_count(), 0);
        assert!(finder.rendered_markup().is_some());
        assert_eq!(renderer.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rendered_markup_captured_after_settle() {
        let fetcher = ScriptedFetcher::page(TARGET, 200, r#"<script src="/a.js"></script>"#);
        let renderer = ScriptedRenderer::new(vec![dom_script("/a.js")])
            .with_late(Duration::from_millis(20), vec![dom_script("https://evil.cdn/late.js")]);

        let mut finder = ScriptFinder::new(
            Url::parse(TARGET).unwrap(),
            FinderConfig {
                settle_delay: Duration::from_millis(60),
                ..FinderConfig::default()
            },
        );
        finder.run(&fetcher, &renderer).await.unwrap();

        let markup = finder.rendered_markup().unwrap();
        assert!(markup.contains("/a.js"));
        assert!(markup.contains("https://evil.cdn/late.js"));
        assert!(find(&finder, "https://evil.cdn/late.js").in_rendered_dom());
    }

    #[tokio::test]
    async fn test_launch_failure_is_recovered() {
        let fetcher = ScriptedFetcher::page(TARGET, 200, r#"<script src="/a.js"></script>"#);
        let renderer = ScriptedRenderer::new(vec![]).failing(Failure::Launch);

        let mut finder = make_finder();
        finder.run(&fetcher, &renderer).await.unwrap();

        assert_eq!(finder.html_resource_count(), 1);
        assert_eq!(finder.dom_resource_count(), 0);
        assert!(finder.errors()[0].contains("Browser launch failed"));
        assert_eq!(renderer.shutdowns.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_driver_released_on_success() {
        let fetcher = ScriptedFetcher::page(TARGET, 200, "");
        let renderer = ScriptedRenderer::new(vec![dom_script("/a.js")]);

        let mut finder = make_finder();
        finder.run(&fetcher, &renderer).await.unwrap();

        assert_eq!(renderer.shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(finder.phase(), Phase::Done);
    }

    #[tokio::test]
    async fn test_markup_only_script_stays_static() {
        let fetcher = ScriptedFetcher::page(
            TARGET,
            200,
            r#"<script src="/a.js"></script><script src="/removed.js"></script>"#,
        );
        let renderer = ScriptedRenderer::new(vec![dom_script("/a.js")]);

        let mut finder = make_finder();
        finder.run(&fetcher, &renderer).await.unwrap();

        let removed = find(&finder, "https://example.com/removed.js");
        assert!(removed.in_static_html());
        assert!(!removed.in_rendered_dom());
    }

    #[tokio::test]
    async fn test_inline_scripts_are_not_tracked() {
        let fetcher = ScriptedFetcher::page(TARGET, 200, "<script>var x = 1;</script><script src=\"\"></script>");
        let renderer = ScriptedRenderer::new(vec![inline_script(), dom_script("")]);

        let mut finder = make_finder();
        finder.run(&fetcher, &renderer).await.unwrap();

        assert_eq!(finder.resource_count(), 0);
        assert!(finder.page_data().is_some());
    }

    #[tokio::test]
    async fn test_run_only_once() {
        let fetcher = ScriptedFetcher::page(TARGET, 200, "");
        let renderer = ScriptedRenderer::new(vec![]);

        let mut finder = make_finder();
        finder.run(&fetcher, &renderer).await.unwrap();
        assert!(finder.run(&fetcher, &renderer).await.is_err());
        assert_eq!(renderer.launches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_scripts_hashes_content() {
        let body = b"console.log('hi');";
        let fetcher = ScriptedFetcher::page(TARGET, 200, r#"<script src="/a.js"></script>"#)
            .with("https://example.com/a.js", 200, body)
            .with("https://evil.cdn/x.js", 500, b"");
        let renderer = ScriptedRenderer::new(vec![dom_script("https://evil.cdn/x.js")]);

        let mut finder = ScriptFinder::new(
            Url::parse(TARGET).unwrap(),
            FinderConfig {
                fetch_scripts: true,
                ..test_config()
            },
        );
        finder.run(&fetcher, &renderer).await.unwrap();

        let a = find(&finder, "https://example.com/a.js");
        assert!(a.in_fetched_resources());
        assert_eq!(a.content(), Some(&body[..]));
        assert_eq!(
            a.hash_for(HashAlgorithm::Sha256).unwrap(),
            HashAlgorithm::Sha256.hex_digest(body)
        );

        let evil = find(&finder, "https://evil.cdn/x.js");
        assert!(!evil.in_fetched_resources());
        assert!(evil.hashes().is_empty());

        assert_eq!(finder.report().resource_resource_count, 1);
    }

    #[tokio::test]
    async fn test_fetch_scripts_detects_integrity_mismatch() {
        use base64::Engine;
        let declared = format!(
            "sha384-{}",
            base64::engine::general_purpose::STANDARD.encode(HashAlgorithm::Sha384.digest(b"original"))
        );
        let html = format!(r#"<script src="/a.js" integrity="{}"></script>"#, declared);
        let fetcher = ScriptedFetcher::page(TARGET, 200, &html).with(
            "https://example.com/a.js",
            200,
            b"skimmer()",
        );
        let renderer = ScriptedRenderer::new(vec![]);

        let mut finder = ScriptFinder::new(
            Url::parse(TARGET).unwrap(),
            FinderConfig {
                fetch_scripts: true,
                ..test_config()
            },
        );
        finder.run(&fetcher, &renderer).await.unwrap();

        let record = &finder.report().resources[0];
        assert_eq!(record.integrity_status, IntegrityStatus::Mismatch);
    }

    #[test]
    fn test_merge_deduplicates_by_url_and_keeps_order() {
        let mut finder = make_finder();
        finder.merge_static(&[dom_script("/b.js"), dom_script("/a.js"), dom_script("/b.js")]);
        finder.merge_rendered(&[dom_script("/c.js"), dom_script("/a.js"), dom_script("/c.js")]);

        let urls: Vec<&str> = finder.resources().iter().map(|r| r.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://example.com/b.js",
                "https://example.com/a.js",
                "https://example.com/c.js",
            ]
        );
        assert_eq!(finder.html_resource_count(), 2);
        assert_eq!(finder.dom_resource_count(), 2);
    }

    #[test]
    fn test_dom_only_resource_flags() {
        let mut finder = make_finder();
        finder.merge_rendered(&[ScriptElement {
            src: Some("//cdn.example.net/x.js".to_string()),
            integrity: Some("sha256-xyz".to_string()),
            outer_html: "<script src=\"//cdn.example.net/x.js\"></script>".to_string(),
        }]);

        let x = find(&finder, "https://cdn.example.net/x.js");
        assert!(!x.in_static_html());
        assert!(x.in_rendered_dom());
        assert!(!x.in_fetched_resources());
        assert_eq!(x.declared_integrity.as_deref(), Some("sha256-xyz"));
        assert_eq!(x.tag, "<script src=\"//cdn.example.net/x.js\"></script>");
    }

    #[test]
    fn test_fresh_finder_is_empty() {
        let finder = make_finder();
        let report = finder.report();
        assert_eq!(finder.phase(), Phase::Idle);
        assert_eq!(report.target_url, TARGET);
        assert_eq!(report.resource_count, 0);
        assert!(report.resources.is_empty());
    }
}
