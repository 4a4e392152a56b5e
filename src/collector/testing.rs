//! Scripted collaborators for exercising the engine without network or browser.

use crate::collector::{DomRenderer, FetchedPage, MarkupFetcher, RenderSession, ScriptElement};
use crate::types::{MagescopeError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

/// Scripted HTTP responses keyed by absolute URL; anything else is unreachable.
#[derive(Default)]
pub struct ScriptedFetcher {
    responses: HashMap<String, (u16, Vec<u8>)>,
}

impl ScriptedFetcher {
    pub fn page(url: &str, status: u16, html: &str) -> Self {
        Self::default().with(url, status, html.as_bytes())
    }

    pub fn with(mut self, url: &str, status: u16, body: &[u8]) -> Self {
        self.responses.insert(url.to_string(), (status, body.to_vec()));
        self
    }
}

impl MarkupFetcher for ScriptedFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage> {
        match self.responses.get(url.as_str()) {
            Some((status, body)) => Ok(FetchedPage {
                status: *status,
                body: body.clone(),
            }),
            None => Err(MagescopeError::Config(format!("unreachable: {}", url))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Launch,
    Navigation,
    Enumeration,
}

/// Browser double serving a fixed DOM per target and counting launches/shutdowns.
pub struct ScriptedRenderer {
    /// Scripts served for any target without an entry in `per_target`.
    scripts: Vec<ScriptElement>,
    per_target: HashMap<String, Vec<ScriptElement>>,
    /// Scripts that join the DOM once `late_after` has passed since navigation.
    late: Vec<ScriptElement>,
    late_after: Duration,
    failure: Option<Failure>,
    pub launches: Arc<AtomicUsize>,
    pub shutdowns: Arc<AtomicUsize>,
}

impl ScriptedRenderer {
    pub fn new(scripts: Vec<ScriptElement>) -> Self {
        Self {
            scripts,
            per_target: HashMap::new(),
            late: Vec::new(),
            late_after: Duration::ZERO,
            failure: None,
            launches: Arc::new(AtomicUsize::new(0)),
            shutdowns: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing(mut self, failure: Failure) -> Self {
        self.failure = Some(failure);
        self
    }

    pub fn with_late(mut self, after: Duration, scripts: Vec<ScriptElement>) -> Self {
        self.late_after = after;
        self.late = scripts;
        self
    }

    pub fn with_target(mut self, url: &str, scripts: Vec<ScriptElement>) -> Self {
        self.per_target.insert(url.to_string(), scripts);
        self
    }
}

pub struct ScriptedSession {
    scripts: Vec<ScriptElement>,
    per_target: HashMap<String, Vec<ScriptElement>>,
    late: Vec<ScriptElement>,
    late_after: Duration,
    loaded: Option<(String, Instant)>,
    failure: Option<Failure>,
    shutdowns: Arc<AtomicUsize>,
}

impl DomRenderer for ScriptedRenderer {
    type Session = ScriptedSession;

    async fn launch(&self) -> Result<ScriptedSession> {
        if self.failure == Some(Failure::Launch) {
            return Err(MagescopeError::Browser("no chrome".to_string()));
        }
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptedSession {
            scripts: self.scripts.clone(),
            per_target: self.per_target.clone(),
            late: self.late.clone(),
            late_after: self.late_after,
            loaded: None,
            failure: self.failure,
            shutdowns: self.shutdowns.clone(),
        })
    }
}

impl RenderSession for ScriptedSession {
    async fn navigate(&mut self, url: &Url, timeout: Duration) -> Result<()> {
        if self.failure == Some(Failure::Navigation) {
            return Err(MagescopeError::Navigation {
                url: url.to_string(),
                reason: format!("page load timed out after {}s", timeout.as_secs()),
            });
        }
        self.loaded = Some((url.to_string(), Instant::now()));
        Ok(())
    }

    async fn page_source(&mut self) -> Result<String> {
        let tags: String = self.live_scripts().iter().map(|s| s.outer_html.as_str()).collect();
        Ok(format!("<html><head>{}</head></html>", tags))
    }

    async fn script_elements(&mut self) -> Result<Vec<ScriptElement>> {
        if self.failure == Some(Failure::Enumeration) {
            return Err(MagescopeError::Browser("target crashed".to_string()));
        }
        Ok(self.live_scripts())
    }

    async fn shutdown(self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

impl ScriptedSession {
    fn live_scripts(&self) -> Vec<ScriptElement> {
        let Some((url, navigated_at)) = &self.loaded else {
            return Vec::new();
        };
        let mut scripts = self.per_target.get(url).unwrap_or(&self.scripts).clone();
        if navigated_at.elapsed() >= self.late_after {
            scripts.extend(self.late.iter().cloned());
        }
        scripts
    }
}

pub fn dom_script(src: &str) -> ScriptElement {
    ScriptElement {
        src: Some(src.to_string()),
        integrity: None,
        outer_html: format!("<script src=\"{}\"></script>", src),
    }
}

pub fn inline_script() -> ScriptElement {
    ScriptElement {
        src: None,
        integrity: None,
        outer_html: "<script>var x = 1;</script>".to_string(),
    }
}
