//! Collection channels consumed by the reconciliation engine.
//!
//! - Static markup: plain HTTP fetch of the page (reqwest)
//! - Rendered DOM: headless Chrome over the DevTools protocol (chromiumoxide)
//!
//! Both sit behind small capability traits so the engine's merge logic can be
//! driven by scripted doubles in tests.

pub mod rendered_dom;
pub mod static_markup;
#[cfg(test)]
pub(crate) mod testing;

pub use rendered_dom::{ChromeRenderer, ChromeSession};
pub use static_markup::{extract_script_elements, HttpFetcher};

use crate::types::Result;
use std::future::Future;
use std::time::Duration;
use url::Url;

/// Raw response of a static fetch.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub status: u16,
    pub body: Vec<u8>,
}

impl FetchedPage {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A `<script>` element as seen by one of the channels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptElement {
    /// `src` attribute, unresolved. `None` or empty for inline scripts.
    pub src: Option<String>,
    pub integrity: Option<String>,
    /// Serialized outer markup of the element.
    pub outer_html: String,
}

impl ScriptElement {
    /// Resolve `src` against the page URL. Inline scripts and unparseable
    /// sources yield `None`.
    pub fn resolve(&self, base: &Url) -> Option<Url> {
        let src = self.src.as_deref()?.trim();
        if src.is_empty() {
            return None;
        }
        base.join(src).ok()
    }
}

/// Fetches raw bytes over HTTP, following redirects.
pub trait MarkupFetcher: Send + Sync {
    fn fetch(&self, url: &Url) -> impl Future<Output = Result<FetchedPage>> + Send;
}

/// Launches a fresh, exclusively owned browser session.
pub trait DomRenderer: Send + Sync {
    type Session: RenderSession;

    fn launch(&self) -> impl Future<Output = Result<Self::Session>> + Send;
}

/// A live browser session for one target.
pub trait RenderSession: Send {
    /// Load `url`. Fails on timeout or load error.
    fn navigate(&mut self, url: &Url, timeout: Duration) -> impl Future<Output = Result<()>> + Send;

    /// Serialized markup of the live document.
    fn page_source(&mut self) -> impl Future<Output = Result<String>> + Send;

    /// Every `<script>` element currently in the live DOM.
    fn script_elements(&mut self) -> impl Future<Output = Result<Vec<ScriptElement>>> + Send;

    /// Tear the browser down. Must be safe to call after any prior failure.
    fn shutdown(self) -> impl Future<Output = ()> + Send;
}
