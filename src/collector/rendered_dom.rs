//! Rendered DOM collection using Chrome DevTools Protocol.
//!
//! Each target gets its own browser process and profile directory, so runs
//! can proceed in parallel without sharing state. Requires Chrome or Chromium;
//! a managed Chromium is downloaded on first use when none is found.

use crate::collector::{DomRenderer, RenderSession, ScriptElement};
use crate::types::{MagescopeError, Result};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::handler::Handler;
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

/// Counter for generating unique browser profile directories
static BROWSER_INSTANCE_COUNTER: AtomicU64 = AtomicU64::new(0);

fn cdp_error(context: &str, e: impl std::fmt::Display) -> MagescopeError {
    MagescopeError::Browser(format!("{}: {}", context, e))
}

/// Launches headless Chrome sessions.
#[derive(Debug, Clone)]
pub struct ChromeRenderer {
    headless: bool,
    /// Explicit path to Chrome/Chromium executable
    chrome_executable: Option<PathBuf>,
}

impl ChromeRenderer {
    pub fn new() -> Self {
        Self {
            headless: true,
            chrome_executable: None,
        }
    }

    /// Set an explicit Chrome/Chromium executable path.
    pub fn with_chrome_executable(mut self, path: Option<PathBuf>) -> Self {
        self.chrome_executable = path;
        self
    }

    /// Show the browser window (debugging only).
    pub fn with_head(mut self, head: bool) -> Self {
        self.headless = !head;
        self
    }

    fn build_browser_config(&self, temp_dir: &Path, chrome_exe: Option<&Path>) -> Result<BrowserConfig> {
        let mut config_builder = BrowserConfig::builder().user_data_dir(temp_dir);

        if let Some(exe) = chrome_exe {
            config_builder = config_builder.chrome_executable(exe);
        }

        if !self.headless {
            config_builder = config_builder.with_head();
        }

        config_builder = config_builder
            .no_sandbox()
            .viewport(None)
            .arg("--disable-dev-shm-usage")
            .arg("--blink-settings=imagesEnabled=false");

        config_builder
            .build()
            .map_err(|e| MagescopeError::Config(format!("Failed to build browser config: {}", e)))
    }

    /// Launch a browser, with auto-download fallback if no Chrome is found.
    async fn launch_browser(&self, temp_dir: &Path) -> Result<(Browser, Handler)> {
        // Explicit path > previously downloaded > system Chrome
        let chrome_exe = self
            .chrome_executable
            .clone()
            .or_else(crate::browser::resolve_chrome_executable);

        let launch_result = match self.build_browser_config(temp_dir, chrome_exe.as_deref()) {
            Ok(config) => Browser::launch(config).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        match launch_result {
            Ok(pair) => Ok(pair),
            Err(e) => {
                if let Some(exe) = chrome_exe {
                    return Err(MagescopeError::Browser(format!(
                        "Failed to launch browser with Chrome at {:?}: {}",
                        exe, e
                    )));
                }

                warn!("Chrome not found, downloading Chromium automatically... (run `magescope setup` to pre-install)");
                let exe = crate::browser::download_chrome(false).await?;

                let config = self.build_browser_config(temp_dir, Some(&exe))?;
                Browser::launch(config)
                    .await
                    .map_err(|e| cdp_error("Failed to launch browser even after downloading Chromium", e))
            }
        }
    }
}

impl Default for ChromeRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl DomRenderer for ChromeRenderer {
    type Session = ChromeSession;

    async fn launch(&self) -> Result<ChromeSession> {
        let instance_id = BROWSER_INSTANCE_COUNTER.fetch_add(1, Ordering::SeqCst);
        let temp_dir = std::env::temp_dir().join(format!(
            "magescope-browser-{}-{}",
            std::process::id(),
            instance_id
        ));

        if let Err(e) = std::fs::create_dir_all(&temp_dir) {
            debug!("Failed to create temp dir {:?}: {}", temp_dir, e);
        }

        let (browser, mut handler) = match self.launch_browser(&temp_dir).await {
            Ok(pair) => pair,
            Err(e) => {
                remove_profile_dir(temp_dir);
                return Err(e);
            }
        };

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        Ok(ChromeSession {
            browser,
            handler_task,
            page: None,
            temp_dir,
        })
    }
}

/// One browser process, owned by a single target run.
pub struct ChromeSession {
    browser: Browser,
    handler_task: JoinHandle<()>,
    page: Option<Page>,
    temp_dir: PathBuf,
}

impl RenderSession for ChromeSession {
    async fn navigate(&mut self, url: &Url, timeout: Duration) -> Result<()> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| cdp_error("Failed to create page", e))?;

        debug!("Navigating to: {}", url);
        let navigation = tokio::time::timeout(timeout, page.goto(url.as_str())).await;
        let failure = match navigation {
            Ok(Ok(_)) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!("page load timed out after {}s", timeout.as_secs())),
        };
        self.page = Some(page);

        match failure {
            Some(reason) => Err(MagescopeError::Navigation {
                url: url.to_string(),
                reason,
            }),
            None => Ok(()),
        }
    }

    async fn page_source(&mut self) -> Result<String> {
        let page = self
            .page
            .as_ref()
            .ok_or_else(|| MagescopeError::Browser("No page loaded".to_string()))?;

        page.content()
            .await
            .map_err(|e| cdp_error("Failed to read page content", e))
    }

    async fn script_elements(&mut self) -> Result<Vec<ScriptElement>> {
        let page = self
            .page
            .as_ref()
            .ok_or_else(|| MagescopeError::Browser("No page loaded".to_string()))?;

        let elements = page
            .find_elements("script")
            .await
            .map_err(|e| cdp_error("Failed to enumerate script elements", e))?;

        let mut scripts = Vec::with_capacity(elements.len());
        for element in elements {
            let src = element
                .attribute("src")
                .await
                .map_err(|e| cdp_error("Failed to read src", e))?;
            let integrity = element
                .attribute("integrity")
                .await
                .map_err(|e| cdp_error("Failed to read integrity", e))?;
            let outer_html = element
                .outer_html()
                .await
                .map_err(|e| cdp_error("Failed to read outerHTML", e))?
                .unwrap_or_default();

            scripts.push(ScriptElement {
                src,
                integrity,
                outer_html,
            });
        }

        Ok(scripts)
    }

    async fn shutdown(mut self) {
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                debug!("Failed to close page: {}", e);
            }
        }

        if let Err(e) = self.browser.close().await {
            debug!("Graceful browser close failed ({}), killing process", e);
            if let Some(Err(e)) = self.browser.kill().await {
                warn!("Failed to kill browser process: {}", e);
            }
        }
        if let Err(e) = self.browser.wait().await {
            debug!("Failed to wait for browser exit: {}", e);
        }

        self.handler_task.abort();
        remove_profile_dir(self.temp_dir);
    }
}

/// Remove a browser profile directory in the background.
fn remove_profile_dir(temp_dir: PathBuf) {
    tokio::spawn(async move {
        // Small delay to ensure browser has fully exited
        tokio::time::sleep(Duration::from_millis(100)).await;
        if let Err(e) = std::fs::remove_dir_all(&temp_dir) {
            debug!("Failed to cleanup temp dir {:?}: {}", temp_dir, e);
        }
    });
}
