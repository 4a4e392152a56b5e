//! Batch driver: one fresh reconciliation engine per target.

use crate::collector::{ChromeRenderer, DomRenderer, HttpFetcher, MarkupFetcher};
use crate::config::ScanConfig;
use crate::finder::{FinderConfig, ScriptFinder};
use crate::notify::ConsoleOutput;
use crate::types::{Result, SiteReport};
use futures::stream::{self, StreamExt};
use std::time::Instant;
use tracing::{debug, error};
use url::Url;

/// Audits targets, each with its own resource set and browser session.
pub struct Scanner<F = HttpFetcher, R = ChromeRenderer> {
    fetcher: F,
    renderer: R,
    finder_config: FinderConfig,
    parallel: usize,
    console: ConsoleOutput,
}

impl Scanner {
    /// Create a scanner backed by reqwest and headless Chrome.
    pub fn new(config: &ScanConfig, verbose: bool) -> Result<Self> {
        let fetcher = HttpFetcher::new(&config.http_config())?;
        let renderer = ChromeRenderer::new()
            .with_chrome_executable(config.driver.clone())
            .with_head(config.head);
        let console = ConsoleOutput::new(verbose || config.debug, config.json, config.quiet);

        Ok(Self::with_collectors(
            fetcher,
            renderer,
            config.finder_config(),
            config.parallel,
            console,
        ))
    }
}

impl<F: MarkupFetcher, R: DomRenderer> Scanner<F, R> {
    pub fn with_collectors(
        fetcher: F,
        renderer: R,
        finder_config: FinderConfig,
        parallel: usize,
        console: ConsoleOutput,
    ) -> Self {
        Self {
            fetcher,
            renderer,
            finder_config,
            parallel: parallel.max(1),
            console,
        }
    }

    /// Audit a single target. Failures are folded into the report.
    pub async fn scan(&self, target: &str) -> SiteReport {
        let start_time = Instant::now();
        self.console.print_scan_start(target);

        let url = match Url::parse(target) {
            Ok(url) => url,
            Err(e) => {
                error!("Invalid target {}: {}", target, e);
                return SiteReport::failed(target, format!("Invalid target URL: {}", e));
            }
        };

        let mut finder = ScriptFinder::new(url, self.finder_config.clone());
        if let Err(e) = finder.run(&self.fetcher, &self.renderer).await {
            error!("There was an issue working on {}: {}", target, e);
        }

        let report = finder.report();
        self.console.print_progress(&format!(
            "{} done in {:.2}s",
            target,
            start_time.elapsed().as_secs_f64()
        ));
        self.console.print_report(&report);
        report
    }

    /// Audit every target, at most `parallel` at a time. Reports keep input order.
    pub async fn scan_multiple(&self, targets: Vec<String>) -> Vec<SiteReport> {
        let pb = self
            .console
            .create_progress_bar(targets.len() as u64, "Reviewing targets");

        let reports: Vec<SiteReport> = stream::iter(targets)
            .map(|target| {
                let pb = pb.as_ref();
                async move {
                    let report = self.scan(&target).await;
                    if let Some(pb) = pb {
                        pb.inc(1);
                    }
                    report
                }
            })
            .buffered(self.parallel)
            .collect()
            .await;

        if let Some(pb) = pb {
            pb.finish_and_clear();
        }
        debug!("Reviewed {} targets", reports.len());

        self.console.print_summary(&reports);
        reports
    }
}
