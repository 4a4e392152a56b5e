//! Command-line configuration.

use crate::finder::FinderConfig;
use crate::types::{HttpConfig, DEFAULT_USER_AGENT};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Detect injected and tampered scripts by comparing static markup with the rendered DOM.
#[derive(Parser, Debug, Clone)]
#[command(name = "magescope")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Audit the scripts loaded by one or more targets
    Scan(ScanConfig),
    /// Download and set up a managed Chromium browser
    Setup(SetupConfig),
}

/// Configuration for the setup command.
#[derive(Parser, Debug, Clone)]
pub struct SetupConfig {
    /// Force re-download even if Chromium is already installed
    #[arg(long)]
    pub force: bool,
}

/// Configuration for the scan command.
#[derive(Parser, Debug, Clone)]
pub struct ScanConfig {
    /// Target URL(s) to audit
    #[arg(required_unless_present = "list")]
    pub targets: Vec<String>,

    /// File containing target URLs (one per line)
    #[arg(short = 'f', long)]
    pub list: Option<PathBuf>,

    /// Write the JSON report to this file
    #[arg(short, long)]
    pub outfile: Option<PathBuf>,

    /// Print the JSON report to stdout instead of tables
    #[arg(long)]
    pub json: bool,

    /// Log every script observed in each channel
    #[arg(short, long)]
    pub debug: bool,

    /// Path to Chrome/Chromium executable (overrides auto-detection)
    #[arg(long, env = "MAGESCOPE_DRIVER")]
    pub driver: Option<PathBuf>,

    /// Page load timeout in seconds (also bounds the static fetch)
    #[arg(long, default_value = "90")]
    pub timeout: u64,

    /// Seconds to wait after page load for injected scripts to appear
    #[arg(long, default_value = "20")]
    pub settle: u64,

    /// Custom User-Agent string for the static fetch
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Number of targets to audit in parallel
    #[arg(long, short = 'p', default_value = "1")]
    pub parallel: usize,

    /// Fetch every script body, hash it and verify declared integrity
    #[arg(long)]
    pub fetch_scripts: bool,

    /// Rate limit for HTTP requests (requests per second)
    #[arg(long, default_value = "10")]
    pub rate_limit: u32,

    /// Quiet mode: only show targets with injected or tampered scripts
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Show the browser window instead of running headless
    #[arg(long)]
    pub head: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            list: None,
            outfile: None,
            json: false,
            debug: false,
            driver: None,
            timeout: 90,
            settle: 20,
            user_agent: None,
            parallel: 1,
            fetch_scripts: false,
            rate_limit: 10,
            quiet: false,
            head: false,
        }
    }
}

impl ScanConfig {
    /// Get HTTP configuration from scan config.
    pub fn http_config(&self) -> HttpConfig {
        HttpConfig {
            timeout_secs: self.timeout,
            user_agent: self
                .user_agent
                .clone()
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            rate_limit: self.rate_limit,
        }
    }

    /// Per-target engine settings.
    pub fn finder_config(&self) -> FinderConfig {
        FinderConfig {
            page_timeout: Duration::from_secs(self.timeout),
            settle_delay: Duration::from_secs(self.settle),
            debug: self.debug,
            fetch_scripts: self.fetch_scripts,
        }
    }

    /// Collect targets from the command line and the list file.
    pub fn load_targets(&self) -> crate::types::Result<Vec<String>> {
        let mut targets = self.targets.clone();

        if let Some(ref file_path) = self.list {
            let content = std::fs::read_to_string(file_path)?;
            for line in content.lines() {
                let trimmed = line.trim();
                if !trimmed.is_empty() && !trimmed.starts_with('#') {
                    targets.push(trimmed.to_string());
                }
            }
        }

        let normalized = targets
            .into_iter()
            .map(|t| {
                if !t.starts_with("http://") && !t.starts_with("https://") {
                    format!("https://{}", t)
                } else {
                    t
                }
            })
            .collect();

        Ok(normalized)
    }
}
