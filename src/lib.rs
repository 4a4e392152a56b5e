//! magescope - Script injection and tampering auditor.
//!
//! This library compares the JavaScript a page declares with what it actually runs:
//! - Fetching the raw markup and collecting its `<script src>` declarations
//! - Rendering the page in headless Chrome and collecting the live DOM's scripts
//! - Merging both views by absolute URL, flagging scripts that only appear after render
//! - Optionally fetching script bodies to hash them and verify declared integrity
//!
//! # Example
//!
//! ```no_run
//! use magescope::collector::{ChromeRenderer, HttpFetcher};
//! use magescope::{FinderConfig, HttpConfig, ScriptFinder};
//!
//! #[tokio::main]
//! async fn main() -> magescope::Result<()> {
//!     let fetcher = HttpFetcher::new(&HttpConfig::default())?;
//!     let renderer = ChromeRenderer::new();
//!
//!     let target = url::Url::parse("https://example.com")?;
//!     let mut finder = ScriptFinder::new(target, FinderConfig::default());
//!     finder.run(&fetcher, &renderer).await?;
//!
//!     let report = finder.report();
//!     println!("{} scripts appear only in the rendered DOM", report.injected().count());
//!     Ok(())
//! }
//! ```

pub mod browser;
pub mod collector;
pub mod config;
pub mod finder;
pub mod hashing;
pub mod notify;
pub mod resource;
pub mod scanner;
pub mod types;

pub use config::{Commands, Config, ScanConfig, SetupConfig};
pub use finder::{FinderConfig, Phase, ScriptFinder};
pub use hashing::HashAlgorithm;
pub use resource::{Channel, IntegrityStatus, ResourceRecord, ScriptResource};
pub use scanner::Scanner;
pub use types::{reports_to_json, HttpConfig, MagescopeError, Result, SiteReport};
