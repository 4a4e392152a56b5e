//! Colored console output for site reports.

use crate::resource::{IntegrityStatus, ResourceRecord};
use crate::types::SiteReport;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

/// Longest URL shown in the resource table.
pub const MAX_URL_CHARS: usize = 120;

/// Console output handler with colors and formatting.
pub struct ConsoleOutput {
    verbose: bool,
    json_mode: bool,
    quiet: bool,
}

impl ConsoleOutput {
    /// Create a new console output handler.
    pub fn new(verbose: bool, json_mode: bool, quiet: bool) -> Self {
        Self { verbose, json_mode, quiet }
    }

    /// Print scan start message.
    pub fn print_scan_start(&self, target: &str) {
        if self.json_mode || self.quiet {
            return;
        }

        println!("{} Reviewing: {}", "[*]".bright_blue(), target.bright_white());
    }

    /// Print scan progress (only in verbose mode).
    pub fn print_progress(&self, message: &str) {
        if self.json_mode || !self.verbose {
            return;
        }

        println!("{} {}", "[.]".dimmed(), message.dimmed());
    }

    /// Print the resource table and findings for one site.
    pub fn print_report(&self, report: &SiteReport) {
        if self.json_mode || (self.quiet && !has_findings(report)) {
            return;
        }

        println!();
        println!("{}", report.target_url.bright_white().bold());
        println!("{}", "-".repeat(40));
        println!();
        println!("{}", format_table(&report.resources));

        for record in report.injected() {
            println!(
                "  {} {}",
                "INJECTED".on_red().white().bold(),
                record.url.bright_white()
            );
        }
        for record in report
            .resources
            .iter()
            .filter(|r| r.integrity_status == IntegrityStatus::Mismatch)
        {
            println!(
                "  {} {}",
                "INTEGRITY MISMATCH".red().bold(),
                record.url.bright_white()
            );
        }

        if !report.errors.is_empty() {
            println!();
            println!("{}", "Errors encountered:".yellow());
            for error in &report.errors {
                println!("  - {}", error.dimmed());
            }
        }
        println!();
    }

    /// Print a summary across all audited sites.
    pub fn print_summary(&self, reports: &[SiteReport]) {
        if self.json_mode {
            return;
        }

        let injected: usize = reports.iter().map(|r| r.injected().count()).sum();
        let mismatched: usize = reports
            .iter()
            .flat_map(|r| r.resources.iter())
            .filter(|r| r.integrity_status == IntegrityStatus::Mismatch)
            .count();

        if self.quiet && injected == 0 && mismatched == 0 {
            return;
        }

        println!("{}", "=== Scan Summary ===".bright_cyan());
        println!("  Targets:   {}", reports.len());
        println!(
            "  Scripts:   {}",
            reports.iter().map(|r| r.resource_count).sum::<usize>()
        );

        if injected > 0 {
            println!(
                "  {}",
                format!("SCRIPTS PRESENT ONLY IN RENDERED DOM: {}", injected)
                    .red()
                    .bold()
            );
        } else {
            println!("  {}", "No injected scripts found.".green());
        }

        if mismatched > 0 {
            println!(
                "  {}",
                format!("INTEGRITY MISMATCHES: {}", mismatched).red().bold()
            );
        }
        println!();
    }

    /// Create a progress bar.
    pub fn create_progress_bar(&self, total: u64, message: &str) -> Option<ProgressBar> {
        if self.json_mode || total < 2 {
            return None;
        }

        let style = ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .ok()?
            .progress_chars("#>-");

        let pb = ProgressBar::new(total);
        pb.set_style(style);
        pb.set_message(message.to_string());
        Some(pb)
    }
}

impl Default for ConsoleOutput {
    fn default() -> Self {
        Self::new(false, false, false)
    }
}

fn has_findings(report: &SiteReport) -> bool {
    report.injected().next().is_some()
        || report
            .resources
            .iter()
            .any(|r| r.integrity_status == IntegrityStatus::Mismatch)
}

/// Render `url | inHtml | inDom | inResources` as a GitHub-style table.
pub fn format_table(resources: &[ResourceRecord]) -> String {
    let headers = ["url", "inHtml", "inDom", "inResources"];
    let rows: Vec<[String; 4]> = resources
        .iter()
        .map(|r| {
            [
                truncate(&r.url, MAX_URL_CHARS),
                r.in_html.to_string(),
                r.in_dom.to_string(),
                r.in_resources.to_string(),
            ]
        })
        .collect();

    let mut widths = headers.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row.iter()) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let format_row = |cells: [&str; 4]| {
        let padded: Vec<String> = cells
            .iter()
            .zip(widths.iter())
            .map(|(cell, width)| format!(" {:<width$} ", cell, width = *width))
            .collect();
        format!("|{}|", padded.join("|"))
    };

    let mut lines = Vec::with_capacity(rows.len() + 2);
    lines.push(format_row(headers));
    let separator: Vec<String> = widths.iter().map(|w| "-".repeat(w + 2)).collect();
    lines.push(format!("|{}|", separator.join("|")));
    for row in &rows {
        lines.push(format_row([
            row[0].as_str(),
            row[1].as_str(),
            row[2].as_str(),
            row[3].as_str(),
        ]));
    }
    lines.join("\n")
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
