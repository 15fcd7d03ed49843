//! Terminal presentation for the `gbif-download` binary.
//!
//! Colored status lines, the configuration table shown before a run, the
//! progress bar fed by the fetcher, and the end-of-run summary.

use comfy_table::{Attribute, Cell, ContentArrangement, Table};
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use std::io::IsTerminal;
use std::path::Path;
use std::time::Duration;

use crate::download::DownloadReport;
use crate::export::ExportFormat;
use crate::fetch::{FetchProgress, ProgressObserver};
use crate::filter::FilterConfig;

pub use crate::utils::format_number;

/// Check if stdout is a terminal.
pub fn is_terminal() -> bool {
    std::io::stdout().is_terminal()
}

/// Status icons for different operations.
pub fn status_icon(status: Status) -> &'static str {
    match status {
        Status::Success => "✓",
        Status::Error => "✗",
        Status::Warning => "⚠",
        Status::Info => "ℹ",
    }
}

/// Status types for colored output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Error,
    Warning,
    Info,
}

/// Print a styled status message.
pub fn print_status(status: Status, msg: &str) {
    let icon = status_icon(status);
    match status {
        Status::Success => println!("{} {}", icon.green().bold(), msg),
        Status::Error => eprintln!("{} {}", icon.red().bold(), msg),
        Status::Warning => eprintln!("{} {}", icon.yellow().bold(), msg),
        Status::Info => println!("{} {}", icon.cyan().bold(), msg),
    }
}

/// Welcome banner for the application.
pub fn print_banner() {
    let version = env!("CARGO_PKG_VERSION");
    println!();
    println!(
        "{} {}",
        "🌍 GBIF Occurrence Downloader".bold().cyan(),
        format!("v{}", version).dimmed()
    );
    println!(
        "{}",
        "   Museum specimen records, filtered for georeferenced analysis".dimmed()
    );
    println!();
}

/// Print a section header.
pub fn print_section(title: &str) {
    println!();
    println!("{}", format!("━━━ {} ━━━", title).bold().cyan());
}

/// Print a divider line.
pub fn print_divider() {
    println!("{}", "─".repeat(60).dimmed());
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

fn list_or(values: &[String], empty: &str) -> String {
    if values.is_empty() {
        empty.to_string()
    } else {
        values.join(", ")
    }
}

/// Table describing what a run will do
pub fn config_table(config: &FilterConfig, format: ExportFormat, output: &Path) -> Table {
    let anchor = config.anchor();

    let mut table = Table::new();
    table
        .load_preset(comfy_table::presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Setting", "Value"]);

    let rows: Vec<(String, String)> = vec![
        (
            format!("Taxon ({})", anchor.rank().as_str().to_lowercase()),
            anchor.name().to_string(),
        ),
        ("Species".to_string(), list_or(config.species(), "all")),
        (
            "Years".to_string(),
            format!("{} - {}", config.year_start(), config.year_end()),
        ),
        (
            "Max uncertainty".to_string(),
            format!("{} m", format_number(u64::from(config.uncertainty_max()))),
        ),
        (
            "Keep unknown uncertainty".to_string(),
            yes_no(config.keep_unknown_uncertainty()).to_string(),
        ),
        ("Require year".to_string(), yes_no(config.require_year()).to_string()),
        (
            "Require elevation".to_string(),
            yes_no(config.require_elevation()).to_string(),
        ),
        ("Countries".to_string(), list_or(config.countries(), "any")),
        ("Institutions".to_string(), list_or(config.institutions(), "any")),
        (
            "Record types".to_string(),
            list_or(config.basis_of_record(), "any"),
        ),
        ("Deduplicate".to_string(), yes_no(config.deduplicate()).to_string()),
        ("Format".to_string(), format.to_string()),
        ("Output".to_string(), output.display().to_string()),
    ];

    for (label, value) in rows {
        table.add_row(vec![Cell::new(label).add_attribute(Attribute::Bold), Cell::new(value)]);
    }

    table
}

/// Print the configuration table under a section header
pub fn print_config(config: &FilterConfig, format: ExportFormat, output: &Path) {
    print_section("Configuration");
    println!("{}", config_table(config, format, output));
}

/// Indicatif bar fed by the fetcher.
///
/// Starts as a spinner and switches to a bounded bar once the server
/// reports a total estimate.
#[derive(Debug, Clone)]
pub struct DownloadProgress {
    pb: ProgressBar,
    bounded: bool,
}

impl DownloadProgress {
    pub fn new() -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg} {pos} records")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ "),
        );
        pb.set_message("Fetching");
        pb.enable_steady_tick(Duration::from_millis(100));

        Self { pb, bounded: false }
    }

    /// A bar that draws nothing, for quiet runs and non-terminals
    pub fn hidden() -> Self {
        Self {
            pb: ProgressBar::hidden(),
            bounded: false,
        }
    }

    /// Visible only when stdout is a terminal and output is not suppressed
    pub fn for_terminal(quiet: bool) -> Self {
        if quiet || !is_terminal() {
            Self::hidden()
        } else {
            Self::new()
        }
    }

    pub fn position(&self) -> u64 {
        self.pb.position()
    }

    pub fn length(&self) -> Option<u64> {
        self.pb.length()
    }

    fn make_bounded(&mut self, total: u64) {
        self.pb.set_length(total);
        self.pb.set_style(
            ProgressStyle::with_template(
                "{msg} {bar:40.cyan/blue} {pos}/{len} ({percent}%) [{elapsed_precise}]",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓▒░ "),
        );
        self.bounded = true;
    }

    pub fn finish(&self, msg: &str) {
        self.pb.finish_with_message(msg.to_string());
    }

    pub fn abandon(&self, msg: &str) {
        self.pb.abandon_with_message(msg.to_string());
    }
}

impl Default for DownloadProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressObserver for DownloadProgress {
    fn on_progress(&mut self, progress: FetchProgress) {
        if !self.bounded && progress.total_estimate > 0 {
            self.make_bounded(progress.total_estimate);
        }
        // The count can run past the server estimate.
        if self.bounded && progress.fetched > self.pb.length().unwrap_or(0) {
            self.pb.set_length(progress.fetched);
        }
        self.pb.set_position(progress.fetched);
        self.pb.set_message(format!("Year {}", progress.year));
    }
}

/// Print the end-of-run summary
pub fn print_summary(report: &DownloadReport, saved: Option<&Path>) {
    print_section("Summary");
    println!(
        "{} {} ({}, key {})",
        "Taxon:".bold(),
        report.taxon.canonical_name.green(),
        report.taxon.rank,
        report.taxon.usage_key
    );
    println!("{}", report.stats.summary());

    if report.cancelled {
        print_status(
            Status::Warning,
            "Download interrupted; results are partial",
        );
    }

    if let Some(path) = saved {
        print_divider();
        print_status(
            Status::Success,
            &format!(
                "Saved {} records to {}",
                format_number(report.records.len() as u64).bold(),
                path.display().to_string().cyan()
            ),
        );
    }
}
