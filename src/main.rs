use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gbif_downloader::config::{
    default_config_path, load_config, load_default_config, write_example_config, ConfigFile,
    PresetStore,
};
use gbif_downloader::export::{export_records, ExportFormat, ExportOptions};
use gbif_downloader::fetch::CancellationFlag;
use gbif_downloader::ui::{self, DownloadProgress, Status};
use gbif_downloader::utils::sanitize_filename;
use gbif_downloader::{DownloadError, Downloader, GbifClient};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Exit status after Ctrl-C
const EXIT_INTERRUPTED: i32 = 130;

/// GBIF Downloader - Download and filter museum occurrence records from GBIF
#[derive(Parser, Debug)]
#[command(name = "gbif-download")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Download and filter museum occurrence records from GBIF", long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "Examples:\n  \
    gbif-download --genus Nebria --year-start 1900 --country IT,CH\n  \
    gbif-download --family Carabidae --format geojson -o carabids\n  \
    gbif-download --config alps.toml --no-require-elevation\n  \
    gbif-download init")]
struct Cli {
    /// Enable verbose logging (-v, -vv)
    #[arg(long, short, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Configuration file path (TOML, YAML or JSON)
    #[arg(long, conflicts_with = "preset")]
    config: Option<PathBuf>,

    /// Load a saved preset
    #[arg(long)]
    preset: Option<String>,

    /// Save the effective configuration as a preset before downloading
    #[arg(long, value_name = "NAME")]
    save_preset: Option<String>,

    /// Genus to download
    #[arg(long, short)]
    genus: Option<String>,

    /// Family to download
    #[arg(long, short)]
    family: Option<String>,

    /// Species epithets to keep (comma-separated)
    #[arg(long, short, value_delimiter = ',')]
    species: Vec<String>,

    /// First year to include
    #[arg(long, short = 'y')]
    year_start: Option<i32>,

    /// Last year to include (default: current year)
    #[arg(long)]
    year_end: Option<i32>,

    /// Maximum coordinate uncertainty in meters
    #[arg(long, short = 'u')]
    uncertainty_max: Option<i64>,

    /// Country codes to keep (comma-separated, e.g. IT,CH,AT)
    #[arg(long, short, value_delimiter = ',')]
    country: Vec<String>,

    /// Institution codes to keep (comma-separated)
    #[arg(long, short, value_delimiter = ',')]
    institution: Vec<String>,

    /// Record types to request (comma-separated, default PRESERVED_SPECIMEN)
    #[arg(long, value_delimiter = ',')]
    basis_of_record: Vec<String>,

    /// Keep records without a year
    #[arg(long)]
    no_require_year: bool,

    /// Keep records without an elevation
    #[arg(long)]
    no_require_elevation: bool,

    /// Drop records whose coordinate uncertainty is unknown
    #[arg(long)]
    drop_unknown_uncertainty: bool,

    /// Keep repeated occurrence keys
    #[arg(long)]
    no_dedup: bool,

    /// Accept taxon matches whose rank or name differ from the request
    #[arg(long)]
    non_strict: bool,

    /// Output format (excel, csv, geojson)
    #[arg(long, value_parser = parse_format)]
    format: Option<ExportFormat>,

    /// Output file (default: <taxon>_GBIF.<ext>)
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Do not mark records with unknown uncertainty in the export
    #[arg(long)]
    no_highlight: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a commented example configuration file
    Init {
        /// Where to write it (default: user config directory)
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Manage saved presets
    Presets {
        #[command(subcommand)]
        action: Option<PresetAction>,
    },
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum PresetAction {
    /// List saved presets
    List,
    /// Print a preset as TOML
    Show { name: String },
    /// Delete a preset
    Delete { name: String },
}

fn parse_format(value: &str) -> Result<ExportFormat, String> {
    value.parse().map_err(|e: gbif_downloader::ExportError| e.to_string())
}

/// Filter directive when RUST_LOG is unset
fn log_directive(verbose: u8, quiet: bool, configured: Option<&str>) -> String {
    let level = if quiet {
        "error"
    } else {
        match verbose {
            0 => configured.unwrap_or("info"),
            1 => "debug",
            _ => "trace",
        }
    };
    format!("gbif_downloader={}", level)
}

fn init_tracing(directive: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Preset, explicit file or default file, in that order
fn load_base_config(cli: &Cli) -> Result<ConfigFile> {
    if let Some(name) = &cli.preset {
        let store = PresetStore::default_location()?;
        return store
            .load(name)
            .with_context(|| format!("Failed to load preset '{}'", name));
    }

    if let Some(path) = &cli.config {
        return load_config(path)
            .with_context(|| format!("Failed to load config {}", path.display()));
    }

    Ok(load_default_config()?)
}

/// Layer command-line values over a loaded configuration
fn apply_overrides(cli: &Cli, file: &mut ConfigFile) {
    // A taxon flag replaces whatever taxon the file named.
    if cli.genus.is_some() || cli.family.is_some() {
        file.taxonomy.genus = cli.genus.clone();
        file.taxonomy.family = cli.family.clone();
    }
    if !cli.species.is_empty() {
        file.taxonomy.species = cli.species.clone();
    }

    let filters = &mut file.filters;
    if let Some(year) = cli.year_start {
        filters.year_start = year;
    }
    if let Some(year) = cli.year_end {
        filters.year_end = Some(year);
    }
    if let Some(meters) = cli.uncertainty_max {
        filters.uncertainty_max = meters;
    }
    if !cli.country.is_empty() {
        filters.countries = cli.country.clone();
    }
    if !cli.institution.is_empty() {
        filters.institutions = cli.institution.clone();
    }
    if !cli.basis_of_record.is_empty() {
        filters.basis_of_record = cli.basis_of_record.clone();
    }
    if cli.no_require_year {
        filters.require_year = false;
    }
    if cli.no_require_elevation {
        filters.require_elevation = false;
    }
    if cli.drop_unknown_uncertainty {
        filters.keep_unknown_uncertainty = false;
    }
    if cli.no_dedup {
        filters.deduplicate = false;
    }

    if cli.non_strict {
        file.api.strict = false;
    }
    if let Some(format) = cli.format {
        file.output.format = format.to_string();
    }
    if let Some(output) = &cli.output {
        file.output.filename = Some(output.display().to_string());
    }
    if cli.no_highlight {
        file.output.highlight_uncertain = false;
    }
}

/// `<taxon>_GBIF.<ext>`
fn default_output(taxon: &str, format: ExportFormat) -> PathBuf {
    PathBuf::from(format!(
        "{}_GBIF.{}",
        sanitize_filename(taxon, 100),
        format.extension()
    ))
}

async fn run_download(cli: &Cli, file: ConfigFile) -> Result<i32> {
    let filter = file.to_filter_config().context("Configuration error")?;
    let format = file.export_format()?;
    let output = file
        .output
        .filename
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| default_output(filter.anchor().name(), format));
    let options = ExportOptions {
        highlight_uncertain: file.output.highlight_uncertain,
    };

    if let Some(name) = &cli.save_preset {
        let store = PresetStore::default_location()?;
        let path = store.save(name, &file)?;
        if !cli.quiet {
            ui::print_status(
                Status::Success,
                &format!("Saved preset '{}' to {}", name, path.display()),
            );
        }
    }

    if !cli.quiet {
        ui::print_banner();
        ui::print_config(&filter, format, &output);
        println!();
    }

    let client = GbifClient::with_base_url(file.api.base_url.clone())?
        .with_retry_config(file.api.retry_config());
    let downloader = Downloader::new(client)
        .kingdom(file.api.kingdom.clone())
        .class_name(file.api.class_name.clone())
        .strict(file.api.strict)
        .fetch_options(file.api.fetch_options());

    let cancel = CancellationFlag::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, stopping after the current page");
            trigger.cancel();
        }
    });

    let progress = DownloadProgress::for_terminal(cli.quiet);
    let result = downloader
        .run(&filter, progress.clone(), cancel.checker())
        .await;

    let report = match result {
        Ok(report) => {
            progress.finish("Download complete");
            report
        }
        Err(DownloadError::NothingSurvived(report)) => {
            progress.finish("Download complete");
            if !cli.quiet {
                ui::print_summary(&report, None);
            }
            if report.cancelled {
                ui::print_status(Status::Warning, "Interrupted before any record was kept");
                return Ok(EXIT_INTERRUPTED);
            }
            ui::print_status(Status::Warning, "No records passed the filters.");
            return Ok(0);
        }
        Err(DownloadError::NoTaxonMatch(msg)) => {
            progress.abandon("Stopped");
            ui::print_status(Status::Error, &msg);
            return Ok(1);
        }
        Err(DownloadError::ApiExhausted(err)) => {
            progress.abandon("Stopped");
            let mut msg = format!("GBIF API error: {}", err);
            if err.is_rate_limit() {
                msg.push_str(" (GBIF is rate limiting requests; try again later)");
            }
            ui::print_status(Status::Error, &msg);
            return Ok(1);
        }
    };

    let saved = export_records(format, &report.records, &output, &options)
        .with_context(|| format!("Failed to export to {}", output.display()))?;

    if !cli.quiet {
        ui::print_summary(&report, Some(&saved));
    }

    if report.cancelled {
        return Ok(EXIT_INTERRUPTED);
    }
    Ok(0)
}

fn run_init(path: Option<&Path>, force: bool, quiet: bool) -> Result<i32> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => default_config_path()
            .context("Could not determine the user configuration directory")?,
    };

    write_example_config(&path, force)?;
    if !quiet {
        ui::print_status(
            Status::Success,
            &format!("Wrote example configuration to {}", path.display()),
        );
    }
    Ok(0)
}

fn run_presets(action: Option<&PresetAction>) -> Result<i32> {
    let store = PresetStore::default_location()?;

    match action.unwrap_or(&PresetAction::List) {
        PresetAction::List => {
            let names = store.list()?;
            if names.is_empty() {
                ui::print_status(
                    Status::Info,
                    &format!("No presets saved in {}", store.dir().display()),
                );
            } else {
                ui::print_section("Presets");
                for name in names {
                    println!("  {}", name);
                }
            }
        }
        PresetAction::Show { name } => {
            let config = store.load(name)?;
            let content = toml::to_string_pretty(&config)?;
            println!("{}", content);
        }
        PresetAction::Delete { name } => {
            if store.delete(name)? {
                ui::print_status(Status::Success, &format!("Deleted preset '{}'", name));
            } else {
                ui::print_status(Status::Warning, &format!("Preset '{}' not found", name));
                return Ok(1);
            }
        }
    }

    Ok(0)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let code = match &cli.command {
        Some(Commands::Init { path, force }) => {
            init_tracing(&log_directive(cli.verbose, cli.quiet, None));
            run_init(path.as_deref(), *force, cli.quiet)?
        }
        Some(Commands::Presets { action }) => {
            init_tracing(&log_directive(cli.verbose, cli.quiet, None));
            run_presets(action.as_ref())?
        }
        None => {
            let mut file = load_base_config(&cli)?;
            apply_overrides(&cli, &mut file);
            init_tracing(&log_directive(
                cli.verbose,
                cli.quiet,
                file.logging.level.as_deref(),
            ));
            run_download(&cli, file).await?
        }
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
