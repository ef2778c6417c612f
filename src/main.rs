//! Dealboard - sales opportunity dashboard
//!
//! A CLI tool that loads a CSV of closed sales opportunities and renders
//! the won vs. lost dashboard (overview, profiles, average ticket and
//! time to close) as a Markdown or JSON report.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (missing dataset, bad config, unreadable CSV, etc.)

use anyhow::{bail, Context, Result};
use dealboard::analysis::AggregationCache;
use dealboard::cli::{Args, OutputFormat};
use dealboard::config::{Config, CONFIG_FILE_NAME};
use dealboard::dashboard::{self, Page};
use dealboard::dataset::{self, LoadSummary, LoadedDataset};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Configuration decides whether verbose logging is on by default
    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    };

    init_logging(&args, &config);

    info!("Dealboard v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run(args, config).await {
        Ok(()) => Ok(()),
        Err(e) => {
            error!("Dashboard failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .dealboard.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE_NAME);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE_NAME
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", CONFIG_FILE_NAME))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE_NAME);
    println!("   Edit it to customize column names, date formats, category orders, and more.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args, config: &Config) {
    let level = if config.general.verbose && !args.quiet {
        tracing::Level::DEBUG
    } else {
        args.log_level()
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("⚠️  Failed to set tracing subscriber: {}", e);
    }
}

/// Run the complete dashboard workflow.
async fn run(args: Args, config: Config) -> Result<()> {
    let start_time = Instant::now();

    let data_path = dataset_path(&config)?;

    // Step 1: Load the dataset
    println!("📥 Loading dataset: {}", data_path.display());
    let LoadedDataset { dataset, summary } = dataset::load_csv_async(&data_path, &config.data)
        .await
        .with_context(|| format!("Failed to load dataset {}", data_path.display()))?;
    info!("Dataset fingerprint: {}", dataset.id().short());

    // Handle --dry-run: print the load summary and exit
    if args.dry_run {
        print_load_summary(&summary);
        println!("\n✅ Dry run complete. No report was written.");
        return Ok(());
    }

    if dataset.is_empty() {
        warn!("No closed deals in {}; every chart will be empty", data_path.display());
    }

    // Step 2: Compute the dashboard
    let pages = selected_pages(&config.report.pages);
    if pages.is_empty() {
        bail!("No valid pages selected (expected overview, profile, ticket or time)");
    }

    println!("\n📊 Computing dashboard...");
    println!(
        "   Pages: {}",
        pages.iter().map(|p| p.title()).collect::<Vec<_>>().join(", ")
    );

    let cache = Arc::new(AggregationCache::new());
    let mut board = dashboard::build_dashboard(
        Arc::new(dataset),
        cache,
        &pages,
        &config.ordering,
        args.show_progress(),
    )
    .await?;
    board.metadata.load_summary = Some(summary.clone());

    // Step 3: Render and save the report
    println!("\n📝 Generating report...");
    let format = OutputFormat::from_name(&config.general.format).unwrap_or_else(|| {
        warn!(
            "Unknown format '{}' in configuration, using markdown",
            config.general.format
        );
        OutputFormat::Markdown
    });
    let output = dashboard::render::render(&board, format, &config.report)?;

    let output_path = PathBuf::from(&config.general.output);
    std::fs::write(&output_path, &output)
        .with_context(|| format!("Failed to write report to {}", output_path.display()))?;

    // Print summary
    let duration = start_time.elapsed().as_secs_f64();
    println!("\n📊 Dashboard Summary:");
    println!(
        "   Closed deals: {} (of {} rows)",
        summary.rows_loaded, summary.rows_read
    );
    println!("   Charts: {}", board.chart_count());
    println!("   Duration: {:.1}s", duration);
    println!(
        "\n✅ Dashboard complete! Report saved to: {}",
        output_path.display()
    );

    Ok(())
}

/// Resolve the dataset path from the merged configuration.
fn dataset_path(config: &Config) -> Result<PathBuf> {
    match config.data.path {
        Some(ref path) if path.is_file() => Ok(path.clone()),
        Some(ref path) => bail!("Dataset does not exist: {}", path.display()),
        None => bail!("No dataset given. Use --data <FILE> or set data.path in {}", CONFIG_FILE_NAME),
    }
}

/// Convert configured page names, skipping unknown ones.
fn selected_pages(names: &[String]) -> Vec<Page> {
    names
        .iter()
        .filter_map(|name| {
            let page = Page::from_name(name);
            if page.is_none() {
                warn!("Ignoring unknown page '{}'", name);
            }
            page
        })
        .collect()
}

/// Handle --dry-run output.
fn print_load_summary(summary: &LoadSummary) {
    println!("\n🔍 Dry run: dataset loaded and validated\n");
    println!("   Rows read: {}", summary.rows_read);
    println!("   Closed deals loaded: {}", summary.rows_loaded);
    println!("   Skipped (open stage): {}", summary.skipped_unknown_stage);
    if summary.unreadable_rows > 0 {
        println!("   Unreadable rows: {}", summary.unreadable_rows);
    }
    println!("   Unparseable dates: {}", summary.malformed_dates);
    println!("   Missing values: {}", summary.missing_values);
    println!("   Empty labels filled: {}", summary.missing_labels);
    for column in &summary.absent_columns {
        println!("     ⚠️  Column not found: {}", column);
    }
}

/// Load configuration from file or use defaults.
///
/// Lookup order: `--config`, `.dealboard.toml` in the current directory,
/// `.dealboard.toml` next to the dataset. CLI flags are merged last.
fn load_config(args: &Args) -> Result<Config> {
    let mut config = if let Some(ref config_path) = args.config {
        // Try explicit config path
        Config::load(config_path)?
    } else {
        match Config::load_default() {
            Ok(Some(config)) => config,
            Ok(None) => {
                // Try next to the dataset
                match args.data.as_deref().map(Config::load_beside) {
                    Some(Ok(Some(config))) => config,
                    Some(Err(e)) => {
                        eprintln!("⚠️  Failed to load config next to dataset: {:#}", e);
                        Config::default()
                    }
                    _ => Config::default(),
                }
            }
            Err(e) => {
                eprintln!("⚠️  Failed to load {}: {:#}", CONFIG_FILE_NAME, e);
                Config::default()
            }
        }
    };

    config.merge_with_args(args);
    Ok(config)
}
