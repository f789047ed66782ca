mod config;
mod convert;
mod document;
mod engine;
mod error;
mod grafana;
mod lock;
mod logging;
mod range;
mod server;
mod store;
mod xlsx;

use std::path::{Path, PathBuf};
use std::process::exit;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use colored::*;
use tracing::info;

use config::{ReportConfig, ServerConfig};
use engine::{AnnotationMode, ReportBuilder, ReportOptions};
use grafana::GrafanaHttp;
use range::DateRange;
use store::DataStore;

// ======================================================
// CLI
// ======================================================

#[derive(Parser)]
#[command(name = "grafana-report")]
#[command(about = "Spreadsheet reports from Grafana dashboards")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Report period. Explicit dates win over `--days`; with neither, the
/// configured day count is used.
#[derive(Args, Clone, Default)]
struct RangeArgs {
    /// First day, dd/mm/yyyy
    #[arg(long, requires = "to")]
    from: Option<String>,

    /// Last day, dd/mm/yyyy
    #[arg(long, requires = "from")]
    to: Option<String>,

    /// Trailing window of whole days ending now
    #[arg(long, conflicts_with_all = ["from", "to"])]
    days: Option<u32>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, convert and render. Prints the report file name on stdout.
    Generate {
        #[arg(long)]
        config: PathBuf,

        #[command(flatten)]
        range: RangeArgs,

        /// Render from the intermediate files already on disk.
        #[arg(long)]
        offline: bool,
    },
    /// Fetch and convert only.
    Fetch {
        #[arg(long)]
        config: PathBuf,

        #[command(flatten)]
        range: RangeArgs,
    },
    /// Same as `generate --offline`.
    Render {
        #[arg(long)]
        config: PathBuf,

        #[command(flatten)]
        range: RangeArgs,
    },
    /// Validate a report configuration and print what it would draw.
    Check {
        #[arg(long)]
        config: PathBuf,
    },
    /// Run the HTTP dispatcher.
    Serve {
        #[arg(long)]
        config: PathBuf,
    },
    Version,
}

// ======================================================
// MAIN
// ======================================================

#[tokio::main]
async fn main() {
    logging::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Generate { config, range, offline } => generate(&config, &range, offline).await,
        Commands::Fetch { config, range }  => fetch(&config, &range).await,
        Commands::Render { config, range } => generate(&config, &range, true).await,
        Commands::Check { config } => check(&config),
        Commands::Serve { config } => serve(&config).await,
        Commands::Version => {
            println!("grafana-report {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        exit(1);
    }
}

// ======================================================
// COMMANDS
// ======================================================

async fn generate(path: &Path, args: &RangeArgs, offline: bool) -> anyhow::Result<()> {
    let config = load_report(path)?;
    let range = resolve_range(args, config.days)?;
    let store = DataStore::new(&config.data_dir);

    if offline {
        info!(data_dir = %store.root().display(), "offline: rendering from existing files");
    } else {
        fetch_all(&config, &store, &range).await?;
    }

    let name = render(&config, &store, &range)?;
    // the dispatcher reads this line
    println!("{}", name);
    Ok(())
}

async fn fetch(path: &Path, args: &RangeArgs) -> anyhow::Result<()> {
    let config = load_report(path)?;
    let range = resolve_range(args, config.days)?;
    let store = DataStore::new(&config.data_dir);
    fetch_all(&config, &store, &range).await
}

async fn serve(path: &Path) -> anyhow::Result<()> {
    let config = ServerConfig::load(path)
        .with_context(|| format!("Could not load server config {}", path.display()))?;
    server::serve(config).await
}

fn load_report(path: &Path) -> anyhow::Result<ReportConfig> {
    ReportConfig::load(path).with_context(|| format!("Could not load report config {}", path.display()))
}

fn resolve_range(args: &RangeArgs, default_days: u32) -> anyhow::Result<DateRange> {
    let range = match (&args.from, &args.to, args.days) {
        (Some(from), Some(to), _) => DateRange::from_dates(from, to)?,
        (_, _, Some(days))        => DateRange::last_days(days)?,
        _                         => DateRange::last_days(default_days)?,
    };
    info!(start = %range.start_query(), end = %range.end_query(), "report period");
    Ok(range)
}

async fn fetch_all(config: &ReportConfig, store: &DataStore, range: &DateRange) -> anyhow::Result<()> {
    let token = config.grafana.resolve_api_key()?;
    let client = GrafanaHttp::new(config.grafana.base_url(), &token)?;

    for group in &config.dashboards {
        grafana::fetch_group(&client, store, group, range)
            .await
            .with_context(|| format!("Fetching dashboard '{}'", group.key))?;
        store.convert_group(group)?;
    }
    Ok(())
}

/// Lay out and save the workbook. Returns the file name.
fn render(config: &ReportConfig, store: &DataStore, range: &DateRange) -> anyhow::Result<String> {
    let mut options = ReportOptions::new(&config.title, range.start.naive_utc(), range.end.naive_utc());
    options.heading = config.heading().to_string();
    options.logo = config.logo.clone();
    options.attribution = config.footer.clone();

    let name = options.filename();
    let doc = ReportBuilder::new(options).build(&config.dashboards, store)?;

    let path = config.reports_dir.join(&name);
    xlsx::save(&doc, &path)?;
    info!(path = %path.display(), sheets = doc.sheets().len(), charts = doc.chart_count(), "report written");
    Ok(name)
}

fn check(path: &Path) -> anyhow::Result<()> {
    let config = load_report(path)?;

    println!();
    println!("{}", config.title.bold());
    println!("{}", "────────────────────────────────────────────────────────────".dimmed());
    println!("Header      : {}", config.heading());
    println!("Grafana     : {}", config.grafana.base_url());
    match config.grafana.resolve_api_key() {
        Ok(_)  => println!("API key     : {}", "ok".green()),
        Err(e) => println!("API key     : {}", e.to_string().red()),
    }
    println!("Data dir    : {}", config.data_dir.display());
    println!("Reports dir : {}", config.reports_dir.display());
    match &config.logo {
        Some(logo) if logo.exists() => println!("Logo        : {}", logo.display()),
        Some(logo) => println!("Logo        : {} {}", logo.display(), "(missing)".yellow()),
        None => println!("Logo        : {}", "none".dimmed()),
    }
    println!("Default     : last {} days", config.days);
    println!();

    println!("{:<6} {:<32} {:<8} {:<8} {:<8}", "Id", "Panel", "Kind", "Size", "Notes");
    println!("{}", "────────────────────────────────────────────────────────────".dimmed());

    for group in &config.dashboards {
        println!("{} {}", group.title.bold(), format!("[{} · {}]", group.key, group.uid).dimmed());
        for panel in &group.panels {
            let note = match panel.annotation_mode {
                AnnotationMode::None   => String::new(),
                AnnotationMode::Info   => "info".to_string(),
                AnnotationMode::MaxMin => "max/min".to_string(),
                AnnotationMode::Table  => "table".to_string(),
            };
            let kind = format!("{:?}", panel.chart_kind).to_lowercase();
            let size = format!("{:?}", panel.size_class).to_lowercase();
            let binary = if panel.is_binary { " binary" } else { "" };
            println!(
                "{:<6} {:<32} {:<8} {:<8} {}{}",
                panel.id, panel.name, kind, size, note, binary
            );
        }
        println!();
    }

    println!(
        "{} {} dashboards, {} panels",
        "Valid:".green().bold(),
        config.dashboards.len(),
        config.panel_count()
    );
    Ok(())
}

// ======================================================
// TESTS
// ======================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_dates_win_over_the_configured_window() {
        let args = RangeArgs {
            from: Some("01/03/2024".to_string()),
            to: Some("08/03/2024".to_string()),
            days: None,
        };
        let range = resolve_range(&args, 7).unwrap();
        assert_eq!(range.window_days, None);
        assert_eq!(range.start_query(), "2024-03-01T12:00:00Z");
    }

    #[test]
    fn falls_back_to_configured_days() {
        let range = resolve_range(&RangeArgs::default(), 3).unwrap();
        assert_eq!(range.window_days, Some(3));

        let args = RangeArgs { days: Some(14), ..RangeArgs::default() };
        assert_eq!(resolve_range(&args, 3).unwrap().window_days, Some(14));
    }

    #[test]
    fn renders_offline_from_intermediate_files() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = r#"
title: Planta
reports_dir: out
data_dir: data
grafana:
  url: http://localhost:3000
  api_key: secret
dashboards:
  - key: planta
    title: Planta
    uid: abc
    panels:
      - id: 1
        name: Caudal
        kind: line
        size: small
"#;
        let path = dir.path().join("report.yaml");
        std::fs::write(&path, yaml).unwrap();

        let config = load_report(&path).unwrap();
        let range = DateRange::from_dates("01/03/2024", "08/03/2024").unwrap();
        let name = render(&config, &DataStore::new(&config.data_dir), &range).unwrap();

        assert_eq!(name, "2024-03-08_informe_Planta.xlsx");
        assert!(dir.path().join("out").join(&name).exists());
    }
}
