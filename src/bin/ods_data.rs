use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use ods_datasets::app::{App, FetchResult, ListResult};
use ods_datasets::config::ConfigLoader;
use ods_datasets::consent::StdinPrompt;
use ods_datasets::derived::{FOOTBALL_BASE, register_football_season};
use ods_datasets::domain::{DatasetName, FetchOptions};
use ods_datasets::error::OdsError;
use ods_datasets::fetch::HttpFetcher;
use ods_datasets::manifest::Manifest;
use ods_datasets::output::{ConsoleOutput, JsonOutput, OutputMode};
use ods_datasets::store::Store;

#[derive(Parser)]
#[command(name = "ods-data")]
#[command(about = "Fetch and cache open datasets after license consent")]
#[command(version, author)]
struct Cli {
    /// Configuration file (default: ./ods-data.json when present).
    #[arg(long, global = true)]
    config: Option<String>,

    #[arg(long, global = true)]
    non_interactive: bool,

    /// Accept dataset licenses without prompting.
    #[arg(long, global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "List datasets in the manifest")]
    List,
    #[command(about = "Show dataset metadata")]
    Info(NameArgs),
    #[command(about = "Show which files of a dataset are cached")]
    Status(NameArgs),
    #[command(about = "Download a dataset")]
    Fetch(FetchArgs),
    #[command(about = "Remove a dataset from the cache")]
    Clear(NameArgs),
}

#[derive(Args)]
struct NameArgs {
    name: String,
}

#[derive(Args)]
struct FetchArgs {
    name: String,

    #[arg(long)]
    force: bool,

    #[arg(long)]
    dry_run: bool,

    /// Football-data season such as 1314; fetches football_data_<season>.
    #[arg(long)]
    season: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<OdsError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &OdsError) -> u8 {
    match error {
        OdsError::UnknownDataset(_) | OdsError::InvalidDatasetName(_) => 2,
        OdsError::ClientError { .. }
        | OdsError::ServerError { .. }
        | OdsError::UnexpectedStatus { .. }
        | OdsError::Network { .. } => 3,
        OdsError::ConsentDenied(_) | OdsError::ConsentUnavailable(_) => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let mut manifest = Manifest::builtin()?;
    if let Some(path) = &config.manifest {
        manifest.merge(Manifest::load(path)?);
    }
    let store = Store::new(config.data_dir.clone());
    let fetcher = HttpFetcher::new()?;
    let mut app = App::new(
        store,
        manifest,
        fetcher,
        config.override_manual_authorize || cli.yes,
    );

    match cli.command {
        Command::List => run_list(&app, output_mode),
        Command::Info(args) => {
            let name: DatasetName = args.name.parse()?;
            let details = app.details(name.as_str())?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_info(&details).into_diagnostic(),
                OutputMode::Interactive => {
                    println!("{} ({} layout)", details.name, details.layout);
                    for (label, value) in [
                        ("details", &details.details),
                        ("license", &details.license),
                        ("citation", &details.citation),
                    ] {
                        if let Some(value) = value {
                            println!("  {label}: {value}");
                        }
                    }
                    if let Some(size) = details.size {
                        println!("  size: {size} bytes");
                    }
                    for url in &details.urls {
                        println!("  {url}");
                    }
                    Ok(())
                }
            }
        }
        Command::Status(args) => {
            let name: DatasetName = args.name.parse()?;
            let state = app.cache_state(name.as_str())?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_status(&state).into_diagnostic(),
                OutputMode::Interactive => {
                    let label = if state.is_complete() { "available" } else { "incomplete" };
                    println!("{}: {label}", state.dataset);
                    for path in &state.missing {
                        println!("  missing: {path}");
                    }
                    Ok(())
                }
            }
        }
        Command::Fetch(args) => run_fetch(args, &mut app, output_mode),
        Command::Clear(args) => {
            let name: DatasetName = args.name.parse()?;
            let result = app.clear_cache(name.as_str())?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_clear(&result).into_diagnostic(),
                OutputMode::Interactive => {
                    println!(
                        "cleared {}: {} files, {} directories removed",
                        result.dataset,
                        result.removed_files.len(),
                        result.removed_dirs.len()
                    );
                    Ok(())
                }
            }
        }
    }
}

fn run_list(app: &App<HttpFetcher>, output_mode: OutputMode) -> miette::Result<()> {
    let result = app.list();
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_list(&result).into_diagnostic(),
        OutputMode::Interactive => {
            print_list(&result);
            Ok(())
        }
    }
}

fn run_fetch(
    args: FetchArgs,
    app: &mut App<HttpFetcher>,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let FetchArgs {
        name,
        force,
        dry_run,
        season,
    } = args;

    let name = name.parse::<DatasetName>()?.to_string();
    let name = match season {
        Some(season) if name == FOOTBALL_BASE => {
            register_football_season(app.manifest_mut(), &season)?.0
        }
        Some(_) => {
            return Err(miette::Report::msg(format!(
                "--season only applies to {FOOTBALL_BASE}"
            )));
        }
        None => name,
    };
    let options = FetchOptions { force, dry_run };

    match output_mode {
        OutputMode::NonInteractive => {
            let sink = ConsoleOutput::stderr();
            let result = app.download(&name, &options, &mut StdinPrompt, &sink)?;
            JsonOutput::print_fetch(&result).into_diagnostic()
        }
        OutputMode::Interactive => {
            let sink = ConsoleOutput::stdout();
            let result = app.download(&name, &options, &mut StdinPrompt, &sink)?;
            print_fetch_summary(&result);
            Ok(())
        }
    }
}

fn print_list(result: &ListResult) {
    println!("data directory: {}", result.data_dir);
    for entry in &result.datasets {
        let marker = if entry.available { "*" } else { " " };
        println!(
            "{marker} {:<28} {:<9} {} files",
            entry.name, entry.layout, entry.files
        );
    }
}

fn print_fetch_summary(result: &FetchResult) {
    if result.dry_run {
        println!("{}: {} files would be fetched", result.dataset, result.planned.len());
        for location in &result.planned {
            println!("  {} -> {}", location.url, location.relative);
        }
        return;
    }
    println!(
        "{}: {} fetched, {} already cached",
        result.dataset,
        result.fetched.len(),
        result.skipped.len()
    );
    for archive in &result.unpacked {
        println!("  unpacked {archive}");
    }
}
