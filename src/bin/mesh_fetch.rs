use std::fs::File;
use std::process::ExitCode;
use std::sync::Mutex;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use mesh_fetch::app::App;
use mesh_fetch::classify::relocate_directory;
use mesh_fetch::config::{ConfigLoader, ConfigOverrides, ResolvedConfig};
use mesh_fetch::domain::RelocationMode;
use mesh_fetch::error::MeshError;
use mesh_fetch::fs_util::prepare_download_dir;
use mesh_fetch::output::{JsonOutput, OutputMode, TextOutput};
use mesh_fetch::webdriver::WebDriverSession;

#[derive(Parser)]
#[command(name = "mesh-fetch")]
#[command(about = "Download the 500m mesh population archives and file them by year and prefecture")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<Utf8PathBuf>,

    #[arg(long, global = true)]
    log_file: Option<Utf8PathBuf>,

    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Click every download link and file the archives (default)")]
    Run(RunArgs),
    #[command(about = "File the archives already present in a directory")]
    Sort(SortArgs),
    #[command(about = "Print the prefecture code table")]
    Regions,
}

#[derive(Args, Clone, Default)]
struct RunArgs {
    #[arg(long)]
    base_dir: Option<Utf8PathBuf>,

    #[arg(long)]
    webdriver_url: Option<String>,

    #[arg(long)]
    page_url: Option<String>,

    #[arg(long)]
    max_attempts: Option<u32>,

    #[arg(long)]
    poll_interval_ms: Option<u64>,

    #[arg(long)]
    no_size_stability: bool,

    #[arg(long, help = "Do not predict file names; accept any finished archive")]
    discover: bool,

    #[arg(long)]
    relocation: Option<RelocationMode>,

    #[arg(long)]
    verify: bool,

    #[arg(long, help = "Delete and recreate the base directory first")]
    clean: bool,

    #[arg(long)]
    headless: bool,
}

#[derive(Args, Clone)]
struct SortArgs {
    #[arg(long, help = "Directory to scan (defaults to the base directory)")]
    dir: Option<Utf8PathBuf>,

    #[arg(long)]
    base_dir: Option<Utf8PathBuf>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(mesh) = report.downcast_ref::<MeshError>() {
            return ExitCode::from(map_exit_code(mesh));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &MeshError) -> u8 {
    match error {
        MeshError::ConfigRead(_) | MeshError::ConfigParse(_) | MeshError::InvalidConfig(_) => 2,
        MeshError::WebDriverHttp(_)
        | MeshError::WebDriverStatus { .. }
        | MeshError::PageDriver(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };

    match cli.command.unwrap_or(Commands::Run(RunArgs::default())) {
        Commands::Run(args) => {
            let overrides = ConfigOverrides {
                page_url: args.page_url,
                base_dir: args.base_dir,
                webdriver_url: args.webdriver_url,
                headless: args.headless,
                max_attempts: args.max_attempts,
                poll_interval_ms: args.poll_interval_ms,
                no_size_stability: args.no_size_stability,
                discover: args.discover,
                relocation: args.relocation,
                verify_archives: args.verify,
                clean: args.clean,
                log_file: cli.log_file,
            };
            let config = ConfigLoader::resolve(cli.config.as_deref(), overrides)?;
            init_logging(&config)?;
            run_download(config, output_mode)
        }
        Commands::Sort(args) => {
            let overrides = ConfigOverrides {
                base_dir: args.base_dir,
                relocation: Some(RelocationMode::Streaming),
                log_file: cli.log_file,
                ..ConfigOverrides::default()
            };
            let config = ConfigLoader::resolve(cli.config.as_deref(), overrides)?;
            init_logging(&config)?;
            run_sort(config, args.dir)
        }
        Commands::Regions => TextOutput::print_regions().into_diagnostic(),
    }
}

fn init_logging(config: &ResolvedConfig) -> miette::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    match &config.log_file {
        Some(path) => {
            let file = File::create(path.as_std_path())
                .map_err(|err| MeshError::Filesystem(format!("create log {path}: {err}")))?;
            builder
                .with_ansi(false)
                .with_writer(BoxMakeWriter::new(Mutex::new(file)))
                .init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

fn run_download(config: ResolvedConfig, output_mode: OutputMode) -> miette::Result<()> {
    prepare_download_dir(&config.base_dir, config.clean)?;
    let download_dir = config
        .base_dir
        .canonicalize_utf8()
        .map_err(|err| MeshError::Filesystem(err.to_string()))?;
    info!(dir = %download_dir, relocation = %config.relocation, "starting download process");

    let session = WebDriverSession::start(config.browser.clone(), &download_dir)?;
    session.navigate(&config.page_url)?;

    let app = App::new(config);
    let report = match output_mode {
        OutputMode::Json => app.run(&session, &JsonOutput)?,
        OutputMode::Text => app.run(&session, &TextOutput)?,
    };
    drop(session);

    match output_mode {
        OutputMode::Json => JsonOutput::print_report(&report).into_diagnostic()?,
        OutputMode::Text => TextOutput::print_report(&report).into_diagnostic()?,
    }
    info!("process completed");
    Ok(())
}

fn run_sort(config: ResolvedConfig, dir: Option<Utf8PathBuf>) -> miette::Result<()> {
    let dir = dir.unwrap_or_else(|| config.base_dir.clone());
    let app = App::new(config);
    let relocations = relocate_directory(app.watcher(), &dir, &app.config().base_dir)?;
    let mut failed = 0usize;
    for relocation in &relocations {
        match &relocation.outcome {
            Ok(dest) => println!("{} -> {dest}", relocation.source),
            Err(err) => {
                failed += 1;
                println!("{}: {err}", relocation.source);
            }
        }
    }
    if failed > 0 {
        warn!(failed, total = relocations.len(), "some archives were left in place");
    }
    Ok(())
}
