use rust_crawler::cli::{Cli, Commands};
use rust_crawler::config::{ConfigError, CrawlConfig};
use rust_crawler::frontier::Frontier;
use rust_crawler::logging::{self, LoggingError};
use rust_crawler::network::{FetchError, HttpDownloader};
use rust_crawler::state::{CrawlerState, StateError};
use rust_crawler::url_utils::normalize_url_for_cli;
use rust_crawler::worker::WorkerPool;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MainError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Logging error: {0}")]
    Logging(#[from] LoggingError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("HTTP client error: {0}")]
    Fetch(#[from] FetchError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MainError {
    /// Usage errors exit with 2 from clap before we get here.
    fn exit_code(&self) -> u8 {
        3
    }
}

/// Values given on the command line win over the config file.
#[derive(Debug, Default)]
struct CrawlOverrides {
    restart: bool,
    seeds: Vec<String>,
    workers: Option<usize>,
    delay: Option<f64>,
    threshold: Option<u32>,
    save_file: Option<PathBuf>,
    report: Option<PathBuf>,
    log_dir: Option<PathBuf>,
    cache_server: Option<String>,
    user_agent: Option<String>,
}

impl CrawlOverrides {
    fn apply(self, config: &mut CrawlConfig) {
        if self.restart {
            config.restart = true;
        }
        if !self.seeds.is_empty() {
            config.seed_urls = self
                .seeds
                .iter()
                .map(|s| normalize_url_for_cli(s))
                .collect();
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(delay) = self.delay {
            config.politeness_delay_secs = delay;
        }
        if let Some(threshold) = self.threshold {
            config.similarity_threshold = threshold;
        }
        if let Some(save_file) = self.save_file {
            config.save_file = save_file;
        }
        if let Some(report) = self.report {
            config.report_file = report;
        }
        if let Some(log_dir) = self.log_dir {
            config.log_dir = log_dir;
        }
        if let Some(cache_server) = self.cache_server {
            config.cache_server = Some(cache_server);
        }
        if let Some(user_agent) = self.user_agent {
            config.user_agent = user_agent;
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<CrawlConfig, ConfigError> {
    match path {
        Some(path) => CrawlConfig::load(path),
        None => Ok(CrawlConfig::default()),
    }
}

async fn run_crawl_command(
    config_path: Option<PathBuf>,
    overrides: CrawlOverrides,
) -> Result<(), MainError> {
    let mut config = load_config(config_path.as_deref())?;
    overrides.apply(&mut config);
    config.validate()?;

    let _log_guards = logging::init_logging(&config.log_dir)?;

    let policy = config.policy.clone().compiled();
    let frontier = Arc::new(Frontier::initialize(&config, &policy, config.restart)?);
    let downloader = Arc::new(HttpDownloader::new(&config)?);

    tracing::info!(
        "Crawling with {} workers, {}s politeness delay, similarity threshold {}",
        config.workers,
        config.politeness_delay_secs,
        config.similarity_threshold
    );

    let pool = WorkerPool::new(config, frontier, downloader);

    let stopper = pool.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Received Ctrl+C, finishing in-flight pages...");
            stopper.stop();
        }
    });

    let summary = pool.run().await;

    println!(
        "Processed {}, discarded {}, store failures {}, {}s",
        summary.processed, summary.discarded, summary.failed_writes, summary.duration_secs
    );
    match &summary.report_file {
        Some(path) => println!("Report: {}", path.display()),
        None => print!("{}", summary.report),
    }

    Ok(())
}

fn save_file_for(config_path: Option<PathBuf>, save_file: Option<PathBuf>) -> Result<PathBuf, MainError> {
    let config = load_config(config_path.as_deref())?;
    Ok(save_file.unwrap_or(config.save_file))
}

fn run_status_command(config_path: Option<PathBuf>, save_file: Option<PathBuf>) -> Result<(), MainError> {
    let save_file = save_file_for(config_path, save_file)?;
    if !save_file.exists() {
        println!("No save file at {}", save_file.display());
        return Ok(());
    }

    let state = CrawlerState::open(&save_file)?;
    let counts = state.counts()?;
    println!("Save file: {}", save_file.display());
    println!("Discovered: {}", counts.total);
    println!("Completed:  {}", counts.completed);
    println!("Pending:    {}", counts.total - counts.completed);

    Ok(())
}

fn run_export_command(
    config_path: Option<PathBuf>,
    save_file: Option<PathBuf>,
    output: PathBuf,
    pending_only: bool,
) -> Result<(), MainError> {
    let save_file = save_file_for(config_path, save_file)?;
    if !save_file.exists() {
        return Err(MainError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no save file at {}", save_file.display()),
        )));
    }

    let state = CrawlerState::open(&save_file)?;
    let count = state.export_to_jsonl(&output, pending_only)?;
    println!("Exported {} URLs to {}", count, output.display());

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();

    let result = match cli.command {
        Commands::Crawl {
            config,
            restart,
            seeds,
            workers,
            delay,
            threshold,
            save_file,
            report,
            log_dir,
            cache_server,
            user_agent,
        } => {
            let overrides = CrawlOverrides {
                restart,
                seeds,
                workers,
                delay,
                threshold,
                save_file,
                report,
                log_dir,
                cache_server,
                user_agent,
            };
            run_crawl_command(config, overrides).await
        }

        Commands::Status { config, save_file } => run_status_command(config, save_file),

        Commands::Export {
            config,
            save_file,
            output,
            pending_only,
        } => run_export_command(config, save_file, output, pending_only),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}
