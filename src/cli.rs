use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CLI entry point so users can control the crawler from the command line.
/// Exit codes: 0=success, 2=invalid arguments, 3=I/O, config or store error
#[derive(Parser, Debug)]
#[command(name = "rust_crawler")]
#[command(about = "A polite, resumable, scope-limited web crawler")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Crawl from the seeds, or resume the crawl recorded in the save file.
    Crawl {
        #[arg(short, long, help = "TOML config file (defaults are used when omitted)")]
        config: Option<PathBuf>,

        #[arg(long, help = "Delete the save file and start again from the seeds")]
        restart: bool,

        #[arg(
            short,
            long = "seed",
            help = "Seed URL (repeatable); replaces the configured seeds"
        )]
        seeds: Vec<String>,

        #[arg(short, long, help = "Number of concurrent workers")]
        workers: Option<usize>,

        #[arg(short, long, help = "Per-worker politeness delay in seconds")]
        delay: Option<f64>,

        #[arg(long, help = "Hamming distance below which pages are near-duplicates")]
        threshold: Option<u32>,

        #[arg(long, help = "Location of the frontier save file")]
        save_file: Option<PathBuf>,

        #[arg(short, long, help = "Where to write the crawl report")]
        report: Option<PathBuf>,

        #[arg(long, help = "Directory for log files")]
        log_dir: Option<PathBuf>,

        #[arg(long, help = "Caching proxy to download through")]
        cache_server: Option<String>,

        #[arg(short, long, help = "User agent string for requests")]
        user_agent: Option<String>,
    },

    /// Show discovered/completed/pending counts from a save file without crawling.
    Status {
        #[arg(short, long, help = "TOML config file")]
        config: Option<PathBuf>,

        #[arg(long, help = "Location of the frontier save file")]
        save_file: Option<PathBuf>,
    },

    /// Export every frontier record as JSON lines.
    Export {
        #[arg(short, long, help = "TOML config file")]
        config: Option<PathBuf>,

        #[arg(long, help = "Location of the frontier save file")]
        save_file: Option<PathBuf>,

        #[arg(short, long, help = "Output JSONL file")]
        output: PathBuf,

        #[arg(long, help = "Only export URLs that are not completed yet")]
        pending_only: bool,
    },
}

impl Cli {
    /// Parse CLI arguments. On error, clap prints help and exits with code 2.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
