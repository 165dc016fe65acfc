use clap::Parser;
use std::path::PathBuf;

#[derive(clap::Parser, Debug)]
#[command(author, version, about = "Watch bug bounty scopes for new and recovering hosts", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable detailed debug logging (global)
    #[arg(long, global = true, default_value_t = false)]
    pub debug: bool,

    /// Enable verbose logging (global)
    #[arg(long, global = true, default_value_t = false)]
    pub verbose: bool,

    /// JSON config file; environment variables and flags override it
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Database path, or :memory: for a throwaway store
    #[arg(long, global = true, value_name = "PATH")]
    pub db: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Serve the read API and scan on a fixed interval
    Serve {
        /// Listen address (default from config, 0.0.0.0:8080)
        #[arg(long, value_name = "ADDR")]
        bind: Option<String>,

        /// Wait one full interval before the first scan
        #[arg(long, default_value_t = false)]
        no_initial_scan: bool,
    },

    /// Run one scan cycle and print its report
    Scan,

    /// Print aggregate counts
    Stats,

    /// List recent status changes
    Changes {
        /// Only changes not yet acknowledged
        #[arg(long, default_value_t = false)]
        unnotified: bool,

        /// Maximum number of changes
        #[arg(short = 'n', long, default_value_t = 50_usize)]
        limit: usize,

        /// Also append the listed changes to FILE as JSON lines
        #[arg(long, value_name = "FILE")]
        jsonl: Option<PathBuf>,
    },

    /// Mark a status change as notified
    Ack {
        /// Status change id
        id: i64,
    },

    /// Fetch httpx metadata for a program's known domains
    Enrich {
        /// Program handle
        program: String,

        /// Maximum number of domains to enrich
        #[arg(short = 'n', long, default_value_t = 100_usize)]
        limit: usize,
    },
}

pub fn parse_cli() -> Cli {
    Cli::parse()
}
