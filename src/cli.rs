use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::util::parse_duration;

/// curl-like command line for the httpdisk binary.
#[derive(Debug, Clone, Parser)]
#[command(name = "httpdisk", about = "HTTP fetch with a disk cache", version)]
pub struct Cli {
    /// URL to request (a bare hostname is treated as http://)
    pub url: String,

    //
    // similar to curl
    //
    /// HTTP POST data
    #[arg(short = 'd', long)]
    pub data: Option<String>,
    /// Pass custom header(s) to server ("Name: value")
    #[arg(short = 'H', long = "header")]
    pub headers: Vec<String>,
    /// Include response headers in the output
    #[arg(short = 'i', long)]
    pub include: bool,
    /// Maximum time allowed for the transfer, in seconds
    #[arg(short = 'm', long)]
    pub max_time: Option<u64>,
    /// Write to file instead of stdout
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,
    /// Use host[:port] as proxy
    #[arg(short = 'x', long)]
    pub proxy: Option<String>,
    /// HTTP method to use
    #[arg(short = 'X', long)]
    pub request: Option<String>,
    /// Retry request if problems occur
    #[arg(long)]
    pub retry: Option<u32>,
    /// Silent mode (no per-request log line, errors only)
    #[arg(short = 's', long)]
    pub silent: bool,
    /// Send User-Agent to server
    #[arg(short = 'A', long)]
    pub user_agent: Option<String>,

    //
    // specific to httpdisk
    //
    /// Path to a configuration file (defaults to ./httpdisk.toml if present)
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Cache directory (defaults to ~/httpdisk)
    #[arg(long)]
    pub dir: Option<PathBuf>,
    /// When to expire cached requests (ex: 90s, 1h, 2d, 3w)
    #[arg(long, value_parser = parse_duration)]
    pub expires: Option<Duration>,
    /// Don't read anything from cache (but still write)
    #[arg(long)]
    pub force: bool,
    /// Don't read errors from cache (but still write)
    #[arg(long)]
    pub force_errors: bool,
    /// Query/body parameter names excluded from the cache key
    #[arg(long, value_delimiter = ',')]
    pub ignore_params: Vec<String>,
    /// Convert text/JSON response bodies to UTF-8
    #[arg(long)]
    pub utf8: bool,
    /// Show cache status for the url without hitting the network
    #[arg(long)]
    pub status: bool,
    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log: LogFormat,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}
