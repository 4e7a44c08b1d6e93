use std::io::IsTerminal;
use std::path::PathBuf;

use clap::{ArgAction, Parser};

use httpdisk::grep::{self, GrepOptions};

/// Search cached response bodies.
#[derive(Debug, Parser)]
#[command(
    name = "httpdisk-grep",
    about = "httpdisk-grep [options] pattern [path ...]",
    version,
    disable_help_flag = true
)]
struct Cli {
    /// Case-insensitive regex to search for
    pattern: String,
    /// Cache directories to search (defaults to the current directory)
    roots: Vec<PathBuf>,

    /// Suppress normal output and show count
    #[arg(short, long)]
    count: bool,
    /// Show response headers before each match
    #[arg(short = 'h', long)]
    head: bool,
    /// Do not print anything to stdout
    #[arg(short, long)]
    silent: bool,
    /// Show this help
    #[arg(long, action = ArgAction::Help)]
    help: Option<bool>,
}

fn main() {
    let cli = Cli::parse();
    let options = GrepOptions {
        pattern: cli.pattern,
        roots: cli.roots,
        count: cli.count,
        head: cli.head,
        silent: cli.silent,
        tty: std::io::stdout().is_terminal(),
    };

    let mut stdout = std::io::stdout();
    match grep::run(&options, &mut stdout) {
        // grep exit status: 0 on match, 1 on none, 2 on error
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(err) => {
            eprintln!("httpdisk-grep: {err:#}");
            std::process::exit(2);
        }
    }
}
