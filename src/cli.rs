use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};

use crate::config::Config;
use crate::{client, daemon};

#[derive(Parser)]
#[command(
    name = "muxherd",
    version,
    about = "Routes commands to coding agents running in tmux panes"
)]
struct Cli {
    /// Path to the config file (default: ~/.config/muxherd/config.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the dispatcher daemon (the default)
    Run,
    /// Send one command line to a running daemon and print the reply
    Send {
        /// A line in the command grammar, e.g. "1: run the tests"
        line: String,
    },
    /// Create an example configuration file
    Init,
    /// Generate shell completion scripts
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => runtime()?.block_on(daemon::run(cli.config.as_deref())),
        Commands::Send { line } => {
            let config = Config::load(cli.config.as_deref())?;
            let socket_path = config.socket_path()?;
            let reply = runtime()?.block_on(client::send_line(&socket_path, &line))?;
            println!("{reply}");
            if reply.starts_with("error") {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Init => Config::init(),
        Commands::Completions { shell } => {
            generate(shell, &mut Cli::command(), "muxherd", &mut io::stdout());
            Ok(())
        }
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("Failed to start async runtime")
}
