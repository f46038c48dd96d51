use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use autodev::config::{Config, Settings};
use autodev::contexts::REVERT_SEARCH_DEPTH;

mod cli;

#[derive(Parser)]
#[command(name = "autodev")]
#[command(about = "Chat with a model about a Java web project, apply its file changes, then run, test and publish", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true, help = "Enable verbose debug output")]
    verbose: bool,

    #[arg(long, global = true, help = "Print what would be written or executed without doing it")]
    dry_run: bool,

    #[arg(long, global = true, help = "Path to a YAML config file (default: ./autodev.yml)")]
    config: Option<PathBuf>,

    #[arg(long, global = true, help = "Project root (default: config file value, then the current directory)")]
    project_root: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Interactive session with the model")]
    Chat,

    #[command(about = "Send a single request to the model")]
    Ask {
        #[arg(help = "The request", required = true)]
        prompt: Vec<String>,

        #[arg(long, help = "Write every located proposal")]
        apply: bool,
    },

    #[command(about = "Extract file proposals from a saved model reply")]
    Parse {
        #[arg(help = "File containing the reply text")]
        file: PathBuf,

        #[arg(long, help = "Write every located proposal")]
        apply: bool,
    },

    #[command(about = "Find an existing project file by name or relative path")]
    Locate {
        #[arg(help = "File name or path relative to the project root")]
        name: String,
    },

    #[command(about = "Launch the service, wait for its port, run the tests and publish")]
    Run,

    #[command(about = "List recent commits on the configured branch")]
    Commits {
        #[arg(short = 'n', long, default_value_t = REVERT_SEARCH_DEPTH, help = "Number of commits")]
        count: usize,
    },

    #[command(about = "Revert a recent commit and push")]
    Revert {
        #[arg(help = "Commit id (at least 6 hex characters)")]
        sha: String,

        #[arg(long, help = "Tag the revert commit")]
        tag: Option<String>,
    },

    #[command(about = "Show the most recent action log entries")]
    Log {
        #[arg(short = 'n', long, default_value_t = 50, help = "Number of lines")]
        count: usize,
    },
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let settings = Settings::load(cli.config.as_deref())?;
    let config = Config::build(settings, cli.project_root, cli.verbose, cli.dry_run)?;

    match cli.command {
        Commands::Chat => {
            cli::chat(&config).await?;
        }
        Commands::Ask { prompt, apply } => {
            cli::ask(prompt, apply, &config).await?;
        }
        Commands::Parse { file, apply } => {
            cli::parse(file, apply, &config).await?;
        }
        Commands::Locate { name } => {
            cli::locate(name, &config).await?;
        }
        Commands::Run => {
            cli::run(&config).await?;
        }
        Commands::Commits { count } => {
            cli::commits(count, &config).await?;
        }
        Commands::Revert { sha, tag } => {
            cli::revert(sha, tag, &config).await?;
        }
        Commands::Log { count } => {
            cli::log(count, &config).await?;
        }
    }

    Ok(())
}
