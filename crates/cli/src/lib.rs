pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "pricebot",
    about = "Pricebot operator CLI",
    long_about = "Chat about LLM inference pricing: scrape provider pages, extract structured \
                  plans into SQLite, and answer from the cache.",
    after_help = "Examples:\n  pricebot chat\n  pricebot migrate\n  pricebot doctor --json"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Path to a pricebot.toml config file")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Start the interactive pricing chat session")]
    Chat,
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Inspect effective configuration values with redaction")]
    Config,
    #[command(about = "Validate config, API credential readiness, and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Chat => commands::chat::run(cli.config.as_deref()),
        Command::Migrate => commands::migrate::run(cli.config.as_deref()),
        Command::Config => commands::CommandResult {
            exit_code: 0,
            output: commands::config::run(cli.config.as_deref()),
        },
        Command::Doctor { json } => commands::CommandResult {
            exit_code: 0,
            output: commands::doctor::run(cli.config.as_deref(), json),
        },
    };

    if !result.output.is_empty() {
        println!("{}", result.output);
    }
    ExitCode::from(result.exit_code)
}
