use std::io::{self, BufRead, Write};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use pricebot_agent::{CompletionClient, LlmExtractor, OpenAiClient, Orchestrator};
use pricebot_core::config::{AppConfig, LogFormat, LoggingConfig};
use pricebot_core::ChatSession;
use pricebot_db::{connect, migrations, PricingRepository, SqlPricingRepository};
use pricebot_tools::{ExtractTool, ScrapeTool, ToolServer};

use crate::commands::{load_config, CommandResult};

pub fn run(config_path: Option<&Path>) -> CommandResult {
    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "chat",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };
    if let Err(error) = config.require_api_credentials() {
        return CommandResult::failure("chat", "config_validation", error.to_string(), 2);
    }

    init_logging(&config.logging);

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "chat",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    match runtime.block_on(chat_session(&config)) {
        Ok(()) => CommandResult { exit_code: 0, output: String::new() },
        Err(error) => CommandResult::failure("chat", "chat_session", format!("{error:#}"), 4),
    }
}

async fn chat_session(config: &AppConfig) -> anyhow::Result<()> {
    let pool = connect(&config.database).await.context("failed to connect to database")?;
    migrations::run_pending(&pool).await.context("failed to apply migrations")?;

    let store: Arc<dyn PricingRepository> = Arc::new(SqlPricingRepository::new(pool.clone()));
    let orchestrator = build_orchestrator(config, store.clone())?;

    println!("pricebot ready. Ask about LLM inference pricing.");
    println!("Commands: `show data` prints saved records, `quit` exits.");

    let mut session = ChatSession::new();
    let stdin = io::stdin();
    loop {
        print!("you> ");
        io::stdout().flush().context("failed to flush stdout")?;

        let mut line = String::new();
        let bytes_read = stdin.lock().read_line(&mut line).context("failed to read input")?;
        if bytes_read == 0 {
            break;
        }

        let keep_going = dispatch_line(
            line.trim(),
            &mut session,
            &orchestrator,
            store.as_ref(),
            config.chat.recent_records_limit,
        )
        .await;
        if !keep_going {
            break;
        }
    }

    pool.close().await;
    println!("goodbye.");
    Ok(())
}

/// Handles one REPL line. The two literal commands never reach the
/// orchestrator: `quit`/`exit` end the loop, `show data` only reads the
/// store. Everything else is a chat query. Returns whether the loop should
/// keep running.
async fn dispatch_line(
    input: &str,
    session: &mut ChatSession,
    orchestrator: &Orchestrator,
    store: &dyn PricingRepository,
    recent_limit: u32,
) -> bool {
    match input {
        "quit" | "exit" => false,
        "show data" => {
            show_data(store, recent_limit).await;
            true
        }
        _ => {
            match orchestrator.handle_user_message(session, input).await {
                Ok(Some(answer)) => println!("bot> {answer}"),
                Ok(None) => {}
                // the session survives a failed turn
                Err(error) => eprintln!("error: {error:#}"),
            }
            true
        }
    }
}

fn build_orchestrator(
    config: &AppConfig,
    store: Arc<dyn PricingRepository>,
) -> anyhow::Result<Orchestrator> {
    let Some(llm_api_key) = config.llm.api_key.clone() else {
        anyhow::bail!("llm.api_key is not configured");
    };
    let Some(scraper_api_key) = config.scraper.api_key.clone() else {
        anyhow::bail!("scraper.api_key is not configured");
    };

    let llm_http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.llm.timeout_secs))
        .build()
        .context("failed to build LLM HTTP client")?;
    let scraper_http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.scraper.timeout_secs))
        .build()
        .context("failed to build scraper HTTP client")?;

    let completion: Arc<dyn CompletionClient> = Arc::new(OpenAiClient::new(
        llm_http,
        llm_api_key,
        config.llm.base_url.clone(),
        config.llm.model.clone(),
    ));

    let mut tools = ToolServer::new();
    tools.register(ScrapeTool::new(scraper_http, scraper_api_key, config.scraper.base_url.clone()));
    tools.register(ExtractTool::new(Arc::new(LlmExtractor::new(completion.clone()))));

    Ok(Orchestrator::new(
        completion,
        tools,
        store,
        config.chat.max_tool_turns,
        Duration::from_millis(config.chat.tool_call_interval_ms),
    ))
}

async fn show_data(store: &dyn PricingRepository, limit: u32) {
    match store.recent(limit).await {
        Ok(records) if records.is_empty() => println!("no pricing records saved yet."),
        Ok(records) => {
            println!("most recent pricing records (newest first):");
            for record in records {
                println!("  {}", record.summary_line());
            }
        }
        Err(error) => eprintln!("error: failed to read pricing records: {error}"),
    }
}

fn init_logging(config: &LoggingConfig) {
    let log_level = tracing::Level::from_str(&config.level).unwrap_or(tracing::Level::INFO);
    match config.format {
        LogFormat::Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        LogFormat::Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}
