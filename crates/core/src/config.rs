use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub scraper: ScraperConfig,
    pub chat: ChatConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ScraperConfig {
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ChatConfig {
    /// Upper bound on completion/tool round-trips per user message.
    pub max_tool_turns: u32,
    /// Minimum spacing between consecutive external tool invocations.
    pub tool_call_interval_ms: u64,
    /// How many rows `show data` prints.
    pub recent_records_limit: u32,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_base_url: Option<String>,
    pub llm_model: Option<String>,
    pub scraper_api_key: Option<String>,
    pub scraper_base_url: Option<String>,
    pub max_tool_turns: Option<u32>,
    pub tool_call_interval_ms: Option<u64>,
    pub log_level: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://pricebot.db?mode=rwc".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                api_key: None,
                base_url: "https://api.openai.com/v1".to_string(),
                model: "gpt-4o-mini".to_string(),
                timeout_secs: 60,
            },
            scraper: ScraperConfig {
                api_key: None,
                base_url: "https://api.firecrawl.dev".to_string(),
                timeout_secs: 60,
            },
            chat: ChatConfig {
                max_tool_turns: 6,
                tool_call_interval_ms: 1_000,
                recent_records_limit: 10,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("pricebot.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// Load from an explicit file only, skipping the default search paths.
    /// Used by tests and by `pricebot --config <path>`.
    pub fn load_from_file(path: &Path, overrides: ConfigOverrides) -> Result<Self, ConfigError> {
        Self::load(LoadOptions {
            config_path: Some(path.to_path_buf()),
            require_file: true,
            overrides,
        })
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = base_url;
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
        }

        if let Some(scraper) = patch.scraper {
            if let Some(scraper_api_key_value) = scraper.api_key {
                self.scraper.api_key = Some(secret_value(scraper_api_key_value));
            }
            if let Some(base_url) = scraper.base_url {
                self.scraper.base_url = base_url;
            }
            if let Some(timeout_secs) = scraper.timeout_secs {
                self.scraper.timeout_secs = timeout_secs;
            }
        }

        if let Some(chat) = patch.chat {
            if let Some(max_tool_turns) = chat.max_tool_turns {
                self.chat.max_tool_turns = max_tool_turns;
            }
            if let Some(tool_call_interval_ms) = chat.tool_call_interval_ms {
                self.chat.tool_call_interval_ms = tool_call_interval_ms;
            }
            if let Some(recent_records_limit) = chat.recent_records_limit {
                self.chat.recent_records_limit = recent_records_limit;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("PRICEBOT_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("PRICEBOT_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("PRICEBOT_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("PRICEBOT_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("PRICEBOT_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("PRICEBOT_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("PRICEBOT_LLM_BASE_URL") {
            self.llm.base_url = value;
        }
        if let Some(value) = read_env("PRICEBOT_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("PRICEBOT_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("PRICEBOT_LLM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("PRICEBOT_SCRAPER_API_KEY") {
            self.scraper.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("PRICEBOT_SCRAPER_BASE_URL") {
            self.scraper.base_url = value;
        }
        if let Some(value) = read_env("PRICEBOT_SCRAPER_TIMEOUT_SECS") {
            self.scraper.timeout_secs = parse_u64("PRICEBOT_SCRAPER_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("PRICEBOT_CHAT_MAX_TOOL_TURNS") {
            self.chat.max_tool_turns = parse_u32("PRICEBOT_CHAT_MAX_TOOL_TURNS", &value)?;
        }
        if let Some(value) = read_env("PRICEBOT_CHAT_TOOL_CALL_INTERVAL_MS") {
            self.chat.tool_call_interval_ms =
                parse_u64("PRICEBOT_CHAT_TOOL_CALL_INTERVAL_MS", &value)?;
        }
        if let Some(value) = read_env("PRICEBOT_CHAT_RECENT_RECORDS_LIMIT") {
            self.chat.recent_records_limit =
                parse_u32("PRICEBOT_CHAT_RECENT_RECORDS_LIMIT", &value)?;
        }

        if let Some(value) = read_env("PRICEBOT_LOGGING_LEVEL") {
            self.logging.level = value;
        }
        if let Some(value) = read_env("PRICEBOT_LOGGING_FORMAT") {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(llm_api_key));
        }
        if let Some(llm_base_url) = overrides.llm_base_url {
            self.llm.base_url = llm_base_url;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(scraper_api_key) = overrides.scraper_api_key {
            self.scraper.api_key = Some(secret_value(scraper_api_key));
        }
        if let Some(scraper_base_url) = overrides.scraper_base_url {
            self.scraper.base_url = scraper_base_url;
        }
        if let Some(max_tool_turns) = overrides.max_tool_turns {
            self.chat.max_tool_turns = max_tool_turns;
        }
        if let Some(tool_call_interval_ms) = overrides.tool_call_interval_ms {
            self.chat.tool_call_interval_ms = tool_call_interval_ms;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_scraper(&self.scraper)?;
        validate_chat(&self.chat)?;
        validate_logging(&self.logging)?;
        Ok(())
    }

    /// Presence check for the API credentials the chat loop needs. Kept out
    /// of `validate()` so operator commands like `migrate` work without them.
    pub fn require_api_credentials(&self) -> Result<(), ConfigError> {
        let llm_key_missing = self
            .llm
            .api_key
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if llm_key_missing {
            return Err(ConfigError::Validation(
                "llm.api_key is required for chat (set PRICEBOT_LLM_API_KEY)".to_string(),
            ));
        }

        let scraper_key_missing = self
            .scraper
            .api_key
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if scraper_key_missing {
            return Err(ConfigError::Validation(
                "scraper.api_key is required for chat (set PRICEBOT_SCRAPER_API_KEY)".to_string(),
            ));
        }

        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("pricebot.toml"), PathBuf::from("config/pricebot.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if !llm.base_url.starts_with("http://") && !llm.base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "llm.base_url must start with http:// or https://".to_string(),
        ));
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    Ok(())
}

fn validate_scraper(scraper: &ScraperConfig) -> Result<(), ConfigError> {
    if scraper.timeout_secs == 0 || scraper.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "scraper.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if !scraper.base_url.starts_with("http://") && !scraper.base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "scraper.base_url must start with http:// or https://".to_string(),
        ));
    }

    Ok(())
}

fn validate_chat(chat: &ChatConfig) -> Result<(), ConfigError> {
    if chat.max_tool_turns == 0 || chat.max_tool_turns > 20 {
        return Err(ConfigError::Validation(
            "chat.max_tool_turns must be in range 1..=20".to_string(),
        ));
    }

    if chat.tool_call_interval_ms > 60_000 {
        return Err(ConfigError::Validation(
            "chat.tool_call_interval_ms must be at most 60000".to_string(),
        ));
    }

    if chat.recent_records_limit == 0 || chat.recent_records_limit > 100 {
        return Err(ConfigError::Validation(
            "chat.recent_records_limit must be in range 1..=100".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    scraper: Option<ScraperPatch>,
    chat: Option<ChatPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ScraperPatch {
    api_key: Option<String>,
    base_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatPatch {
    max_tool_turns: Option<u32>,
    tool_call_interval_ms: Option<u64>,
    recent_records_limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
