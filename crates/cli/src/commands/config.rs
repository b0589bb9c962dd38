use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use toml::Value;

use crate::commands::load_config;

pub fn run(config_path: Option<&Path>) -> String {
    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let file_path = config_path.map(Path::to_path_buf).or_else(detect_config_path);
    let file_doc = load_config_file_doc(file_path.as_deref());

    let entries: Vec<(&str, String, &str)> = vec![
        ("database.url", config.database.url.clone(), "PRICEBOT_DATABASE_URL"),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            "PRICEBOT_DATABASE_MAX_CONNECTIONS",
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            "PRICEBOT_DATABASE_TIMEOUT_SECS",
        ),
        ("llm.api_key", redact_key(config.llm.api_key.as_ref()), "PRICEBOT_LLM_API_KEY"),
        ("llm.base_url", config.llm.base_url.clone(), "PRICEBOT_LLM_BASE_URL"),
        ("llm.model", config.llm.model.clone(), "PRICEBOT_LLM_MODEL"),
        ("llm.timeout_secs", config.llm.timeout_secs.to_string(), "PRICEBOT_LLM_TIMEOUT_SECS"),
        (
            "scraper.api_key",
            redact_key(config.scraper.api_key.as_ref()),
            "PRICEBOT_SCRAPER_API_KEY",
        ),
        ("scraper.base_url", config.scraper.base_url.clone(), "PRICEBOT_SCRAPER_BASE_URL"),
        (
            "scraper.timeout_secs",
            config.scraper.timeout_secs.to_string(),
            "PRICEBOT_SCRAPER_TIMEOUT_SECS",
        ),
        (
            "chat.max_tool_turns",
            config.chat.max_tool_turns.to_string(),
            "PRICEBOT_CHAT_MAX_TOOL_TURNS",
        ),
        (
            "chat.tool_call_interval_ms",
            config.chat.tool_call_interval_ms.to_string(),
            "PRICEBOT_CHAT_TOOL_CALL_INTERVAL_MS",
        ),
        (
            "chat.recent_records_limit",
            config.chat.recent_records_limit.to_string(),
            "PRICEBOT_CHAT_RECENT_RECORDS_LIMIT",
        ),
        ("logging.level", config.logging.level.clone(), "PRICEBOT_LOGGING_LEVEL"),
        ("logging.format", format!("{:?}", config.logging.format), "PRICEBOT_LOGGING_FORMAT"),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_key) in entries {
        let source = field_source(key, env_key, file_doc.as_ref(), file_path.as_deref());
        lines.push(format!("- {key} = {value} (source: {source})"));
    }

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("pricebot.toml"), PathBuf::from("config/pricebot.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn redact_key(key: Option<&SecretString>) -> String {
    let Some(key) = key else {
        return "<unset>".to_string();
    };

    let trimmed = key.expose_secret().trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::redact_key;

    #[test]
    fn keys_are_redacted_to_their_prefix() {
        let key = SecretString::from("sk-very-secret-value".to_string());
        assert_eq!(redact_key(Some(&key)), "sk-***");
    }

    #[test]
    fn keys_without_a_prefix_are_fully_redacted() {
        let key = SecretString::from("plainsecret".to_string());
        assert_eq!(redact_key(Some(&key)), "<redacted>");
    }

    #[test]
    fn missing_keys_render_as_unset() {
        assert_eq!(redact_key(None), "<unset>");
    }
}
