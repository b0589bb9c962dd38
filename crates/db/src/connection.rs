use std::time::Duration;

use sqlx::sqlite::SqlitePoolOptions;

use pricebot_core::config::DatabaseConfig;

pub type DbPool = sqlx::SqlitePool;

/// Opens the pricing store pool described by `config`.
///
/// The chat loop is the single writer, so the pool stays small regardless of
/// what the config asks for. WAL plus a busy timeout lets operator commands
/// (`doctor`, `migrate`) probe the same file while a session is live.
pub async fn connect(config: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    SqlitePoolOptions::new()
        .max_connections(config.max_connections.clamp(1, 16))
        .acquire_timeout(Duration::from_secs(config.timeout_secs.max(1)))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA journal_mode = WAL").execute(&mut *conn).await?;
                sqlx::query("PRAGMA busy_timeout = 5000").execute(&mut *conn).await?;
                Ok(())
            })
        })
        .connect(&config.url)
        .await
}

#[cfg(test)]
pub(crate) fn memory_config(url: &str) -> DatabaseConfig {
    DatabaseConfig { url: url.to_string(), max_connections: 1, timeout_secs: 30 }
}
