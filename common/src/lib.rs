/*!
common/src/lib.rs

Shared configuration types and DB helper functions for Synopsis.

This file provides:
- Config data structures (deserialized from TOML)
- An async loader that merges a default config file with an optional override
- Helpers to open an SQLite pool and bootstrap the schema
- Synchronization of config-defined users into the `users` table
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;

/// Database configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the sqlite database file (e.g. "data/synopsis.db")
    pub path: String,
}

/// HTTP listener configuration, merged into Rocket's figment at launch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind: Option<String>,
    pub port: Option<u16>,
}

/// Secrets and token lifetimes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Name of the environment variable holding the HMAC signing secret
    pub secret_env: Option<String>,
    /// Lifetime of anti-forgery tokens
    pub token_ttl_seconds: Option<u64>,
    /// Lifetime of login sessions
    pub session_ttl_seconds: Option<u64>,
}

impl SecurityConfig {
    pub fn secret_env(&self) -> &str {
        self.secret_env.as_deref().unwrap_or("SYNOPSIS_SECRET")
    }

    pub fn token_ttl_seconds(&self) -> u64 {
        self.token_ttl_seconds.unwrap_or(86_400)
    }

    pub fn session_ttl_seconds(&self) -> u64 {
        self.session_ttl_seconds.unwrap_or(86_400)
    }
}

/// Transport settings for the optional external summarizer.
///
/// The endpoint URL and API key are runtime settings stored in the database,
/// not here; this section only tunes how the request is made.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummarizerConfig {
    pub timeout_seconds: Option<u64>,
    /// Header carrying the API key (e.g. "x-goog-api-key" for Gemini)
    pub api_key_header: Option<String>,
}

impl SummarizerConfig {
    pub fn timeout_seconds(&self) -> u64 {
        self.timeout_seconds.unwrap_or(30)
    }

    pub fn api_key_header(&self) -> &str {
        self.api_key_header.as_deref().unwrap_or("X-api-key")
    }
}

/// Per-user configuration (users are defined in the global config file)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    pub username: String,
    pub display_name: Option<String>,
    pub password_hash: Option<String>,
    /// One of administrator, editor, author, contributor, subscriber
    pub role: Option<String>,
}

/// Admin / maintenance config
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    pub auto_migrate: Option<bool>,
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub summarizer: SummarizerConfig,
    #[serde(default)]
    pub users: Vec<UserConfig>,
    pub admin: Option<AdminConfig>,
}

impl Config {
    /// Load configuration from a TOML file asynchronously.
    ///
    /// Example:
    ///   let cfg = Config::from_file("config.toml").await?;
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let cfg: Config = toml::from_str(&data).context("Failed to parse TOML configuration")?;
        Ok(cfg)
    }

    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence).
    pub async fn load_with_defaults(
        default_path: Option<&Path>,
        override_path: Option<&Path>,
    ) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        for path in [default_path, override_path].into_iter().flatten() {
            if !path.exists() {
                continue;
            }
            let data = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            let val: toml::Value = toml::from_str(&data)
                .with_context(|| format!("Failed to parse configuration: {}", path.display()))?;
            merge_toml(&mut config_value, val);
        }

        let cfg: Config = config_value
            .try_into()
            .context("Failed to parse merged configuration")?;
        Ok(cfg)
    }

    pub fn auto_migrate(&self) -> bool {
        self.admin
            .as_ref()
            .and_then(|a| a.auto_migrate)
            .unwrap_or(false)
    }
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

/// Initialize an SQLite connection pool.
///
/// Creates the parent directory if necessary and makes sure the DB file exists before
/// connecting, so filesystem problems surface with a clear error. Foreign keys are
/// enabled so summaries disappear together with their content item.
///
/// Example:
///   let pool = init_db_pool("data/synopsis.db").await?;
pub async fn init_db_pool(path: &str) -> Result<SqlitePool> {
    if let Some(parent) = Path::new(path).parent() {
        tokio::fs::create_dir_all(parent).await.with_context(|| {
            format!("Failed to create DB parent directory: {}", parent.display())
        })?;
    }

    tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .open(path)
        .await
        .with_context(|| format!("Failed to create or open DB file: {}", path))?;

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    // Modest pool size; writes are short upserts.
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to connect to sqlite database at path: {}", path))?;

    Ok(pool)
}

/// Open a single-connection in-memory database with the schema applied.
///
/// A `:memory:` database lives only as long as its connection, so the pool is pinned
/// to exactly one connection that is never recycled.
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .context("Failed to open in-memory sqlite database")?;
    ensure_schema(&pool).await?;
    Ok(pool)
}

/// Ensure the required schema exists. Runs CREATE TABLE IF NOT EXISTS for every table,
/// so it is idempotent and safe to call at every startup.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    tracing::info!("ensuring DB schema (CREATE TABLE IF NOT EXISTS ...)");

    let stmts = [
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE,
            display_name TEXT,
            password_hash TEXT,
            role TEXT NOT NULL DEFAULT 'subscriber',
            created_at TIMESTAMP DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        );
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS content_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            author_id INTEGER NOT NULL,
            title TEXT NOT NULL DEFAULT '',
            body TEXT NOT NULL DEFAULT '',
            created_at TIMESTAMP DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
            updated_at TIMESTAMP DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
            FOREIGN KEY(author_id) REFERENCES users(id) ON DELETE CASCADE
        );
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS content_summaries (
            content_id INTEGER PRIMARY KEY,
            summary_text TEXT NOT NULL,
            updated_at TIMESTAMP DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
            FOREIGN KEY(content_id) REFERENCES content_items(id) ON DELETE CASCADE
        );
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL,
            updated_at TIMESTAMP DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        );
        "#,
    ];

    for s in &stmts {
        sqlx::query(s)
            .execute(pool)
            .await
            .context("failed to ensure schema")?;
    }

    tracing::info!("DB schema ensured");
    Ok(())
}

/// Ensure that users defined in the configuration are present in the `users` table.
///  - INSERT OR IGNORE a row for each configured user (safe to call repeatedly)
///  - UPDATE `display_name`, `password_hash` and `role` when provided in the config
pub async fn sync_users(config: &Config, pool: &SqlitePool) -> Result<()> {
    for u in &config.users {
        sqlx::query(
            "INSERT OR IGNORE INTO users (username, display_name, password_hash, role) VALUES (?, ?, ?, COALESCE(?, 'subscriber'))"
        )
        .bind(&u.username)
        .bind(u.display_name.clone())
        .bind(u.password_hash.clone())
        .bind(u.role.clone())
        .execute(pool)
        .await
        .with_context(|| format!("failed to insert or ignore user {}", u.username))?;

        sqlx::query(
            "UPDATE users SET display_name = COALESCE(?, display_name), password_hash = COALESCE(?, password_hash), role = COALESCE(?, role) WHERE username = ?"
        )
        .bind(u.display_name.clone())
        .bind(u.password_hash.clone())
        .bind(u.role.clone())
        .bind(&u.username)
        .execute(pool)
        .await
        .with_context(|| format!("failed to update user {}", u.username))?;
    }

    Ok(())
}
