use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::info;

use crate::error::StorageError;

/// Key the generation settings are stored under.
pub const SETTINGS_KEY: &str = "summary_settings";

pub const DEFAULT_SUMMARY_LENGTH: i64 = 40;
pub const MIN_SUMMARY_LENGTH: i64 = 10;
pub const MAX_SUMMARY_LENGTH: i64 = 300;

/// Process-wide generation settings, editable by administrators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationSettings {
    pub summary_length: i64,
    #[serde(default)]
    pub external_api_key: String,
    #[serde(default)]
    pub external_api_url: String,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            summary_length: DEFAULT_SUMMARY_LENGTH,
            external_api_key: String::new(),
            external_api_url: String::new(),
        }
    }
}

impl GenerationSettings {
    /// Word budget actually used for generation; non-positive values fall back to the default.
    pub fn effective_length(&self) -> usize {
        if self.summary_length > 0 {
            self.summary_length as usize
        } else {
            DEFAULT_SUMMARY_LENGTH as usize
        }
    }

    /// True when both the API key and URL are configured.
    pub fn external_enabled(&self) -> bool {
        !self.external_api_key.is_empty() && !self.external_api_url.is_empty()
    }
}

/// Raw settings-update input. Values arrive untyped from forms or JSON and are
/// coerced by [`sanitize_settings`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsForm {
    pub summary_length: Option<Value>,
    pub external_api_key: Option<Value>,
    pub external_api_url: Option<Value>,
}

/// Clamp the summary length into range and coerce the endpoint fields to strings.
pub fn sanitize_settings(input: &SettingsForm) -> GenerationSettings {
    let summary_length = match &input.summary_length {
        Some(value) => coerce_int(value).clamp(MIN_SUMMARY_LENGTH, MAX_SUMMARY_LENGTH),
        None => DEFAULT_SUMMARY_LENGTH,
    };

    GenerationSettings {
        summary_length,
        external_api_key: input
            .external_api_key
            .as_ref()
            .map(coerce_string)
            .unwrap_or_default(),
        external_api_url: input
            .external_api_url
            .as_ref()
            .map(coerce_string)
            .unwrap_or_default(),
    }
}

/// Integer coercion with form semantics: leading digits of strings, truncated
/// floats, booleans as 0/1, anything else 0.
pub fn coerce_int(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Value::String(s) => leading_int(s),
        Value::Bool(b) => i64::from(*b),
        _ => 0,
    }
}

fn leading_int(s: &str) -> i64 {
    let s = s.trim_start();
    let (sign, digits) = match s.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, s.strip_prefix('+').unwrap_or(s)),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    match digits[..end].parse::<i64>() {
        Ok(n) => sign * n,
        // Overflowing digit runs saturate
        Err(_) if end > 0 => {
            if sign > 0 {
                i64::MAX
            } else {
                i64::MIN
            }
        }
        Err(_) => 0,
    }
}

fn coerce_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(true) => "1".to_string(),
        Value::Bool(false) => String::new(),
        other => other.to_string(),
    }
}

/// Persistence for [`GenerationSettings`] in the `settings` table.
#[derive(Clone)]
pub struct SettingsStore {
    pool: SqlitePool,
}

impl SettingsStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Current settings, or the defaults when nothing has been saved yet.
    pub async fn load(&self) -> Result<GenerationSettings, StorageError> {
        let stored = sqlx::query_scalar::<_, String>("SELECT value_json FROM settings WHERE key = ?")
            .bind(SETTINGS_KEY)
            .fetch_optional(&self.pool)
            .await?;

        match stored {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(GenerationSettings::default()),
        }
    }

    pub async fn save(&self, settings: &GenerationSettings) -> Result<(), StorageError> {
        let json = serde_json::to_string(settings)?;
        sqlx::query(
            r#"
            INSERT INTO settings (key, value_json, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at
            "#,
        )
        .bind(SETTINGS_KEY)
        .bind(&json)
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Seed the defaults on first start. Existing settings are never touched.
    pub async fn initialize_defaults(&self) -> Result<bool, StorageError> {
        let json = serde_json::to_string(&GenerationSettings::default())?;
        let result = sqlx::query("INSERT OR IGNORE INTO settings (key, value_json) VALUES (?, ?)")
            .bind(SETTINGS_KEY)
            .bind(&json)
            .execute(&self.pool)
            .await?;

        let seeded = result.rows_affected() > 0;
        if seeded {
            info!("seeded default generation settings");
        }
        Ok(seeded)
    }
}
