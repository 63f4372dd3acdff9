//! Callers, roles and credentials.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand::rngs::OsRng;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use tracing::warn;

use crate::error::StorageError;

pub mod gate;
pub mod tokens;

pub use gate::AccessGate;
pub use tokens::{TokenSigner, SUMMARY_ACTION};

/// Role of a user, ordered by the capabilities it grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Administrator,
    Editor,
    Author,
    Contributor,
    Subscriber,
    Anonymous,
}

impl Role {
    /// Unknown role names get no capabilities.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "administrator" => Role::Administrator,
            "editor" => Role::Editor,
            "author" => Role::Author,
            "contributor" => Role::Contributor,
            "subscriber" => Role::Subscriber,
            _ => Role::Anonymous,
        }
    }

    /// May create and edit content at all.
    pub fn can_edit_content(self) -> bool {
        matches!(
            self,
            Role::Administrator | Role::Editor | Role::Author | Role::Contributor
        )
    }

    pub fn can_edit_others(self) -> bool {
        matches!(self, Role::Administrator | Role::Editor)
    }

    /// May store arbitrary markup in content bodies; everyone else is filtered.
    pub fn can_post_unfiltered_html(self) -> bool {
        matches!(self, Role::Administrator | Role::Editor)
    }

    pub fn can_manage_settings(self) -> bool {
        self == Role::Administrator
    }
}

/// Identity of whoever issued a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: Option<i64>,
    pub role: Role,
}

impl Caller {
    pub fn anonymous() -> Self {
        Self {
            user_id: None,
            role: Role::Anonymous,
        }
    }

    pub fn user(user_id: i64, role: Role) -> Self {
        Self {
            user_id: Some(user_id),
            role,
        }
    }

    /// Edit right on one specific item.
    pub fn can_edit_item(&self, author_id: i64) -> bool {
        if !self.role.can_edit_content() {
            return false;
        }
        self.role.can_edit_others() || self.user_id == Some(author_id)
    }
}

/// Resolve a user id into a caller; unknown ids become anonymous.
pub async fn load_caller(pool: &SqlitePool, user_id: i64) -> Result<Caller, StorageError> {
    let role = sqlx::query_scalar::<_, String>("SELECT role FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

    Ok(match role {
        Some(role) => Caller::user(user_id, Role::parse(&role)),
        None => Caller::anonymous(),
    })
}

/// Check a username/password pair, returning the user id on success.
pub async fn authenticate(
    pool: &SqlitePool,
    username: &str,
    password: &str,
) -> Result<Option<i64>, StorageError> {
    let row = sqlx::query("SELECT id, password_hash FROM users WHERE username = ?")
        .bind(username)
        .fetch_optional(pool)
        .await?;

    let row = match row {
        Some(r) => r,
        None => return Ok(None),
    };

    let user_id: i64 = row.get("id");
    let stored_hash: Option<String> = row.get("password_hash");
    let Some(stored_hash) = stored_hash else {
        return Ok(None);
    };

    let parsed_hash = match PasswordHash::new(&stored_hash) {
        Ok(h) => h,
        Err(e) => {
            warn!(user_id, "invalid password hash in db: {}", e);
            return Ok(None);
        }
    };

    match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
        Ok(()) => Ok(Some(user_id)),
        Err(_) => Ok(None),
    }
}

/// Argon2 PHC string for a password, with a random salt.
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("failed to hash password: {}", e))?;
    Ok(hash.to_string())
}
