use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use common::SecurityConfig;

/// Action bound into anti-forgery tokens for generating and saving summaries.
pub const SUMMARY_ACTION: &str = "generate_summary";

const SESSION_ACTION: &str = "session";
const DEV_SECRET: &str = "dev-secret";

/// JWT claims: subject user id, the single action the token is good for, and its lifetime.
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: i64,
    act: String,
    iat: usize,
    exp: usize,
}

/// Issues and checks HS256 tokens for login sessions and anti-forgery checks.
pub struct TokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    token_ttl: u64,
    session_ttl: u64,
}

impl TokenSigner {
    pub fn new(secret: &[u8], token_ttl: u64, session_ttl: u64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            token_ttl,
            session_ttl,
        }
    }

    /// Read the secret from the configured environment variable, falling back to a
    /// development secret.
    pub fn from_config(security: &SecurityConfig) -> Self {
        let secret = match std::env::var(security.secret_env()) {
            Ok(s) if !s.is_empty() => s,
            _ => {
                warn!(
                    env = security.secret_env(),
                    "signing secret not set, using development secret"
                );
                DEV_SECRET.to_string()
            }
        };
        Self::new(
            secret.as_bytes(),
            security.token_ttl_seconds(),
            security.session_ttl_seconds(),
        )
    }

    /// Anti-forgery token for `user_id`, valid only for `action`.
    pub fn issue(&self, user_id: i64, action: &str) -> Result<String, jsonwebtoken::errors::Error> {
        self.issue_until(user_id, action, now_secs() + self.token_ttl as usize)
    }

    pub fn verify(&self, token: &str, user_id: i64, action: &str) -> bool {
        match self.decode(token) {
            Some(claims) => claims.sub == user_id && claims.act == action,
            None => false,
        }
    }

    pub fn issue_session(&self, user_id: i64) -> Result<String, jsonwebtoken::errors::Error> {
        self.issue_until(user_id, SESSION_ACTION, now_secs() + self.session_ttl as usize)
    }

    /// User id carried by a valid session token.
    pub fn session_user(&self, token: &str) -> Option<i64> {
        self.decode(token)
            .filter(|claims| claims.act == SESSION_ACTION)
            .map(|claims| claims.sub)
    }

    pub(crate) fn issue_until(
        &self,
        user_id: i64,
        action: &str,
        exp: usize,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let claims = Claims {
            sub: user_id,
            act: action.to_string(),
            iat: now_secs(),
            exp,
        };
        encode(&Header::default(), &claims, &self.encoding)
    }

    fn decode(&self, token: &str) -> Option<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        match decode::<Claims>(token, &self.decoding, &validation) {
            Ok(data) => Some(data.claims),
            Err(e) => {
                debug!("token rejected: {}", e);
                None
            }
        }
    }
}

fn now_secs() -> usize {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as usize
}
