// Session authentication for the catalog UI.
//
// Sessions are short-lived HS256 JWTs carried in a cookie. Accounts are
// configured through the environment: LIBRARY_USERS maps login names to
// SHA-256 password digests, LIBRARY_SESSION_SECRET signs the tokens.

use std::collections::HashMap;

use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

pub const SESSION_COOKIE: &str = "library_session";

/// Session lifetime: one working day.
const SESSION_TTL_SECONDS: i64 = 8 * 60 * 60;

/// Session claims.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String, // login name
    pub exp: usize,  // expiration time
    pub iat: usize,  // issued at
}

/// Read the account table from `LIBRARY_USERS`, a JSON object of
/// `{"login": "<sha256 hex digest of password>"}`.
pub fn load_users_from_env() -> HashMap<String, String> {
    std::env::var("LIBRARY_USERS")
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

pub fn password_digest(password: &str) -> String {
    format!("{:x}", Sha256::digest(password.as_bytes()))
}

/// Check a login attempt against the account table.
pub fn verify_password(users: &HashMap<String, String>, login: &str, password: &str) -> bool {
    users
        .get(login)
        .map(|digest| digest.eq_ignore_ascii_case(&password_digest(password)))
        .unwrap_or(false)
}

/// Issue a session token for a verified login.
pub fn issue_session(secret: &str, login: &str) -> Result<String, AuthError> {
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub: login.to_string(),
        iat: now as usize,
        exp: (now + SESSION_TTL_SECONDS) as usize,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| {
        warn!("Failed to sign session token: {}", e);
        AuthError::ConfigurationError
    })
}

/// Cookie header value establishing a session.
pub fn session_cookie(token: &str) -> String {
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE, token, SESSION_TTL_SECONDS
    )
}

/// Cookie header value clearing the session.
pub fn clear_session_cookie() -> String {
    format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", SESSION_COOKIE)
}

/// Pull one cookie value out of the Cookie header.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(axum::http::header::COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|pair| {
        let (k, v) = pair.trim().split_once('=')?;
        (k == name).then(|| v.to_string())
    })
}

/// Extract and validate the session from the request cookies.
pub fn current_session(headers: &HeaderMap, secret: Option<&str>) -> Result<Claims, AuthError> {
    let secret = secret.ok_or(AuthError::ConfigurationError)?;
    let token = cookie_value(headers, SESSION_COOKIE).ok_or(AuthError::MissingSession)?;

    let validation = Validation::new(Algorithm::HS256);
    let token_data = decode::<Claims>(
        &token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| {
        warn!("Session validation failed: {}", e);
        AuthError::InvalidSession
    })?;

    debug!("Session valid for {}", token_data.claims.sub);
    Ok(token_data.claims)
}

/// Authentication errors.
#[derive(Debug, PartialEq, Eq)]
pub enum AuthError {
    MissingSession,
    InvalidSession,
    ConfigurationError,
    Forbidden { actor: String },
}

impl AuthError {
    /// HTML flows bounce unauthenticated visitors to the login form
    /// instead of answering with a bare status code.
    pub fn into_page_response(self, next: &str) -> Response {
        match self {
            AuthError::MissingSession | AuthError::InvalidSession => {
                Redirect::to(&format!("/login?next={}", urlencoding::encode(next))).into_response()
            }
            other => other.into_response(),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AuthError::MissingSession => (
                StatusCode::UNAUTHORIZED,
                "missing_session",
                "Sign in to use this page".to_string(),
            ),
            AuthError::InvalidSession => (
                StatusCode::UNAUTHORIZED,
                "invalid_session",
                "Session is invalid or expired".to_string(),
            ),
            AuthError::ConfigurationError => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_configuration_error",
                "Session authentication is not properly configured".to_string(),
            ),
            AuthError::Forbidden { ref actor } => {
                warn!("Actor {} lacks the required capability", actor);
                (
                    StatusCode::FORBIDDEN,
                    "forbidden",
                    "You do not have permission to do this".to_string(),
                )
            }
        };

        (
            status,
            Json(json!({
                "code": code,
                "message": message,
            })),
        )
            .into_response()
    }
}
