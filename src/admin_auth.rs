use std::collections::HashMap;
use std::sync::Mutex;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::RngCore;
use thiserror::Error;

const TOKEN_EXPIRY_HOURS: i64 = 8;
const MAX_LOGIN_ATTEMPTS: usize = 5;
const LOGIN_WINDOW_SECONDS: i64 = 60;

#[derive(Error, Debug)]
pub enum AdminAuthError {
    #[error("too many login attempts, try again later")]
    RateLimited,

    #[error("invalid password")]
    InvalidPassword,

    #[error("invalid password hash configured")]
    BadHash,
}

struct SessionState {
    sessions: HashMap<String, DateTime<Utc>>,
    login_attempts: HashMap<String, Vec<DateTime<Utc>>>,
}

/// In-memory admin session store with Argon2 password verification and a
/// rolling-window login rate limiter, keyed by client IP.
pub struct AdminAuth {
    password_hash: String,
    state: Mutex<SessionState>,
}

impl AdminAuth {
    pub fn new(password_hash: String) -> Self {
        Self {
            password_hash,
            state: Mutex::new(SessionState {
                sessions: HashMap::new(),
                login_attempts: HashMap::new(),
            }),
        }
    }

    /// Hashes `password` for storage in configuration. Exposed so the CLI
    /// and setup tooling can produce a hash without duplicating the Argon2
    /// parameter choices.
    pub fn hash_password(password: &str) -> Result<String, AdminAuthError> {
        let salt = SaltString::generate(&mut rand::rngs::OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|_| AdminAuthError::BadHash)
    }

    fn check_rate_limit(&self, state: &mut SessionState, client_ip: &str) -> bool {
        let now = Utc::now();
        let attempts = state.login_attempts.entry(client_ip.to_string()).or_default();
        attempts.retain(|t| now.signed_duration_since(*t).num_seconds() < LOGIN_WINDOW_SECONDS);
        attempts.len() < MAX_LOGIN_ATTEMPTS
    }

    pub fn login(&self, password: &str, client_ip: &str) -> Result<String, AdminAuthError> {
        let mut state = self.state.lock().unwrap();
        if !self.check_rate_limit(&mut state, client_ip) {
            return Err(AdminAuthError::RateLimited);
        }
        state
            .login_attempts
            .entry(client_ip.to_string())
            .or_default()
            .push(Utc::now());

        let parsed_hash = PasswordHash::new(&self.password_hash).map_err(|_| AdminAuthError::BadHash)?;
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .map_err(|_| AdminAuthError::InvalidPassword)?;

        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes);
        let expiry = Utc::now() + chrono::Duration::hours(TOKEN_EXPIRY_HOURS);
        state.sessions.insert(token.clone(), expiry);
        Ok(token)
    }

    /// `true` iff the token exists and hasn't expired. Expired entries are
    /// swept lazily on the access that discovers them.
    pub fn verify(&self, token: &str) -> bool {
        let mut state = self.state.lock().unwrap();
        match state.sessions.get(token) {
            Some(expiry) if *expiry >= Utc::now() => true,
            Some(_) => {
                state.sessions.remove(token);
                false
            }
            None => false,
        }
    }

    pub fn logout(&self, token: &str) {
        self.state.lock().unwrap().sessions.remove(token);
    }
}
