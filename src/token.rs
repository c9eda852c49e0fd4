//! Bearer token mint/verify
//!
//! Stateless HS256 tokens bound to a `(bank, username)` subject. The
//! coordinator is the only party that mints or verifies; banks never see
//! tokens. No state beyond the expiry claim is kept anywhere.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::core_types::Subject;

/// JWT Claims structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,  // Subject username
    pub bank: String, // Bank the subject belongs to
    pub exp: usize,   // Expiration time (as UTC timestamp)
    pub iat: usize,   // Issued at
}

impl Claims {
    pub fn subject(&self) -> Subject {
        Subject::new(self.bank.clone(), self.sub.clone())
    }
}

pub struct TokenService {
    secret: String,
    ttl_secs: u64,
}

impl TokenService {
    pub fn new(secret: impl Into<String>, ttl_secs: u64) -> Self {
        Self {
            secret: secret.into(),
            ttl_secs,
        }
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    /// Mint a token for a subject, valid for the configured TTL.
    pub fn mint(&self, subject: &Subject) -> Result<String> {
        let now = Utc::now();
        let expiration = now
            .checked_add_signed(Duration::seconds(self.ttl_secs as i64))
            .context("token expiry out of range")?
            .timestamp();

        let claims = Claims {
            sub: subject.username.clone(),
            bank: subject.bank.clone(),
            exp: expiration as usize,
            iat: now.timestamp() as usize,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .context("Failed to generate token")
    }

    /// Verify a token and return its claims. Expired or tampered tokens
    /// fail here; the caller maps that to `unauthorized`.
    pub fn verify(&self, token: &str) -> Result<Claims> {
        let decoding_key = DecodingKey::from_secret(self.secret.as_bytes());
        let validation = Validation::new(Algorithm::HS256);
        let token_data = decode::<Claims>(token, &decoding_key, &validation)?;
        Ok(token_data.claims)
    }
}
