//! Identity resolution.
//!
//! The engine only ever sees a resolved [`UserId`]. [`JwtGateway`] checks
//! logins against the argon2 hash each user registered with and hands out
//! signed HS256 access tokens carrying the user id and an expiry. Nothing is
//! kept per session: a token stays valid until it expires or its user is
//! removed.

use std::sync::Arc;
use std::time::Duration;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Argon2, Params};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::UserId;
use crate::store::ReservationStore;

const ISSUER: &str = "tutorbook";

#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    MissingToken,
    InvalidToken,
    InvalidCredentials,
    /// Hashing or signing failed; not the caller's fault.
    Internal(String),
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::MissingToken => write!(f, "missing bearer token"),
            AuthError::InvalidToken => write!(f, "invalid or expired token"),
            AuthError::InvalidCredentials => write!(f, "invalid credentials"),
            AuthError::Internal(e) => write!(f, "auth backend error: {e}"),
        }
    }
}

impl std::error::Error for AuthError {}

#[async_trait]
pub trait AuthGateway: Send + Sync {
    /// Resolve a bearer token to the user it was issued for.
    async fn verify(&self, token: &str) -> Result<UserId, AuthError>;

    /// Exchange credentials for a bearer token.
    async fn issue(&self, credentials: &Credentials) -> Result<String, AuthError>;

    /// Turn a new user's password into the credential stored at signup.
    async fn hash_password(&self, password: &str) -> Result<String, AuthError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: UserId,
    iss: String,
    iat: i64,
    exp: i64,
}

pub struct JwtGateway {
    store: Arc<ReservationStore>,
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    token_ttl: Duration,
    argon2: Argon2<'static>,
}

impl JwtGateway {
    pub fn new(store: Arc<ReservationStore>, secret: &str, token_ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[ISSUER]);
        validation.leeway = 0;
        Self {
            store,
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            token_ttl,
            argon2: Argon2::default(),
        }
    }

    /// Use `params` for new hashes. Existing hashes carry their own.
    pub fn with_hash_params(mut self, params: Params) -> Self {
        self.argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);
        self
    }

    fn mint(&self, user_id: UserId, issued_at: DateTime<Utc>) -> Result<String, AuthError> {
        let ttl = chrono::Duration::from_std(self.token_ttl)
            .map_err(|e| AuthError::Internal(e.to_string()))?;
        let claims = Claims {
            sub: user_id,
            iss: ISSUER.to_string(),
            iat: issued_at.timestamp(),
            exp: (issued_at + ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Internal(e.to_string()))
    }
}

#[async_trait]
impl AuthGateway for JwtGateway {
    async fn verify(&self, token: &str) -> Result<UserId, AuthError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            debug!("token rejected: {e}");
            AuthError::InvalidToken
        })?;
        let user_id = data.claims.sub;
        // Tokens of removed users die with them.
        if self.store.get_user(&user_id).is_none() {
            return Err(AuthError::InvalidToken);
        }
        Ok(user_id)
    }

    async fn issue(&self, credentials: &Credentials) -> Result<String, AuthError> {
        let user = self
            .store
            .find_user_by_email(&credentials.email)
            .ok_or(AuthError::InvalidCredentials)?;
        let hash = self
            .store
            .credential(&user.id)
            .ok_or(AuthError::InvalidCredentials)?;

        let argon2 = self.argon2.clone();
        let password = credentials.password.clone();
        let matches = tokio::task::spawn_blocking(move || -> Result<bool, password_hash::Error> {
            let parsed = PasswordHash::new(&hash)?;
            match argon2.verify_password(password.as_bytes(), &parsed) {
                Ok(()) => Ok(true),
                Err(password_hash::Error::Password) => Ok(false),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(|e| AuthError::Internal(e.to_string()))?
        .map_err(|e| AuthError::Internal(e.to_string()))?;

        if !matches {
            return Err(AuthError::InvalidCredentials);
        }
        self.mint(user.id, Utc::now())
    }

    async fn hash_password(&self, password: &str) -> Result<String, AuthError> {
        let argon2 = self.argon2.clone();
        let password = password.to_owned();
        tokio::task::spawn_blocking(move || {
            let salt = SaltString::generate(&mut OsRng);
            argon2
                .hash_password(password.as_bytes(), &salt)
                .map(|hash| hash.to_string())
        })
        .await
        .map_err(|e| AuthError::Internal(e.to_string()))?
        .map_err(|e| AuthError::Internal(e.to_string()))
    }
}
