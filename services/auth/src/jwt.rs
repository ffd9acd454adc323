//! JWT service for token generation and verification
//!
//! Access and refresh tokens are HS256-signed JWTs carrying the principal and
//! the id of the session they were issued for. Expiry is checked against the
//! injected [`Clock`](common::Clock) rather than the system time, so session
//! and token lifetimes move together in tests.

use chrono::Duration;
use common::SharedClock;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use uuid::Uuid;

use crate::models::Principal;

/// JWT claims structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Principal ID
    pub sub: Uuid,
    /// Principal email
    pub email: String,
    /// Principal role at issuance
    pub role: String,
    /// Session the token is bound to
    pub sid: String,
    /// Issued at time
    pub iat: i64,
    /// Expiration time
    pub exp: i64,
    /// Unique token identifier
    pub jti: String,
    /// Token type (access or refresh)
    pub token_type: TokenType,
}

/// Token type enum
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    /// Access token
    Access,
    /// Refresh token
    Refresh,
}

/// Token verification failures
#[derive(Debug, Error)]
pub enum TokenError {
    /// Bad signature, bad encoding or missing claims
    #[error("token is malformed or its signature is invalid: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),

    /// Past its `exp` claim
    #[error("token has expired")]
    Expired,

    /// An access token where a refresh token was expected, or vice versa
    #[error("unexpected token type")]
    WrongType,
}

/// JWT service
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    access_token_ttl: Duration,
    refresh_token_ttl: Duration,
    clock: SharedClock,
}

impl JwtService {
    /// Initialize a new JWT service
    pub fn new(
        secret: &str,
        access_token_ttl: Duration,
        refresh_token_ttl: Duration,
        clock: SharedClock,
    ) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // exp is compared against the injected clock in `verify`
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            access_token_ttl,
            refresh_token_ttl,
            clock,
        }
    }

    /// Generate an access token for a principal bound to a session
    pub fn generate_access_token(
        &self,
        principal: &Principal,
        session_id: &str,
    ) -> Result<String, TokenError> {
        self.sign(principal, session_id, TokenType::Access, self.access_token_ttl)
    }

    /// Generate a refresh token for a principal bound to a session
    pub fn generate_refresh_token(
        &self,
        principal: &Principal,
        session_id: &str,
    ) -> Result<String, TokenError> {
        self.sign(principal, session_id, TokenType::Refresh, self.refresh_token_ttl)
    }

    fn sign(
        &self,
        principal: &Principal,
        session_id: &str,
        token_type: TokenType,
        ttl: Duration,
    ) -> Result<String, TokenError> {
        let now = self.clock.now();

        let claims = Claims {
            sub: principal.id,
            email: principal.email.clone(),
            role: principal.role.clone(),
            sid: session_id.to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            jti: Uuid::new_v4().to_string(),
            token_type,
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?;
        Ok(token)
    }

    /// Verify a token's signature and expiry and return the claims
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let token_data = decode::<Claims>(token, &self.decoding_key, &self.validation)?;
        let claims = token_data.claims;

        if claims.exp <= self.clock.now().timestamp() {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }

    /// Verify a token and require it to be an access token
    pub fn verify_access(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify_kind(token, TokenType::Access)
    }

    /// Verify a token and require it to be a refresh token
    pub fn verify_refresh(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify_kind(token, TokenType::Refresh)
    }

    fn verify_kind(&self, token: &str, expected: TokenType) -> Result<Claims, TokenError> {
        let claims = self.verify(token)?;
        if claims.token_type != expected {
            return Err(TokenError::WrongType);
        }
        Ok(claims)
    }

    /// Get the access token lifetime
    pub fn access_token_ttl(&self) -> Duration {
        self.access_token_ttl
    }

    /// Get the refresh token lifetime
    pub fn refresh_token_ttl(&self) -> Duration {
        self.refresh_token_ttl
    }
}

/// Compute the SHA-256 hex digest of a token
///
/// Sessions keep only this digest of their refresh token.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Generate `bytes` cryptographically random bytes, hex encoded
pub fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

/// Compare two secrets in constant time
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}
