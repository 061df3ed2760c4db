//! JWT identity verification
//!
//! Validates the HS256 tokens issued by the REST service and turns them
//! into a [`Principal`]. Uses the `jsonwebtoken` crate.

use chat_core::{AuthFailure, IdentityVerifier, Principal, Snowflake, UserTier};
use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// JWT claims structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID). The REST issuer calls it `userId`.
    #[serde(alias = "userId")]
    pub sub: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub tier: Option<String>,
    /// Issued at (Unix timestamp)
    #[serde(default)]
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

impl Claims {
    /// Get the user ID as a Snowflake
    pub fn user_id(&self) -> Result<Snowflake, AuthFailure> {
        Snowflake::parse(&self.sub)
            .ok()
            .filter(|id| !id.is_zero())
            .ok_or(AuthFailure::Malformed)
    }

    pub fn into_principal(self) -> Result<Principal, AuthFailure> {
        let user_id = self.user_id()?;
        let tier = self
            .tier
            .as_deref()
            .map(UserTier::from_str_lossy)
            .unwrap_or_default();
        Ok(Principal::new(user_id, self.username, tier))
    }
}

/// Verifies identity tokens presented in `IDENTIFY`
#[derive(Clone)]
pub struct JwtVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    #[must_use]
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Sign a token for `principal` valid for `ttl`
    ///
    /// # Errors
    /// Returns an error if token encoding fails
    pub fn issue(&self, principal: &Principal, ttl: Duration) -> Result<String, AppError> {
        let now = Utc::now();
        let claims = Claims {
            sub: principal.user_id.to_string(),
            username: principal.username.clone(),
            tier: Some(principal.tier.as_str().to_string()),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|_| AppError::Internal(anyhow::anyhow!("Failed to encode JWT")))
    }

    /// Decode and validate a token, classifying the failure
    pub fn decode_claims(&self, token: &str) -> Result<Claims, AuthFailure> {
        let token = token.strip_prefix("Bearer ").unwrap_or(token).trim();
        if token.is_empty() {
            return Err(AuthFailure::Malformed);
        }

        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthFailure::Expired,
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                    AuthFailure::InvalidSignature
                }
                _ => AuthFailure::Malformed,
            })
    }
}

impl IdentityVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<Principal, AuthFailure> {
        self.decode_claims(token)?.into_principal()
    }
}

impl std::fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtVerifier").finish_non_exhaustive()
    }
}
