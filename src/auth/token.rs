//! Access and refresh tokens.
//!
//! Both kinds are HS256 JWTs signed with the configured secret and carry a
//! ULID `jti`. Revocation and single-use rotation are tracked by `jti` in the
//! cache, see `AuthResolver`.

use super::{AuthConfig, AuthError};
use chrono::{DateTime, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use ulid::Ulid;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub name: String,
    pub jti: String,
    pub kind: TokenKind,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    /// User id carried in `sub`.
    ///
    /// # Errors
    /// Returns `TokenInvalid` when `sub` is not numeric.
    pub fn user_id(&self) -> Result<i64, AuthError> {
        self.sub.parse().map_err(|_| AuthError::TokenInvalid)
    }
}

/// Response body of login and refresh.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
}

#[derive(Debug, Clone)]
pub struct IssuedTokens {
    pub pair: TokenPair,
    pub access: Claims,
    pub refresh: Claims,
}

pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    access_ttl: i64,
    refresh_ttl: i64,
}

impl TokenIssuer {
    #[must_use]
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(config.jwt_secret()),
            decoding: DecodingKey::from_secret(config.jwt_secret()),
            access_ttl: config.access_token_ttl_seconds(),
            refresh_ttl: config.refresh_token_ttl_seconds(),
        }
    }

    /// Sign a fresh access/refresh pair issued at `now`.
    ///
    /// # Errors
    /// Returns an error if signing fails.
    pub fn issue(
        &self,
        user_id: i64,
        username: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<IssuedTokens> {
        let iat = now.timestamp();
        let access = self.claims(user_id, username, TokenKind::Access, iat, self.access_ttl);
        let refresh = self.claims(user_id, username, TokenKind::Refresh, iat, self.refresh_ttl);

        let header = Header::new(Algorithm::HS256);
        let pair = TokenPair {
            access_token: encode(&header, &access, &self.encoding)?,
            refresh_token: encode(&header, &refresh, &self.encoding)?,
            token_type: "bearer".to_string(),
            expires_in: self.access_ttl,
        };

        Ok(IssuedTokens {
            pair,
            access,
            refresh,
        })
    }

    /// Verify signature, expiry and kind.
    ///
    /// # Errors
    /// `TokenExpired` when past `exp`, `TokenInvalid` for anything else.
    pub fn decode(&self, token: &str, kind: TokenKind) -> Result<Claims, AuthError> {
        let claims = decode::<Claims>(token, &self.decoding, &validation(true))
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::TokenInvalid,
            })?;

        if claims.kind == kind {
            Ok(claims)
        } else {
            Err(AuthError::TokenInvalid)
        }
    }

    /// Verify the signature but accept expired tokens. Used on logout.
    ///
    /// # Errors
    /// `TokenInvalid` when the token is malformed or not signed by us.
    pub fn inspect(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding, &validation(false))
            .map(|data| data.claims)
            .map_err(|_| AuthError::TokenInvalid)
    }

    fn claims(&self, user_id: i64, username: &str, kind: TokenKind, iat: i64, ttl: i64) -> Claims {
        Claims {
            sub: user_id.to_string(),
            name: username.to_string(),
            jti: Ulid::new().to_string(),
            kind,
            iat,
            exp: iat + ttl,
        }
    }
}

fn validation(check_exp: bool) -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    validation.validate_exp = check_exp;
    validation
}
