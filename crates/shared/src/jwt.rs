//! JWT token utilities using HS256 signing.
//!
//! Access and refresh tokens are signed with separate HMAC secrets
//! (`JWT_ACCESS_SECRET` / `JWT_REFRESH_SECRET`). The claims carry the
//! user type so the socket and HTTP boundaries can tell drivers and
//! dispatchers apart without a database round-trip.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Error type for JWT operations.
#[derive(Debug, Error)]
pub enum JwtError {
    #[error("Failed to encode token: {0}")]
    EncodingError(String),

    #[error("Failed to decode token: {0}")]
    DecodingError(String),

    #[error("Token has expired")]
    TokenExpired,

    #[error("Invalid token")]
    InvalidToken,
}

/// Type of JWT token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// Kind of account the token belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    Driver,
    Dispatcher,
    Passenger,
}

impl std::fmt::Display for UserType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UserType::Driver => write!(f, "driver"),
            UserType::Dispatcher => write!(f, "dispatcher"),
            UserType::Passenger => write!(f, "passenger"),
        }
    }
}

/// JWT token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// JWT ID (unique token identifier)
    pub jti: String,
    /// Token type (access or refresh)
    pub token_type: TokenType,
    /// Account kind (driver, dispatcher, passenger)
    pub user_type: UserType,
}

impl Claims {
    /// Parses the subject claim as a user UUID.
    pub fn user_id(&self) -> Result<Uuid, JwtError> {
        Uuid::parse_str(&self.sub).map_err(|_| JwtError::InvalidToken)
    }
}

/// Configuration for JWT token generation and validation.
#[derive(Clone)]
pub struct JwtConfig {
    access_encoding_key: EncodingKey,
    access_decoding_key: DecodingKey,
    refresh_encoding_key: EncodingKey,
    refresh_decoding_key: DecodingKey,
    /// Access token expiration in seconds (default: 900 = 15 minutes)
    pub access_token_expiry_secs: i64,
    /// Refresh token expiration in seconds (default: 604800 = 7 days)
    pub refresh_token_expiry_secs: i64,
    /// Leeway in seconds for clock skew tolerance (default: 30)
    pub leeway_secs: u64,
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("access_token_expiry_secs", &self.access_token_expiry_secs)
            .field("refresh_token_expiry_secs", &self.refresh_token_expiry_secs)
            .field("leeway_secs", &self.leeway_secs)
            .field("access_encoding_key", &"[REDACTED]")
            .field("refresh_encoding_key", &"[REDACTED]")
            .finish()
    }
}

/// Default leeway in seconds for clock skew tolerance
pub const DEFAULT_LEEWAY_SECS: u64 = 30;

impl JwtConfig {
    /// Creates a new JwtConfig from the access and refresh HMAC secrets.
    pub fn from_secrets(
        access_secret: &str,
        refresh_secret: &str,
        access_token_expiry_secs: i64,
        refresh_token_expiry_secs: i64,
    ) -> Self {
        Self {
            access_encoding_key: EncodingKey::from_secret(access_secret.as_bytes()),
            access_decoding_key: DecodingKey::from_secret(access_secret.as_bytes()),
            refresh_encoding_key: EncodingKey::from_secret(refresh_secret.as_bytes()),
            refresh_decoding_key: DecodingKey::from_secret(refresh_secret.as_bytes()),
            access_token_expiry_secs,
            refresh_token_expiry_secs,
            leeway_secs: DEFAULT_LEEWAY_SECS,
        }
    }

    /// Generates an access token for the given user.
    pub fn generate_access_token(
        &self,
        user_id: Uuid,
        user_type: UserType,
    ) -> Result<String, JwtError> {
        self.generate_token(
            user_id,
            user_type,
            TokenType::Access,
            self.access_token_expiry_secs,
            &self.access_encoding_key,
        )
    }

    /// Generates a refresh token for the given user.
    pub fn generate_refresh_token(
        &self,
        user_id: Uuid,
        user_type: UserType,
    ) -> Result<String, JwtError> {
        self.generate_token(
            user_id,
            user_type,
            TokenType::Refresh,
            self.refresh_token_expiry_secs,
            &self.refresh_encoding_key,
        )
    }

    fn generate_token(
        &self,
        user_id: Uuid,
        user_type: UserType,
        token_type: TokenType,
        expiry_secs: i64,
        key: &EncodingKey,
    ) -> Result<String, JwtError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            exp: (now + Duration::seconds(expiry_secs)).timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
            token_type,
            user_type,
        };

        encode(&Header::new(Algorithm::HS256), &claims, key)
            .map_err(|e| JwtError::EncodingError(e.to_string()))
    }

    /// Validates an access token and returns its claims.
    pub fn validate_access_token(&self, token: &str) -> Result<Claims, JwtError> {
        let claims = self.validate(token, &self.access_decoding_key)?;
        if claims.token_type != TokenType::Access {
            return Err(JwtError::InvalidToken);
        }
        Ok(claims)
    }

    /// Validates a refresh token and returns its claims.
    pub fn validate_refresh_token(&self, token: &str) -> Result<Claims, JwtError> {
        let claims = self.validate(token, &self.refresh_decoding_key)?;
        if claims.token_type != TokenType::Refresh {
            return Err(JwtError::InvalidToken);
        }
        Ok(claims)
    }

    fn validate(&self, token: &str, key: &DecodingKey) -> Result<Claims, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = self.leeway_secs;

        decode::<Claims>(token, key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::TokenExpired,
                _ => JwtError::DecodingError(e.to_string()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> JwtConfig {
        let mut config = JwtConfig::from_secrets("access-secret", "refresh-secret", 900, 604800);
        config.leeway_secs = 0;
        config
    }

    #[test]
    fn test_access_token_round_trip() {
        let config = test_config();
        let user_id = Uuid::new_v4();

        let token = config
            .generate_access_token(user_id, UserType::Driver)
            .unwrap();
        let claims = config.validate_access_token(&token).unwrap();

        assert_eq!(claims.user_id().unwrap(), user_id);
        assert_eq!(claims.token_type, TokenType::Access);
        assert_eq!(claims.user_type, UserType::Driver);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_refresh_token_round_trip() {
        let config = test_config();
        let user_id = Uuid::new_v4();

        let token = config
            .generate_refresh_token(user_id, UserType::Dispatcher)
            .unwrap();
        let claims = config.validate_refresh_token(&token).unwrap();

        assert_eq!(claims.user_type, UserType::Dispatcher);
        assert_eq!(claims.token_type, TokenType::Refresh);
    }

    #[test]
    fn test_refresh_token_rejected_as_access() {
        let config = test_config();
        let token = config
            .generate_refresh_token(Uuid::new_v4(), UserType::Driver)
            .unwrap();

        assert!(matches!(
            config.validate_access_token(&token),
            Err(JwtError::InvalidToken) | Err(JwtError::DecodingError(_))
        ));
    }

    #[test]
    fn test_tampered_token_rejected() {
        let config = test_config();
        let token = config
            .generate_access_token(Uuid::new_v4(), UserType::Driver)
            .unwrap();

        let mut tampered = token.clone();
        tampered.push('x');
        assert!(config.validate_access_token(&tampered).is_err());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let config = test_config();
        let other = JwtConfig::from_secrets("different", "secrets", 900, 604800);

        let token = config
            .generate_access_token(Uuid::new_v4(), UserType::Driver)
            .unwrap();
        assert!(other.validate_access_token(&token).is_err());
    }

    #[test]
    fn test_user_type_display() {
        assert_eq!(UserType::Driver.to_string(), "driver");
        assert_eq!(UserType::Dispatcher.to_string(), "dispatcher");
        assert_eq!(UserType::Passenger.to_string(), "passenger");
    }

    #[test]
    fn test_debug_redacts_keys() {
        let config = test_config();
        let debug = format!("{:?}", config);
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("access-secret"));
    }
}
