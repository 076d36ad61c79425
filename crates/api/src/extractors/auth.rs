//! Bearer JWT authentication extractors.
//!
//! Token issuance belongs to the authentication subsystem; this boundary
//! only validates access tokens and separates drivers from dispatchers.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::app::AppState;
use crate::error::ApiError;
use shared::jwt::UserType;

/// Authenticated principal extracted from a bearer access token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// User ID from the JWT subject claim.
    pub user_id: Uuid,
    /// Account kind carried in the claims.
    pub user_type: UserType,
    /// JWT ID (jti) for log correlation.
    pub jti: String,
}

/// Pulls the bearer token out of the Authorization header.
pub fn bearer_token(parts: &Parts) -> Result<&str, ApiError> {
    let auth_header = parts
        .headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("Missing Authorization header".to_string()))?;

    auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::Unauthorized("Invalid Authorization header format".to_string()))
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;

        let claims = state
            .jwt
            .validate_access_token(token)
            .map_err(|_| ApiError::Unauthorized("Invalid or expired token".to_string()))?;

        let user_id = claims
            .user_id()
            .map_err(|_| ApiError::Unauthorized("Invalid token subject".to_string()))?;

        Ok(AuthUser {
            user_id,
            user_type: claims.user_type,
            jti: claims.jti,
        })
    }
}

/// Authenticated driver.
#[derive(Debug, Clone)]
pub struct DriverAuth(pub AuthUser);

#[async_trait]
impl FromRequestParts<AppState> for DriverAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if user.user_type != UserType::Driver {
            return Err(ApiError::Forbidden("Driver account required".to_string()));
        }
        Ok(DriverAuth(user))
    }
}

/// Authenticated dispatcher (customer-support operator).
#[derive(Debug, Clone)]
pub struct DispatcherAuth(pub AuthUser);

#[async_trait]
impl FromRequestParts<AppState> for DispatcherAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if user.user_type != UserType::Dispatcher {
            return Err(ApiError::Forbidden(
                "Dispatcher account required".to_string(),
            ));
        }
        Ok(DispatcherAuth(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts_with_auth(value: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/api/v1/trips");
        if let Some(value) = value {
            builder = builder.header("Authorization", value);
        }
        let (parts, _) = builder.body(()).unwrap().into_parts();
        parts
    }

    #[test]
    fn test_bearer_token_extraction() {
        let parts = parts_with_auth(Some("Bearer abc.def.ghi"));
        assert_eq!(bearer_token(&parts).unwrap(), "abc.def.ghi");
    }

    #[test]
    fn test_bearer_token_missing_header() {
        let parts = parts_with_auth(None);
        assert!(matches!(
            bearer_token(&parts),
            Err(ApiError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_bearer_token_wrong_scheme() {
        let parts = parts_with_auth(Some("Basic dXNlcjpwYXNz"));
        assert!(matches!(
            bearer_token(&parts),
            Err(ApiError::Unauthorized(_))
        ));
    }
}
