//! Bearer token authentication.
//!
//! Tokens are HS256 JWTs whose `sub` is the numeric user id. Group
//! membership is always read from the store, never from the token.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use jsonwebtoken::{decode, encode, Algorithm, EncodingKey, Header, Validation};
use portal_core::models::{User, UserId};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{error::ApiError, AppState};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: u64,
}

/// Mints a token for `user_id`, valid for `ttl`.
pub fn issue_token(secret: &[u8], user_id: UserId, ttl: Duration) -> Result<String, jsonwebtoken::errors::Error> {
    let exp = SystemTime::now()
        .checked_add(ttl)
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(u64::MAX);
    let claims = Claims { sub: user_id.to_string(), exp };
    encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret))
}

// Ok(None): no credentials were presented at all.
async fn authenticate(parts: &Parts, state: &AppState) -> Result<Option<User>, ApiError> {
    let Some(value) = parts.headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let token = value
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;

    let data = decode::<Claims>(token, &state.jwt_key, &Validation::new(Algorithm::HS256)).map_err(|e| {
        debug!("Rejected token: {}", e);
        ApiError::Unauthorized
    })?;
    let user_id: UserId = data.claims.sub.parse().map_err(|_| ApiError::Unauthorized)?;

    let user = state
        .portal
        .store()
        .get_user(user_id)
        .await
        .map_err(|e| ApiError::InternalServerError(e.to_string()))?
        .ok_or(ApiError::Unauthorized)?;
    Ok(Some(user))
}

/// The authenticated caller; rejects with 401 otherwise.
pub struct CurrentUser(pub User);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        authenticate(parts, state).await?.map(CurrentUser).ok_or(ApiError::Unauthorized)
    }
}

/// The caller if one could be identified. Bad credentials count as anonymous.
pub struct MaybeUser(pub Option<User>);

impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match authenticate(parts, state).await {
            Ok(user) => Ok(MaybeUser(user)),
            Err(ApiError::Unauthorized) => Ok(MaybeUser(None)),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::DecodingKey;

    #[test]
    fn issued_tokens_decode_with_the_same_secret() {
        let token = issue_token(b"secret", 42, Duration::from_secs(60)).unwrap();
        let data = decode::<Claims>(&token, &DecodingKey::from_secret(b"secret"), &Validation::new(Algorithm::HS256))
            .unwrap();
        assert_eq!(data.claims.sub, "42");

        let wrong = decode::<Claims>(&token, &DecodingKey::from_secret(b"other"), &Validation::new(Algorithm::HS256));
        assert!(wrong.is_err());
    }
}
