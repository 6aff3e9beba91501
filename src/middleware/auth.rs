use crate::common::response::ApiError;
use crate::state::AppState;
use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

/// JWT claims issued by the identity provider. `sub` is the owner id.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TokenClaims {
    pub sub: String,
    pub exp: usize,
    pub iat: usize,
}

fn unauthorized(message: &str) -> ApiError {
    ApiError(format!("Unauthorized: {}", message), StatusCode::UNAUTHORIZED)
}

pub fn bearer_token(value: &str) -> Option<&str> {
    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

pub fn decode_claims(token: &str, secret: &str) -> Result<TokenClaims, ApiError> {
    let claims = decode::<TokenClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| unauthorized("Invalid token signature"))?
    .claims;

    if claims.sub.trim().is_empty() {
        return Err(unauthorized("Token has no subject"));
    }
    Ok(claims)
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
        .map(str::to_owned)
        .ok_or_else(|| unauthorized("Missing or invalid token"))?;

    // Revoked tokens are listed in Redis until they expire.
    let mut redis = state
        .redis
        .get_conn()
        .await
        .map_err(|_| ApiError("Internal Server Error: Redis unavailable".to_string(), StatusCode::INTERNAL_SERVER_ERROR))?;

    let is_blocked: bool = redis
        .exists(format!("blocked_token:{}", token))
        .await
        .map_err(|_| ApiError("Internal Server Error: Redis error".to_string(), StatusCode::INTERNAL_SERVER_ERROR))?;

    if is_blocked {
        return Err(unauthorized("Token is blocked/revoked"));
    }

    let claims = decode_claims(&token, &state.config.jwt_secret)?;
    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}
