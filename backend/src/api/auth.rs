use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::{
        HeaderMap, StatusCode,
        header::{AUTHORIZATION, COOKIE, SET_COOKIE},
    },
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::server::AppState;
use crate::error::{AuthError, MessageBody};

pub const ACCESS_TOKEN_COOKIE: &str = "accessToken";

#[derive(Debug, Deserialize)]
pub struct AuthPayload {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub message: String,
    pub token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub user_id: u64,
    pub username: String,
    pub issued_at: i64,
    pub expires_at: i64,
}

pub async fn signup(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<AuthPayload>, JsonRejection>,
) -> Result<impl IntoResponse, AuthError> {
    let Json(payload) = payload.map_err(|e| AuthError::Validation(e.body_text()))?;

    state
        .auth
        .signup(
            payload.username.as_deref().unwrap_or_default(),
            payload.password.as_deref().unwrap_or_default(),
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(MessageBody::new("Signup successful")),
    ))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<AuthPayload>, JsonRejection>,
) -> Result<Response, AuthError> {
    // A body we cannot read is just another failed login
    let Json(payload) = payload.map_err(|_| AuthError::InvalidCredentials)?;

    let session = state
        .auth
        .login(
            payload.username.as_deref().unwrap_or_default(),
            payload.password.as_deref().unwrap_or_default(),
        )
        .await?;

    let cookie = format!(
        "{ACCESS_TOKEN_COOKIE}={}; HttpOnly; Path=/; Max-Age={}; SameSite=Lax",
        session.token,
        state.auth.issuer().ttl_secs()
    );

    Ok((
        [(SET_COOKIE, cookie)],
        Json(LoginResponse {
            message: "Login successful".to_string(),
            token: session.token,
        }),
    )
        .into_response())
}

/// Reports the identity behind a bearer token or the `accessToken` cookie.
pub async fn session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<SessionResponse>, AuthError> {
    let token = bearer_token(&headers)
        .or_else(|| cookie_token(&headers))
        .ok_or(AuthError::InvalidToken)?;

    let claims = state.auth.verify(token)?;

    Ok(Json(SessionResponse {
        user_id: claims.user_id,
        username: claims.username,
        issued_at: claims.iat,
        expires_at: claims.exp,
    }))
}

/// The auth scheme name is matched case-insensitively.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim_start().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

fn cookie_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            (name == ACCESS_TOKEN_COOKIE && !value.is_empty()).then_some(value)
        })
}
