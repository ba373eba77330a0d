//! Session endpoints: login, explicit refresh, logout.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use service_core::error::AppError;

use crate::{
    dtos::{LoginRequest, LogoutQuery, SessionResponse},
    services::IdentityError,
    utils::ValidatedJson,
    AppState,
};

/// Authenticate against the identity backend and open a session
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<(CookieJar, Json<SessionResponse>), AppError> {
    let identity = match state.identity.authenticate(&req.login, &req.password).await {
        Ok(identity) => identity,
        Err(e) => {
            let outcome = match e {
                IdentityError::AuthFailed => "rejected",
                _ => "backend_error",
            };
            metrics::counter!("auth_logins_total", "outcome" => outcome).increment(1);
            tracing::info!(outcome, "Login failed");
            return Err(e.into());
        }
    };

    let credentials = state
        .tokens
        .issue(&identity.subject_id, &identity.roles)
        .await?;
    metrics::counter!("auth_logins_total", "outcome" => "success").increment(1);

    let body = SessionResponse::from(&credentials);
    Ok((state.cookies.set(jar, &credentials), Json(body)))
}

/// Rotate the refresh cookie without going through a proxied call
pub async fn refresh(State(state): State<AppState>, jar: CookieJar) -> Response {
    let Some(refresh_token) = state.cookies.read(&jar).refresh_token else {
        return AppError::Unauthorized(anyhow::anyhow!("Refresh token required")).into_response();
    };

    match state.tokens.rotate(&refresh_token).await {
        Ok(credentials) => {
            let body = SessionResponse::from(&credentials);
            (state.cookies.set(jar, &credentials), Json(body)).into_response()
        }
        Err(e) => {
            let jar = if e.is_terminal_for_session() {
                state.cookies.clear(jar)
            } else {
                jar
            };
            (jar, AppError::from(e)).into_response()
        }
    }
}

/// End the current session, or every session of the subject with `?all=true`
pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<LogoutQuery>,
) -> Result<(CookieJar, StatusCode), AppError> {
    let presented = state.cookies.read(&jar);

    let subject = if query.all {
        presented
            .access_token
            .as_deref()
            .and_then(|token| state.tokens.validate(token).ok())
            .map(|claims| claims.sub)
    } else {
        None
    };

    match (subject, presented.refresh_token.as_deref()) {
        (Some(subject_id), _) => {
            state.tokens.revoke_subject(&subject_id).await?;
        }
        (None, Some(refresh_token)) => {
            state.tokens.revoke_token(refresh_token).await?;
        }
        (None, None) => {}
    }

    Ok((state.cookies.clear(jar), StatusCode::NO_CONTENT))
}
