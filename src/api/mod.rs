//! HTTP surface of the token broker.
//!
//! Five routes drive the authorization-code flow and token retrieval:
//! 1. GET /auth/start?telegram_user_id= → authorization URL for the user
//! 2. GET /auth/callback → code exchange, profile fetch, encrypted persist
//! 3. GET /auth/status/:id → authentication state (always 200)
//! 4. GET /auth/token/:id → decrypted token, gated by the internal API key
//! 5. GET /auth/revoke/:id → local forget
//!
//! All responses are JSON except the callback success page, which is HTML
//! shown to the end user in their browser.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::auth::ApiKeyGate;
use crate::lifecycle::{is_valid, TokenManager};
use crate::provider::{JiraProvider, JiraUserInfo};
use crate::store::{TokenRecord, TokenStore};

/// State parameter format: this prefix followed by the external user id.
/// Deterministic, so the callback recovers the user without server-side
/// session storage.
const STATE_PREFIX: &str = "telegram_user_";

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Message response (status/revoke bodies)
#[derive(Serialize)]
struct MessageResponse {
    message: String,
}

/// Application error types for the auth endpoints
enum AppError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    ServerError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::ServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse {
            error: error_message,
        });

        (status, body).into_response()
    }
}

/// Shared application state for the auth API
#[derive(Clone)]
pub struct BrokerAppState {
    pub store: Arc<dyn TokenStore>,
    pub manager: TokenManager,
    pub provider: Arc<JiraProvider>,
    pub gate: ApiKeyGate,
}

/// Query parameters for GET /auth/start
#[derive(Deserialize)]
struct StartAuthParams {
    telegram_user_id: Option<String>,
}

/// Response for GET /auth/start
#[derive(Serialize)]
struct StartAuthResponse {
    auth_url: String,
    telegram_user_id: String,
    state: String,
}

/// Query parameters the provider redirects back with
#[derive(Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

/// Response for GET /auth/status/:id
#[derive(Serialize)]
struct StatusResponse {
    authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "crate::store::flexible_utc"
    )]
    expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    scope: Option<String>,
}

const SUCCESS_PAGE: &str = r#"<html>
    <head>
        <title>Jira Authorization Success</title>
        <style>
            body { font-family: Arial, sans-serif; text-align: center; padding: 50px; }
            .success { color: #28a745; }
            .info { color: #6c757d; margin-top: 20px; }
        </style>
    </head>
    <body>
        <h1 class="success">&#9989; Authorization Successful!</h1>
        <p>You have successfully authorized the bot to access your Jira account.</p>
        <p class="info">You can now close this window and return to Telegram.</p>
        <script>setTimeout(function() { window.close(); }, 3000);</script>
    </body>
</html>
"#;

/// Create the auth API router
pub fn create_auth_router(state: BrokerAppState) -> Router {
    Router::new()
        .route("/auth/start", get(start_auth))
        .route("/auth/callback", get(auth_callback))
        .route("/auth/status/:telegram_user_id", get(auth_status))
        .route("/auth/token/:telegram_user_id", get(get_token))
        .route("/auth/revoke/:telegram_user_id", get(revoke_auth))
        .with_state(Arc::new(state))
}

/// GET /auth/start
///
/// Returns the provider authorization URL for the given external user.
async fn start_auth(
    State(state): State<Arc<BrokerAppState>>,
    Query(params): Query<StartAuthParams>,
) -> Result<Json<StartAuthResponse>, AppError> {
    let telegram_user_id = params
        .telegram_user_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::BadRequest("telegram_user_id is required".to_string()))?;

    let oauth_state = format!("{}{}", STATE_PREFIX, telegram_user_id);
    let auth_url = state.provider.authorize_url(&oauth_state);

    info!(user_id = %telegram_user_id, "Generated auth URL");

    Ok(Json(StartAuthResponse {
        auth_url,
        telegram_user_id,
        state: oauth_state,
    }))
}

/// GET /auth/callback
///
/// Provider redirect target: validates state, exchanges the code, fetches
/// profile metadata, and persists the encrypted record. No partial record is
/// written when the exchange fails.
async fn auth_callback(
    State(state): State<Arc<BrokerAppState>>,
    Query(params): Query<CallbackParams>,
) -> Result<Html<&'static str>, AppError> {
    if let Some(error) = params.error {
        warn!(error = %error, "OAuth authorization failed at the provider");
        return Err(AppError::BadRequest(format!("OAuth error: {}", error)));
    }

    let code = params.code.filter(|code| !code.is_empty());
    let user_id = params
        .state
        .as_deref()
        .and_then(|s| s.strip_prefix(STATE_PREFIX))
        .filter(|id| !id.is_empty());

    let (Some(code), Some(user_id)) = (code, user_id) else {
        return Err(AppError::BadRequest(
            "Missing or invalid parameters".to_string(),
        ));
    };

    let token_response = state.provider.exchange_code(&code).await.map_err(|e| {
        error!(user_id = %user_id, error = %e, "Token exchange failed");
        AppError::BadRequest("Token exchange failed".to_string())
    })?;

    // Best-effort: a profile fetch failure leaves the metadata empty but
    // still stores the token pair.
    let user_info = match state
        .provider
        .fetch_user_info(&token_response.access_token)
        .await
    {
        Ok(info) => info,
        Err(e) => {
            warn!(user_id = %user_id, error = %e, "Failed to fetch Jira user info");
            JiraUserInfo::default()
        }
    };

    let record = state
        .manager
        .create_record(&token_response, &user_info, None)
        .map_err(|e| {
            error!(user_id = %user_id, error = %e, "Failed to build token record");
            AppError::ServerError("Internal server error".to_string())
        })?;

    state.manager.persist(user_id, &record).map_err(|e| {
        error!(user_id = %user_id, error = %e, "Failed to persist token record");
        AppError::ServerError("Internal server error".to_string())
    })?;

    info!(user_id = %user_id, "Successfully authenticated user");

    Ok(Html(SUCCESS_PAGE))
}

/// GET /auth/status/:telegram_user_id
///
/// Reports whether the user currently holds a valid token, refreshing first
/// when possible. Always answers 200.
async fn auth_status(
    State(state): State<Arc<BrokerAppState>>,
    Path(telegram_user_id): Path<String>,
) -> Json<StatusResponse> {
    let tokens = state.store.load();

    let Some(record) = tokens.get(&telegram_user_id) else {
        return Json(StatusResponse {
            authenticated: false,
            message: Some("User not authenticated".to_string()),
            expires_at: None,
            scope: None,
        });
    };

    let record = refreshed_or_original(&state.manager, &telegram_user_id, record).await;

    if is_valid(&record) {
        Json(StatusResponse {
            authenticated: true,
            message: None,
            expires_at: record.expires_at,
            scope: Some(record.scope),
        })
    } else {
        Json(StatusResponse {
            authenticated: false,
            message: Some("Token expired".to_string()),
            expires_at: None,
            scope: None,
        })
    }
}

/// GET /auth/token/:telegram_user_id
///
/// Serves the decrypted access token to the internal caller. Requires the
/// shared API key; refreshes the record first when possible.
async fn get_token(
    State(state): State<Arc<BrokerAppState>>,
    Path(telegram_user_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    if !state.gate.verify(&headers) {
        warn!(user_id = %telegram_user_id, "Unauthorized token request");
        return Err(AppError::Unauthorized("Unauthorized".to_string()));
    }

    let tokens = state.store.load();
    let record = tokens
        .get(&telegram_user_id)
        .ok_or_else(|| AppError::NotFound("User not authenticated".to_string()))?;

    let record = match state
        .manager
        .refresh_if_needed(&telegram_user_id, record)
        .await
    {
        Ok(Some(refreshed)) => refreshed,
        Ok(None) => record.clone(),
        Err(e) => {
            // Stored ciphertext is unreadable: surface it, do not mask it
            // as an expired token.
            error!(user_id = %telegram_user_id, error = %e, "Stored token is undecryptable");
            return Err(AppError::ServerError("Internal server error".to_string()));
        }
    };

    if !is_valid(&record) {
        error!(user_id = %telegram_user_id, "Unable to refresh token");
        return Err(AppError::Unauthorized("Token expired".to_string()));
    }

    let payload = state.manager.token_payload(&record).map_err(|e| {
        error!(user_id = %telegram_user_id, error = %e, "Stored token is undecryptable");
        AppError::ServerError("Internal server error".to_string())
    })?;

    Ok(Json(payload).into_response())
}

/// GET /auth/revoke/:telegram_user_id
///
/// Deletes the user's record. Idempotent and purely local: the provider's
/// revocation endpoint is not called.
async fn revoke_auth(
    State(state): State<Arc<BrokerAppState>>,
    Path(telegram_user_id): Path<String>,
) -> Result<Response, AppError> {
    let mut tokens = state.store.load();

    if tokens.remove(&telegram_user_id).is_none() {
        return Ok((
            StatusCode::NOT_FOUND,
            Json(MessageResponse {
                message: "User not authenticated".to_string(),
            }),
        )
            .into_response());
    }

    state.store.save(&tokens).map_err(|e| {
        error!(user_id = %telegram_user_id, error = %e, "Failed to persist revocation");
        AppError::ServerError("Internal server error".to_string())
    })?;

    info!(user_id = %telegram_user_id, "Revoked authentication");

    Ok(Json(MessageResponse {
        message: "Authentication revoked successfully".to_string(),
    })
    .into_response())
}

/// Refresh-if-needed with the status route's fallback semantics: any
/// failure, including an undecryptable refresh token, falls back to the
/// original record so the route can still answer 200.
async fn refreshed_or_original(
    manager: &TokenManager,
    user_id: &str,
    record: &TokenRecord,
) -> TokenRecord {
    match manager.refresh_if_needed(user_id, record).await {
        Ok(Some(refreshed)) => refreshed,
        Ok(None) => record.clone(),
        Err(e) => {
            error!(user_id = %user_id, error = %e, "Stored token is undecryptable");
            record.clone()
        }
    }
}
