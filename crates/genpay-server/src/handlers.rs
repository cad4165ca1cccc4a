//! HTTP Handlers

use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, Request, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use serde::{Deserialize, Serialize};

use genpay_bot::{OutboundMessage, Reply};
use genpay_core::UserId;
use genpay_payments::{PaymentError, SIGNATURE_HEADER, Wallet, WebhookEvent};

use crate::state::AppState;

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub provider_ready: bool,
    pub wallet_configured: bool,
    pub lightning_connected: bool,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub user: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct OutboxQuery {
    /// Clear the returned messages
    #[serde(default)]
    pub drain: bool,
}

#[derive(Debug, Deserialize)]
pub struct WalletRequest {
    pub id: String,
    pub admin_key: String,
    pub invoice_key: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>, code: &str) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.into(),
        }),
    )
}

// ============================================================================
// Middleware
// ============================================================================

/// Bearer token check for the chat and wallet routes
///
/// Without a configured token every request is refused.
pub async fn require_api_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.api_token.as_deref() else {
        tracing::warn!(path = %request.uri().path(), "API token not configured");
        return Err(api_error(
            StatusCode::UNAUTHORIZED,
            "API access is not configured",
            "UNAUTHORIZED",
        ));
    };

    let presented = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if presented != Some(expected) {
        tracing::warn!(path = %request.uri().path(), "Rejected request without a valid API token");
        return Err(api_error(StatusCode::UNAUTHORIZED, "Invalid API token", "UNAUTHORIZED"));
    }

    Ok(next.run(request).await)
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let provider_ready = match state.provider.connect() {
        Ok(provider) => provider.health_check().await.unwrap_or(false),
        Err(_) => false,
    };
    let wallet = &state.service_wallet;
    let wallet_configured = !wallet.admin_key.is_empty() && !wallet.invoice_key.is_empty();
    let lightning_connected =
        wallet_configured && state.lightning.balance(wallet).await.is_ok();

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        provider_ready,
        wallet_configured,
        lightning_connected,
    })
}

/// Inbound chat message
pub async fn chat_handler(
    State(state): State<AppState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<Reply>, ApiError> {
    let user = UserId::new(payload.user);

    let reply = state
        .bot
        .on_message(&user, &payload.message)
        .await
        .map_err(|e| {
            tracing::error!(user = %user, kind = ?e.kind(), error = %e, "Chat handling failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, e.user_message(), "CHAT_ERROR")
        })?;

    Ok(Json(reply))
}

/// Messages the bot sent to a user
pub async fn outbox_handler(
    State(state): State<AppState>,
    Path(user): Path<String>,
    Query(query): Query<OutboxQuery>,
) -> Result<Json<Vec<OutboundMessage>>, ApiError> {
    let user = UserId::new(user);
    let messages = if query.drain {
        state.outbox.drain(&user)
    } else {
        state.outbox.messages(&user)
    };

    messages.map(Json).map_err(|e| {
        tracing::error!(user = %user, error = %e, "Outbox read failed");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), "OUTBOX_ERROR")
    })
}

/// Register or replace a user's wallet keys
pub async fn register_wallet(
    State(state): State<AppState>,
    Path(user): Path<String>,
    Json(payload): Json<WalletRequest>,
) -> Result<StatusCode, ApiError> {
    let user = UserId::new(user);
    let wallet = Wallet {
        id: payload.id,
        admin_key: payload.admin_key,
        invoice_key: payload.invoice_key,
    };

    state.wallets.register(user.clone(), wallet).map_err(|e| {
        tracing::error!(user = %user, error = %e, "Wallet registration failed");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, e.user_message(), "WALLET_ERROR")
    })?;

    tracing::info!(user = %user, "Wallet registered");
    Ok(StatusCode::NO_CONTENT)
}

/// LNbits payment webhook
pub async fn lnbits_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookEvent>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let payload = state
        .webhook
        .parse_event(&body, signature)
        .map_err(|e| match e {
            PaymentError::WebhookSignature(_) => {
                tracing::warn!(error = %e, "Webhook signature failed");
                api_error(StatusCode::UNAUTHORIZED, "Invalid signature", "INVALID_SIGNATURE")
            }
            _ => {
                tracing::warn!(error = %e, "Webhook body rejected");
                api_error(StatusCode::BAD_REQUEST, "Invalid payload", "INVALID_PAYLOAD")
            }
        })?;

    let event = state.webhook.handle(payload).await.map_err(|e| {
        tracing::error!(error = %e, "Webhook processing error");
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Webhook processing failed",
            "WEBHOOK_ERROR",
        )
    })?;

    Ok(Json(event))
}
