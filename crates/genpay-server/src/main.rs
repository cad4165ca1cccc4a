//! genpay HTTP Server
//!
//! Axum server in front of the payment-gated generation flow: chat ingress,
//! the per-user outbox of the reference messenger, wallet registration and
//! the LNbits payment webhook.

mod handlers;
mod state;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    middleware,
    routing::{get, post, put},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use genpay_bot::{Dependencies, GenerateConfig, OutboxMessenger, PaymentDispatcher, assemble};
use genpay_core::{MemorySessionStore, ProviderFactory};
use genpay_payments::{
    LightningWallet, LnbitsClient, MemoryInvoiceStore, MemoryWalletDirectory, Wallet,
    WebhookHandler,
};
use genpay_runtime::DalleConfig;

use crate::handlers::{
    chat_handler, health_check, lnbits_webhook, outbox_handler, register_wallet,
    require_api_token,
};
use crate::state::AppState;

/// Paid events buffered between confirmation and the dispatcher
const EVENT_QUEUE_CAPACITY: usize = 256;

const SESSION_PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// External services the flow runs against
struct Services {
    lightning: Arc<dyn LightningWallet>,
    provider: Arc<dyn ProviderFactory>,
    service_wallet: Wallet,
    webhook_secret: Option<String>,
    api_token: Option<String>,
}

fn service_wallet_from_env() -> Wallet {
    let var = |key: &str| std::env::var(key).unwrap_or_default();
    Wallet {
        id: var("SERVICE_WALLET_ID"),
        admin_key: var("SERVICE_WALLET_ADMIN_KEY"),
        invoice_key: var("SERVICE_WALLET_INVOICE_KEY"),
    }
}

/// Drop prompt captures nobody answered
async fn purge_sessions(sessions: Arc<MemorySessionStore>) {
    let mut tick = tokio::time::interval(SESSION_PURGE_INTERVAL);
    loop {
        tick.tick().await;
        if let Err(e) = sessions.purge_expired(chrono::Utc::now()) {
            tracing::warn!(error = %e, "Session purge failed");
        }
    }
}

/// Build the shared state and the dispatcher that must be spawned next to it
fn build(services: Services, config: GenerateConfig) -> (AppState, PaymentDispatcher) {
    let invoices = Arc::new(MemoryInvoiceStore::new());
    let wallets = Arc::new(MemoryWalletDirectory::new());
    let outbox = Arc::new(OutboxMessenger::new());
    let sessions = Arc::new(MemorySessionStore::new());

    let pipeline = assemble(
        Dependencies {
            invoices: invoices.clone(),
            sessions: sessions.clone(),
            wallets: wallets.clone(),
            lightning: services.lightning.clone(),
            messenger: outbox.clone(),
            provider: services.provider.clone(),
            service_wallet: services.service_wallet.clone(),
        },
        config,
        EVENT_QUEUE_CAPACITY,
    );

    let webhook = WebhookHandler::new(
        invoices,
        pipeline.confirmer,
        services.lightning.clone(),
        services.service_wallet.clone(),
        services.webhook_secret,
    );

    let state = AppState {
        bot: pipeline.bot,
        outbox,
        webhook: Arc::new(webhook),
        sessions,
        wallets,
        lightning: services.lightning,
        provider: services.provider,
        service_wallet: services.service_wallet,
        api_token: services.api_token,
    };

    (state, pipeline.dispatcher)
}

fn router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        // Chat
        .route("/api/chat", post(chat_handler))
        .route("/api/chat/{user}/outbox", get(outbox_handler))
        // Wallets
        .route("/api/users/{user}/wallet", put(register_wallet))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_token,
        ));

    Router::new()
        // Health
        .route("/health", get(health_check))
        .merge(api)
        // Payments
        .route("/webhook/lnbits", post(lnbits_webhook))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    let config = GenerateConfig::from_env();
    let lnbits = LnbitsClient::from_env()?;
    let webhook_secret = lnbits.config().webhook_secret.clone();
    if webhook_secret.is_none() {
        tracing::warn!("⚠ LNBITS_WEBHOOK_SECRET not set - webhook bodies are not authenticated");
    }

    let api_token = std::env::var("GENPAY_API_TOKEN").ok().filter(|t| !t.is_empty());
    if api_token.is_none() {
        tracing::warn!("⚠ GENPAY_API_TOKEN not set - chat and wallet routes will refuse all requests");
    }

    let service_wallet = service_wallet_from_env();
    if service_wallet.admin_key.is_empty() || service_wallet.invoice_key.is_empty() {
        tracing::warn!("⚠ Service wallet not configured - invoices cannot be created");
        tracing::warn!("  Set SERVICE_WALLET_ID, SERVICE_WALLET_ADMIN_KEY and SERVICE_WALLET_INVOICE_KEY in .env");
    }

    let dalle = DalleConfig::from_env();
    match dalle.connect() {
        Ok(_) => tracing::info!(base_url = %dalle.base_url, "✓ Generation provider configured"),
        Err(e) => {
            tracing::warn!(error = %e, "⚠ Generation provider not available - paid jobs will be refunded");
        }
    }

    tracing::info!(
        price_sat = config.price_sat,
        deadline_secs = config.deadline.as_secs(),
        artifact_dir = %config.artifact_dir.display(),
        retention = ?config.retention,
        "Generation flow configured"
    );

    let (state, dispatcher) = build(
        Services {
            lightning: Arc::new(lnbits),
            provider: Arc::new(dalle),
            service_wallet,
            webhook_secret,
            api_token,
        },
        config,
    );
    tokio::spawn(dispatcher.run());
    tokio::spawn(purge_sessions(state.sessions.clone()));

    let app = router(state);

    // Start server
    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 genpay server running on http://{}", addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("");
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health                  - Health check");
    tracing::info!("  POST /api/chat                - Send chat message");
    tracing::info!("  GET  /api/chat/{{user}}/outbox  - Messages sent to a user");
    tracing::info!("  PUT  /api/users/{{user}}/wallet - Register wallet keys");
    tracing::info!("  POST /webhook/lnbits          - Payment notifications");
    tracing::info!("");

    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use genpay_payments::{
        CreatedInvoice, InvoiceParams, PaymentError, SIGNATURE_HEADER, Settlement, sign,
    };
    use tower::ServiceExt;

    const SECRET: &str = "whsec";
    const TOKEN: &str = "api-token";

    /// Backend issuing one invoice, `hash-stub`, settled or not
    struct StubLightning {
        settled: bool,
    }

    #[async_trait]
    impl LightningWallet for StubLightning {
        async fn create_invoice(
            &self,
            _wallet: &Wallet,
            _params: &InvoiceParams,
        ) -> Result<CreatedInvoice, PaymentError> {
            Ok(CreatedInvoice {
                payment_request: "lnbc1stub".into(),
                payment_hash: "hash-stub".into(),
            })
        }

        async fn pay(&self, _wallet: &Wallet, _payment_request: &str) -> Result<Settlement, PaymentError> {
            Ok(Settlement {
                payment_hash: "settled".into(),
            })
        }

        async fn balance(&self, _wallet: &Wallet) -> Result<u64, PaymentError> {
            Ok(0)
        }

        async fn is_paid(&self, _wallet: &Wallet, payment_hash: &str) -> Result<bool, PaymentError> {
            Ok(self.settled && payment_hash == "hash-stub")
        }
    }

    /// App whose provider cannot be built, so paid jobs go straight to refund
    fn app(artifacts: &std::path::Path) -> Router {
        app_with(artifacts, true)
    }

    fn app_with(artifacts: &std::path::Path, settled: bool) -> Router {
        let config = GenerateConfig {
            artifact_dir: artifacts.to_path_buf(),
            ..GenerateConfig::default()
        };

        let (state, dispatcher) = build(
            Services {
                lightning: Arc::new(StubLightning { settled }),
                provider: Arc::new(DalleConfig::default()),
                service_wallet: Wallet {
                    id: "service".into(),
                    admin_key: "admin".into(),
                    invoice_key: "invoice".into(),
                },
                webhook_secret: Some(SECRET.into()),
                api_token: Some(TOKEN.into()),
            },
            config,
        );
        tokio::spawn(dispatcher.run());
        router(state)
    }

    fn json_request(method: &str, uri: &str, body: &serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .header("authorization", format!("Bearer {TOKEN}"))
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn webhook(body: &str, signature: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/webhook/lnbits")
            .header(SIGNATURE_HEADER, signature)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(dir.path())
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["provider_ready"], false);
        assert_eq!(body["wallet_configured"], true);
        assert_eq!(body["lightning_connected"], true);
    }

    #[tokio::test]
    async fn test_chat_without_wallet_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(dir.path())
            .oneshot(json_request(
                "POST",
                "/api/chat",
                &serde_json::json!({"user": "7", "message": "/generate a fox"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["reply"], "refused");
        assert_eq!(body["kind"], "user_input");
    }

    #[tokio::test]
    async fn test_invoice_then_webhook_confirms_once() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());

        let response = app
            .clone()
            .oneshot(json_request(
                "PUT",
                "/api/users/7/wallet",
                &serde_json::json!({"id": "w7", "admin_key": "a7", "invoice_key": "i7"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/chat",
                &serde_json::json!({"user": "7", "message": "/generate a fox"}),
            ))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["reply"], "invoiced");
        assert_eq!(body["outcome"], "awaiting_payment");

        let response = app
            .clone()
            .oneshot(
                Request::get("/api/chat/7/outbox")
                    .header("authorization", format!("Bearer {TOKEN}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let outbox = json_body(response).await;
        assert!(
            outbox
                .as_array()
                .unwrap()
                .iter()
                .any(|m| m["kind"] == "payment_request")
        );

        let payload = r#"{"payment_hash":"hash-stub","amount":1000000}"#;
        let signature = sign(SECRET, payload.as_bytes()).unwrap();

        let first = app.clone().oneshot(webhook(payload, &signature)).await.unwrap();
        assert_eq!(json_body(first).await["event"], "paid");

        let second = app.clone().oneshot(webhook(payload, &signature)).await.unwrap();
        assert_eq!(json_body(second).await["event"], "duplicate");
    }

    #[tokio::test]
    async fn test_webhook_rejects_bad_signature() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(dir.path())
            .oneshot(webhook(r#"{"payment_hash":"hash-stub"}"#, "deadbeef"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_api_routes_require_token() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());

        let unauthenticated = Request::builder()
            .method("PUT")
            .uri("/api/users/7/wallet")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({"id": "evil", "admin_key": "a", "invoice_key": "i"}).to_string(),
            ))
            .unwrap();
        let response = app.clone().oneshot(unauthenticated).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let wrong_token = Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header("content-type", "application/json")
            .header("authorization", "Bearer nope")
            .body(Body::from(
                serde_json::json!({"user": "7", "message": "/generate a fox"}).to_string(),
            ))
            .unwrap();
        let response = app.clone().oneshot(wrong_token).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        // Health and the signed webhook stay outside the token check
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_signed_webhook_for_unsettled_invoice_is_not_paid() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(dir.path(), false);

        let response = app
            .clone()
            .oneshot(json_request(
                "PUT",
                "/api/users/7/wallet",
                &serde_json::json!({"id": "w7", "admin_key": "a7", "invoice_key": "i7"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/chat",
                &serde_json::json!({"user": "7", "message": "/generate a fox"}),
            ))
            .await
            .unwrap();
        assert_eq!(json_body(response).await["reply"], "invoiced");

        let payload = r#"{"payment_hash":"hash-stub","amount":1000000}"#;
        let signature = sign(SECRET, payload.as_bytes()).unwrap();
        let response = app.oneshot(webhook(payload, &signature)).await.unwrap();
        assert_eq!(json_body(response).await["event"], "not_paid");
    }
}
