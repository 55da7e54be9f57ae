//! Admin HTTP surface + webhook ingress
//!
//! Thin CRUD over the stores plus operator triggers, guarded by a shared
//! `x-admin-token`. Webhooks land here too and only enqueue; all real work
//! happens in the processor and the engine.

pub mod handlers;
pub mod state;
pub mod types;

use axum::{
    Router,
    body::Body,
    extract::State,
    http::Request,
    middleware::{Next, from_fn_with_state},
    response::Response,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

use state::AdminState;
use types::AdminError;

/// Axum middleware: every /admin and /webhooks route requires the configured
/// `x-admin-token`.
async fn admin_auth_middleware(
    State(state): State<AdminState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AdminError> {
    if state.config.admin_token.is_empty() {
        return Err(AdminError::Unauthorized(
            "admin token is not configured".into(),
        ));
    }

    let presented = request
        .headers()
        .get("x-admin-token")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AdminError::Unauthorized("missing x-admin-token header".into()))?;

    if presented != state.config.admin_token {
        return Err(AdminError::Unauthorized("invalid admin token".into()));
    }

    Ok(next.run(request).await)
}

pub fn build_router(state: AdminState) -> Router {
    let admin_routes = Router::new()
        .route("/pause/{flag}", post(handlers::pause::pause))
        .route("/unpause/{flag}", post(handlers::pause::unpause))
        .route("/earmarks", get(handlers::earmarks::list_earmarks))
        .route("/earmarks/{id}", get(handlers::earmarks::get_earmark))
        .route(
            "/earmarks/{id}/cancel",
            post(handlers::earmarks::cancel_earmark),
        )
        .route("/operations", get(handlers::operations::list_operations))
        .route("/operations/{id}", get(handlers::operations::get_operation))
        .route(
            "/operations/{id}/cancel",
            post(handlers::operations::cancel_operation),
        )
        .route(
            "/trigger/rebalance",
            post(handlers::triggers::trigger_rebalance),
        )
        .route("/trigger/intent", post(handlers::triggers::trigger_intent))
        .route("/trigger/send", post(handlers::triggers::trigger_send))
        .route("/trigger/swap", post(handlers::triggers::trigger_swap))
        .layer(from_fn_with_state(state.clone(), admin_auth_middleware));

    let webhook_routes = Router::new()
        .route("/invoice", post(handlers::webhooks::invoice_webhook))
        .route("/settlement", post(handlers::webhooks::settlement_webhook))
        .layer(from_fn_with_state(state.clone(), admin_auth_middleware));

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .nest("/admin", admin_routes)
        .nest("/webhooks", webhook_routes)
        .with_state(state)
}

/// Bind and serve until shutdown.
pub async fn run_server(state: AdminState, mut shutdown: watch::Receiver<bool>) {
    let port = state.config.listen_port;
    let app = build_router(state);

    let addr = format!("0.0.0.0:{port}");
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %addr, error = %e, "Failed to bind admin server");
            return;
        }
    };

    info!(addr = %addr, "Admin server listening");

    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = shutdown.changed().await;
    });
    if let Err(e) = server.await {
        error!(error = %e, "Admin server error");
    }
}
