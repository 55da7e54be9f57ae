//! Admin API integration tests
//!
//! Boots the gateway against real Postgres and Redis and drives it over
//! HTTP. Tests skip when either backing service is unavailable.

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tokio::sync::watch;
use uuid::Uuid;

use mark::adapters::AdapterRegistry;
use mark::amount::canonical;
use mark::cache::PurchaseCache;
use mark::chain::{ChainService, SignerChainService};
use mark::config::AppConfig;
use mark::gateway::{build_router, state::AdminState};
use mark::hub::{EverclearApi, HubClient};
use mark::queue::EventQueue;
use mark::rebalance::RebalanceEngine;
use mark::store::{
    Earmark, EarmarkStatus, EarmarkStore, OperationStore, PauseStore, ensure_schema,
};

const ADMIN_TOKEN: &str = "test-admin-token";

struct TestServer {
    base_url: String,
    earmarks: Arc<EarmarkStore>,
    _shutdown: watch::Sender<bool>,
}

fn test_config() -> AppConfig {
    let mut config: AppConfig = serde_yaml::from_str(
        r#"
database_url: "postgres://localhost/mark_test"
everclear_api_url: "http://localhost:3000"
signer:
  address: "0xmark"
chains:
  10:
    assets:
      - symbol: "USDC"
        ticker_hash: "0xusdc"
        address: "0xa10"
        decimals: 6
"#,
    )
    .unwrap();
    config.admin_token = ADMIN_TOKEN.to_string();
    config
}

/// Boot the gateway on an ephemeral port; None when Postgres or Redis is
/// missing.
async fn spawn_server() -> Option<TestServer> {
    let database_url = std::env::var("DATABASE_URL").ok()?;
    let pool = PgPoolOptions::new()
        .max_connections(4)
        .connect(&database_url)
        .await
        .ok()?;
    ensure_schema(&pool).await.ok()?;

    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let redis_conn = redis::Client::open(redis_url)
        .ok()?
        .get_multiplexed_async_connection()
        .await
        .ok()?;

    let prefix = format!("marktest:{}", Uuid::new_v4());
    let config = Arc::new(test_config());

    let earmarks = Arc::new(EarmarkStore::new(pool.clone()));
    let operations = Arc::new(OperationStore::new(pool.clone()));
    let pause = Arc::new(PauseStore::new(pool));
    let queue = Arc::new(EventQueue::with_prefix(redis_conn.clone(), prefix.clone()));
    let cache = Arc::new(PurchaseCache::with_prefix(redis_conn, prefix, 60));

    let chain: Arc<dyn ChainService> = Arc::new(SignerChainService::new((*config).clone()));
    let hub: Arc<dyn HubClient> = Arc::new(EverclearApi::new(config.everclear_api_url.clone()));
    let engine = Arc::new(RebalanceEngine::new(
        config.clone(),
        earmarks.clone(),
        operations.clone(),
        pause.clone(),
        Arc::new(AdapterRegistry::with_defaults()),
        chain.clone(),
        hub,
    ));

    let state = AdminState {
        config,
        earmarks: earmarks.clone(),
        operations,
        pause,
        queue,
        cache,
        engine,
        chain,
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.ok()?;
    let addr = listener.local_addr().ok()?;
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let router = build_router(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            })
            .await;
    });

    Some(TestServer {
        base_url: format!("http://{addr}"),
        earmarks,
        _shutdown: shutdown_tx,
    })
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_health_is_public() {
    let Some(server) = spawn_server().await else {
        eprintln!("Skipping test - postgres/redis not available");
        return;
    };

    let response = client()
        .get(format!("{}/health", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["queueDepths"].is_object());
}

#[tokio::test]
async fn test_admin_routes_require_token() {
    let Some(server) = spawn_server().await else {
        eprintln!("Skipping test - postgres/redis not available");
        return;
    };
    let http = client();

    // missing token
    let response = http
        .get(format!("{}/admin/earmarks", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("x-admin-token"));

    // wrong token
    let response = http
        .get(format!("{}/admin/earmarks", server.base_url))
        .header("x-admin-token", "wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    // right token
    let response = http
        .get(format!("{}/admin/earmarks", server.base_url))
        .header("x-admin-token", ADMIN_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn test_earmark_listing_and_cancel() {
    let Some(server) = spawn_server().await else {
        eprintln!("Skipping test - postgres/redis not available");
        return;
    };
    let http = client();

    let invoice_id = format!("0xinv-{}", Uuid::new_v4());
    let earmark = Earmark::new(invoice_id.clone(), 10, "0xusdc", canonical(5));
    server.earmarks.create(&earmark).await.unwrap();

    // filter by invoice id
    let response = http
        .get(format!(
            "{}/admin/earmarks?invoiceId={invoice_id}",
            server.base_url
        ))
        .header("x-admin-token", ADMIN_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["invoiceId"], invoice_id.as_str());
    assert_eq!(body[0]["status"], "pending");
    assert_eq!(body[0]["minAmount"], "5000000000000000000");

    // cancel
    let response = http
        .post(format!(
            "{}/admin/earmarks/{}/cancel",
            server.base_url, earmark.id
        ))
        .header("x-admin-token", ADMIN_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "cancelled");

    // second cancel conflicts, with the original message in `error`
    let response = http
        .post(format!(
            "{}/admin/earmarks/{}/cancel",
            server.base_url, earmark.id
        ))
        .header("x-admin-token", ADMIN_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("cancelled"));

    let fetched = server.earmarks.get(earmark.id).await.unwrap().unwrap();
    assert_eq!(fetched.status, EarmarkStatus::Cancelled);
}

#[tokio::test]
async fn test_unknown_earmark_is_404() {
    let Some(server) = spawn_server().await else {
        eprintln!("Skipping test - postgres/redis not available");
        return;
    };

    let response = client()
        .get(format!(
            "{}/admin/earmarks/{}",
            server.base_url,
            Uuid::new_v4()
        ))
        .header("x-admin-token", ADMIN_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn test_webhook_enqueues_event() {
    let Some(server) = spawn_server().await else {
        eprintln!("Skipping test - postgres/redis not available");
        return;
    };

    let invoice_id = format!("0xinv-{}", Uuid::new_v4());
    let response = client()
        .post(format!("{}/webhooks/invoice", server.base_url))
        .header("x-admin-token", ADMIN_TOKEN)
        .json(&serde_json::json!({ "id": invoice_id }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 202);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["queued"], true);

    // redelivery is a no-op
    let response = client()
        .post(format!("{}/webhooks/invoice", server.base_url))
        .header("x-admin-token", ADMIN_TOKEN)
        .json(&serde_json::json!({ "id": invoice_id }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 202);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["queued"], false);
}

#[tokio::test]
async fn test_pause_flags_roundtrip_over_http() {
    let Some(server) = spawn_server().await else {
        eprintln!("Skipping test - postgres/redis not available");
        return;
    };
    let http = client();

    for flag in ["rebalance", "ondemand", "purchase"] {
        let response = http
            .post(format!("{}/admin/pause/{flag}", server.base_url))
            .header("x-admin-token", ADMIN_TOKEN)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["paused"], true);

        let response = http
            .post(format!("{}/admin/unpause/{flag}", server.base_url))
            .header("x-admin-token", ADMIN_TOKEN)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["paused"], false);
    }

    // unknown flag
    let response = http
        .post(format!("{}/admin/pause/everything", server.base_url))
        .header("x-admin-token", ADMIN_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}
