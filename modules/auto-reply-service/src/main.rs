//! Auto-Reply Service — standalone binary for Instagram DM and comment
//! auto-replies.
//!
//! Hosts the Instagram webhook endpoint and the dashboard RPC API on the
//! same port. Default: http://127.0.0.1:9108/

mod db;
mod events;
mod handlers;
mod instagram_api;
mod keywords;
mod llm_api;
mod routes;
mod signature;

use handlers::Pipeline;
use routes::AppState;
use std::sync::Arc;
use std::time::Instant;

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    env_logger::init();

    let port: u16 = std::env::var("AUTO_REPLY_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(9108);

    let db_path = std::env::var("AUTO_REPLY_DB_PATH")
        .unwrap_or_else(|_| "./auto_reply.db".to_string());

    let verify_token = std::env::var("IG_VERIFY_TOKEN").ok();
    let app_secret = std::env::var("IG_APP_SECRET").ok();

    if verify_token.is_none() {
        log::warn!("IG_VERIFY_TOKEN not set — webhook subscription handshake disabled");
    }
    if app_secret.is_none() {
        log::warn!("IG_APP_SECRET not set — webhook deliveries will be rejected");
    }

    log::info!("Opening database at: {}", db_path);
    let database = Arc::new(db::Db::open(&db_path).expect("Failed to open database"));

    let http_client = reqwest::Client::new();
    let pipeline = Arc::new(Pipeline::new(
        database.clone(),
        Arc::new(llm_api::LlmGateway::new(http_client.clone())),
        Arc::new(instagram_api::InstagramApi::new(http_client)),
    ));

    let state = Arc::new(AppState {
        db: database,
        pipeline,
        verify_token,
        app_secret,
        start_time: Instant::now(),
    });

    let cors = tower_http::cors::CorsLayer::permissive();

    let app = axum::Router::new()
        // Instagram webhook
        .route(
            "/webhooks/instagram",
            axum::routing::get(routes::webhook_verify).post(routes::webhook_receive),
        )
        // Account linking
        .route(
            "/rpc/accounts/link",
            axum::routing::post(routes::accounts_link),
        )
        .route(
            "/rpc/accounts/list",
            axum::routing::get(routes::accounts_list),
        )
        // Automation configs
        .route(
            "/rpc/configs/upsert",
            axum::routing::post(routes::configs_upsert),
        )
        .route(
            "/rpc/configs/list",
            axum::routing::get(routes::configs_list),
        )
        // Post rules
        .route(
            "/rpc/posts/rules/upsert",
            axum::routing::post(routes::post_rules_upsert),
        )
        .route(
            "/rpc/posts/rules/list",
            axum::routing::get(routes::post_rules_list),
        )
        // Message log
        .route(
            "/rpc/messages/query",
            axum::routing::post(routes::messages_query),
        )
        // Analytics
        .route(
            "/rpc/analytics/query",
            axum::routing::post(routes::analytics_query),
        )
        // Dead-letter log
        .route(
            "/rpc/failures/list",
            axum::routing::get(routes::failures_list),
        )
        // Service
        .route("/rpc/status", axum::routing::get(routes::status))
        .with_state(state)
        .layer(cors);

    let addr = format!("127.0.0.1:{}", port);
    log::info!("Auto-Reply Service listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind");

    axum::serve(listener, app).await.expect("Server error");
}
