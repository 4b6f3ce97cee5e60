//! Axum route handlers: the Instagram webhook endpoint plus the RPC API
//! used by the dashboard.

use crate::db::Db;
use crate::events::WebhookPayload;
use crate::handlers::Pipeline;
use crate::signature;
use auto_reply_types::*;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

pub struct AppState {
    pub db: Arc<Db>,
    pub pipeline: Arc<Pipeline>,
    pub verify_token: Option<String>,
    pub app_secret: Option<String>,
    pub start_time: Instant,
}

// =====================================================
// Webhook Endpoints
// =====================================================

// GET /webhooks/instagram — subscription verification handshake
pub async fn webhook_verify(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let mode = params.get("hub.mode").map(String::as_str);
    let token = params.get("hub.verify_token").map(String::as_str);
    let challenge = params.get("hub.challenge");

    if let (Some(expected), Some("subscribe"), Some(token), Some(challenge)) =
        (state.verify_token.as_deref(), mode, token, challenge)
    {
        if token == expected {
            log::info!("[WEBHOOK] Subscription verified");
            return (StatusCode::OK, challenge.clone()).into_response();
        }
    }

    (
        StatusCode::FORBIDDEN,
        Json(json!({"error": "Verification failed"})),
    )
        .into_response()
}

// POST /webhooks/instagram — event delivery
//
// Signature is checked over the raw body bytes before anything is parsed.
// Once a delivery is accepted, per-event failures stay internal: the
// platform always sees 200 so it does not re-deliver in a retry storm.
pub async fn webhook_receive(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(app_secret) = state.app_secret.as_deref() else {
        log::error!("[WEBHOOK] App secret not configured — rejecting delivery");
        return (
            StatusCode::FORBIDDEN,
            Json(json!({"error": "Webhook not configured"})),
        )
            .into_response();
    };

    let signature_header = headers
        .get(signature::SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !signature::verify_signature(&body, signature_header, app_secret.as_bytes()) {
        log::error!("[WEBHOOK] Invalid webhook signature");
        return (
            StatusCode::FORBIDDEN,
            Json(json!({"error": "Invalid signature"})),
        )
            .into_response();
    }

    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            log::warn!("[WEBHOOK] Unparseable payload: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "Malformed payload"})),
            )
                .into_response();
        }
    };

    state.pipeline.process_payload(&payload).await;

    (StatusCode::OK, Json(json!({"success": true}))).into_response()
}

// =====================================================
// Account Endpoints
// =====================================================

// POST /rpc/accounts/link
pub async fn accounts_link(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LinkAccountRequest>,
) -> (StatusCode, Json<RpcResponse<LinkedAccount>>) {
    match state
        .db
        .upsert_account(&req.ig_account_id, &req.ig_username, &req.ig_access_token)
    {
        Ok(account) => (StatusCode::OK, Json(RpcResponse::ok(account))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(RpcResponse::err(format!("Failed to link account: {}", e))),
        ),
    }
}

// GET /rpc/accounts/list
pub async fn accounts_list(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<RpcResponse<Vec<LinkedAccount>>>) {
    match state.db.list_accounts() {
        Ok(entries) => (StatusCode::OK, Json(RpcResponse::ok(entries))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(RpcResponse::err(format!("Failed to list: {}", e))),
        ),
    }
}

// =====================================================
// Config Endpoints
// =====================================================

// POST /rpc/configs/upsert
pub async fn configs_upsert(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UpsertConfigRequest>,
) -> (StatusCode, Json<RpcResponse<AutomationConfig>>) {
    match state.db.upsert_config(&req) {
        Ok(Some(config)) => (StatusCode::OK, Json(RpcResponse::ok(config))),
        Ok(None) => (
            StatusCode::BAD_REQUEST,
            Json(RpcResponse::err(format!(
                "Account {} is not linked",
                req.ig_account_id
            ))),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(RpcResponse::err(format!("Failed to save config: {}", e))),
        ),
    }
}

// GET /rpc/configs/list
pub async fn configs_list(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<RpcResponse<Vec<AutomationConfig>>>) {
    match state.db.list_configs() {
        Ok(entries) => (StatusCode::OK, Json(RpcResponse::ok(entries))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(RpcResponse::err(format!("Failed to list: {}", e))),
        ),
    }
}

// =====================================================
// Post Rule Endpoints
// =====================================================

// POST /rpc/posts/rules/upsert
pub async fn post_rules_upsert(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UpsertPostRuleRequest>,
) -> (StatusCode, Json<RpcResponse<PostRule>>) {
    match state.db.upsert_post_rule(&req) {
        Ok(rule) => (StatusCode::OK, Json(RpcResponse::ok(rule))),
        Err(e) => {
            let msg = if e.to_string().contains("FOREIGN KEY constraint") {
                format!("Config #{} not found", req.config_id)
            } else {
                format!("Failed to save post rule: {}", e)
            };
            (StatusCode::BAD_REQUEST, Json(RpcResponse::err(msg)))
        }
    }
}

// GET /rpc/posts/rules/list
pub async fn post_rules_list(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<RpcResponse<Vec<PostRule>>>) {
    match state.db.list_post_rules() {
        Ok(entries) => (StatusCode::OK, Json(RpcResponse::ok(entries))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(RpcResponse::err(format!("Failed to list: {}", e))),
        ),
    }
}

// =====================================================
// Message Log Endpoints
// =====================================================

// POST /rpc/messages/query
pub async fn messages_query(
    State(state): State<Arc<AppState>>,
    Json(filter): Json<MessageFilter>,
) -> (StatusCode, Json<RpcResponse<MessagePage>>) {
    let limit = filter.limit.unwrap_or(20).min(100);
    let offset = filter.offset.unwrap_or(0);
    match state.db.query_messages(&filter) {
        Ok((messages, total)) => (
            StatusCode::OK,
            Json(RpcResponse::ok(MessagePage {
                messages,
                total,
                limit,
                offset,
            })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(RpcResponse::err(format!("Query failed: {}", e))),
        ),
    }
}

// =====================================================
// Analytics Endpoints
// =====================================================

// POST /rpc/analytics/query
pub async fn analytics_query(
    State(state): State<Arc<AppState>>,
    Json(query): Json<AnalyticsQuery>,
) -> (StatusCode, Json<RpcResponse<AnalyticsReport>>) {
    let daily = match state.db.query_analytics(
        query.config_id,
        query.since.as_deref(),
        query.until.as_deref(),
    ) {
        Ok(rows) => rows,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(RpcResponse::err(format!("Query failed: {}", e))),
            )
        }
    };

    let mut summary = AnalyticsSummary::default();
    for day in &daily {
        summary.total_dms += day.dm_received;
        summary.total_comments += day.comments_received;
        summary.total_auto_replies += day.dm_auto_replied + day.comments_auto_replied;
        summary.total_cost_usd += day.ai_api_cost_usd;
    }

    (
        StatusCode::OK,
        Json(RpcResponse::ok(AnalyticsReport { daily, summary })),
    )
}

// =====================================================
// Dead-Letter Endpoints
// =====================================================

// GET /rpc/failures/list
pub async fn failures_list(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<RpcResponse<Vec<DeliveryFailure>>>) {
    match state.db.list_failures(100) {
        Ok(entries) => (StatusCode::OK, Json(RpcResponse::ok(entries))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(RpcResponse::err(format!("Failed to list: {}", e))),
        ),
    }
}

// =====================================================
// Service Endpoints
// =====================================================

// GET /rpc/status
pub async fn status(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<RpcResponse<ServiceStatus>>) {
    let (linked_accounts, active_configs, messages_processed, replies_sent, delivery_failures) =
        state.db.status_counts().unwrap_or((0, 0, 0, 0, 0));

    let status = ServiceStatus {
        running: true,
        uptime_secs: state.start_time.elapsed().as_secs(),
        linked_accounts,
        active_configs,
        messages_processed,
        replies_sent,
        delivery_failures,
    };

    (StatusCode::OK, Json(RpcResponse::ok(status)))
}
