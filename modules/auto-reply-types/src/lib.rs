//! Shared types for the auto-reply service and its RPC clients.

use serde::{Deserialize, Serialize};

// =====================================================
// Domain Types
// =====================================================

/// A linked Instagram business account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkedAccount {
    pub id: i64,
    pub ig_account_id: String,
    pub ig_username: String,
    pub ig_access_token: String,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Automation configuration for one linked account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationConfig {
    pub id: i64,
    pub instagram_account_id: i64,
    pub llm_provider: String,
    pub llm_model: String,
    pub llm_api_key: String,
    pub system_prompt: String,
    pub dm_auto_reply_enabled: bool,
    pub comment_auto_reply_enabled: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Per-post automation rule. No row for a post means automation is off
/// for that post.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostRule {
    pub id: i64,
    pub automation_config_id: i64,
    pub instagram_post_id: String,
    pub is_enabled: bool,
    pub keyword_triggers: Vec<String>,
    pub reply_to_all_comments: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// One handled webhook event (DM or comment), keyed by the
/// platform-assigned message/comment id for deduplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedMessage {
    pub id: i64,
    pub automation_config_id: i64,
    pub ig_message_id: String,
    pub message_type: String,
    pub sender_id: String,
    pub sender_username: Option<String>,
    pub content: String,
    pub post_id: Option<String>,
    pub comment_id: Option<String>,
    pub conversation_id: Option<String>,
    pub auto_reply_sent: bool,
    pub auto_reply_content: Option<String>,
    pub ai_model_used: Option<String>,
    pub processing_time_ms: Option<i64>,
    pub created_at: String,
}

/// Daily per-config analytics rollup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyAnalytics {
    pub id: i64,
    pub automation_config_id: i64,
    pub date: String,
    pub dm_received: i64,
    pub dm_auto_replied: i64,
    pub comments_received: i64,
    pub comments_auto_replied: i64,
    pub ai_api_calls: i64,
    pub ai_api_cost_usd: f64,
}

/// Dead-letter record for an event whose reply pipeline failed partway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryFailure {
    pub id: i64,
    pub ig_event_id: String,
    pub event_type: String,
    pub stage: String,
    pub error: String,
    pub created_at: String,
}

// =====================================================
// Filter / Query Types
// =====================================================

/// Filters for querying the processed-message log
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct MessageFilter {
    pub config_id: Option<i64>,
    pub message_type: Option<String>,
    pub since: Option<String>,
    pub until: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Date-range query for the daily analytics rollup
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AnalyticsQuery {
    pub config_id: i64,
    pub since: Option<String>,
    pub until: Option<String>,
}

// =====================================================
// RPC Request Types
// =====================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct LinkAccountRequest {
    pub ig_account_id: String,
    pub ig_username: String,
    pub ig_access_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpsertConfigRequest {
    pub ig_account_id: String,
    pub llm_provider: String,
    pub llm_model: String,
    pub llm_api_key: String,
    pub system_prompt: String,
    pub dm_auto_reply_enabled: bool,
    pub comment_auto_reply_enabled: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpsertPostRuleRequest {
    pub config_id: i64,
    pub instagram_post_id: String,
    pub is_enabled: bool,
    #[serde(default)]
    pub keyword_triggers: Vec<String>,
    #[serde(default)]
    pub reply_to_all_comments: bool,
}

// =====================================================
// RPC Response Types
// =====================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct RpcResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> RpcResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// One page of the processed-message log
#[derive(Debug, Serialize, Deserialize)]
pub struct MessagePage {
    pub messages: Vec<ProcessedMessage>,
    pub total: i64,
    pub limit: usize,
    pub offset: usize,
}

/// Totals over a queried analytics range
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AnalyticsSummary {
    pub total_dms: i64,
    pub total_comments: i64,
    pub total_auto_replies: i64,
    pub total_cost_usd: f64,
}

/// Daily rows plus range totals
#[derive(Debug, Serialize, Deserialize)]
pub struct AnalyticsReport {
    pub daily: Vec<DailyAnalytics>,
    pub summary: AnalyticsSummary,
}

// =====================================================
// Service Status
// =====================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub running: bool,
    pub uptime_secs: u64,
    pub linked_accounts: i64,
    pub active_configs: i64,
    pub messages_processed: i64,
    pub replies_sent: i64,
    pub delivery_failures: i64,
}
