//! Instagram Graph API client for reply dispatch.
//!
//! The pipeline only sends: a DM into a conversation, or a reply under a
//! comment. Wider platform coverage (profile, media, conversation listing)
//! is out of scope.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

const INSTAGRAM_API_BASE: &str = "https://graph.instagram.com/v20.0";
const FACEBOOK_API_BASE: &str = "https://graph.facebook.com/v20.0";

/// Id of the message or comment created by a dispatch call.
#[derive(Debug, Clone, Deserialize)]
pub struct SendReceipt {
    pub id: String,
}

/// Capability seam for platform dispatch. Access tokens are per-tenant and
/// passed per call.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    async fn send_direct_message(
        &self,
        access_token: &str,
        conversation_id: &str,
        text: &str,
    ) -> Result<SendReceipt, String>;

    async fn reply_to_comment(
        &self,
        access_token: &str,
        comment_id: &str,
        text: &str,
    ) -> Result<SendReceipt, String>;
}

pub struct InstagramApi {
    client: Client,
}

impl InstagramApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn post_with_message(
        &self,
        url: &str,
        access_token: &str,
        text: &str,
    ) -> Result<SendReceipt, String> {
        let response = self
            .client
            .post(url)
            .query(&[("message", text), ("access_token", access_token)])
            .send()
            .await
            .map_err(|e| format!("Instagram API request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("Instagram API error ({}): {}", status, body));
        }

        response
            .json()
            .await
            .map_err(|e| format!("Failed to parse Instagram response: {}", e))
    }
}

#[async_trait]
impl PlatformClient for InstagramApi {
    /// Send a DM into a conversation. Conversations live on the Facebook
    /// graph even for Instagram messaging.
    async fn send_direct_message(
        &self,
        access_token: &str,
        conversation_id: &str,
        text: &str,
    ) -> Result<SendReceipt, String> {
        let url = format!("{}/{}/messages", FACEBOOK_API_BASE, conversation_id);
        self.post_with_message(&url, access_token, text).await
    }

    async fn reply_to_comment(
        &self,
        access_token: &str,
        comment_id: &str,
        text: &str,
    ) -> Result<SendReceipt, String> {
        let url = format!("{}/{}/replies", INSTAGRAM_API_BASE, comment_id);
        self.post_with_message(&url, access_token, text).await
    }
}
