//! Event pipelines: one per event kind, terminal on the first failing guard.
//!
//! Skips (no config, duplicate, keyword miss) are routine routing outcomes
//! and only logged. Step failures after acceptance (generation, dispatch,
//! persistence, analytics) are logged and dead-lettered; they never affect
//! the webhook response, and a failure on event N leaves event N+1
//! untouched.

use crate::db::{Db, EventKind, InsertOutcome, NewProcessedMessage, ResolvedTenant};
use crate::events::{classify, ClassifiedEvent, CommentEvent, DmEvent, WebhookPayload};
use crate::instagram_api::PlatformClient;
use crate::keywords::matches_keywords;
use crate::llm_api::{GenerateRequest, GeneratedReply, LlmProvider, ReplyGenerator};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Date key for the daily analytics rollup.
fn today() -> String {
    chrono::Utc::now().format("%Y-%m-%d").to_string()
}

// =====================================================
// Error Taxonomy
// =====================================================

#[derive(Debug)]
pub enum PipelineError {
    UnsupportedProvider(String),
    Generation(String),
    Dispatch(String),
    Store {
        stage: &'static str,
        message: String,
    },
}

impl PipelineError {
    fn store(stage: &'static str) -> impl FnOnce(rusqlite::Error) -> PipelineError {
        move |e| PipelineError::Store {
            stage,
            message: e.to_string(),
        }
    }

    /// Pipeline stage recorded in the dead-letter log.
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::UnsupportedProvider(_) | PipelineError::Generation(_) => "generate",
            PipelineError::Dispatch(_) => "dispatch",
            PipelineError::Store { stage, .. } => stage,
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::UnsupportedProvider(provider) => {
                write!(f, "Unsupported LLM provider: {}", provider)
            }
            PipelineError::Generation(msg) => write!(f, "Reply generation failed: {}", msg),
            PipelineError::Dispatch(msg) => write!(f, "Reply dispatch failed: {}", msg),
            PipelineError::Store { message, .. } => write!(f, "Store error: {}", message),
        }
    }
}

/// How one event left the pipeline.
#[derive(Debug)]
enum Disposition {
    Replied { elapsed_ms: i64 },
    Skipped(&'static str),
}

// =====================================================
// Pipeline
// =====================================================

/// All pipeline dependencies, injected at construction so tests can swap
/// fakes in behind the trait seams.
pub struct Pipeline {
    db: Arc<Db>,
    llm: Arc<dyn ReplyGenerator>,
    platform: Arc<dyn PlatformClient>,
}

impl Pipeline {
    pub fn new(
        db: Arc<Db>,
        llm: Arc<dyn ReplyGenerator>,
        platform: Arc<dyn PlatformClient>,
    ) -> Self {
        Self { db, llm, platform }
    }

    /// Process every event of a verified delivery, sequentially in payload
    /// order. Never fails: the caller acknowledges the webhook regardless.
    pub async fn process_payload(&self, payload: &WebhookPayload) {
        for event in classify(payload) {
            let result = match &event {
                ClassifiedEvent::Dm(e) => self.handle_dm(e).await,
                ClassifiedEvent::Comment(e) => self.handle_comment(e).await,
            };

            match result {
                Ok(Disposition::Replied { elapsed_ms }) => {
                    log::info!(
                        "[AUTO_REPLY] {} {} auto-replied in {}ms",
                        event.kind(),
                        event.external_id(),
                        elapsed_ms
                    );
                }
                Ok(Disposition::Skipped(reason)) => {
                    log::debug!(
                        "[AUTO_REPLY] {} {} skipped: {}",
                        event.kind(),
                        event.external_id(),
                        reason
                    );
                }
                Err(err) => {
                    log::error!(
                        "[AUTO_REPLY] {} {} failed at {}: {}",
                        event.kind(),
                        event.external_id(),
                        err.stage(),
                        err
                    );
                    if let Err(e) = self.db.insert_delivery_failure(
                        event.external_id(),
                        event.kind(),
                        err.stage(),
                        &err.to_string(),
                    ) {
                        log::warn!("[AUTO_REPLY] Could not record delivery failure: {}", e);
                    }
                }
            }
        }
    }

    async fn generate(
        &self,
        tenant: &ResolvedTenant,
        prompt: &str,
    ) -> Result<GeneratedReply, PipelineError> {
        let provider = LlmProvider::parse(&tenant.llm_provider)
            .ok_or_else(|| PipelineError::UnsupportedProvider(tenant.llm_provider.clone()))?;
        let request = GenerateRequest::new(prompt, tenant.system_prompt.clone());
        self.llm
            .generate_reply(provider, &tenant.llm_model, &tenant.llm_api_key, &request)
            .await
            .map_err(PipelineError::Generation)
    }

    async fn handle_dm(&self, event: &DmEvent) -> Result<Disposition, PipelineError> {
        let started = Instant::now();

        let Some(tenant) = self
            .db
            .resolve_dm_config(&event.recipient_id)
            .map_err(PipelineError::store("store"))?
        else {
            return Ok(Disposition::Skipped("no active config"));
        };

        if self
            .db
            .is_event_processed(&event.message_id)
            .map_err(PipelineError::store("store"))?
        {
            return Ok(Disposition::Skipped("already processed"));
        }

        let reply = self.generate(&tenant, &event.text).await?;

        // Deterministic thread key; the platform is never asked for one.
        let conversation_id = format!("{}_{}", event.sender_id, tenant.ig_account_id);
        self.platform
            .send_direct_message(&tenant.ig_access_token, &conversation_id, &reply.text)
            .await
            .map_err(PipelineError::Dispatch)?;

        let elapsed_ms = started.elapsed().as_millis() as i64;
        let outcome = self
            .db
            .insert_processed_message(&NewProcessedMessage {
                automation_config_id: tenant.config_id,
                ig_message_id: &event.message_id,
                message_type: "dm",
                sender_id: &event.sender_id,
                sender_username: None,
                content: &event.text,
                post_id: None,
                comment_id: None,
                conversation_id: Some(&conversation_id),
                auto_reply_content: &reply.text,
                ai_model_used: &reply.model,
                processing_time_ms: elapsed_ms,
            })
            .map_err(PipelineError::store("persist"))?;

        if outcome == InsertOutcome::Duplicate {
            // A concurrent delivery won the insert race after our dedup
            // check; it also owns the analytics increment.
            return Ok(Disposition::Skipped("already processed"));
        }

        self.db
            .record_event(tenant.config_id, &today(), EventKind::Dm, reply.cost_usd)
            .map_err(PipelineError::store("analytics"))?;

        Ok(Disposition::Replied { elapsed_ms })
    }

    async fn handle_comment(&self, event: &CommentEvent) -> Result<Disposition, PipelineError> {
        let started = Instant::now();

        let Some((rule, tenant)) = self
            .db
            .resolve_post_rule(&event.post_id)
            .map_err(PipelineError::store("store"))?
        else {
            return Ok(Disposition::Skipped("no active post rule"));
        };

        if !tenant.comment_auto_reply_enabled {
            return Ok(Disposition::Skipped("comment auto-reply disabled"));
        }

        if !rule.reply_to_all_comments
            && !matches_keywords(&event.text, &rule.keyword_triggers)
        {
            return Ok(Disposition::Skipped("no keyword match"));
        }

        if self
            .db
            .is_event_processed(&event.comment_id)
            .map_err(PipelineError::store("store"))?
        {
            return Ok(Disposition::Skipped("already processed"));
        }

        let reply = self.generate(&tenant, &event.text).await?;

        self.platform
            .reply_to_comment(&tenant.ig_access_token, &event.comment_id, &reply.text)
            .await
            .map_err(PipelineError::Dispatch)?;

        let elapsed_ms = started.elapsed().as_millis() as i64;
        let outcome = self
            .db
            .insert_processed_message(&NewProcessedMessage {
                automation_config_id: tenant.config_id,
                ig_message_id: &event.comment_id,
                message_type: "comment",
                sender_id: &event.sender_id,
                sender_username: event.sender_username.as_deref(),
                content: &event.text,
                post_id: Some(&event.post_id),
                comment_id: Some(&event.comment_id),
                conversation_id: None,
                auto_reply_content: &reply.text,
                ai_model_used: &reply.model,
                processing_time_ms: elapsed_ms,
            })
            .map_err(PipelineError::store("persist"))?;

        if outcome == InsertOutcome::Duplicate {
            return Ok(Disposition::Skipped("already processed"));
        }

        self.db
            .record_event(
                tenant.config_id,
                &today(),
                EventKind::Comment,
                reply.cost_usd,
            )
            .map_err(PipelineError::store("analytics"))?;

        Ok(Disposition::Replied { elapsed_ms })
    }
}
