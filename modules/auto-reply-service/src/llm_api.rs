//! LLM gateway: reply generation behind one interface.
//!
//! Dispatches by provider to a per-provider adapter (Gemini REST, Anthropic
//! messages API). Each call is a single round trip with no internal retry;
//! transport and API failures surface to the calling pipeline as strings.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

pub const MAX_REPLY_TOKENS: u32 = 150;
pub const AI_TEMPERATURE: f64 = 0.7;
pub const AI_TOP_P: f64 = 0.95;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const CLAUDE_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

// =====================================================
// Provider Selection
// =====================================================

/// Closed set of supported model providers. The stored provider string is
/// parsed once per event; string comparisons never reach the adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Gemini,
    Claude,
}

impl LlmProvider {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "gemini" => Some(LlmProvider::Gemini),
            "claude" => Some(LlmProvider::Claude),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::Gemini => "gemini",
            LlmProvider::Claude => "claude",
        }
    }
}

// =====================================================
// Cost Calculation
// =====================================================

/// Pricing per million tokens: (provider, model, input, output).
const PRICING: [(LlmProvider, &str, f64, f64); 4] = [
    (LlmProvider::Gemini, "gemini-2.0-flash-exp", 0.0, 0.0),
    (LlmProvider::Gemini, "gemini-1.5-pro", 1.25, 5.0),
    (LlmProvider::Claude, "claude-3-5-sonnet-20241022", 3.0, 15.0),
    (LlmProvider::Claude, "claude-3-5-haiku-20241022", 1.0, 5.0),
];

/// Approximate USD cost of one generation. Unknown models cost 0 rather
/// than erroring; the figure feeds analytics, not billing.
pub fn cost_usd(provider: LlmProvider, model: &str, input_tokens: i64, output_tokens: i64) -> f64 {
    let Some(&(_, _, input_price, output_price)) = PRICING
        .iter()
        .find(|&&(p, m, _, _)| p == provider && m == model)
    else {
        return 0.0;
    };
    (input_tokens as f64 / 1_000_000.0) * input_price
        + (output_tokens as f64 / 1_000_000.0) * output_price
}

// =====================================================
// Gateway Interface
// =====================================================

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub prompt: String,
    pub system_prompt: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: system_prompt.into(),
            max_tokens: MAX_REPLY_TOKENS,
            temperature: AI_TEMPERATURE,
            top_p: AI_TOP_P,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeneratedReply {
    pub text: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
    pub cost_usd: f64,
    pub model: String,
    pub provider: LlmProvider,
}

/// Capability seam for reply generation. The pipeline holds this as a trait
/// object so tests can substitute a fake.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate_reply(
        &self,
        provider: LlmProvider,
        model: &str,
        api_key: &str,
        request: &GenerateRequest,
    ) -> Result<GeneratedReply, String>;
}

/// Real gateway over a shared HTTP client.
pub struct LlmGateway {
    client: Client,
}

impl LlmGateway {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ReplyGenerator for LlmGateway {
    async fn generate_reply(
        &self,
        provider: LlmProvider,
        model: &str,
        api_key: &str,
        request: &GenerateRequest,
    ) -> Result<GeneratedReply, String> {
        match provider {
            LlmProvider::Gemini => {
                GeminiClient::new(&self.client, api_key, model)
                    .generate(request)
                    .await
            }
            LlmProvider::Claude => {
                ClaudeClient::new(&self.client, api_key, model)
                    .generate(request)
                    .await
            }
        }
    }
}

// =====================================================
// Gemini Adapter
// =====================================================

#[derive(Debug, Serialize)]
struct GeminiGenerateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiSystemInstruction>,
    contents: Vec<GeminiContent>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiSystemInstruction {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Serialize)]
struct GeminiGenerationConfig {
    max_output_tokens: u32,
    temperature: f64,
    top_p: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerateResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<GeminiUsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiCandidateContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsageMetadata {
    #[serde(default)]
    prompt_token_count: i64,
    #[serde(default)]
    candidates_token_count: i64,
    #[serde(default)]
    total_token_count: i64,
}

struct GeminiClient<'a> {
    client: &'a Client,
    api_key: &'a str,
    model: &'a str,
}

impl<'a> GeminiClient<'a> {
    fn new(client: &'a Client, api_key: &'a str, model: &'a str) -> Self {
        Self {
            client,
            api_key,
            model,
        }
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<GeneratedReply, String> {
        let url = format!(
            "{}/models/{}:generateContent",
            GEMINI_API_BASE, self.model
        );

        let system_instruction = if request.system_prompt.is_empty() {
            None
        } else {
            Some(GeminiSystemInstruction {
                parts: vec![GeminiPart {
                    text: request.system_prompt.clone(),
                }],
            })
        };

        let body = GeminiGenerateRequest {
            system_instruction,
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart {
                    text: request.prompt.clone(),
                }],
            }],
            generation_config: GeminiGenerationConfig {
                max_output_tokens: request.max_tokens,
                temperature: request.temperature,
                top_p: request.top_p,
            },
        };

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key)])
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("Gemini API request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(format!("Gemini API error ({}): {}", status, error_text));
        }

        let data: GeminiGenerateResponse = response
            .json()
            .await
            .map_err(|e| format!("Failed to parse Gemini response: {}", e))?;

        let text: String = data
            .candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.iter().map(|p| p.text.as_str()).collect())
            .unwrap_or_default();

        if text.is_empty() {
            return Err("Gemini API returned no content".to_string());
        }

        let usage = data.usage_metadata.unwrap_or_default();
        let cost = cost_usd(
            LlmProvider::Gemini,
            self.model,
            usage.prompt_token_count,
            usage.candidates_token_count,
        );

        Ok(GeneratedReply {
            text,
            input_tokens: usage.prompt_token_count,
            output_tokens: usage.candidates_token_count,
            total_tokens: usage.total_token_count,
            cost_usd: cost,
            model: self.model.to_string(),
            provider: LlmProvider::Gemini,
        })
    }
}

// =====================================================
// Claude Adapter
// =====================================================

#[derive(Debug, Serialize)]
struct ClaudeGenerateRequest {
    model: String,
    max_tokens: u32,
    temperature: f64,
    top_p: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ClaudeMessage>,
}

#[derive(Debug, Serialize)]
struct ClaudeMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ClaudeGenerateResponse {
    #[serde(default)]
    content: Vec<ClaudeContentBlock>,
    usage: ClaudeUsage,
}

#[derive(Debug, Deserialize)]
struct ClaudeContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClaudeUsage {
    input_tokens: i64,
    output_tokens: i64,
}

#[derive(Debug, Deserialize)]
struct ClaudeErrorResponse {
    error: ClaudeError,
}

#[derive(Debug, Deserialize)]
struct ClaudeError {
    message: String,
}

struct ClaudeClient<'a> {
    client: &'a Client,
    api_key: &'a str,
    model: &'a str,
}

impl<'a> ClaudeClient<'a> {
    fn new(client: &'a Client, api_key: &'a str, model: &'a str) -> Self {
        Self {
            client,
            api_key,
            model,
        }
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<GeneratedReply, String> {
        let body = ClaudeGenerateRequest {
            model: self.model.to_string(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            top_p: request.top_p,
            system: if request.system_prompt.is_empty() {
                None
            } else {
                Some(request.system_prompt.clone())
            },
            messages: vec![ClaudeMessage {
                role: "user".to_string(),
                content: request.prompt.clone(),
            }],
        };

        let response = self
            .client
            .post(CLAUDE_API_URL)
            .header("x-api-key", self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("Claude API request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            if let Ok(parsed) = serde_json::from_str::<ClaudeErrorResponse>(&error_text) {
                return Err(format!("Claude API error: {}", parsed.error.message));
            }
            return Err(format!(
                "Claude API returned error status: {}, body: {}",
                status, error_text
            ));
        }

        let data: ClaudeGenerateResponse = response
            .json()
            .await
            .map_err(|e| format!("Failed to parse Claude response: {}", e))?;

        let text: String = data
            .content
            .iter()
            .filter(|c| c.block_type == "text")
            .filter_map(|c| c.text.clone())
            .collect();

        if text.is_empty() {
            return Err("Claude API returned no content".to_string());
        }

        let cost = cost_usd(
            LlmProvider::Claude,
            self.model,
            data.usage.input_tokens,
            data.usage.output_tokens,
        );

        Ok(GeneratedReply {
            text,
            input_tokens: data.usage.input_tokens,
            output_tokens: data.usage.output_tokens,
            total_tokens: data.usage.input_tokens + data.usage.output_tokens,
            cost_usd: cost,
            model: self.model.to_string(),
            provider: LlmProvider::Claude,
        })
    }
}
