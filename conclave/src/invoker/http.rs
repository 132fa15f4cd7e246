//! HTTP invoker — OpenAI-compatible chat-completions transport.
//!
//! Model, endpoint, and sampling parameters come from each Archon's
//! profile `llm_config`; nothing here is hard-coded to a provider.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::archon::{ArchonProfileRepository, LlmConfig};
use crate::voting::adjudication::{DeliberatorKind, DeliberatorResult, WitnessAdjudication};
use crate::voting::VotePayload;

use super::{AgentInvoker, InvokerError, InvokerResponse};

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_ctx: Option<u32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// Invoker backed by an OpenAI-compatible `/chat/completions` endpoint
/// per Archon profile.
pub struct HttpAgentInvoker {
    client: reqwest::Client,
    profiles: Arc<dyn ArchonProfileRepository>,
}

impl HttpAgentInvoker {
    pub fn new(profiles: Arc<dyn ArchonProfileRepository>) -> Self {
        Self {
            client: reqwest::Client::new(),
            profiles,
        }
    }

    async fn chat(
        &self,
        llm: &LlmConfig,
        system_prompt: &str,
        user_prompt: &str,
        timeout: Duration,
    ) -> Result<InvokerResponse, InvokerError> {
        let url = format!("{}/chat/completions", llm.base_url.trim_end_matches('/'));
        let request = ChatRequest {
            model: &llm.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            temperature: llm.temperature,
            max_tokens: llm.max_tokens,
            num_ctx: llm.num_ctx,
        };

        let started = Instant::now();
        let send = self.client.post(&url).json(&request).send();
        let response = tokio::time::timeout(timeout, send)
            .await
            .map_err(|_| InvokerError::Timeout(timeout))?
            .map_err(|e| InvokerError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(InvokerError::Provider {
                status: status.as_u16(),
                detail,
            });
        }

        let body: ChatResponse = tokio::time::timeout(timeout, response.json())
            .await
            .map_err(|_| InvokerError::Timeout(timeout))?
            .map_err(|e| InvokerError::Malformed(e.to_string()))?;

        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(InvokerError::EmptyReply)?;

        let latency_ms = started.elapsed().as_millis() as u64;
        debug!(model = %llm.model, latency_ms, "chat completion served");

        let mut response = InvokerResponse::new(&content, latency_ms);
        response
            .metadata
            .insert("model".to_string(), llm.model.clone());
        response
            .metadata
            .insert("provider".to_string(), llm.provider.clone());
        Ok(response)
    }

    fn deliberator_prompt(kind: DeliberatorKind, payload: &VotePayload) -> String {
        let task = match kind {
            DeliberatorKind::TextAnalysis => {
                "Read the raw ballot below as prose and determine the voter's choice. \
                 Reply with a single JSON object: {\"vote_choice\": \"AYE\"|\"NAY\"|\"ABSTAIN\", \
                 \"confidence\": 0.0-1.0, \"reasoning_summary\": \"...\", \"ambiguity_flags\": [...]}"
            }
            DeliberatorKind::JsonValidation => {
                "Check the raw ballot below for structural validity against the motion. \
                 Reply with a single JSON object: {\"vote_choice\": \"AYE\"|\"NAY\"|\"ABSTAIN\", \
                 \"structural_valid\": true|false, \"contradictions\": [...], \
                 \"motion_alignment\": true|false}"
            }
            DeliberatorKind::WitnessConfirm => {
                "Independently confirm the voter's intent from the raw ballot below. \
                 Reply with a single JSON object: {\"vote_choice\": \"AYE\"|\"NAY\"|\"ABSTAIN\", \
                 \"intent_clear\": true|false}"
            }
        };
        format!(
            "{task}\n\nMotion: {title}\n{text}\n\nRaw ballot from {archon}:\n{ballot}",
            title = payload.motion_title,
            text = payload.motion_text,
            archon = payload.archon_id,
            ballot = payload.raw_content,
        )
    }
}

#[async_trait]
impl AgentInvoker for HttpAgentInvoker {
    async fn invoke(
        &self,
        archon_id: &str,
        prompt: &str,
        timeout: Duration,
    ) -> Result<InvokerResponse, InvokerError> {
        let profile = self
            .profiles
            .get(archon_id)
            .map_err(|_| InvokerError::UnknownArchon(archon_id.to_string()))?;
        self.chat(&profile.llm_config, &profile.system_prompt, prompt, timeout)
            .await
    }

    async fn execute_validation_task(
        &self,
        kind: DeliberatorKind,
        validator_archon_id: &str,
        payload: &VotePayload,
    ) -> Result<DeliberatorResult, InvokerError> {
        let profile = self
            .profiles
            .get(validator_archon_id)
            .map_err(|_| InvokerError::UnknownArchon(validator_archon_id.to_string()))?;
        let prompt = Self::deliberator_prompt(kind, payload);
        let response = self
            .chat(
                &profile.llm_config,
                &profile.system_prompt,
                &prompt,
                Duration::from_secs(60),
            )
            .await?;
        Ok(DeliberatorResult::from_model_output(
            kind,
            &response.raw_content,
        ))
    }

    async fn execute_witness_adjudication(
        &self,
        witness_archon_id: &str,
        payload: &VotePayload,
        deliberations: &[DeliberatorResult],
    ) -> Result<WitnessAdjudication, InvokerError> {
        let profile = self
            .profiles
            .get(witness_archon_id)
            .map_err(|_| InvokerError::UnknownArchon(witness_archon_id.to_string()))?;
        let deliberations_json = serde_json::to_string_pretty(deliberations)
            .map_err(|e| InvokerError::Malformed(e.to_string()))?;
        let prompt = format!(
            "Three deliberators reviewed the ballot below. Issue your adjudication as a \
             single JSON object: {{\"final_vote\": \"AYE\"|\"NAY\"|\"ABSTAIN\", \
             \"retort\": true|false, \"retort_reason\": \"...\", \
             \"witness_statement\": \"...\"}}\n\n\
             Motion: {title}\n\nRaw ballot from {archon}:\n{ballot}\n\n\
             Deliberator results:\n{deliberations_json}",
            title = payload.motion_title,
            archon = payload.archon_id,
            ballot = payload.raw_content,
        );
        let response = self
            .chat(
                &profile.llm_config,
                &profile.system_prompt,
                &prompt,
                Duration::from_secs(60),
            )
            .await?;
        WitnessAdjudication::from_model_output(&response.raw_content)
            .ok_or_else(|| InvokerError::Malformed("no adjudication JSON in reply".to_string()))
    }
}
