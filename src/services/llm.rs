// LLM adapter: OpenAI-compatible chat completions, streaming with tool calls.
use crate::config::LlmModelConfig;
use crate::schemas::TokenUsage;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::warn;

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
const DEFAULT_DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
const DEFAULT_GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
const DEFAULT_MISTRAL_BASE_URL: &str = "https://api.mistral.ai/v1";
const DEFAULT_TOGETHER_BASE_URL: &str = "https://api.together.xyz/v1";
const DEFAULT_OLLAMA_BASE_URL: &str = "http://127.0.0.1:11434/v1";
const DEFAULT_LMSTUDIO_BASE_URL: &str = "http://127.0.0.1:1234/v1";
const DEFAULT_LLM_TIMEOUT_S: u64 = 180;
const MAX_STREAM_TOOL_CALLS: usize = 128;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::text("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text("user", content)
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Option<Value>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: Value::String(content.into()),
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: Value::String(content.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    fn text(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Value::String(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    pub content: String,
    pub reasoning: String,
    pub usage: Option<TokenUsage>,
    pub tool_calls: Option<Value>,
}

/// The model seam used by the orchestrator. [`LlmClient`] is the HTTP implementation.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Single non-streaming completion without tools.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<LlmResponse>;

    /// Streams one round, forwarding text deltas, and returns the drained result.
    async fn stream_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[Value],
        on_delta: &mut (dyn for<'d> FnMut(&'d str) + Send),
    ) -> Result<LlmResponse>;
}

#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    config: LlmModelConfig,
}

impl LlmClient {
    pub fn new(http: Client, config: LlmModelConfig) -> Self {
        Self { http, config }
    }

    fn endpoint(&self) -> String {
        let base = resolve_base_url(&self.config)
            .unwrap_or_else(|| DEFAULT_GROQ_BASE_URL.to_string());
        let base = base.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{base}/chat/completions")
        } else {
            format!("{base}/v1/chat/completions")
        }
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(api_key) = &self.config.api_key {
            if !api_key.trim().is_empty() {
                if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", api_key.trim())) {
                    headers.insert(AUTHORIZATION, value);
                }
            }
        }
        headers
    }

    pub fn build_payload(
        &self,
        messages: &[ChatMessage],
        stream: bool,
        include_usage: bool,
        tools: &[Value],
    ) -> Value {
        let temperature = round_f32(self.config.temperature.unwrap_or(0.7));
        let mut payload = json!({
            "model": self.config.model.clone().unwrap_or_else(|| "openai/gpt-oss-120b".to_string()),
            "messages": messages,
            "temperature": temperature,
            "stream": stream,
        });
        if stream && include_usage {
            payload["stream_options"] = json!({ "include_usage": true });
        }
        if let Some(max_output) = self.config.max_output {
            if max_output > 0 {
                payload["max_tokens"] = json!(max_output);
            }
        }
        if !tools.is_empty() {
            payload["tools"] = Value::Array(tools.to_vec());
            payload["tool_choice"] = json!("auto");
        }
        payload
    }
}

#[async_trait]
impl ChatModel for LlmClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<LlmResponse> {
        let response = self
            .http
            .post(self.endpoint())
            .headers(self.headers())
            .json(&self.build_payload(messages, false, false, &[]))
            .send()
            .await?;
        let status = response.status();
        let body_text = response.text().await.context("read llm response body")?;
        let body = match serde_json::from_str::<Value>(&body_text) {
            Ok(value) => value,
            Err(err) => {
                warn!(
                    "LLM response json parse failed: {err}, body={}",
                    truncate_text(&body_text, 2048)
                );
                Value::Null
            }
        };
        if !status.is_success() {
            let detail = if body == Value::Null {
                json!({ "raw": truncate_text(&body_text, 2048) })
            } else {
                body
            };
            return Err(anyhow!("LLM request failed: {status} {detail}"));
        }
        if body == Value::Null {
            return Err(anyhow!(
                "LLM response parse failed: {}",
                truncate_text(&body_text, 2048)
            ));
        }
        let message = body
            .get("choices")
            .and_then(|value| value.get(0))
            .and_then(|value| value.get("message"))
            .cloned()
            .unwrap_or(Value::Null);
        let content = message
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let reasoning = message
            .get("reasoning_content")
            .or_else(|| message.get("reasoning"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        Ok(LlmResponse {
            content,
            reasoning,
            usage: normalize_usage(body.get("usage")),
            tool_calls: message.get("tool_calls").cloned().filter(|v| !v.is_null()),
        })
    }

    async fn stream_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[Value],
        on_delta: &mut (dyn for<'d> FnMut(&'d str) + Send),
    ) -> Result<LlmResponse> {
        let mut include_usage = self.config.stream_include_usage.unwrap_or(true);
        let mut usage_fallback = include_usage;
        loop {
            let response = self
                .http
                .post(self.endpoint())
                .headers(self.headers())
                .json(&self.build_payload(messages, true, include_usage, tools))
                .send()
                .await?;
            let status = response.status();
            if !status.is_success() {
                let text = match response.text().await {
                    Ok(value) => value,
                    Err(err) => {
                        return Err(anyhow!(
                            "LLM stream request failed: {status} (read body failed: {err})"
                        ));
                    }
                };
                // Some providers reject stream_options; retry once without it.
                if usage_fallback && include_usage && matches!(status.as_u16(), 400 | 422) {
                    include_usage = false;
                    usage_fallback = false;
                    continue;
                }
                return Err(anyhow!(
                    "LLM stream request failed: {status} {}",
                    truncate_text(&text, 2048)
                ));
            }
            let mut stream = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();
            let mut state = StreamState::default();
            while let Some(item) = stream.next().await {
                let bytes = item.context("LLM stream interrupted")?;
                buffer.extend_from_slice(&bytes);
                while let Some(line) = take_line(&mut buffer) {
                    if let Some(delta) = state.feed_line(&line) {
                        on_delta(&delta);
                    }
                }
                if state.done {
                    break;
                }
            }
            if !state.done {
                let tail = String::from_utf8_lossy(&buffer).trim().to_string();
                if let Some(delta) = state.feed_line(&tail) {
                    on_delta(&delta);
                }
            }
            if !state.done {
                // A finish_reason without [DONE] is a complete round; anything else was cut off.
                if !state.finished {
                    return Err(anyhow!("LLM stream ended before completion"));
                }
                warn!("LLM stream ended without [DONE]");
            }
            return Ok(state.finish());
        }
    }
}

/// Pops one complete line off the raw byte buffer. Bytes are decoded only once
/// the line is whole, so a character split across network chunks survives.
fn take_line(buffer: &mut Vec<u8>) -> Option<String> {
    let pos = buffer.iter().position(|byte| *byte == b'\n')?;
    let line = buffer.drain(..=pos).collect::<Vec<_>>();
    Some(String::from_utf8_lossy(&line).trim().to_string())
}

/// Accumulates one streamed completion from `data:` lines.
#[derive(Debug, Default)]
struct StreamState {
    content: String,
    reasoning: String,
    usage: Option<TokenUsage>,
    tool_calls: Vec<StreamToolCall>,
    finished: bool,
    done: bool,
}

impl StreamState {
    /// Returns the content delta carried by the line, if any.
    fn feed_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() || !line.starts_with("data:") {
            return None;
        }
        let data = line.trim_start_matches("data:").trim();
        if data == "[DONE]" {
            self.done = true;
            return None;
        }
        let payload = match serde_json::from_str::<Value>(data) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(
                    "LLM stream json parse failed: {err}, data={}",
                    truncate_text(data, 512)
                );
                return None;
            }
        };
        if let Some(new_usage) = normalize_usage(payload.get("usage")) {
            self.usage = Some(new_usage);
        }
        let choice = payload
            .get("choices")
            .and_then(|value| value.get(0))
            .cloned()
            .unwrap_or(Value::Null);
        if choice
            .get("finish_reason")
            .and_then(Value::as_str)
            .is_some()
        {
            self.finished = true;
        }
        let delta = choice.get("delta").cloned().unwrap_or(Value::Null);
        update_stream_tool_calls(&mut self.tool_calls, &delta);
        let reasoning_delta = delta
            .get("reasoning_content")
            .or_else(|| delta.get("reasoning"))
            .and_then(Value::as_str)
            .unwrap_or("");
        self.reasoning.push_str(reasoning_delta);
        let content_delta = delta.get("content").and_then(Value::as_str).unwrap_or("");
        if content_delta.is_empty() {
            return None;
        }
        self.content.push_str(content_delta);
        Some(content_delta.to_string())
    }

    fn finish(self) -> LlmResponse {
        LlmResponse {
            tool_calls: finalize_stream_tool_calls(&self.tool_calls),
            content: self.content,
            reasoning: self.reasoning,
            usage: self.usage,
        }
    }
}

pub fn build_llm_client(config: &LlmModelConfig) -> Result<LlmClient> {
    let timeout = config.timeout_s.unwrap_or(DEFAULT_LLM_TIMEOUT_S).max(1);
    let http = Client::builder()
        .timeout(Duration::from_secs(timeout))
        .build()?;
    Ok(LlmClient::new(http, config.clone()))
}

pub fn is_llm_configured(config: &LlmModelConfig) -> bool {
    resolve_base_url(config)
        .map(|value| !value.trim().is_empty())
        .unwrap_or(false)
        && config
            .model
            .as_ref()
            .map(|value| !value.trim().is_empty())
            .unwrap_or(false)
}

pub fn normalize_provider(provider: Option<&str>) -> String {
    let raw = provider.unwrap_or("openai_compatible").trim();
    if raw.is_empty() {
        return "openai_compatible".to_string();
    }
    let normalized = raw.to_ascii_lowercase().replace(['-', ' '], "_");
    match normalized.as_str() {
        "openai_compat" => "openai_compatible".to_string(),
        "openai_native" => "openai".to_string(),
        "lm_studio" => "lmstudio".to_string(),
        other => other.to_string(),
    }
}

pub fn provider_default_base_url(provider: &str) -> Option<&'static str> {
    match provider {
        "openai" => Some(DEFAULT_OPENAI_BASE_URL),
        "openrouter" => Some(DEFAULT_OPENROUTER_BASE_URL),
        "deepseek" => Some(DEFAULT_DEEPSEEK_BASE_URL),
        "groq" => Some(DEFAULT_GROQ_BASE_URL),
        "mistral" => Some(DEFAULT_MISTRAL_BASE_URL),
        "together" => Some(DEFAULT_TOGETHER_BASE_URL),
        "ollama" => Some(DEFAULT_OLLAMA_BASE_URL),
        "lmstudio" => Some(DEFAULT_LMSTUDIO_BASE_URL),
        _ => None,
    }
}

fn resolve_base_url(config: &LlmModelConfig) -> Option<String> {
    let inline = config
        .base_url
        .as_deref()
        .map(|value| value.trim())
        .filter(|value| !value.is_empty());
    if let Some(value) = inline {
        return Some(value.to_string());
    }
    let provider = normalize_provider(config.provider.as_deref());
    provider_default_base_url(&provider).map(|value| value.to_string())
}

fn normalize_usage(raw: Option<&Value>) -> Option<TokenUsage> {
    let Value::Object(map) = raw? else {
        return None;
    };
    let to_u64 = |value: Option<&Value>| -> Option<u64> {
        match value {
            Some(Value::Number(num)) => num.as_u64(),
            Some(Value::String(text)) => text.trim().parse::<u64>().ok(),
            _ => None,
        }
    };
    let input = to_u64(map.get("input_tokens"))
        .or_else(|| to_u64(map.get("prompt_tokens")))
        .unwrap_or(0);
    let output = to_u64(map.get("output_tokens"))
        .or_else(|| to_u64(map.get("completion_tokens")))
        .unwrap_or(0);
    let total = to_u64(map.get("total_tokens")).unwrap_or(input + output);
    if input == 0 && output == 0 && total == 0 {
        return None;
    }
    Some(TokenUsage {
        input,
        output,
        total,
    })
}

#[derive(Debug, Default, Clone)]
struct StreamToolCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

fn update_stream_tool_calls(acc: &mut Vec<StreamToolCall>, delta: &Value) {
    let Some(Value::Array(items)) = delta.get("tool_calls") else {
        return;
    };
    for item in items {
        let Value::Object(map) = item else {
            continue;
        };
        let index = map.get("index").and_then(Value::as_u64).unwrap_or(0);
        let index = match usize::try_from(index) {
            Ok(index) if index < MAX_STREAM_TOOL_CALLS => index,
            _ => {
                warn!("LLM stream tool call index out of range: {index}");
                continue;
            }
        };
        while acc.len() <= index {
            acc.push(StreamToolCall::default());
        }
        let slot = &mut acc[index];
        if let Some(id) = map.get("id").and_then(Value::as_str) {
            slot.id = Some(id.to_string());
        }
        if let Some(Value::Object(function)) = map.get("function") {
            if let Some(name) = function.get("name").and_then(Value::as_str) {
                slot.name.push_str(name);
            }
            if let Some(arguments) = function.get("arguments").and_then(Value::as_str) {
                slot.arguments.push_str(arguments);
            }
        }
    }
}

fn finalize_stream_tool_calls(acc: &[StreamToolCall]) -> Option<Value> {
    let output = acc
        .iter()
        .filter(|call| !call.name.trim().is_empty())
        .map(|call| {
            let mut payload = json!({
                "type": "function",
                "function": {
                    "name": call.name,
                    "arguments": call.arguments,
                }
            });
            if let Some(id) = &call.id {
                payload["id"] = Value::String(id.clone());
            }
            payload
        })
        .collect::<Vec<_>>();
    if output.is_empty() {
        None
    } else {
        Some(Value::Array(output))
    }
}

fn round_f32(value: f32) -> f64 {
    const DECIMALS: i32 = 6;
    let factor = 10_f64.powi(DECIMALS);
    ((value as f64) * factor).round() / factor
}

pub(crate) fn truncate_text(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    let mut output = text[..end].to_string();
    output.push_str("...");
    output
}
