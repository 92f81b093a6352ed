//! Language model abstraction and the providers the pipeline can talk to.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::sleep;

use crate::config::ModelConfig;
use crate::error::{MeetprepError, Result};
use crate::message::{Message, Role, ToolCall};
use crate::tool::ToolDescription;

/// Result of a chat completion request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelCompletion {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CompletionOptions {
    pub temperature: Option<f32>,
}

impl CompletionOptions {
    pub fn with_temperature(temperature: f32) -> Self {
        Self {
            temperature: Some(temperature.clamp(0.0, 2.0)),
        }
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete_chat(
        &self,
        messages: &[Message],
        tools: &[ToolDescription],
        options: CompletionOptions,
    ) -> Result<ModelCompletion>;
}

/// Build the configured provider, wrapped in the retry policy.
pub fn build_model(cfg: &ModelConfig) -> Result<Arc<dyn LanguageModel>> {
    let retry = RetryPolicy {
        max_retries: cfg.max_retries,
        backoff: Duration::from_millis(500),
    };
    match cfg.provider.to_ascii_lowercase().as_str() {
        "openai" => Ok(Arc::new(RetryingModel::new(
            OpenAIClient::from_config(cfg)?,
            retry,
        ))),
        "stub" => Ok(StubModel::new(Vec::new()).with_fallback(
            "{\"action\":\"respond\",\"content\":\"(stub model) no language model configured\"}",
        )),
        other => Err(MeetprepError::Config(format!(
            "unsupported model provider `{other}`"
        ))),
    }
}

fn coalesce_error(status: reqwest::StatusCode, body: &str, provider: &str) -> MeetprepError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return MeetprepError::ModelUnavailable(format!("{provider} rate limit exceeded: {body}"));
    }
    if status.is_server_error() {
        return MeetprepError::ModelUnavailable(format!("{provider} request failed with {status}: {body}"));
    }
    MeetprepError::LanguageModel(format!("{provider} request failed with {status}: {body}"))
}

#[derive(Clone)]
pub struct OpenAIClient {
    http: reqwest::Client,
    model: String,
    api_key: String,
    base_url: String,
    organization: Option<String>,
    default_temperature: f32,
}

impl OpenAIClient {
    pub fn from_config(cfg: &ModelConfig) -> Result<Self> {
        let api_key = cfg
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| MeetprepError::Config("missing OPENAI_API_KEY".into()))?;
        let base_url = cfg
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(cfg.timeout_secs))
                .build()
                .map_err(|err| MeetprepError::LanguageModel(format!("http client error: {err}")))?,
            model: cfg.model.clone(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            organization: cfg.organization.clone(),
            default_temperature: cfg.temperature.clamp(0.0, 1.0),
        })
    }

    fn to_openai_messages(&self, messages: &[Message]) -> Vec<OpenAiMessage> {
        messages
            .iter()
            .map(|message| {
                let role = match message.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::Tool => "tool",
                }
                .to_string();

                let tool_calls = if message.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        message
                            .tool_calls
                            .iter()
                            .map(|call| OpenAiToolCall {
                                id: call.id.clone(),
                                r#type: "function".to_string(),
                                function: OpenAiFunctionCall {
                                    name: call.name.clone(),
                                    arguments: call.arguments.to_string(),
                                },
                            })
                            .collect(),
                    )
                };

                let content = match (&message.tool_result, message.content.is_empty()) {
                    (Some(result), _) => Some(result.output.to_string()),
                    (None, true) if tool_calls.is_some() => None,
                    (None, _) => Some(message.content.clone()),
                };

                OpenAiMessage {
                    role,
                    content,
                    tool_call_id: message
                        .tool_result
                        .as_ref()
                        .and_then(|result| result.tool_call_id.clone()),
                    tool_calls,
                }
            })
            .collect()
    }

    fn to_openai_tools(&self, tools: &[ToolDescription]) -> Option<Vec<OpenAiTool>> {
        if tools.is_empty() {
            return None;
        }
        Some(
            tools
                .iter()
                .map(|tool| OpenAiTool {
                    r#type: "function".to_string(),
                    function: OpenAiFunction {
                        name: tool.name.clone(),
                        description: Some(tool.description.clone()),
                        parameters: tool
                            .parameters
                            .clone()
                            .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
                    },
                })
                .collect(),
        )
    }
}

#[async_trait]
impl LanguageModel for OpenAIClient {
    async fn complete_chat(
        &self,
        messages: &[Message],
        tools: &[ToolDescription],
        options: CompletionOptions,
    ) -> Result<ModelCompletion> {
        let mut payload = json!({
            "model": self.model,
            "messages": self.to_openai_messages(messages),
            "temperature": options.temperature.unwrap_or(self.default_temperature),
        });
        if let Some(tools) = self.to_openai_tools(tools) {
            payload["tools"] = json!(tools);
            payload["tool_choice"] = json!("auto");
        }

        let mut builder = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key);
        if let Some(org) = &self.organization {
            builder = builder.header("OpenAI-Organization", org);
        }
        let resp = builder
            .json(&payload)
            .send()
            .await
            .map_err(|err| MeetprepError::ModelUnavailable(format!("OpenAI request error: {err}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(coalesce_error(status, &body, "openai"));
        }

        let body: OpenAiResponse = resp.json().await.map_err(|err| {
            MeetprepError::LanguageModel(format!("OpenAI response parse error: {err}"))
        })?;

        let first = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| MeetprepError::LanguageModel("OpenAI returned no choices".into()))?;

        let tool_calls = first
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| {
                let arguments = serde_json::from_str(&call.function.arguments)
                    .unwrap_or_else(|_| Value::String(call.function.arguments.clone()));
                ToolCall {
                    id: call.id,
                    name: call.function.name,
                    arguments,
                }
            })
            .collect();

        Ok(ModelCompletion {
            content: first.message.content,
            tool_calls,
        })
    }
}

/// Retries failed model calls with linear backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub async fn retry<F, Fut, T>(&self, mut f: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match f(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_retries && is_transient(&err) => {
                    tracing::warn!(attempt, error = %err, "model call failed, retrying");
                    sleep(self.backoff * (attempt + 1)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn is_transient(err: &MeetprepError) -> bool {
    matches!(err, MeetprepError::ModelUnavailable(_))
}

pub struct RetryingModel<M> {
    inner: M,
    policy: RetryPolicy,
}

impl<M: LanguageModel> RetryingModel<M> {
    pub fn new(inner: M, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<M: LanguageModel> LanguageModel for RetryingModel<M> {
    async fn complete_chat(
        &self,
        messages: &[Message],
        tools: &[ToolDescription],
        options: CompletionOptions,
    ) -> Result<ModelCompletion> {
        self.policy
            .retry(|_| self.inner.complete_chat(messages, tools, options))
            .await
    }
}

/// Scripted model for tests and offline runs.
///
/// Responses are replayed in order. A response shaped like
/// `{"action":"call_tool","name":..,"arguments":..}` becomes a tool call, one
/// shaped like `{"action":"respond","content":..}` becomes plain content, and
/// anything else is returned verbatim.
pub struct StubModel {
    responses: Mutex<VecDeque<String>>,
    fallback: Option<String>,
    seen: Mutex<Vec<Vec<Message>>>,
}

impl StubModel {
    pub fn new(responses: Vec<String>) -> Arc<Self> {
        Arc::new(Self::scripted(responses))
    }

    fn scripted(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            fallback: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Reply used once the script is exhausted.
    pub fn with_fallback(self: Arc<Self>, fallback: impl Into<String>) -> Arc<Self> {
        let responses = self
            .responses
            .lock()
            .map(|queue| queue.iter().cloned().collect())
            .unwrap_or_default();
        let mut stub = Self::scripted(responses);
        stub.fallback = Some(fallback.into());
        Arc::new(stub)
    }

    /// Every transcript the model was asked to complete, in call order.
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.seen.lock().map(|seen| seen.clone()).unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum StubDirective {
    Respond { content: String },
    CallTool { name: String, arguments: Value },
}

#[async_trait]
impl LanguageModel for StubModel {
    async fn complete_chat(
        &self,
        messages: &[Message],
        _tools: &[ToolDescription],
        _options: CompletionOptions,
    ) -> Result<ModelCompletion> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(messages.to_vec());
        }
        let next = self
            .responses
            .lock()
            .map_err(|_| MeetprepError::LanguageModel("stub model poisoned".into()))?
            .pop_front();
        let raw = next.or_else(|| self.fallback.clone()).ok_or_else(|| {
            MeetprepError::LanguageModel("StubModel ran out of scripted responses".into())
        })?;

        match serde_json::from_str::<StubDirective>(&raw) {
            Ok(StubDirective::Respond { content }) => Ok(ModelCompletion {
                content: Some(content),
                tool_calls: Vec::new(),
            }),
            Ok(StubDirective::CallTool { name, arguments }) => Ok(ModelCompletion {
                content: None,
                tool_calls: vec![ToolCall {
                    id: Some(format!("call_{name}")),
                    name,
                    arguments,
                }],
            }),
            Err(_) => Ok(ModelCompletion {
                content: Some(raw),
                tool_calls: Vec::new(),
            }),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default = "function_type")]
    r#type: String,
    function: OpenAiFunctionCall,
}

fn function_type() -> String {
    "function".into()
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct OpenAiTool {
    r#type: String,
    function: OpenAiFunction,
}

#[derive(Debug, Serialize)]
struct OpenAiFunction {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAiToolCall>>,
}
