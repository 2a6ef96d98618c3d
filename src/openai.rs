//! OpenAI-compatible HTTP provider.
//!
//! Implements [`Provider`] over `POST {base_url}/embeddings` and
//! `POST {base_url}/chat/completions`. Any server speaking the same API
//! works by pointing `provider.base_url` at it (for example Ollama's `/v1`).
//!
//! Each method makes exactly one request; the core applies retries and
//! per-call timeouts. Responses are classified for that retry decision:
//!
//! - HTTP 429 and 5xx, connection errors → [`ProviderError::Transient`]
//! - request timeouts → [`ProviderError::Timeout`]
//! - other 4xx → [`ProviderError::Fatal`]
//! - unparseable bodies → [`ProviderError::Malformed`]

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use docroute_core::provider::{AgentAction, ChatMessage, LabeledOption, Provider, Role, ToolCall, ToolSpec};
use docroute_core::ProviderError;

use crate::config::ProviderConfig;

const COMPLETE_SYSTEM: &str = "You answer strictly from the context passages supplied by the user. \
Never use prior knowledge. If the passages do not contain the answer, say that they do not.";

const CLASSIFY_SYSTEM: &str = "You select exactly one option. \
Reply with a JSON object of the form {\"choice\": <option number>, \"reason\": \"<short reason>\"} and nothing else.";

pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    chat_model: String,
    embedding_model: String,
    dims: usize,
    timeout: Duration,
}

impl OpenAiProvider {
    /// Build from config. The API key is required only for the default
    /// OpenAI endpoint; self-hosted compatible servers may run without one.
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).ok().filter(|k| !k.is_empty());
        let base_url = config.base_url.trim_end_matches('/').to_string();
        if api_key.is_none() && base_url.contains("api.openai.com") {
            bail!("{} environment variable not set", config.api_key_env);
        }
        let dims = config
            .resolved_dims()
            .ok_or_else(|| anyhow::anyhow!("provider.dims required for model '{}'", config.embedding_model))?;
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url,
            api_key,
            chat_model: config.chat_model.clone(),
            embedding_model: config.embedding_model.clone(),
            dims,
            timeout,
        })
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, ProviderError> {
        let mut request = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request.send().await.map_err(|e| network_error(e, self.timeout))?;
        let status = response.status();
        if status.is_success() {
            return response
                .json::<Value>()
                .await
                .map_err(|e| ProviderError::Malformed(e.to_string()));
        }
        let body_text = response.text().await.unwrap_or_default();
        Err(status_error(status.as_u16(), &body_text))
    }

    async fn chat_completion(&self, messages: Vec<Value>, extra: Option<(&str, Value)>) -> Result<Value, ProviderError> {
        let mut body = json!({
            "model": self.chat_model,
            "messages": messages,
            "temperature": 0,
        });
        if let (Some((key, value)), Some(obj)) = (extra, body.as_object_mut()) {
            obj.insert(key.to_string(), value);
        }
        let response = self.post("/chat/completions", &body).await?;
        response
            .pointer("/choices/0/message")
            .cloned()
            .ok_or_else(|| ProviderError::Malformed("missing choices[0].message".into()))
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn model_name(&self) -> &str {
        &self.chat_model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let body = json!({ "model": self.embedding_model, "input": texts });
        let response = self.post("/embeddings", &body).await?;
        parse_embeddings(&response, texts.len())
    }

    async fn complete(&self, prompt: &str, context: &[String]) -> Result<String, ProviderError> {
        let passages = context
            .iter()
            .enumerate()
            .map(|(i, p)| format!("[{}] {}", i + 1, p))
            .collect::<Vec<_>>()
            .join("\n\n");
        let messages = vec![
            json!({ "role": "system", "content": COMPLETE_SYSTEM }),
            json!({
                "role": "user",
                "content": format!("Context passages:\n---------------------\n{}\n---------------------\n{}", passages, prompt),
            }),
        ];
        let message = self.chat_completion(messages, None).await?;
        message
            .get("content")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .ok_or_else(|| ProviderError::Malformed("completion has no content".into()))
    }

    async fn classify(&self, prompt: &str, options: &[LabeledOption]) -> Result<String, ProviderError> {
        let listed = options
            .iter()
            .enumerate()
            .map(|(i, o)| format!("{}. {}: {}", i + 1, o.label, o.description))
            .collect::<Vec<_>>()
            .join("\n");
        let messages = vec![
            json!({ "role": "system", "content": CLASSIFY_SYSTEM }),
            json!({ "role": "user", "content": format!("Options:\n{}\n\n{}", listed, prompt) }),
        ];
        let message = self.chat_completion(messages, None).await?;
        let content = message
            .get("content")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::Malformed("classification has no content".into()))?;
        Ok(parse_choice(content, options))
    }

    async fn chat(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<AgentAction, ProviderError> {
        let wire: Vec<Value> = messages.iter().map(to_wire_message).collect();
        let tools: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
        let extra = (!tools.is_empty()).then(|| ("tools", Value::Array(tools)));
        let message = self.chat_completion(wire, extra).await?;
        parse_action(&message)
    }
}

fn network_error(err: reqwest::Error, timeout: Duration) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(timeout)
    } else {
        ProviderError::Transient(err.to_string())
    }
}

fn status_error(status: u16, body: &str) -> ProviderError {
    let message = format!("HTTP {}: {}", status, body);
    if status == 429 || status >= 500 {
        ProviderError::Transient(message)
    } else {
        ProviderError::Fatal(message)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_embeddings(response: &Value, expected: usize) -> Result<Vec<Vec<f32>>, ProviderError> {
    let data = response
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| ProviderError::Malformed("missing data array".into()))?;

    let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item.get("index").and_then(Value::as_u64).map(|i| i as usize).unwrap_or(pos);
        let vector = item
            .get("embedding")
            .and_then(Value::as_array)
            .ok_or_else(|| ProviderError::Malformed("missing embedding".into()))?
            .iter()
            .map(|v| v.as_f64().map(|f| f as f32))
            .collect::<Option<Vec<f32>>>()
            .ok_or_else(|| ProviderError::Malformed("non-numeric embedding value".into()))?;
        indexed.push((index, vector));
    }
    if indexed.len() != expected {
        return Err(ProviderError::Malformed(format!(
            "expected {} embeddings, got {}",
            expected,
            indexed.len()
        )));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

/// Map a classifier reply to an option label.
///
/// Accepts `{"choice": n}` JSON (possibly inside a code fence) or a bare
/// number. Anything else is returned as-is for the caller to validate.
fn parse_choice(content: &str, options: &[LabeledOption]) -> String {
    let trimmed = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let number = serde_json::from_str::<Value>(trimmed)
        .ok()
        .and_then(|v| match v {
            Value::Object(map) => map.get("choice").cloned(),
            other => Some(other),
        })
        .and_then(|c| c.as_u64().or_else(|| c.as_str().and_then(|s| s.trim().parse().ok())));

    match number {
        Some(n) if n >= 1 && (n as usize) <= options.len() => options[n as usize - 1].label.clone(),
        Some(n) => n.to_string(),
        None => trimmed.to_string(),
    }
}

fn to_wire_message(message: &ChatMessage) -> Value {
    match (message.role, &message.tool_call) {
        (Role::Assistant, Some(call)) => json!({
            "role": "assistant",
            "content": Value::Null,
            "tool_calls": [{
                "id": call.id,
                "type": "function",
                "function": { "name": call.name, "arguments": call.arguments.to_string() },
            }],
        }),
        (Role::Tool, _) => json!({
            "role": "tool",
            "tool_call_id": message.tool_call_id.clone().unwrap_or_default(),
            "content": message.content,
        }),
        (role, _) => json!({ "role": role, "content": message.content }),
    }
}

/// First tool call of the reply, or its text content.
fn parse_action(message: &Value) -> Result<AgentAction, ProviderError> {
    if let Some(call) = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .and_then(|calls| calls.first())
    {
        let id = call.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
        let function = call
            .get("function")
            .ok_or_else(|| ProviderError::Malformed("tool call without function".into()))?;
        let name = function
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::Malformed("tool call without name".into()))?
            .to_string();
        let arguments = match function.get("arguments") {
            Some(Value::String(raw)) => serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone())),
            Some(other) => other.clone(),
            None => json!({}),
        };
        return Ok(AgentAction::CallTool(ToolCall { id, name, arguments }));
    }

    message
        .get("content")
        .and_then(Value::as_str)
        .map(|s| AgentAction::Reply(s.to_string()))
        .ok_or_else(|| ProviderError::Malformed("reply has neither content nor tool calls".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> Vec<LabeledOption> {
        vec![
            LabeledOption {
                label: "summarize_docs".into(),
                description: "summary".into(),
            },
            LabeledOption {
                label: "search_docs".into(),
                description: "search".into(),
            },
        ]
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(status_error(429, ""), ProviderError::Transient(_)));
        assert!(matches!(status_error(503, ""), ProviderError::Transient(_)));
        assert!(matches!(status_error(401, "bad key"), ProviderError::Fatal(_)));
    }

    #[test]
    fn test_embeddings_reordered_by_index() {
        let response = json!({
            "data": [
                { "index": 1, "embedding": [0.0, 1.0] },
                { "index": 0, "embedding": [1.0, 0.0] }
            ]
        });
        let vectors = parse_embeddings(&response, 2).unwrap();
        assert_eq!(vectors[0], vec![1.0, 0.0]);
        assert!(parse_embeddings(&response, 3).is_err());
        assert!(parse_embeddings(&json!({}), 1).is_err());
    }

    #[test]
    fn test_parse_choice() {
        let opts = options();
        assert_eq!(parse_choice(r#"{"choice": 2, "reason": "specific"}"#, &opts), "search_docs");
        assert_eq!(parse_choice("```json\n{\"choice\": \"1\"}\n```", &opts), "summarize_docs");
        assert_eq!(parse_choice("1", &opts), "summarize_docs");
        assert_eq!(parse_choice(r#"{"choice": 9}"#, &opts), "9");
        assert_eq!(parse_choice("no idea", &opts), "no idea");
    }

    #[test]
    fn test_tool_call_round_trip_through_wire_format() {
        let call = ToolCall {
            id: "call_1".into(),
            name: "search_docs".into(),
            arguments: json!({ "query": "crabs" }),
        };
        let wire = to_wire_message(&ChatMessage::tool_request(call.clone()));
        assert_eq!(wire["tool_calls"][0]["function"]["arguments"], r#"{"query":"crabs"}"#);

        let reply = json!({ "content": null, "tool_calls": wire["tool_calls"].clone() });
        assert_eq!(parse_action(&reply).unwrap(), AgentAction::CallTool(call));

        let result = to_wire_message(&ChatMessage::tool_result("call_1", "found"));
        assert_eq!(result["role"], "tool");
        assert_eq!(result["tool_call_id"], "call_1");
    }

    #[test]
    fn test_plain_reply() {
        let action = parse_action(&json!({ "content": "hello" })).unwrap();
        assert_eq!(action, AgentAction::Reply("hello".into()));
        assert!(parse_action(&json!({})).is_err());
    }
}
