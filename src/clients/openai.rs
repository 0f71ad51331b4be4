//! OpenAI-compatible `/chat/completions` client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};

use crate::clients::traits::{AnalysisClient, ClientError, RespondOptions, ToolSpec};
use crate::config::AnalysisConfig;

const BODY_SNIPPET_CHARS: usize = 500;

pub struct ChatCompletionsClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: u32,
    timeout_ms: u64,
}

impl ChatCompletionsClient {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Transport(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            model: model.into(),
            api_key,
            temperature: 0.2,
            max_tokens: 2000,
            timeout_ms: timeout.as_millis() as u64,
        })
    }

    pub fn from_config(
        config: &AnalysisConfig,
        api_key: Option<String>,
    ) -> Result<Self, ClientError> {
        let mut client = Self::new(
            config.base_url.clone(),
            config.model.clone(),
            api_key,
            Duration::from_millis(config.request_timeout_ms),
        )?;
        client.temperature = config.temperature;
        client.max_tokens = config.max_tokens;
        Ok(client)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn request_body(&self, prompt: &str, tools: &[ToolSpec], options: &RespondOptions) -> Value {
        let mut messages = Vec::new();
        if let Some(system) = &options.system {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": prompt}));

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": options.temperature.unwrap_or(self.temperature),
            "max_tokens": options.max_tokens.unwrap_or(self.max_tokens),
        });
        if !tools.is_empty() {
            let defs: Vec<Value> = tools
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
            body["tools"] = Value::Array(defs);
        }
        if options.json_mode {
            body["response_format"] = json!({"type": "json_object"});
        }
        body
    }
}

/// Message content if present, otherwise the tool calls the model made,
/// otherwise the raw response
fn response_text(val: &Value) -> String {
    if let Some(message) = val
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
    {
        if let Some(content) = message.get("content").and_then(|c| c.as_str())
            && !content.trim().is_empty()
        {
            return content.trim().to_string();
        }
        if let Some(calls) = message.get("tool_calls") {
            return calls.to_string();
        }
    }
    val.to_string()
}

#[async_trait]
impl AnalysisClient for ChatCompletionsClient {
    async fn respond(
        &self,
        prompt: &str,
        tools: &[ToolSpec],
        options: &RespondOptions,
    ) -> Result<String, ClientError> {
        let body = self.request_body(prompt, tools, options);
        let mut req = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                ClientError::Timeout {
                    timeout_ms: self.timeout_ms,
                }
            } else {
                ClientError::Transport(e.to_string())
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read response body".to_string());
            return Err(ClientError::Status {
                status: status.as_u16(),
                body: body_text.chars().take(BODY_SNIPPET_CHARS).collect(),
            });
        }

        let val: Value = resp
            .json()
            .await
            .map_err(|e| ClientError::ParseError(e.to_string()))?;
        Ok(response_text(&val))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ChatCompletionsClient {
        ChatCompletionsClient::new(
            "https://api.example.com/v1/",
            "test-model",
            None,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn endpoint_trims_trailing_slash() {
        assert_eq!(
            client().endpoint(),
            "https://api.example.com/v1/chat/completions"
        );
    }

    #[test]
    fn body_forwards_tools_and_options() {
        let tools = vec![ToolSpec {
            name: "lookup_price".into(),
            description: "Token price on a date".into(),
            parameters: json!({"type": "object", "properties": {"date": {"type": "string"}}}),
        }];
        let options = RespondOptions::default().with_system("Be terse").json();
        let body = client().request_body("hello", &tools, &options);

        assert_eq!(body["model"], "test-model");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hello");
        assert_eq!(body["tools"][0]["function"]["name"], "lookup_price");
        assert_eq!(body["response_format"]["type"], "json_object");
    }

    #[test]
    fn body_omits_tools_when_none_offered() {
        let body = client().request_body("hi", &[], &RespondOptions::default());
        assert!(body.get("tools").is_none());
        assert!(body.get("response_format").is_none());
        assert_eq!(body["max_tokens"], 2000);
    }

    #[test]
    fn response_text_prefers_content_then_tool_calls() {
        let content = json!({"choices": [{"message": {"content": " ok "}}]});
        assert_eq!(response_text(&content), "ok");

        let calls = json!({"choices": [{"message": {"content": null,
            "tool_calls": [{"function": {"name": "f"}}]}}]});
        assert!(response_text(&calls).contains("\"name\":\"f\""));

        let odd = json!({"unexpected": true});
        assert_eq!(response_text(&odd), odd.to_string());
    }
}
