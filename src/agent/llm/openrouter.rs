//! OpenRouter - hosted models over the OpenAI-compatible chat API

use tracing::debug;

use super::http::{build_client, read_json, send};
use super::stream::{sse_reply_stream, ReplyStream};
use super::types::{reply_from_response, wire_messages, wire_tools, ChatRequest, ChatResponse};
use super::ModelReply;
use crate::agent::message::Message;
use crate::config::ProviderConfig;
use crate::error::{ProviderError, ProviderErrorKind};
use crate::tools::ToolSpec;

const NAME: &str = "openrouter";

pub struct OpenRouterClient {
    config: ProviderConfig,
    api_key: String,
    http: reqwest::Client,
}

impl OpenRouterClient {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                ProviderError::new(
                    ProviderErrorKind::Auth,
                    NAME,
                    "API key is required. Get one at https://openrouter.ai/keys",
                )
            })?;
        Ok(Self {
            http: build_client(NAME)?,
            api_key,
            config,
        })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn request(&self, messages: &[Message], tools: &[ToolSpec], stream: bool) -> reqwest::RequestBuilder {
        let body = ChatRequest {
            model: &self.config.model,
            messages: wire_messages(messages),
            tools: wire_tools(tools),
            stream,
            max_tokens: None,
        };
        self.http
            .post(format!("{}/chat/completions", self.config.endpoint.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", "https://github.com/codeagent/codeagent")
            .header("X-Title", "codeagent")
            .json(&body)
    }

    pub async fn chat(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<ModelReply, ProviderError> {
        debug!(provider = NAME, model = %self.config.model, messages = messages.len(), "chat request");
        let response = send(NAME, self.request(messages, tools, false)).await?;
        let body: ChatResponse = read_json(NAME, response).await?;
        reply_from_response(NAME, body)
    }

    pub async fn open_stream(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<ReplyStream, ProviderError> {
        debug!(provider = NAME, model = %self.config.model, "stream request");
        let response = send(NAME, self.request(messages, tools, true)).await?;
        Ok(sse_reply_stream(response, NAME, self.config.timeout, |reply| reply))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::llm::{LlmClient, ProviderClient, RetryPolicy};
    use crate::config::ProviderKind;
    use httpmock::prelude::*;
    use serde_json::json;

    fn config(server: &MockServer) -> ProviderConfig {
        ProviderConfig {
            endpoint: server.base_url(),
            api_key: Some("sk-test".to_string()),
            retry: RetryPolicy {
                initial_delay_ms: 1,
                max_delay_ms: 2,
                ..RetryPolicy::default()
            },
            ..ProviderConfig::for_kind(ProviderKind::OpenRouter)
        }
    }

    #[tokio::test]
    async fn test_chat_sends_auth_and_tools() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/chat/completions")
                    .header("authorization", "Bearer sk-test")
                    .body_includes("\"model\":\"deepseek/deepseek-chat\"")
                    .body_includes("\"tools\"");
                then.status(200).header("content-type", "application/json").body(
                    r#"{"choices":[{"message":{"role":"assistant","content":"Listing.","tool_calls":[
                        {"id":"call_a","type":"function","function":{"name":"ls","arguments":"{\"path\":\"src\"}"}}
                    ]},"finish_reason":"tool_calls"}]}"#,
                );
            })
            .await;

        let client = OpenRouterClient::new(config(&server)).unwrap();
        let tools = crate::tools::ToolRunner::new_with_defaults(
            &crate::tools::Workspace::new(std::env::temp_dir()).unwrap(),
            &crate::tools::ToolSettings::default(),
        )
        .specs();
        let reply = client.chat(&[Message::user("list src")], &tools).await.unwrap();
        mock.assert_async().await;
        assert_eq!(reply.text, "Listing.");
        assert_eq!(reply.tool_calls[0].id, "call_a");
        assert_eq!(reply.tool_calls[0].arguments, json!({"path": "src"}));
    }

    #[tokio::test]
    async fn test_auth_failure_not_retried() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(401).body(r#"{"error":{"message":"No auth credentials found"}}"#);
            })
            .await;

        let client = ProviderClient::new(config(&server)).unwrap();
        let err = client.chat(&[Message::user("hi")], &[]).await.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Auth);
        mock.assert_calls_async(1).await;
    }

    #[tokio::test]
    async fn test_rate_limit_retried_until_exhausted() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(429).body("slow down");
            })
            .await;

        let client = ProviderClient::new(config(&server)).unwrap();
        let err = client.chat(&[Message::user("hi")], &[]).await.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::RateLimit);
        mock.assert_calls_async(3).await;
    }

    #[tokio::test]
    async fn test_server_error_retried() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(503).body("overloaded");
            })
            .await;

        let client = ProviderClient::new(config(&server)).unwrap();
        let err = client.chat(&[Message::user("hi")], &[]).await.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::ServerError);
        mock.assert_calls_async(3).await;
    }

    #[tokio::test]
    async fn test_stream_accumulates_tool_call_deltas() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions").body_includes("\"stream\":true");
                then.status(200).header("content-type", "text/event-stream").body(concat!(
                    "data: {\"choices\":[{\"delta\":{\"content\":\"Reading\"}}]}\n\n",
                    "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"c1\",\"function\":{\"name\":\"read_file\",\"arguments\":\"{\\\"path\\\":\"}}]}}]}\n\n",
                    "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"\\\"a.txt\\\"}\"}}]},\"finish_reason\":\"tool_calls\"}]}\n\n",
                    "data: [DONE]\n\n",
                ));
            })
            .await;

        let client = ProviderClient::new(config(&server)).unwrap();
        let mut text = String::new();
        let reply = client
            .stream(&[Message::user("read a.txt")], &[])
            .await
            .unwrap()
            .collect_with(|t| text.push_str(t))
            .await
            .unwrap();
        assert_eq!(text, "Reading");
        assert_eq!(reply.tool_calls.len(), 1);
        assert_eq!(reply.tool_calls[0].id, "c1");
        assert_eq!(reply.tool_calls[0].arguments, json!({"path": "a.txt"}));
        assert_eq!(reply.finish_reason, "tool_calls");
    }
}
