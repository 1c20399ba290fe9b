//! Chat-completion gateway.
//!
//! Sends an ordered history to an OpenAI-compatible `chat/completions`
//! endpoint and hands back the first choice's text. Upstream failures are
//! not retried and propagate to the caller as [`CompletionError`].

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::{BotConfig, Credentials};
use crate::error::CompletionError;
use crate::history::MessageEntry;

pub const NO_RESPONSE_FALLBACK: &str = "No response from the model.";

#[async_trait]
pub trait CompletionGateway: Send + Sync {
    /// Generates a single reply for `history`. The caller is responsible for
    /// leading with the system prompt.
    async fn generate_reply(&self, history: &[MessageEntry]) -> Result<String, CompletionError>;
}

/// Substitutes the fixed fallback for an empty or blank reply.
pub fn or_fallback(reply: String) -> String {
    if reply.trim().is_empty() {
        NO_RESPONSE_FALLBACK.to_string()
    } else {
        reply
    }
}

pub struct OpenAiGateway {
    client: Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl OpenAiGateway {
    pub fn new(config: &BotConfig, credentials: &Credentials) -> Self {
        Self {
            client: Client::new(),
            api_key: credentials.openai_api_key.clone(),
            model: config.model_name.clone(),
            endpoint: format!("{}/chat/completions", config.api_base),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl CompletionGateway for OpenAiGateway {
    async fn generate_reply(&self, history: &[MessageEntry]) -> Result<String, CompletionError> {
        let request = ChatRequest {
            model: &self.model,
            messages: history,
        };

        tracing::debug!(model = %self.model, messages = history.len(), "requesting completion");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::Api { status, body });
        }

        let parsed: ChatResponse = response.json().await?;
        if let Some(usage) = &parsed.usage {
            tracing::debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "completion received"
            );
        }

        Ok(parsed.into_reply())
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [MessageEntry],
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    // Some compatible servers send `"choices": null`
    #[serde(default)]
    choices: Option<Vec<Choice>>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl ChatResponse {
    fn into_reply(self) -> String {
        let content = self
            .choices
            .into_iter()
            .flatten()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        or_fallback(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    fn parse(value: serde_json::Value) -> String {
        serde_json::from_value::<ChatResponse>(value).unwrap().into_reply()
    }

    #[test]
    fn request_body_carries_model_and_role_content_pairs() {
        let history = vec![
            MessageEntry::system("be nice"),
            MessageEntry::user("Hi"),
            MessageEntry::assistant("Hello!"),
        ];
        let request = ChatRequest {
            model: "gpt-3.5-turbo",
            messages: &history,
        };

        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "model": "gpt-3.5-turbo",
                "messages": [
                    {"role": "system", "content": "be nice"},
                    {"role": "user", "content": "Hi"},
                    {"role": "assistant", "content": "Hello!"},
                ]
            })
        );
    }

    #[test]
    fn first_choice_content_is_returned() {
        let reply = parse(json!({
            "choices": [
                {"index": 0, "message": {"role": "assistant", "content": "first"}},
                {"index": 1, "message": {"role": "assistant", "content": "second"}},
            ],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
        }));
        assert_eq!(reply, "first");
    }

    #[test]
    fn missing_content_falls_back() {
        let cases = [
            json!({"choices": []}),
            json!({}),
            json!({"choices": null}),
            json!({"choices": [{"message": {"role": "assistant", "content": null}}]}),
            json!({"choices": [{"message": {"role": "assistant", "content": ""}}]}),
            json!({"choices": [{"message": {"role": "assistant", "content": "  \n"}}]}),
        ];
        for case in cases {
            assert_eq!(parse(case), NO_RESPONSE_FALLBACK);
        }
    }

    fn gateway_for(api_base: &str) -> OpenAiGateway {
        let config = BotConfig {
            bot_token: "token".into(),
            model_name: "gpt-4o-mini".into(),
            history_length: 20,
            log_level: "info".into(),
            credentials_path: "credentials.json".into(),
            api_base: api_base.into(),
        };
        let credentials = Credentials {
            openai_api_key: "sk-test".into(),
        };
        OpenAiGateway::new(&config, &credentials)
    }

    /// Answers a single request with a canned response. The join handle
    /// yields the raw request as received.
    async fn serve_once(status: &str, body: &str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let response = format!(
            "HTTP/1.1 {status}\r\n\
             Content-Type: application/json\r\n\
             Content-Length: {}\r\n\
             Connection: close\r\n\
             \r\n\
             {body}",
            body.len()
        );

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            socket.write_all(response.as_bytes()).await.unwrap();
            request
        });

        (format!("http://{addr}/v1"), handle)
    }

    async fn read_request(socket: &mut TcpStream) -> String {
        let mut raw = Vec::new();
        let mut buf = [0u8; 4096];

        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&buf[..n]);

            let text = String::from_utf8_lossy(&raw);
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if raw.len() >= header_end + 4 + content_length {
                    break;
                }
            }
        }

        String::from_utf8_lossy(&raw).into_owned()
    }

    #[tokio::test]
    async fn posts_history_with_bearer_auth_and_returns_reply() {
        let (api_base, server) = serve_once(
            "200 OK",
            r#"{"choices":[{"message":{"role":"assistant","content":"yo"}}]}"#,
        )
        .await;

        let reply = gateway_for(&api_base)
            .generate_reply(&[MessageEntry::system("be nice"), MessageEntry::user("Hi")])
            .await
            .unwrap();
        assert_eq!(reply, "yo");

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /v1/chat/completions HTTP/1.1\r\n"), "{request}");
        assert!(
            request.to_ascii_lowercase().contains("\r\nauthorization: bearer sk-test\r\n"),
            "{request}"
        );

        let (_, body) = request.split_once("\r\n\r\n").unwrap();
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(body).unwrap(),
            json!({
                "model": "gpt-4o-mini",
                "messages": [
                    {"role": "system", "content": "be nice"},
                    {"role": "user", "content": "Hi"},
                ]
            })
        );
    }

    #[tokio::test]
    async fn error_status_is_reported_with_body() {
        let (api_base, server) = serve_once("429 Too Many Requests", r#"{"error":"quota"}"#).await;

        let err = gateway_for(&api_base)
            .generate_reply(&[MessageEntry::user("Hi")])
            .await
            .unwrap_err();
        server.await.unwrap();

        match err {
            CompletionError::Api { status, body } => {
                assert_eq!(status.as_u16(), 429);
                assert_eq!(body, r#"{"error":"quota"}"#);
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn undecodable_body_is_an_http_error() {
        let (api_base, server) = serve_once("200 OK", "not json").await;

        let err = gateway_for(&api_base)
            .generate_reply(&[MessageEntry::user("Hi")])
            .await
            .unwrap_err();
        server.await.unwrap();

        assert!(matches!(err, CompletionError::Http(_)), "{err:?}");
    }

    #[test]
    fn gateway_targets_configured_endpoint() {
        let gateway = gateway_for("http://localhost:9999/v1");
        assert_eq!(gateway.endpoint, "http://localhost:9999/v1/chat/completions");
        assert_eq!(gateway.model(), "gpt-4o-mini");
    }
}
