//! OpenAI-compatible chat completion provider (`<base_url>/chat/completions`).
//!
//! Exposes a single `complete(&str) -> LlmResponse` interface matching the
//! rest of the `LlmProvider` abstraction. All OpenAI wire types are private
//! to this module — callers never see them.

use std::time::Duration;

use reqwest::blocking::{Client, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace};

use crate::llm::{LlmResponse, LlmUsage, ProviderError};

/// Sampling parameters sent with every request.
#[derive(Debug, Clone, Copy)]
pub struct Sampling {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

// ── Public provider ───────────────────────────────────────────────────────────

/// Adapter for any HTTP endpoint implementing `/chat/completions`.
///
/// Covers LM Studio, Ollama, OpenAI and hosted alternatives. Cheap to clone:
/// `reqwest::blocking::Client` is reference-counted internally.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleProvider {
    client: Client,
    endpoint: String,
    model: String,
    sampling: Sampling,
    api_key: Option<String>,
}

impl OpenAiCompatibleProvider {
    /// Build a provider from config values and an optional API key.
    ///
    /// `api_key` is `None` for keyless local models. When present it is sent
    /// as `Authorization: Bearer <key>` on every request.
    pub fn new(
        base_url: String,
        model: String,
        sampling: Sampling,
        timeout_seconds: u64,
        api_key: Option<String>,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| ProviderError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint(&base_url),
            model,
            sampling,
            api_key,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send `content` as the user message and optionally `system` as the system prompt.
    /// One round-trip, no history.
    pub fn complete(&self, content: &str, system: Option<&str>) -> Result<LlmResponse, ProviderError> {
        let mut messages = Vec::new();
        if let Some(sys) = system {
            messages.push(Message { role: "system", content: sys.to_string() });
        }
        messages.push(Message { role: "user", content: content.to_string() });

        let payload = ChatCompletionRequest {
            model: &self.model,
            messages,
            temperature: self.sampling.temperature,
            top_p: self.sampling.top_p,
            max_tokens: self.sampling.max_tokens,
        };

        debug!(
            model = %self.model,
            temperature = payload.temperature,
            content_len = content.len(),
            "sending LLM request"
        );
        if tracing::enabled!(tracing::Level::TRACE) {
            let json = serde_json::to_string_pretty(&payload)
                .unwrap_or_else(|e| format!("<serialization failed: {e}>"));
            trace!(payload = %json, "full LLM request payload");
        }

        let mut req = self.client.post(&self.endpoint).json(&payload);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().map_err(|e| {
            error!(url = %self.endpoint, error = %e, "LLM HTTP request failed (transport)");
            ProviderError::Request(e.to_string())
        })?;

        let response = check_status(response)?;

        let parsed = response.json::<ChatCompletionResponse>().map_err(|e| {
            error!(error = %e, "failed to deserialize LLM response");
            ProviderError::Request(format!("failed to parse response body: {e}"))
        })?;

        debug!(choices = parsed.choices.len(), "received LLM response");
        parsed.into_response()
    }
}

/// `base_url` + `/chat/completions`, tolerating a trailing slash.
fn endpoint(base_url: &str) -> String {
    format!("{}/chat/completions", base_url.trim_end_matches('/'))
}

// ── Private wire types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<UsageData>,
}

impl ChatCompletionResponse {
    fn into_response(self) -> Result<LlmResponse, ProviderError> {
        let text = self
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ProviderError::Request("empty or missing content in response".into()))?;

        let usage = self.usage.map(|u| LlmUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        });

        Ok(LlmResponse { text, usage })
    }
}

#[derive(Debug, Deserialize)]
struct UsageData {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

// Error envelope used by OpenAI and compatible APIs.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

/// Consume the response and return it if successful, or a structured error.
fn check_status(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .unwrap_or_else(|_| "<failed to read error body>".to_string());
    let message = describe_error(status.as_u16(), &body);

    error!(%status, %message, "LLM request returned HTTP error");
    Err(ProviderError::Request(message))
}

fn describe_error(status: u16, body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(env) => {
            let code = env
                .error
                .code
                .map(|v| match v {
                    serde_json::Value::String(s) => format!(" [code={s}]"),
                    other => format!(" [code={other}]"),
                })
                .unwrap_or_default();
            format!("HTTP {status}{code}: {}", env.error.message)
        }
        Err(_) => format!("HTTP {status}: {body}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread;

    /// Serve exactly one HTTP request with `status` and `body`; the join
    /// handle yields the raw request body the client sent.
    fn one_shot_server(status: &'static str, body: &'static str) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base_url = format!("http://{}/v1", listener.local_addr().unwrap());
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if line == "\r\n" || line.is_empty() {
                    break;
                }
                let lower = line.to_ascii_lowercase();
                if let Some(v) = lower.strip_prefix("content-length:") {
                    content_length = v.trim().parse().unwrap();
                }
            }
            let mut request_body = vec![0u8; content_length];
            reader.read_exact(&mut request_body).unwrap();

            let mut stream = stream;
            write!(
                stream,
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            )
            .unwrap();
            String::from_utf8(request_body).unwrap()
        });
        (base_url, handle)
    }

    fn provider(base_url: String) -> OpenAiCompatibleProvider {
        OpenAiCompatibleProvider::new(
            base_url,
            "test-model".into(),
            Sampling { temperature: 0.6, top_p: 0.95, max_tokens: 32 },
            5,
            Some("sk-test".into()),
        )
        .unwrap()
    }

    #[test]
    fn endpoint_tolerates_trailing_slash() {
        assert_eq!(endpoint("http://h:1234/v1/"), "http://h:1234/v1/chat/completions");
        assert_eq!(endpoint("http://h:1234/v1"), "http://h:1234/v1/chat/completions");
    }

    #[test]
    fn complete_sends_payload_and_reads_reply() {
        let (url, server) = one_shot_server(
            "200 OK",
            r#"{"choices":[{"message":{"content":"  NESTOR-OK \n"}}],"usage":{"prompt_tokens":7,"completion_tokens":2}}"#,
        );
        let resp = provider(url).complete("ping", Some("be brief")).unwrap();
        assert_eq!(resp.text, "NESTOR-OK");
        assert_eq!(resp.usage, Some(LlmUsage { input_tokens: 7, output_tokens: 2 }));

        let sent: serde_json::Value = serde_json::from_str(&server.join().unwrap()).unwrap();
        assert_eq!(sent["model"], "test-model");
        assert_eq!(sent["max_tokens"], 32);
        assert_eq!(sent["messages"][0]["role"], "system");
        assert_eq!(sent["messages"][1]["content"], "ping");
    }

    #[test]
    fn http_error_uses_envelope_message() {
        let (url, server) = one_shot_server(
            "404 Not Found",
            r#"{"error":{"message":"model not loaded","code":"model_not_found"}}"#,
        );
        let err = provider(url).complete("ping", None).unwrap_err();
        server.join().unwrap();
        let msg = err.to_string();
        assert!(msg.contains("HTTP 404"));
        assert!(msg.contains("model_not_found"));
        assert!(msg.contains("model not loaded"));
    }

    #[test]
    fn empty_content_is_an_error() {
        let (url, server) = one_shot_server("200 OK", r#"{"choices":[{"message":{"content":"   "}}]}"#);
        assert!(provider(url).complete("ping", None).is_err());
        server.join().unwrap();
    }

    #[test]
    fn unreachable_server_is_request_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/v1", listener.local_addr().unwrap());
        drop(listener);
        assert!(matches!(provider(url).complete("ping", None), Err(ProviderError::Request(_))));
    }

    #[test]
    fn describe_error_without_envelope() {
        assert_eq!(describe_error(500, "boom"), "HTTP 500: boom");
    }
}
