use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use crate::agent::types::{AgentError, BackendRequest, EventStream, StreamEvent};

const SSE_DATA_PREFIX: &str = "data:";
const SSE_DONE: &str = "[DONE]";

/// AI inference backend that answers with an incremental stream.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    async fn invoke(&self, request: BackendRequest) -> Result<EventStream, AgentError>;
}

/// Streaming client for an OpenAI-compatible chat completions endpoint
pub struct OpenAiBackend {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiBackend {
    pub fn new(api_key: String, base_url: String) -> Result<Self, AgentError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url,
            model: "gpt-4o-mini".to_string(),
            max_tokens: 4000,
            temperature: 0.1,
        })
    }

    pub fn with_model(mut self, model: String) -> Self {
        self.model = model;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn build_payload(&self, request: &BackendRequest) -> Result<Value, AgentError> {
        Ok(json!({
            "model": self.model,
            "messages": [
                {
                    "role": "system",
                    "content": request.system_prompt
                },
                {
                    "role": "user",
                    "content": render_user_message(request)?
                }
            ],
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "user": request.session_id,
            "stream": true
        }))
    }
}

#[async_trait]
impl InferenceBackend for OpenAiBackend {
    async fn invoke(&self, request: BackendRequest) -> Result<EventStream, AgentError> {
        let payload = self.build_payload(&request)?;
        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));

        let response = self.client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AgentError::Backend(format!(
                "OpenAI API error {}: {}",
                status, error_text
            )));
        }

        debug!("Streaming completion for session {}", request.session_id);

        let events = response
            .bytes_stream()
            .scan(SseDecoder::default(), |decoder, chunk| {
                let events = match chunk {
                    Ok(bytes) => decoder.feed(&bytes),
                    Err(e) => vec![Err(AgentError::Http(e))],
                };
                futures::future::ready(Some(futures::stream::iter(events)))
            })
            .flatten();

        Ok(events.boxed())
    }
}

/// User message text: the prompt followed by any session context.
pub fn render_user_message(request: &BackendRequest) -> Result<String, AgentError> {
    match &request.context {
        Some(context) if !context.is_empty() => Ok(format!(
            "{}\n\nAdditional Context:\n{}",
            request.prompt,
            serde_json::to_string_pretty(context)?
        )),
        _ => Ok(request.prompt.clone()),
    }
}

/// Incremental server-sent-events decoder for chat completion chunks.
///
/// Bytes are buffered until a full line arrives so multi-byte characters
/// split across network chunks decode correctly.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Result<StreamEvent, AgentError>> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line);
            if let Some(event) = Self::decode_line(line.trim_end_matches(['\r', '\n'])) {
                events.push(event);
            }
        }
        events
    }

    fn decode_line(line: &str) -> Option<Result<StreamEvent, AgentError>> {
        let data = line.strip_prefix(SSE_DATA_PREFIX)?.trim_start();
        if data == SSE_DONE {
            return Some(Ok(StreamEvent::Terminal));
        }

        let chunk: Value = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => return Some(Err(AgentError::Backend(format!("Malformed stream chunk: {}", e)))),
        };

        if let Some(message) = chunk["error"]["message"].as_str() {
            return Some(Err(AgentError::Backend(message.to_string())));
        }

        chunk["choices"][0]["delta"]["content"]
            .as_str()
            .filter(|text| !text.is_empty())
            .map(|text| Ok(StreamEvent::Fragment(text.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn chunk(content: &str) -> String {
        format!(
            "data: {}\n\n",
            json!({ "choices": [{ "index": 0, "delta": { "content": content } }] })
        )
    }

    fn fragments(events: Vec<Result<StreamEvent, AgentError>>) -> Vec<StreamEvent> {
        events.into_iter().map(|e| e.unwrap()).collect()
    }

    #[test]
    fn test_decoder_emits_fragments_and_terminal() {
        let mut decoder = SseDecoder::default();
        let body = format!("{}{}: keep-alive\n\ndata: [DONE]\n\n", chunk("Hel"), chunk("lo"));

        let events = fragments(decoder.feed(body.as_bytes()));
        assert_eq!(
            events,
            vec![
                StreamEvent::Fragment("Hel".into()),
                StreamEvent::Fragment("lo".into()),
                StreamEvent::Terminal,
            ]
        );
    }

    #[test]
    fn test_decoder_handles_lines_split_across_chunks() {
        let mut decoder = SseDecoder::default();
        let body = chunk("€ rates");
        let bytes = body.as_bytes();
        // split inside the multi-byte euro sign
        let split = body.find('€').unwrap() + 1;

        assert!(decoder.feed(&bytes[..split]).is_empty());
        let events = fragments(decoder.feed(&bytes[split..]));
        assert_eq!(events, vec![StreamEvent::Fragment("€ rates".into())]);
    }

    #[test]
    fn test_decoder_skips_role_only_deltas() {
        let mut decoder = SseDecoder::default();
        let role_only = format!(
            "data: {}\n",
            json!({ "choices": [{ "index": 0, "delta": { "role": "assistant" } }] })
        );
        assert!(decoder.feed(role_only.as_bytes()).is_empty());
    }

    #[test]
    fn test_decoder_reports_malformed_and_error_chunks() {
        let mut decoder = SseDecoder::default();
        let events = decoder.feed(b"data: {not json\n");
        assert!(matches!(events.as_slice(), [Err(AgentError::Backend(_))]));

        let error = format!("data: {}\n", json!({ "error": { "message": "overloaded" } }));
        let events = decoder.feed(error.as_bytes());
        match events.as_slice() {
            [Err(AgentError::Backend(message))] => assert_eq!(message, "overloaded"),
            other => panic!("unexpected events: {:?}", other),
        }
    }

    #[test]
    fn test_user_message_includes_context_block() {
        let mut context = Map::new();
        context.insert("risk_tolerance".to_string(), json!("moderate"));
        let request = BackendRequest {
            system_prompt: "sys".to_string(),
            prompt: "Summarize my exposure".to_string(),
            session_id: "s1".to_string(),
            context: Some(context),
        };

        let message = render_user_message(&request).unwrap();
        assert!(message.starts_with("Summarize my exposure\n\nAdditional Context:\n"));
        assert!(message.contains("\"risk_tolerance\": \"moderate\""));

        let bare = BackendRequest { context: None, ..request };
        assert_eq!(render_user_message(&bare).unwrap(), "Summarize my exposure");
    }
}
