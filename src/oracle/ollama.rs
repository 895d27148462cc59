//! Ollama-backed oracle implementation.
//!
//! Speaks Ollama's `/api/chat` endpoint directly over `reqwest`. Non-streaming
//! calls read one JSON body; streaming calls parse the NDJSON chunk stream
//! into [`OracleEvent`]s. A health check validates connectivity and model
//! availability before the server starts taking requests.

use std::time::{Duration, Instant};

use futures::StreamExt;
use serde_json::{Value, json};

use super::{
    GenerationOutput, GenerationRequest, Oracle, OracleEvent, OracleStream, ToolInvocation,
    UsageInfo,
};
use crate::error::OracleError;

/// Oracle implementation backed by a local or remote Ollama instance.
pub struct OllamaOracle {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaOracle {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }

    /// Validate that the Ollama instance is running and the model is pulled.
    ///
    /// Step 1: GET the base URL with a 5-second timeout.
    /// Step 2: POST `/api/show` to verify the model exists.
    pub async fn check_ready(&self) -> Result<(), OracleError> {
        self.http
            .get(format!("{}/", self.base_url))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| OracleError::Unreachable {
                url: self.base_url.clone(),
                message: format!("Is Ollama running? {e}"),
            })?;

        let resp = self
            .http
            .post(format!("{}/api/show", self.base_url))
            .json(&json!({ "model": self.model }))
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| OracleError::ModelNotAvailable {
                model: self.model.clone(),
                message: format!("Failed to query model info: {e}"),
            })?;

        if !resp.status().is_success() {
            return Err(OracleError::ModelNotAvailable {
                model: self.model.clone(),
                message: format!(
                    "Model not found (HTTP {}). Run `ollama pull {}` to download it.",
                    resp.status(),
                    self.model
                ),
            });
        }

        Ok(())
    }

    fn chat_body(&self, request: &GenerationRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": self.model,
            "stream": stream,
            "messages": [
                { "role": "system", "content": request.system_prompt },
                { "role": "user", "content": request.user_prompt },
            ],
        });
        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        },
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
        }
        body
    }
}

/// Pull token counts out of a final Ollama chat chunk.
fn usage_from_chunk(chunk: &Value, started: Instant) -> UsageInfo {
    let input = chunk["prompt_eval_count"].as_u64().unwrap_or(0);
    let output = chunk["eval_count"].as_u64().unwrap_or(0);
    UsageInfo {
        input_tokens: input,
        output_tokens: output,
        total_tokens: input + output,
        cost_usd: None,
        duration_ms: started.elapsed().as_millis() as u64,
    }
}

/// Pull tool invocations out of an Ollama chat message, if any.
fn tool_calls_from_message(message: &Value) -> Vec<ToolInvocation> {
    message["tool_calls"]
        .as_array()
        .map(|calls| {
            calls
                .iter()
                .filter_map(|c| {
                    let func = &c["function"];
                    func["name"].as_str().map(|name| ToolInvocation {
                        name: name.to_string(),
                        arguments: func["arguments"].clone(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait::async_trait]
impl Oracle for OllamaOracle {
    async fn complete(&self, request: GenerationRequest) -> Result<GenerationOutput, OracleError> {
        let started = Instant::now();
        let resp = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(&self.chat_body(&request, false))
            .send()
            .await
            .map_err(|e| OracleError::GenerationFailed(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(OracleError::GenerationFailed(format!(
                "HTTP {} from /api/chat",
                resp.status()
            )));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| OracleError::MalformedResponse(e.to_string()))?;

        let message = &body["message"];
        Ok(GenerationOutput {
            text: message["content"].as_str().unwrap_or_default().to_string(),
            tool_calls: tool_calls_from_message(message),
            usage: usage_from_chunk(&body, started),
        })
    }

    async fn stream(&self, request: GenerationRequest) -> Result<OracleStream, OracleError> {
        let started = Instant::now();
        let resp = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(&self.chat_body(&request, true))
            .send()
            .await
            .map_err(|e| OracleError::GenerationFailed(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(OracleError::GenerationFailed(format!(
                "HTTP {} from /api/chat",
                resp.status()
            )));
        }

        // Parse the NDJSON chunk stream. Each line is one JSON object; the
        // final chunk has `done: true` and carries the token counts.
        Ok(ndjson_events(resp.bytes_stream(), started))
    }
}

struct NdjsonState<S> {
    bytes: S,
    buf: Vec<u8>,
    finished: bool,
    started: Instant,
}

/// Convert an NDJSON byte stream into oracle events.
fn ndjson_events<S>(bytes: S, started: Instant) -> OracleStream
where
    S: futures::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + Unpin + 'static,
{
    let state = NdjsonState {
        bytes,
        buf: Vec::new(),
        finished: false,
        started,
    };

    Box::pin(futures::stream::unfold(state, |mut st| async move {
        if st.finished {
            return None;
        }
        loop {
            // Emit any complete line already buffered.
            if let Some(pos) = st.buf.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = st.buf.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line);
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }
                match parse_chunk_line(&line, st.started) {
                    Ok(Some(event)) => {
                        if matches!(event, OracleEvent::Finish { .. }) {
                            st.finished = true;
                        }
                        return Some((Ok(event), st));
                    }
                    // Empty delta chunk: nothing to emit, keep reading.
                    Ok(None) => continue,
                    Err(e) => {
                        st.finished = true;
                        return Some((Err(e), st));
                    }
                }
            }

            // Need more bytes.
            match st.bytes.next().await {
                Some(Ok(chunk)) => st.buf.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    st.finished = true;
                    return Some((Err(OracleError::GenerationFailed(e.to_string())), st));
                }
                None => return None,
            }
        }
    }))
}

/// Parse one NDJSON line into at most one oracle event.
fn parse_chunk_line(line: &str, started: Instant) -> Result<Option<OracleEvent>, OracleError> {
    let chunk: Value =
        serde_json::from_str(line).map_err(|e| OracleError::MalformedResponse(e.to_string()))?;

    if chunk["done"].as_bool() == Some(true) {
        return Ok(Some(OracleEvent::Finish {
            usage: usage_from_chunk(&chunk, started),
        }));
    }

    let message = &chunk["message"];
    if let Some(call) = tool_calls_from_message(message).into_iter().next() {
        return Ok(Some(OracleEvent::ToolCall {
            name: call.name,
            arguments: call.arguments,
        }));
    }

    let text = message["content"].as_str().unwrap_or_default();
    if text.is_empty() {
        Ok(None)
    } else {
        Ok(Some(OracleEvent::TextDelta(text.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_chunk_line_extracts_text_delta() {
        let line = r#"{"message":{"role":"assistant","content":"hello"},"done":false}"#;
        let event = parse_chunk_line(line, Instant::now()).unwrap().unwrap();
        match event {
            OracleEvent::TextDelta(text) => assert_eq!(text, "hello"),
            other => panic!("expected text delta, got {other:?}"),
        }
    }

    #[test]
    fn parse_chunk_line_extracts_finish_with_usage() {
        let line = r#"{"message":{"content":""},"done":true,"prompt_eval_count":12,"eval_count":30}"#;
        let event = parse_chunk_line(line, Instant::now()).unwrap().unwrap();
        match event {
            OracleEvent::Finish { usage } => {
                assert_eq!(usage.input_tokens, 12);
                assert_eq!(usage.output_tokens, 30);
                assert_eq!(usage.total_tokens, 42);
            }
            other => panic!("expected finish, got {other:?}"),
        }
    }

    #[test]
    fn parse_chunk_line_extracts_tool_call() {
        let line = r#"{"message":{"content":"","tool_calls":[{"function":{"name":"lookup","arguments":{"q":"x"}}}]},"done":false}"#;
        let event = parse_chunk_line(line, Instant::now()).unwrap().unwrap();
        match event {
            OracleEvent::ToolCall { name, arguments } => {
                assert_eq!(name, "lookup");
                assert_eq!(arguments["q"], "x");
            }
            other => panic!("expected tool call, got {other:?}"),
        }
    }

    #[test]
    fn parse_chunk_line_skips_empty_delta() {
        let line = r#"{"message":{"content":""},"done":false}"#;
        assert!(parse_chunk_line(line, Instant::now()).unwrap().is_none());
    }

    #[test]
    fn parse_chunk_line_rejects_malformed_json() {
        assert!(parse_chunk_line("not json", Instant::now()).is_err());
    }
}
