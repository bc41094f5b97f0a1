use anyhow::{Context, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::{MessagePart, Provider, ProviderFuture, ProviderResponse, ProviderUsage};
use crate::data::DataAttachment;
use crate::error::TranslateError;
use crate::settings::DEFAULT_MODEL;

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

#[derive(Debug, Clone)]
pub struct Gemini {
    key: String,
    model: String,
    client: reqwest::Client,
    parts: Vec<MessagePart>,
}

impl Gemini {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            model: DEFAULT_MODEL.to_string(),
            client: reqwest::Client::new(),
            parts: Vec::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if !model.trim().is_empty() {
            self.model = model;
        }
        self
    }
}

impl Provider for Gemini {
    fn append_user_input(mut self, input: String) -> Self {
        self.parts.push(MessagePart::Text(input));
        self
    }

    fn append_user_data(mut self, data: DataAttachment) -> Self {
        self.parts.push(MessagePart::Data(data));
        self
    }

    fn generate(self) -> ProviderFuture {
        Box::pin(async move {
            if self.parts.is_empty() {
                return Err(anyhow!("nothing to send to Gemini"));
            }
            let url = format!("{}/{}:generateContent", BASE_URL, self.model);
            let body = request_body(&self.parts);
            info!("sending {} part(s) to Gemini model {}", self.parts.len(), self.model);

            let response = self
                .client
                .post(&url)
                .header("x-goog-api-key", self.key.clone())
                .json(&body)
                .send()
                .await
                .with_context(|| format!("failed to reach Gemini model {}", self.model))?;

            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            if !status.is_success() {
                return Err(TranslateError::ModelCall {
                    status: status.as_u16(),
                    body: extract_gemini_error(&text).unwrap_or(text),
                }
                .into());
            }
            extract_text_response(&text, &self.model)
        })
    }
}

fn request_body(parts: &[MessagePart]) -> serde_json::Value {
    let parts = parts
        .iter()
        .map(|part| match part {
            MessagePart::Text(text) => json!({ "text": text }),
            MessagePart::Data(data) => json!({
                "inline_data": {
                    "mime_type": data.mime,
                    "data": BASE64.encode(&data.bytes)
                }
            }),
        })
        .collect::<Vec<_>>();
    json!({
        "contents": [
            {
                "role": "user",
                "parts": parts
            }
        ]
    })
}

/// Text of the first candidate's first part; empty when the model returned
/// no candidates.
fn extract_text_response(
    text: &str,
    fallback_model: &str,
) -> Result<ProviderResponse, anyhow::Error> {
    let payload: GeminiResponse = serde_json::from_str(text)
        .map_err(|err| anyhow!("failed to parse Gemini response JSON: {}", err))?;
    let generated = payload
        .candidates
        .first()
        .and_then(|candidate| candidate.content.as_ref())
        .and_then(|content| content.parts.first())
        .and_then(|part| part.text.clone())
        .unwrap_or_default();
    let model = payload
        .model_version
        .filter(|value| !value.trim().is_empty())
        .or_else(|| Some(fallback_model.to_string()));
    let usage = payload.usage_metadata.map(|usage| ProviderUsage {
        prompt_tokens: usage.prompt_token_count,
        completion_tokens: usage.candidates_token_count,
        total_tokens: usage.total_token_count,
    });
    if let Some(usage) = usage.as_ref() {
        debug!(
            "Gemini usage: prompt={:?} completion={:?} total={:?}",
            usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
        );
    }
    Ok(ProviderResponse {
        text: generated,
        model,
        usage,
    })
}

fn extract_gemini_error(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<GeminiError>,
    }

    #[derive(Deserialize)]
    struct GeminiError {
        message: Option<String>,
        status: Option<String>,
        code: Option<i32>,
    }

    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    let error = parsed.error?;
    Some(format_error_parts(
        error.message,
        error.status,
        error.code.map(|value| value.to_string()),
    ))
}

fn format_error_parts(
    message: Option<String>,
    kind: Option<String>,
    code: Option<String>,
) -> String {
    let mut parts = Vec::new();
    if let Some(message) = message
        && !message.trim().is_empty()
    {
        parts.push(message);
    }
    if let Some(kind) = kind
        && !kind.trim().is_empty()
    {
        parts.push(format!("type: {}", kind));
    }
    if let Some(code) = code
        && !code.trim().is_empty()
    {
        parts.push(format!("code: {}", code));
    }
    if parts.is_empty() {
        "unknown error".to_string()
    } else {
        parts.join(" | ")
    }
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<GeminiUsage>,
    #[serde(rename = "modelVersion")]
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiUsage {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: Option<u64>,
    #[serde(rename = "candidatesTokenCount")]
    candidates_token_count: Option<u64>,
    #[serde(rename = "totalTokenCount")]
    total_token_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use insta::assert_json_snapshot;

    #[test]
    fn gemini_extract_text_snapshot() {
        let payload = include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/tests/fixtures/gemini_generate_response.json"
        ));
        let response = extract_text_response(payload, "gemini-2.5-flash").unwrap();
        assert_json_snapshot!(response, @r###"
        {
          "text": "```json\n[{\"original\": \"なにっ\", \"translation\": \"什麼\"}]\n```",
          "model": "gemini-2.5-flash-001",
          "usage": {
            "prompt_tokens": 1290,
            "completion_tokens": 21,
            "total_tokens": 1311
          }
        }
        "###);
    }

    #[test]
    fn missing_candidates_yield_empty_text() {
        let response = extract_text_response(r#"{"candidates": []}"#, "gemini-x").unwrap();
        assert_eq!(response.text, "");
        assert_eq!(response.model.as_deref(), Some("gemini-x"));
        let response = extract_text_response("{}", "gemini-x").unwrap();
        assert_eq!(response.text, "");
    }

    #[test]
    fn request_keeps_prompt_before_image() {
        let parts = vec![
            MessagePart::Text("translate".to_string()),
            MessagePart::Data(DataAttachment::jpeg(vec![1, 2, 3])),
        ];
        let body = request_body(&parts);
        assert_eq!(body["contents"][0]["parts"][0]["text"], "translate");
        assert_eq!(
            body["contents"][0]["parts"][1]["inline_data"]["mime_type"],
            "image/jpeg"
        );
        assert_eq!(body["contents"][0]["parts"][1]["inline_data"]["data"], "AQID");
    }

    #[test]
    fn error_body_is_summarized() {
        let body = r#"{"error": {"code": 400, "message": "API key not valid.", "status": "INVALID_ARGUMENT"}}"#;
        assert_eq!(
            extract_gemini_error(body).as_deref(),
            Some("API key not valid. | type: INVALID_ARGUMENT | code: 400")
        );
        assert!(extract_gemini_error("<html>").is_none());
    }
}
