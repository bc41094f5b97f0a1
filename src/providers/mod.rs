use anyhow::Result;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;

use crate::data::DataAttachment;
use crate::error::TranslateError;

mod gemini;

pub use gemini::Gemini;

#[derive(Debug, Clone, Serialize)]
pub struct ProviderUsage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderResponse {
    pub text: String,
    pub model: Option<String>,
    pub usage: Option<ProviderUsage>,
}

#[derive(Debug, Clone)]
pub enum MessagePart {
    Text(String),
    Data(DataAttachment),
}

pub type ProviderFuture = Pin<Box<dyn Future<Output = Result<ProviderResponse>> + Send>>;

/// A multimodal model. Parts are sent in the order they were appended; the
/// reply is free-form text with no guaranteed structure.
pub trait Provider: Clone + Send + Sync {
    fn append_user_input(self, input: String) -> Self;
    fn append_user_data(self, data: DataAttachment) -> Self;
    fn generate(self) -> ProviderFuture;
}

/// Request key, then configured key, then `GEMINI_API_KEY` /
/// `GOOGLE_API_KEY`. Blank values count as absent.
pub fn resolve_api_key(
    request_key: Option<&str>,
    configured_key: Option<&str>,
) -> Result<String, TranslateError> {
    resolve_api_key_with(request_key, configured_key, get_env)
}

fn resolve_api_key_with(
    request_key: Option<&str>,
    configured_key: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<String, TranslateError> {
    let explicit = [request_key, configured_key]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|key| !key.is_empty())
        .map(str::to_string);
    explicit
        .or_else(|| env("GEMINI_API_KEY"))
        .or_else(|| env("GOOGLE_API_KEY"))
        .ok_or(TranslateError::MissingApiKey)
}

fn get_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_key_wins_over_configuration() {
        let key = resolve_api_key_with(Some(" req "), Some("cfg"), |_| Some("env".to_string()))
            .expect("key");
        assert_eq!(key, "req");
        let key = resolve_api_key_with(Some(""), Some("cfg"), |_| None).expect("key");
        assert_eq!(key, "cfg");
    }

    #[test]
    fn environment_is_the_last_resort() {
        let key = resolve_api_key_with(None, Some("  "), |name| {
            (name == "GOOGLE_API_KEY").then(|| "google".to_string())
        })
        .expect("key");
        assert_eq!(key, "google");
    }

    #[test]
    fn missing_key_is_reported() {
        let err = resolve_api_key_with(None, None, |_| None).expect_err("missing");
        assert!(matches!(err, TranslateError::MissingApiKey));
        assert!(err.to_string().contains("no Gemini API key"));
    }
}
