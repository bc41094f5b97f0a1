use std::path::PathBuf;

use thiserror::Error;

/// Failures callers need to tell apart. Everything else travels as plain
/// `anyhow::Error` context.
#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("capture failed: {0}")]
    Capture(String),

    #[error("Gemini API error ({status}): {body}")]
    ModelCall { status: u16, body: String },

    #[error("failed to write {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "no Gemini API key provided (pass --key / apiKey, set [gemini].api_key, or set GEMINI_API_KEY)"
    )]
    MissingApiKey,
}
