use anyhow::Result;
use tracing::info;

use crate::crop;
use crate::data::DataAttachment;
use crate::parse::{self, TranslationPair};
use crate::providers::{Provider, ProviderUsage};
use crate::render::RowBuffer;
use crate::settings::Settings;

/// What one model reply turned into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranslationOutcome {
    Structured(Vec<TranslationPair>),
    /// The reply had text but no recoverable pairs; shown verbatim.
    Raw(String),
    Empty,
}

impl TranslationOutcome {
    pub fn from_text(text: &str) -> Self {
        if text.trim().is_empty() {
            return TranslationOutcome::Empty;
        }
        match parse::parse_response(text) {
            Some(pairs) => TranslationOutcome::Structured(pairs),
            None => TranslationOutcome::Raw(text.to_string()),
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, TranslationOutcome::Structured(_))
    }

    pub fn status_message(&self) -> &'static str {
        match self {
            TranslationOutcome::Structured(_) => "Translation complete.",
            TranslationOutcome::Raw(_) => "Displayed raw response (JSON parse failed).",
            TranslationOutcome::Empty => "Gemini LLM response empty.",
        }
    }

    pub fn render_into(&self, buffer: &mut RowBuffer) {
        match self {
            TranslationOutcome::Structured(pairs) => buffer.render(pairs),
            TranslationOutcome::Raw(text) => buffer.show_raw(text),
            TranslationOutcome::Empty => buffer.show_raw("No translation found."),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionOutput {
    pub outcome: TranslationOutcome,
    pub raw_text: String,
    pub model: Option<String>,
    pub usage: Option<ProviderUsage>,
}

#[derive(Debug, Clone)]
pub struct Translator<P: Provider> {
    provider: P,
    settings: Settings,
}

impl<P: Provider> Translator<P> {
    pub fn new(provider: P, settings: Settings) -> Self {
        Self { provider, settings }
    }

    /// Crops a raw capture, sends it with the configured prompt and parses the
    /// reply.
    pub async fn translate_capture(&self, capture: Vec<u8>) -> Result<ExecutionOutput> {
        let jpeg = crop::crop_capture(
            capture,
            self.settings.threshold,
            self.settings.jpeg_quality(),
        )
        .await?;
        self.translate_attachment(DataAttachment::jpeg(jpeg)).await
    }

    /// Sends an already prepared image without cropping it.
    pub async fn translate_attachment(&self, data: DataAttachment) -> Result<ExecutionOutput> {
        info!("translating {} byte {} image", data.bytes.len(), data.mime);
        let response = self
            .provider
            .clone()
            .append_user_input(self.settings.prompt.clone())
            .append_user_data(data)
            .generate()
            .await?;
        let outcome = TranslationOutcome::from_text(&response.text);
        Ok(ExecutionOutput {
            outcome,
            raw_text: response.text,
            model: response.model,
            usage: response.usage,
        })
    }
}
