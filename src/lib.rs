use anyhow::{Context, Result, anyhow};
use std::path::{Path, PathBuf};

pub mod batch;
pub mod capture;
pub mod crop;
pub mod data;
pub mod error;
pub mod logging;
pub mod parse;
pub mod providers;
pub mod render;
pub mod server;
pub mod settings;
mod translator;

pub use error::TranslateError;
pub use parse::{TranslationPair, parse_response};
pub use providers::{Gemini, Provider, ProviderUsage};
pub use render::{Row, RowBuffer, RowKind};
pub use settings::Settings;
pub use translator::{ExecutionOutput, TranslationOutcome, Translator};

use batch::{BatchOptions, BatchSummary};
use capture::{CaptureSource, CommandCapture, CommandPageTurner, FileCapture, NoPageTurner, PageTurner};

/// One CLI invocation. Override fields left as `None` fall back to the
/// loaded settings.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub key: Option<String>,
    pub model: Option<String>,
    pub prompt: Option<String>,
    pub threshold: Option<u8>,
    pub quality: Option<f32>,
    pub image_prefix: Option<String>,
    pub output_dir: Option<String>,
    pub settings_path: Option<String>,
    pub image: Option<String>,
    pub save_screenshot: bool,
    pub capture_book: Option<u32>,
    pub translate_dir: Option<String>,
    pub list: Option<String>,
    pub overwrite: bool,
    pub save_config: bool,
    pub with_using_tokens: bool,
    pub with_using_model: bool,
}

/// Loads layered settings and applies the invocation's overrides.
pub fn resolve_settings(config: &Config) -> Result<Settings> {
    let settings_path = config.settings_path.as_deref().map(Path::new);
    let mut settings = settings::load_settings(settings_path)?;
    if let Some(key) = non_blank(config.key.as_deref()) {
        settings.api_key = Some(key);
    }
    if let Some(model) = non_blank(config.model.as_deref()) {
        settings.model = model;
    }
    if let Some(prompt) = non_blank(config.prompt.as_deref()) {
        settings.prompt = prompt;
    }
    if let Some(prefix) = non_blank(config.image_prefix.as_deref()) {
        settings.image_prefix = prefix;
    }
    if let Some(dir) = non_blank(config.output_dir.as_deref()) {
        settings.output_dir = PathBuf::from(dir);
    }
    if let Some(threshold) = config.threshold {
        settings.threshold = threshold;
    }
    if let Some(quality) = config.quality {
        if !(quality > 0.0 && quality <= 1.0) {
            return Err(anyhow!("quality must be in (0, 1], got {}", quality));
        }
        settings.quality = quality;
    }
    Ok(settings)
}

pub async fn run(config: Config) -> Result<String> {
    if config.save_config {
        return save_config(&config);
    }
    let settings = resolve_settings(&config)?;
    run_with_settings(&config, &settings).await
}

/// Runs one action against settings that were already resolved, so a
/// session can reuse them across actions.
pub async fn run_with_settings(config: &Config, settings: &Settings) -> Result<String> {
    if let Some(dir) = config.list.as_deref() {
        return list_dir(Path::new(dir));
    }
    if let Some(dir) = config.translate_dir.as_deref() {
        return translate_dir(Path::new(dir), settings, config.overwrite).await;
    }
    if config.save_screenshot {
        let source = capture_source(config, settings)?;
        let path = capture::save_screenshot(source.as_ref(), settings, &settings.output_dir).await?;
        return Ok(format!("Screenshot saved to {}", path.display()));
    }
    if let Some(total) = config.capture_book {
        return capture_book(config, settings, total).await;
    }

    let source = capture_source(config, settings)?;
    translate_once(source.as_ref(), settings, config).await
}

/// Captures, crops and translates the current page, returning the rendered
/// rows followed by a status line.
pub async fn translate_once(
    source: &dyn CaptureSource,
    settings: &Settings,
    config: &Config,
) -> Result<String> {
    let key = providers::resolve_api_key(config.key.as_deref(), settings.api_key.as_deref())?;
    let provider = Gemini::new(key).with_model(settings.model.clone());
    let translator = Translator::new(provider, settings.clone());

    let capture = source.capture(settings.jpeg_quality()).await?;
    let execution = translator.translate_capture(capture).await?;
    Ok(format_execution_output(
        &execution,
        config.with_using_model,
        config.with_using_tokens,
    ))
}

fn capture_source(config: &Config, settings: &Settings) -> Result<Box<dyn CaptureSource>> {
    match non_blank(config.image.as_deref()) {
        Some(path) => Ok(Box::new(FileCapture::new(path))),
        None => Ok(Box::new(CommandCapture::from_settings(settings)?)),
    }
}

async fn capture_book(config: &Config, settings: &Settings, total: u32) -> Result<String> {
    if total == 0 {
        return Err(anyhow!("--capture-book needs at least one page"));
    }
    let source = capture_source(config, settings)?;
    let turner: Box<dyn PageTurner> = match settings.next_page_command.as_deref() {
        Some(command) => Box::new(CommandPageTurner::new(command)),
        None => Box::new(NoPageTurner),
    };
    let written = capture::capture_book(
        source.as_ref(),
        turner.as_ref(),
        settings,
        &settings.output_dir,
        total,
    )
    .await?;
    let mut lines = written
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>();
    lines.push(format!("Captured {} of {} page(s).", written.len(), total));
    Ok(lines.join("\n"))
}

async fn translate_dir(dir: &Path, settings: &Settings, overwrite: bool) -> Result<String> {
    if !dir.is_dir() {
        return Err(anyhow!("not a directory: {}", dir.display()));
    }
    let key = providers::resolve_api_key(None, settings.api_key.as_deref())?;
    let provider = Gemini::new(key).with_model(settings.model.clone());
    let options = BatchOptions {
        overwrite,
        prompt: settings.prompt.clone(),
    };
    let reports = batch::translate_directory(dir, &options, &provider)
        .await
        .with_context(|| format!("failed to translate {}", dir.display()))?;

    let mut lines = reports
        .iter()
        .map(|report| match report.message.as_deref() {
            Some(message) => format!("{}: {} ({})", report.file, report.status.as_str(), message),
            None => format!("{}: {}", report.file, report.status.as_str()),
        })
        .collect::<Vec<_>>();
    lines.push(format_summary(&BatchSummary::from_reports(&reports)));
    Ok(lines.join("\n"))
}

fn list_dir(dir: &Path) -> Result<String> {
    let artifacts = batch::list_artifacts(dir)?;
    if artifacts.is_empty() {
        return Ok(format!("no images in {}", dir.display()));
    }
    Ok(artifacts
        .iter()
        .map(|artifact| {
            let marker = if artifact.has_text { "text" } else { "-" };
            format!("{}\t{}", artifact.file, marker)
        })
        .collect::<Vec<_>>()
        .join("\n"))
}

fn save_config(config: &Config) -> Result<String> {
    let values = settings::SessionValues {
        api_key: non_blank(config.key.as_deref()),
        image_prefix: non_blank(config.image_prefix.as_deref()),
        quality: config.quality,
        threshold: config.threshold,
    };
    if values.is_empty() {
        return Err(anyhow!(
            "nothing to save; pass --key, --image-prefix, --quality or --threshold"
        ));
    }
    if let Some(quality) = values.quality
        && !(quality > 0.0 && quality <= 1.0)
    {
        return Err(anyhow!("quality must be in (0, 1], got {}", quality));
    }
    let path = settings::save_settings(&values, None)?;
    Ok(format!("Settings saved to {}", path.display()))
}

pub fn format_execution_output(
    execution: &ExecutionOutput,
    with_using_model: bool,
    with_using_tokens: bool,
) -> String {
    let mut buffer = RowBuffer::new();
    execution.outcome.render_into(&mut buffer);
    let mut output = buffer.to_text();
    output.push_str("\n\n");
    output.push_str(execution.outcome.status_message());

    if with_using_model {
        let model = execution.model.as_deref().unwrap_or("unavailable");
        output.push_str(&format!("\nmodel: {}", model));
    }
    if with_using_tokens {
        output.push('\n');
        output.push_str(&format_usage(execution.usage.as_ref()));
    }
    output
}

fn format_usage(usage: Option<&ProviderUsage>) -> String {
    let Some(usage) = usage else {
        return "tokens: unavailable".to_string();
    };
    let total = usage.total_tokens.or_else(|| {
        usage
            .prompt_tokens
            .zip(usage.completion_tokens)
            .map(|(prompt, completion)| prompt + completion)
    });

    let mut parts = Vec::new();
    if let Some(prompt) = usage.prompt_tokens {
        parts.push(format!("prompt={}", prompt));
    }
    if let Some(completion) = usage.completion_tokens {
        parts.push(format!("completion={}", completion));
    }
    if let Some(total) = total {
        parts.push(format!("total={}", total));
    }

    if parts.is_empty() {
        "tokens: unavailable".to_string()
    } else {
        format!("tokens: {}", parts.join(", "))
    }
}

pub fn format_summary(summary: &BatchSummary) -> String {
    format!(
        "ok: {}, skipped: {}, failed: {}",
        summary.ok, summary.skipped, summary.failed
    )
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
