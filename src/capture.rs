//! Screenshot acquisition and the save / capture-book flows.
//!
//! The visible viewer is grabbed by an external command that writes an image
//! to stdout; `{quality}` in the command is replaced by the 1-100 JPEG
//! quality. Page turns run a second command between captures.

use anyhow::{Context, Result};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::crop;
use crate::error::TranslateError;
use crate::settings::Settings;

pub type CaptureFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<u8>, TranslateError>> + Send + 'a>>;
pub type TurnFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Produces raw image bytes of whatever is currently on screen.
pub trait CaptureSource: Send + Sync {
    fn capture(&self, quality: u8) -> CaptureFuture<'_>;
}

/// Advances the viewer by one page.
pub trait PageTurner: Send + Sync {
    fn next_page(&self) -> TurnFuture<'_>;
}

#[derive(Debug, Clone)]
pub struct CommandCapture {
    command: String,
}

impl CommandCapture {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, TranslateError> {
        settings
            .capture_command
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .map(Self::new)
            .ok_or_else(|| {
                TranslateError::Capture(
                    "no capture command configured (set [capture].command)".to_string(),
                )
            })
    }

    fn command_line(&self, quality: u8) -> String {
        self.command.replace("{quality}", &quality.to_string())
    }
}

impl CaptureSource for CommandCapture {
    fn capture(&self, quality: u8) -> CaptureFuture<'_> {
        Box::pin(async move {
            let line = self.command_line(quality);
            debug!("capture command: {}", line);
            let output = shell(&line)
                .output()
                .await
                .map_err(|err| TranslateError::Capture(format!("failed to run '{}': {}", line, err)))?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(TranslateError::Capture(format!(
                    "'{}' exited with {}: {}",
                    line,
                    output.status,
                    stderr.trim()
                )));
            }
            if output.stdout.is_empty() {
                return Err(TranslateError::Capture(format!(
                    "'{}' produced no image data",
                    line
                )));
            }
            Ok(output.stdout)
        })
    }
}

/// Reads an existing image instead of grabbing the screen.
#[derive(Debug, Clone)]
pub struct FileCapture {
    path: PathBuf,
}

impl FileCapture {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CaptureSource for FileCapture {
    fn capture(&self, _quality: u8) -> CaptureFuture<'_> {
        Box::pin(async move {
            tokio::fs::read(&self.path).await.map_err(|err| {
                TranslateError::Capture(format!("failed to read {}: {}", self.path.display(), err))
            })
        })
    }
}

#[derive(Debug, Clone)]
pub struct CommandPageTurner {
    command: String,
}

impl CommandPageTurner {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl PageTurner for CommandPageTurner {
    fn next_page(&self) -> TurnFuture<'_> {
        Box::pin(async move {
            let status = shell(&self.command)
                .status()
                .await
                .with_context(|| format!("failed to run page command '{}'", self.command))?;
            if !status.success() {
                warn!("page command '{}' exited with {}", self.command, status);
            }
            Ok(())
        })
    }
}

/// Used when no page command is configured; every capture sees the same page.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPageTurner;

impl PageTurner for NoPageTurner {
    fn next_page(&self) -> TurnFuture<'_> {
        Box::pin(async { Ok(()) })
    }
}

fn shell(line: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(line).kill_on_drop(true);
    command
}

/// Captures once, crops the borders and writes `{prefix}.jpeg` into `dir`.
pub async fn save_screenshot(
    source: &dyn CaptureSource,
    settings: &Settings,
    dir: &Path,
) -> Result<PathBuf> {
    let path = dir.join(format!("{}.jpeg", settings.image_prefix));
    capture_to(source, settings, &path).await?;
    info!("saved screenshot to {}", path.display());
    Ok(path)
}

/// Captures `total` consecutive pages as `{prefix}{i}.jpeg`, `i` from 1.
/// Stops at the first failed capture and returns what was written so far.
pub async fn capture_book(
    source: &dyn CaptureSource,
    turner: &dyn PageTurner,
    settings: &Settings,
    dir: &Path,
    total: u32,
) -> Result<Vec<PathBuf>> {
    let delay = Duration::from_millis(settings.navigation_delay_ms);
    let mut written = Vec::new();
    for index in 1..=total {
        let path = dir.join(format!("{}{}.jpeg", settings.image_prefix, index));
        if let Err(err) = capture_to(source, settings, &path).await {
            warn!("capture-book stopped at page {}: {:#}", index, err);
            break;
        }
        info!("captured page {}/{} to {}", index, total, path.display());
        written.push(path);
        if index < total {
            turner.next_page().await?;
            tokio::time::sleep(delay).await;
        }
    }
    Ok(written)
}

async fn capture_to(source: &dyn CaptureSource, settings: &Settings, path: &Path) -> Result<()> {
    let quality = settings.jpeg_quality();
    let raw = source.capture(quality).await?;
    let jpeg = crop::crop_capture(raw, settings.threshold, quality).await?;
    tokio::fs::write(path, jpeg)
        .await
        .map_err(|source| TranslateError::Persistence {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(())
}
