use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");
const SETTINGS_DIR_NAME: &str = ".manga-llm-translator";
const LOCAL_SETTINGS_FILE: &str = "settings.local.toml";

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_PROMPT: &str = "Extract the text from the manga page image, which is in Japanese, and provide an Traditional Chinese translation while preserving the original formatting as much as possible. Make sure only text in manga content are translated. There are usually two pages of manga on the image - the right page and the left page, start extraction and translation from top right, then bottom right, then top left and finally bottom left. Return the original text and translated text in a json array with each object containing \"original\" and \"translation\" fields.";

#[derive(Debug, Clone)]
pub struct Settings {
    pub api_key: Option<String>,
    pub model: String,
    pub prompt: String,
    pub image_prefix: String,
    /// JPEG quality in `0.0..=1.0`.
    pub quality: f32,
    pub threshold: u8,
    pub capture_command: Option<String>,
    pub next_page_command: Option<String>,
    pub navigation_delay_ms: u64,
    pub output_dir: PathBuf,
    pub server_addr: String,
    pub uploads_dir: PathBuf,
    pub body_limit_mb: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            prompt: DEFAULT_PROMPT.to_string(),
            image_prefix: "capture".to_string(),
            quality: 0.5,
            threshold: 60,
            capture_command: None,
            next_page_command: None,
            navigation_delay_ms: 800,
            output_dir: PathBuf::from("."),
            server_addr: "127.0.0.1:5173".to_string(),
            uploads_dir: PathBuf::from("uploads"),
            body_limit_mb: 256,
        }
    }
}

impl Settings {
    /// Quality mapped onto the 1-100 scale the JPEG encoder expects.
    pub fn jpeg_quality(&self) -> u8 {
        jpeg_quality(self.quality)
    }
}

pub fn jpeg_quality(quality: f32) -> u8 {
    if !quality.is_finite() {
        return 50;
    }
    (quality * 100.0).round().clamp(1.0, 100.0) as u8
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    gemini: Option<GeminiSettings>,
    capture: Option<CaptureSettings>,
    server: Option<ServerSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct GeminiSettings {
    api_key: Option<String>,
    model: Option<String>,
    prompt: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CaptureSettings {
    image_prefix: Option<String>,
    quality: Option<f32>,
    threshold: Option<u8>,
    command: Option<String>,
    next_page_command: Option<String>,
    navigation_delay_ms: Option<u64>,
    output_dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerSettings {
    addr: Option<String>,
    uploads_dir: Option<String>,
    body_limit_mb: Option<usize>,
}

pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    ensure_home_settings_file()?;

    let mut ordered_paths = Vec::new();
    ordered_paths.push(PathBuf::from("settings.toml"));
    ordered_paths.push(PathBuf::from(LOCAL_SETTINGS_FILE));

    if let Some(home) = home_dir() {
        ordered_paths.push(home.join("settings.toml"));
        ordered_paths.push(home.join(LOCAL_SETTINGS_FILE));
    }

    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    load_settings_from(&ordered_paths)
}

/// Later paths override earlier ones; missing files are skipped.
pub fn load_settings_from(paths: &[PathBuf]) -> Result<Settings> {
    let mut settings = Settings::default();
    for path in paths {
        if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            let parsed: SettingsFile = toml::from_str(&content)
                .with_context(|| format!("failed to parse settings: {}", path.display()))?;
            settings.merge(parsed);
        }
    }
    Ok(settings)
}

impl Settings {
    fn merge(&mut self, incoming: SettingsFile) {
        if let Some(gemini) = incoming.gemini {
            if let Some(key) = non_empty(gemini.api_key) {
                self.api_key = Some(key);
            }
            if let Some(model) = non_empty(gemini.model) {
                self.model = model;
            }
            if let Some(prompt) = non_empty(gemini.prompt) {
                self.prompt = prompt;
            }
        }
        if let Some(capture) = incoming.capture {
            if let Some(prefix) = non_empty(capture.image_prefix) {
                self.image_prefix = prefix;
            }
            if let Some(quality) = capture.quality
                && quality > 0.0
                && quality <= 1.0
            {
                self.quality = quality;
            }
            if let Some(threshold) = capture.threshold {
                self.threshold = threshold;
            }
            if let Some(command) = non_empty(capture.command) {
                self.capture_command = Some(command);
            }
            if let Some(command) = non_empty(capture.next_page_command) {
                self.next_page_command = Some(command);
            }
            if let Some(delay) = capture.navigation_delay_ms {
                self.navigation_delay_ms = delay;
            }
            if let Some(dir) = non_empty(capture.output_dir) {
                self.output_dir = PathBuf::from(dir);
            }
        }
        if let Some(server) = incoming.server {
            if let Some(addr) = non_empty(server.addr) {
                self.server_addr = addr;
            }
            if let Some(dir) = non_empty(server.uploads_dir) {
                self.uploads_dir = PathBuf::from(dir);
            }
            if let Some(limit) = server.body_limit_mb
                && limit > 0
            {
                self.body_limit_mb = limit;
            }
        }
    }
}

/// Values changed by an explicit save action.
#[derive(Debug, Clone, Default)]
pub struct SessionValues {
    pub api_key: Option<String>,
    pub image_prefix: Option<String>,
    pub quality: Option<f32>,
    pub threshold: Option<u8>,
}

impl SessionValues {
    pub fn is_empty(&self) -> bool {
        self.api_key.is_none()
            && self.image_prefix.is_none()
            && self.quality.is_none()
            && self.threshold.is_none()
    }
}

/// Writes `values` into the local settings file, keeping any other keys it
/// already holds. Returns the path written.
pub fn save_settings(values: &SessionValues, path: Option<&Path>) -> Result<PathBuf> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => home_dir()
            .map(|home| home.join(LOCAL_SETTINGS_FILE))
            .ok_or_else(|| anyhow!("HOME is not set; pass an explicit settings path"))?,
    };

    let mut root = if path.exists() {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read settings: {}", path.display()))?;
        toml::from_str::<toml::Table>(&content)
            .with_context(|| format!("failed to parse settings: {}", path.display()))?
    } else {
        toml::Table::new()
    };

    if let Some(key) = values.api_key.as_ref() {
        let mut gemini = take_table(&mut root, "gemini");
        gemini.insert("api_key".to_string(), toml::Value::String(key.clone()));
        root.insert("gemini".to_string(), toml::Value::Table(gemini));
    }
    let mut capture = take_table(&mut root, "capture");
    if let Some(prefix) = values.image_prefix.as_ref() {
        capture.insert(
            "image_prefix".to_string(),
            toml::Value::String(prefix.clone()),
        );
    }
    if let Some(quality) = values.quality {
        // f32 widening would otherwise write 0.7 as 0.699999988079071.
        let quality = (f64::from(quality) * 1000.0).round() / 1000.0;
        capture.insert("quality".to_string(), toml::Value::Float(quality));
    }
    if let Some(threshold) = values.threshold {
        capture.insert(
            "threshold".to_string(),
            toml::Value::Integer(i64::from(threshold)),
        );
    }
    if !capture.is_empty() {
        root.insert("capture".to_string(), toml::Value::Table(capture));
    }

    if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create settings directory: {}", parent.display()))?;
    }
    let rendered = toml::to_string_pretty(&root).with_context(|| "failed to render settings")?;
    fs::write(&path, rendered)
        .with_context(|| format!("failed to write settings: {}", path.display()))?;
    Ok(path)
}

/// Removes `name` from `root`, returning it when it was a table.
fn take_table(root: &mut toml::Table, name: &str) -> toml::Table {
    match root.remove(name) {
        Some(toml::Value::Table(table)) => table,
        _ => toml::Table::new(),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn ensure_home_settings_file() -> Result<()> {
    let Some(home) = home_dir() else {
        return Ok(());
    };
    fs::create_dir_all(&home)
        .with_context(|| format!("failed to create settings directory: {}", home.display()))?;
    let path = home.join("settings.toml");
    if !path.exists() {
        fs::write(&path, DEFAULT_SETTINGS_TOML)
            .with_context(|| format!("failed to write settings: {}", path.display()))?;
    }
    Ok(())
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().and_then(|home| {
        let home = home.trim();
        if home.is_empty() {
            None
        } else {
            Some(Path::new(home).join(SETTINGS_DIR_NAME))
        }
    })
}
