//! Directory batch translation and the listing used by viewers.
//!
//! Each accepted image `name.ext` may have a sibling `name.txt` holding the
//! raw model reply. Files are visited in sequence-key order, one model call
//! at a time.

use anyhow::{Context, Result};
use serde::Serialize;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::data::{self, DataAttachment};
use crate::error::TranslateError;
use crate::providers::Provider;

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub overwrite: bool,
    pub prompt: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Ok,
    Skipped,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Ok => "ok",
            JobStatus::Skipped => "skipped",
            JobStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobReport {
    pub file: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl JobReport {
    fn new(file: &str, status: JobStatus, message: Option<String>) -> Self {
        Self {
            file: file.to_string(),
            status,
            message,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub ok: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn from_reports(reports: &[JobReport]) -> Self {
        reports
            .iter()
            .fold(BatchSummary::default(), |mut summary, report| {
                match report.status {
                    JobStatus::Ok => summary.ok += 1,
                    JobStatus::Skipped => summary.skipped += 1,
                    JobStatus::Error => summary.failed += 1,
                }
                summary
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub file: String,
    pub has_text: bool,
}

#[derive(Debug, Clone)]
pub struct TranslationJob {
    pub file: String,
    pub source_image_path: PathBuf,
    pub derived_text_path: PathBuf,
    pub overwrite: bool,
}

/// Number formed by the last run of ASCII digits in the file stem.
pub fn sequence_key(file_name: &str) -> Option<u128> {
    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|value| value.to_str())
        .unwrap_or(file_name);
    stem.split(|c: char| !c.is_ascii_digit())
        .filter(|run| !run.is_empty())
        .last()
        .map(|digits| digits.parse::<u128>().unwrap_or(u128::MAX))
}

/// Sequence key ascending, names without digits last, ties by file name.
pub fn compare_by_sequence(a: &str, b: &str) -> Ordering {
    let by_key = match (sequence_key(a), sequence_key(b)) {
        (Some(left), Some(right)) => left.cmp(&right),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_key.then_with(|| a.cmp(b))
}

/// `dir/name.txt` for `dir/name.ext`.
pub fn sidecar_path(image_path: &Path) -> PathBuf {
    image_path.with_extension("txt")
}

/// Accepted image files directly inside `dir`, in sequence order.
pub fn list_image_files(dir: &Path) -> Result<Vec<String>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| "failed to read directory entry")?;
        let path = entry.path();
        if !data::is_image_file(&path) {
            continue;
        }
        let file_type = entry
            .file_type()
            .with_context(|| "failed to read file type")?;
        if !file_type.is_file() {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) => files.push(name),
            Err(name) => warn!("skipping non UTF-8 file name: {:?}", name),
        }
    }
    files.sort_by(|a, b| compare_by_sequence(a, b));
    Ok(files)
}

pub fn list_artifacts(dir: &Path) -> Result<Vec<Artifact>> {
    Ok(list_image_files(dir)?
        .into_iter()
        .map(|file| {
            let has_text = sidecar_path(&dir.join(&file)).exists();
            Artifact { file, has_text }
        })
        .collect())
}

pub fn plan_jobs(dir: &Path, overwrite: bool) -> Result<Vec<TranslationJob>> {
    Ok(list_image_files(dir)?
        .into_iter()
        .map(|file| {
            let source_image_path = dir.join(&file);
            let derived_text_path = sidecar_path(&source_image_path);
            TranslationJob {
                file,
                source_image_path,
                derived_text_path,
                overwrite,
            }
        })
        .collect())
}

/// Writes the model reply verbatim, replacing any previous file.
pub async fn persist_text(path: &Path, text: &str) -> Result<(), TranslateError> {
    tokio::fs::write(path, text.as_bytes())
        .await
        .map_err(|source| TranslateError::Persistence {
            path: path.to_path_buf(),
            source,
        })
}

/// Translates every accepted image in `dir`. A failed file is reported and
/// the batch moves on; only an unreadable directory fails the whole call.
pub async fn translate_directory<P: Provider>(
    dir: &Path,
    options: &BatchOptions,
    provider: &P,
) -> Result<Vec<JobReport>> {
    let jobs = plan_jobs(dir, options.overwrite)?;
    info!("batch {}: {} image(s)", dir.display(), jobs.len());

    let mut reports = Vec::with_capacity(jobs.len());
    for job in jobs {
        if !job.overwrite && job.derived_text_path.exists() {
            info!("skipping {} (text exists)", job.file);
            reports.push(JobReport::new(&job.file, JobStatus::Skipped, None));
            continue;
        }
        match run_job(&job, &options.prompt, provider).await {
            Ok(()) => {
                info!("translated {}", job.file);
                reports.push(JobReport::new(&job.file, JobStatus::Ok, None));
            }
            Err(err) => {
                let message = format!("{:#}", err);
                warn!("failed to translate {}: {}", job.file, message);
                reports.push(JobReport::new(&job.file, JobStatus::Error, Some(message)));
            }
        }
    }
    Ok(reports)
}

async fn run_job<P: Provider>(job: &TranslationJob, prompt: &str, provider: &P) -> Result<()> {
    let bytes = tokio::fs::read(&job.source_image_path)
        .await
        .with_context(|| format!("failed to read image: {}", job.source_image_path.display()))?;
    let mime = data::detect_image_mime(&bytes, Some(&job.source_image_path))?;
    let attachment = DataAttachment {
        bytes,
        mime,
        name: Some(job.file.clone()),
    };
    let response = provider
        .clone()
        .append_user_input(prompt.to_string())
        .append_user_data(attachment)
        .generate()
        .await?;
    persist_text(&job.derived_text_path, &response.text).await?;
    Ok(())
}
