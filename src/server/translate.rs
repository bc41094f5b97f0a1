use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::batch::{self, BatchOptions};
use crate::error::TranslateError;
use crate::providers::{self, Gemini, Provider};
use crate::render::RowBuffer;
use crate::settings::Settings;
use crate::translator::TranslationOutcome;

use super::models::{BatchResponse, ErrorResponse, PairsResponse, TranslateDirRequest, UploadForm};
use super::state::ServerState;
use super::util;

#[derive(Debug)]
pub(crate) struct ServerError {
    pub(crate) status: StatusCode,
    pub(crate) message: String,
}

impl ServerError {
    pub(crate) fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub(crate) fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for ServerError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<TranslateError>() {
            Some(TranslateError::MissingApiKey) => ServerError::bad_request(err.to_string()),
            _ => ServerError::internal(format!("{:#}", err)),
        }
    }
}

impl From<TranslateError> for ServerError {
    fn from(err: TranslateError) -> Self {
        ServerError::from(anyhow::Error::from(err))
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorResponse { error: self.message })).into_response()
    }
}

pub(crate) async fn translate_dir_request(
    state: &ServerState,
    request: TranslateDirRequest,
) -> Result<BatchResponse, ServerError> {
    let dir = util::resolve_dir(request.dir.as_deref())?;
    let is_dir = tokio::fs::metadata(&dir)
        .await
        .map(|meta| meta.is_dir())
        .unwrap_or(false);
    if !is_dir {
        return Err(ServerError::bad_request("dir not found or not a directory"));
    }

    let settings = &state.settings;
    let key = providers::resolve_api_key(request.api_key.as_deref(), settings.api_key.as_deref())?;
    let model = non_blank(request.model_name).unwrap_or_else(|| settings.model.clone());
    let prompt = non_blank(request.prompt).unwrap_or_else(|| settings.prompt.clone());
    let provider = Gemini::new(key).with_model(model);
    run_batch(&dir, request.overwrite, &provider, prompt).await
}

pub(crate) async fn upload_and_translate(
    state: &ServerState,
    form: UploadForm,
) -> Result<BatchResponse, ServerError> {
    let settings = &state.settings;
    let key = providers::resolve_api_key(form.api_key.as_deref(), settings.api_key.as_deref())?;
    let provider = Gemini::new(key).with_model(settings.model.clone());
    upload_with_provider(settings, form, &provider).await
}

/// Stores the uploaded pages in a fresh directory under the uploads root and
/// runs the batch there with the configured prompt.
pub(crate) async fn upload_with_provider<P: Provider>(
    settings: &Settings,
    form: UploadForm,
    provider: &P,
) -> Result<BatchResponse, ServerError> {
    if form.files.is_empty() {
        return Err(ServerError::bad_request("No files uploaded"));
    }

    let name = util::upload_dir_name(form.dir_name.as_deref(), util::now_millis());
    let dir = std::path::absolute(settings.uploads_dir.join(name))
        .map_err(|err| ServerError::internal(format!("invalid uploads dir: {}", err)))?;
    tokio::fs::create_dir_all(&dir).await.map_err(|source| {
        ServerError::from(TranslateError::Persistence {
            path: dir.clone(),
            source,
        })
    })?;
    for (file, bytes) in form.files {
        let path = dir.join(&file);
        tokio::fs::write(&path, bytes).await.map_err(|source| {
            ServerError::from(TranslateError::Persistence {
                path: path.clone(),
                source,
            })
        })?;
    }
    info!("stored upload in {}", dir.display());

    run_batch(&dir, form.overwrite, provider, settings.prompt.clone()).await
}

async fn run_batch<P: Provider>(
    dir: &Path,
    overwrite: bool,
    provider: &P,
    prompt: String,
) -> Result<BatchResponse, ServerError> {
    let options = BatchOptions { overwrite, prompt };
    let results = batch::translate_directory(dir, &options, provider).await?;
    Ok(BatchResponse {
        dir: dir.display().to_string(),
        processed: results.len(),
        results,
    })
}

/// Parsed view of a persisted reply, so the viewer does not need its own
/// parser.
pub(crate) fn pairs_view(file: &str, text: &str) -> PairsResponse {
    let outcome = TranslationOutcome::from_text(text);
    match outcome {
        TranslationOutcome::Structured(pairs) => {
            let mut buffer = RowBuffer::new();
            buffer.render(&pairs);
            PairsResponse {
                file: file.to_string(),
                format: "structured",
                rows: buffer.into_rows(),
                raw: None,
            }
        }
        TranslationOutcome::Raw(_) | TranslationOutcome::Empty => PairsResponse {
            file: file.to_string(),
            format: "raw",
            rows: Vec::new(),
            raw: Some(text.to_string()),
        },
    }
}

pub(crate) fn text_path(dir: &Path, file: &str) -> Result<PathBuf, ServerError> {
    let name = util::bare_file_name(file.trim())
        .ok_or_else(|| ServerError::bad_request("file must be a plain file name"))?;
    Ok(batch::sidecar_path(&dir.join(name)))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use insta::assert_json_snapshot;
    use tempfile::tempdir;

    fn state(settings: Settings) -> ServerState {
        ServerState {
            settings,
            viewer_html: String::new(),
        }
    }

    #[test]
    fn missing_key_maps_to_bad_request() {
        let err = ServerError::from(anyhow::Error::from(TranslateError::MissingApiKey));
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        let err = ServerError::from(TranslateError::ModelCall {
            status: 500,
            body: "boom".to_string(),
        });
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn pairs_view_snapshot() {
        let view = pairs_view(
            "page1.jpg",
            "```json\n[{\"original\": \"えっ\", \"Target\": \"欸\"}]\n```",
        );
        assert_json_snapshot!(view, @r###"
        {
          "file": "page1.jpg",
          "format": "structured",
          "rows": [
            {
              "kind": "original",
              "text": "えっ"
            },
            {
              "kind": "translation",
              "text": "欸"
            }
          ]
        }
        "###);
    }

    #[test]
    fn pairs_view_falls_back_to_raw() {
        let view = pairs_view("page2.jpg", "no json here");
        assert_eq!(view.format, "raw");
        assert!(view.rows.is_empty());
        assert_eq!(view.raw.as_deref(), Some("no json here"));
    }

    #[test]
    fn text_path_rejects_nested_names() {
        let dir = Path::new("/books/vol1");
        assert_eq!(
            text_path(dir, "page3.png").expect("path"),
            PathBuf::from("/books/vol1/page3.txt")
        );
        assert!(text_path(dir, "../secret.png").is_err());
    }

    #[tokio::test]
    async fn translate_dir_validates_before_calling_the_model() {
        let missing = translate_dir_request(&state(Settings::default()), TranslateDirRequest::default())
            .await
            .expect_err("no dir");
        assert_eq!(missing.message, "dir is required");

        let root = tempdir().expect("tempdir");
        let file = root.path().join("page1.jpg");
        std::fs::write(&file, b"jpeg").expect("write");
        let request = TranslateDirRequest {
            dir: Some(file.display().to_string()),
            ..TranslateDirRequest::default()
        };
        let err = translate_dir_request(&state(Settings::default()), request)
            .await
            .expect_err("not a dir");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "dir not found or not a directory");
    }

    #[tokio::test]
    async fn upload_without_files_is_rejected() {
        let settings = Settings {
            api_key: Some("test-key".to_string()),
            ..Settings::default()
        };
        let err = upload_and_translate(&state(settings), UploadForm::default())
            .await
            .expect_err("no files");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "No files uploaded");
    }
}
