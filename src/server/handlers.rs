use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode, header};
use axum::middleware::Next;
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::io::ErrorKind;
use std::sync::Arc;
use tracing::{info, warn};

use crate::batch;
use crate::data;
use crate::settings;

use super::models::{
    BatchResponse, DirQuery, FileQuery, ListResponse, PairsResponse, TranslateDirRequest,
    UploadForm,
};
use super::state::ServerState;
use super::translate::{self, ServerError};
use super::util;
use super::viewer;

pub async fn run_server(settings: settings::Settings, addr: String) -> Result<()> {
    let viewer_html = viewer::render_viewer_html(&settings)?;
    let body_limit = settings.body_limit_mb.saturating_mul(1024 * 1024);
    let state = Arc::new(ServerState {
        settings,
        viewer_html,
    });
    let app = router(state, body_limit);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind server address {}", addr))?;
    info!("viewer running at http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

fn router(state: Arc<ServerState>, body_limit: usize) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/api/list", get(list))
        .route("/api/image", get(image))
        .route("/api/text", get(text))
        .route("/api/pairs", get(pairs))
        .route("/api/translate-dir", post(translate_dir))
        .route("/api/upload-and-translate", post(upload_and_translate))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(axum::middleware::from_fn(cors_middleware))
}

async fn index(State(state): State<Arc<ServerState>>) -> Html<String> {
    Html(state.viewer_html.clone())
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn cors_middleware(req: Request<Body>, next: Next) -> Result<Response<Body>, StatusCode> {
    if req.method() == Method::OPTIONS {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        apply_cors_headers(response.headers_mut());
        return Ok(response);
    }
    let mut response = next.run(req).await;
    apply_cors_headers(response.headers_mut());
    Ok(response)
}

fn apply_cors_headers(headers: &mut HeaderMap) {
    headers.insert("access-control-allow-origin", HeaderValue::from_static("*"));
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET,POST,OPTIONS"),
    );
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static("content-type"),
    );
}

async fn list(Query(query): Query<DirQuery>) -> Result<Json<ListResponse>, ServerError> {
    let dir = util::resolve_dir(query.dir.as_deref())?;
    let files = batch::list_artifacts(&dir)?;
    Ok(Json(ListResponse {
        dir: dir.display().to_string(),
        files,
    }))
}

async fn image(Query(query): Query<FileQuery>) -> Result<Response<Body>, ServerError> {
    let dir = util::resolve_dir(query.dir.as_deref())?;
    let file = query.file.as_deref().unwrap_or_default().trim();
    let name = util::bare_file_name(file)
        .ok_or_else(|| ServerError::bad_request("file must be a plain file name"))?;
    let path = dir.join(name);
    let mime = data::mime_from_path(&path)
        .ok_or_else(|| ServerError::bad_request("Not an image file"))?;
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(ServerError::not_found("Not found"));
        }
        Err(err) => return Err(ServerError::internal(err.to_string())),
    };
    Ok(([(header::CONTENT_TYPE, mime)], bytes).into_response())
}

async fn text(Query(query): Query<FileQuery>) -> Result<Response<Body>, ServerError> {
    let (_, text) = read_text(&query).await?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        text,
    )
        .into_response())
}

async fn pairs(Query(query): Query<FileQuery>) -> Result<Json<PairsResponse>, ServerError> {
    let (file, text) = read_text(&query).await?;
    Ok(Json(translate::pairs_view(&file, &text)))
}

async fn read_text(query: &FileQuery) -> Result<(String, String), ServerError> {
    let dir = util::resolve_dir(query.dir.as_deref())?;
    let file = query.file.as_deref().unwrap_or_default().trim().to_string();
    let path = translate::text_path(&dir, &file)?;
    match tokio::fs::read_to_string(&path).await {
        Ok(text) => Ok((file, text)),
        Err(err) if err.kind() == ErrorKind::NotFound => Err(ServerError::not_found("Text not found")),
        Err(err) => Err(ServerError::internal(format!(
            "failed to read {}: {}",
            path.display(),
            err
        ))),
    }
}

async fn translate_dir(
    State(state): State<Arc<ServerState>>,
    Json(payload): Json<TranslateDirRequest>,
) -> Result<Json<BatchResponse>, ServerError> {
    translate::translate_dir_request(state.as_ref(), payload)
        .await
        .map(Json)
}

async fn upload_and_translate(
    State(state): State<Arc<ServerState>>,
    multipart: Multipart,
) -> Result<Json<BatchResponse>, ServerError> {
    let form = read_upload_form(multipart).await?;
    translate::upload_and_translate(state.as_ref(), form)
        .await
        .map(Json)
}

async fn read_upload_form(mut multipart: Multipart) -> Result<UploadForm, ServerError> {
    let invalid = |err: axum::extract::multipart::MultipartError| {
        ServerError::bad_request(format!("invalid multipart body: {}", err))
    };
    let mut form = UploadForm::default();
    while let Some(field) = multipart.next_field().await.map_err(invalid)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "files" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await.map_err(invalid)?;
                match util::upload_file_name(&file_name) {
                    Some(file_name) => form.files.push((file_name.to_string(), bytes.to_vec())),
                    None => warn!("ignoring upload with unusable name '{}'", file_name),
                }
            }
            "dirName" => form.dir_name = Some(field.text().await.map_err(invalid)?),
            "overwrite" => form.overwrite = field.text().await.map_err(invalid)? == "true",
            "apiKey" => form.api_key = Some(field.text().await.map_err(invalid)?),
            _ => {}
        }
    }
    Ok(form)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{JobReport, JobStatus};
    use crate::data::DataAttachment;
    use crate::providers::{Provider, ProviderFuture, ProviderResponse};
    use axum::extract::FromRequest;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    #[derive(Clone)]
    struct CannedProvider {
        reply: &'static str,
    }

    impl Provider for CannedProvider {
        fn append_user_input(self, _input: String) -> Self {
            self
        }

        fn append_user_data(self, _data: DataAttachment) -> Self {
            self
        }

        fn generate(self) -> ProviderFuture {
            let text = self.reply.to_string();
            Box::pin(async move {
                Ok(ProviderResponse {
                    text,
                    model: None,
                    usage: None,
                })
            })
        }
    }

    fn file_query(dir: &Path, file: &str) -> Query<FileQuery> {
        Query(FileQuery {
            dir: Some(dir.display().to_string()),
            file: Some(file.to_string()),
        })
    }

    async fn body_text(response: Response<Body>) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        String::from_utf8(bytes.to_vec()).expect("utf8")
    }

    fn multipart_request(parts: &[(&str, Option<&str>, &str)]) -> Request<Body> {
        let mut body = String::new();
        for (name, file_name, value) in parts {
            body.push_str("--BOUNDARY\r\n");
            match file_name {
                Some(file_name) => body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: image/jpeg\r\n\r\n",
                    name, file_name
                )),
                None => body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                    name
                )),
            }
            body.push_str(value);
            body.push_str("\r\n");
        }
        body.push_str("--BOUNDARY--\r\n");
        Request::builder()
            .method(Method::POST)
            .uri("/api/upload-and-translate")
            .header(header::CONTENT_TYPE, "multipart/form-data; boundary=BOUNDARY")
            .body(Body::from(body))
            .expect("request")
    }

    #[tokio::test]
    async fn list_reports_text_in_sequence_order() {
        let dir = tempdir().expect("tempdir");
        for name in ["page10.jpg", "page2.png", "page1.jpg", "notes.md"] {
            fs::write(dir.path().join(name), b"x").expect("write");
        }
        fs::write(dir.path().join("page2.txt"), "[]").expect("write");

        let Json(response) = list(Query(DirQuery {
            dir: Some(dir.path().display().to_string()),
        }))
        .await
        .expect("list");
        let files = response
            .files
            .iter()
            .map(|artifact| (artifact.file.as_str(), artifact.has_text))
            .collect::<Vec<_>>();
        assert_eq!(
            files,
            vec![("page1.jpg", false), ("page2.png", true), ("page10.jpg", false)]
        );
    }

    #[tokio::test]
    async fn list_requires_a_dir() {
        let err = list(Query(DirQuery::default())).await.expect_err("no dir");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn image_serves_bytes_with_their_content_type() {
        let dir = tempdir().expect("tempdir");
        fs::write(dir.path().join("page1.png"), b"png-bytes").expect("write");

        let response = image(file_query(dir.path(), "page1.png")).await.expect("image");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).expect("content type"),
            "image/png"
        );
        assert_eq!(body_text(response).await, "png-bytes");
    }

    #[tokio::test]
    async fn image_rejects_other_files_and_reports_missing_ones() {
        let dir = tempdir().expect("tempdir");
        fs::write(dir.path().join("notes.txt"), b"hello").expect("write");

        let err = image(file_query(dir.path(), "notes.txt")).await.expect_err("not an image");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "Not an image file");

        let err = image(file_query(dir.path(), "page9.jpg")).await.expect_err("missing");
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.message, "Not found");

        let err = image(file_query(dir.path(), "../page1.jpg")).await.expect_err("nested");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn text_returns_the_sidecar_or_not_found() {
        let dir = tempdir().expect("tempdir");
        fs::write(dir.path().join("page1.jpg"), b"jpeg").expect("write");
        fs::write(dir.path().join("page1.txt"), "[{\"original\": \"あ\"}]").expect("write");

        let response = text(file_query(dir.path(), "page1.jpg")).await.expect("text");
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).expect("content type"),
            "text/plain; charset=utf-8"
        );
        assert_eq!(body_text(response).await, "[{\"original\": \"あ\"}]");

        let err = text(file_query(dir.path(), "page2.jpg")).await.expect_err("missing");
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.message, "Text not found");
    }

    #[tokio::test]
    async fn upload_form_reads_every_field() {
        let request = multipart_request(&[
            ("files", Some("chapter1/page2.jpg"), "two"),
            ("files", Some("page1.jpg"), "one"),
            ("dirName", None, "vol1"),
            ("overwrite", None, "true"),
            ("apiKey", None, "form-key"),
            ("unknown", None, "ignored"),
        ]);
        let multipart = Multipart::from_request(request, &()).await.expect("multipart");
        let form = read_upload_form(multipart).await.expect("form");

        assert_eq!(
            form.files,
            vec![
                ("page2.jpg".to_string(), b"two".to_vec()),
                ("page1.jpg".to_string(), b"one".to_vec()),
            ]
        );
        assert_eq!(form.dir_name.as_deref(), Some("vol1"));
        assert!(form.overwrite);
        assert_eq!(form.api_key.as_deref(), Some("form-key"));
    }

    #[tokio::test]
    async fn upload_form_treats_other_overwrite_values_as_false() {
        let request = multipart_request(&[("overwrite", None, "yes")]);
        let multipart = Multipart::from_request(request, &()).await.expect("multipart");
        let form = read_upload_form(multipart).await.expect("form");
        assert!(!form.overwrite);
        assert!(form.files.is_empty());
    }

    #[tokio::test]
    async fn upload_stores_files_and_translates_them() {
        let root = tempdir().expect("tempdir");
        let settings = settings::Settings {
            uploads_dir: root.path().join("uploads"),
            ..settings::Settings::default()
        };
        let existing = root.path().join("uploads").join("vol1");
        fs::create_dir_all(&existing).expect("mkdir");
        fs::write(existing.join("page1.txt"), "stale").expect("write");

        let form = UploadForm {
            files: vec![
                ("page2.jpg".to_string(), b"two".to_vec()),
                ("page1.jpg".to_string(), b"one".to_vec()),
            ],
            dir_name: Some("vol1".to_string()),
            overwrite: true,
            api_key: None,
        };
        let provider = CannedProvider {
            reply: "[{\"original\": \"えっ\", \"translation\": \"欸\"}]",
        };
        let response = translate::upload_with_provider(&settings, form, &provider)
            .await
            .expect("upload");

        assert_eq!(response.processed, 2);
        assert_eq!(
            response.results,
            vec![
                JobReport {
                    file: "page1.jpg".to_string(),
                    status: JobStatus::Ok,
                    message: None,
                },
                JobReport {
                    file: "page2.jpg".to_string(),
                    status: JobStatus::Ok,
                    message: None,
                },
            ]
        );
        assert!(Path::new(&response.dir).is_absolute());
        assert!(response.dir.ends_with("vol1"));
        assert_eq!(fs::read(existing.join("page2.jpg")).expect("read"), b"two");
        assert_eq!(
            fs::read_to_string(existing.join("page1.txt")).expect("read"),
            provider.reply
        );
        assert_eq!(
            fs::read_to_string(existing.join("page2.txt")).expect("read"),
            provider.reply
        );
    }

    #[tokio::test]
    async fn upload_without_overwrite_keeps_existing_text() {
        let root = tempdir().expect("tempdir");
        let settings = settings::Settings {
            uploads_dir: root.path().to_path_buf(),
            ..settings::Settings::default()
        };
        fs::create_dir_all(root.path().join("vol2")).expect("mkdir");
        fs::write(root.path().join("vol2").join("page1.txt"), "kept").expect("write");

        let form = UploadForm {
            files: vec![("page1.jpg".to_string(), b"one".to_vec())],
            dir_name: Some("vol2".to_string()),
            ..UploadForm::default()
        };
        let provider = CannedProvider { reply: "[]" };
        let response = translate::upload_with_provider(&settings, form, &provider)
            .await
            .expect("upload");

        assert_eq!(response.results[0].status, JobStatus::Skipped);
        assert_eq!(
            fs::read_to_string(root.path().join("vol2").join("page1.txt")).expect("read"),
            "kept"
        );
    }
}
