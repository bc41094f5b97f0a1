use serde::{Deserialize, Serialize};

use crate::batch::{Artifact, JobReport};
use crate::render::Row;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub(crate) struct DirQuery {
    pub(crate) dir: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub(crate) struct FileQuery {
    pub(crate) dir: Option<String>,
    pub(crate) file: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct TranslateDirRequest {
    pub(crate) dir: Option<String>,
    pub(crate) overwrite: bool,
    pub(crate) api_key: Option<String>,
    pub(crate) model_name: Option<String>,
    pub(crate) prompt: Option<String>,
}

/// Multipart fields of an upload, collected before anything touches disk.
#[derive(Debug, Default)]
pub(crate) struct UploadForm {
    pub(crate) files: Vec<(String, Vec<u8>)>,
    pub(crate) dir_name: Option<String>,
    pub(crate) overwrite: bool,
    pub(crate) api_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct BatchResponse {
    pub(crate) dir: String,
    pub(crate) processed: usize,
    pub(crate) results: Vec<JobReport>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ListResponse {
    pub(crate) dir: String,
    pub(crate) files: Vec<Artifact>,
}

#[derive(Debug, Serialize)]
pub(crate) struct PairsResponse {
    pub(crate) file: String,
    pub(crate) format: &'static str,
    pub(crate) rows: Vec<Row>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) raw: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    pub(crate) error: String,
}
