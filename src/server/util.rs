use std::path::{Component, Path, PathBuf};
use time::OffsetDateTime;

use super::translate::ServerError;

/// Absolute form of a client-supplied directory.
pub(crate) fn resolve_dir(raw: Option<&str>) -> Result<PathBuf, ServerError> {
    let raw = raw.map(str::trim).unwrap_or_default();
    if raw.is_empty() {
        return Err(ServerError::bad_request("dir is required"));
    }
    std::path::absolute(raw)
        .map_err(|err| ServerError::bad_request(format!("invalid dir '{}': {}", raw, err)))
}

/// `Some(name)` only when `name` is a single plain path component.
pub(crate) fn bare_file_name(name: &str) -> Option<&str> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !name.contains(['/', '\\']) => Some(name),
        _ => None,
    }
}

/// Browsers sending a directory prefix the file name with its relative path;
/// only the last segment is kept.
pub(crate) fn upload_file_name(name: &str) -> Option<&str> {
    let last = name.rsplit(['/', '\\']).next().unwrap_or(name).trim();
    bare_file_name(last)
}

/// Client-chosen directory name when it is a plain name, otherwise the
/// current time in milliseconds.
pub(crate) fn upload_dir_name(requested: Option<&str>, now_millis: i128) -> String {
    requested
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .and_then(bare_file_name)
        .map(str::to_string)
        .unwrap_or_else(|| now_millis.to_string())
}

pub(crate) fn now_millis() -> i128 {
    OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_names_reject_traversal() {
        assert_eq!(bare_file_name("page1.jpg"), Some("page1.jpg"));
        assert_eq!(bare_file_name("../page1.jpg"), None);
        assert_eq!(bare_file_name("sub/page1.jpg"), None);
        assert_eq!(bare_file_name("sub\\page1.jpg"), None);
        assert_eq!(bare_file_name(".."), None);
        assert_eq!(bare_file_name("/etc"), None);
        assert_eq!(bare_file_name(""), None);
    }

    #[test]
    fn uploads_keep_only_the_last_segment() {
        assert_eq!(upload_file_name("chapter1/page1.jpg"), Some("page1.jpg"));
        assert_eq!(upload_file_name("page2.png"), Some("page2.png"));
        assert_eq!(upload_file_name("chapter1/"), None);
        assert_eq!(upload_file_name("chapter1/.."), None);
    }

    #[test]
    fn upload_dir_falls_back_to_timestamp() {
        assert_eq!(upload_dir_name(Some(" vol1 "), 42), "vol1");
        assert_eq!(upload_dir_name(Some("../escape"), 42), "42");
        assert_eq!(upload_dir_name(Some(""), 1700000000000), "1700000000000");
        assert_eq!(upload_dir_name(None, 7), "7");
    }

    #[test]
    fn dir_is_required_and_made_absolute() {
        let err = resolve_dir(Some("  ")).expect_err("blank");
        assert_eq!(err.message, "dir is required");
        assert!(resolve_dir(None).is_err());
        let dir = resolve_dir(Some("relative/pages")).expect("resolve");
        assert!(dir.is_absolute());
        assert!(dir.ends_with("relative/pages"));
    }
}
