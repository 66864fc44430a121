// SPDX-License-Identifier: PolyForm-Shield-1.0

//! Ingest pipeline (C6): bundle (tar[.gz]) and multipart model uploads.

use std::collections::BTreeSet;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;

use tfaas_protocol::{now_timestamp, ModelParams};
use tfaas_store::ParamsStore;

use crate::error::GatewayError;

/// Returns true if `name` is safe to use as a single path component (no
/// separators, no `.`/`..`).
pub fn is_filesystem_safe_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
}

/// Reject any tar entry whose path would land outside `root` once joined
/// on (§4.6, §8 S6).
fn safe_join(root: &Path, entry_path: &Path) -> Result<PathBuf, GatewayError> {
    if entry_path.is_absolute() {
        return Err(GatewayError::BadInput(format!(
            "refusing absolute tar entry path: {}",
            entry_path.display()
        )));
    }
    for component in entry_path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(GatewayError::BadInput(format!(
                    "refusing path-traversal tar entry: {}",
                    entry_path.display()
                )))
            }
        }
    }
    Ok(root.join(entry_path))
}

fn top_level_dir(entry_path: &Path) -> Option<String> {
    entry_path
        .components()
        .find_map(|c| match c {
            Component::Normal(s) => s.to_str().map(|s| s.to_string()),
            _ => None,
        })
}

/// Extract a tar archive (optionally gzip-wrapped) into `model_dir`.
/// Returns the set of top-level directory names touched, for cache
/// invalidation.
pub fn ingest_bundle(
    model_dir: &Path,
    bytes: &[u8],
    gzip: bool,
) -> Result<BTreeSet<String>, GatewayError> {
    let tmp = tempfile::NamedTempFile::new()?;
    std::fs::write(tmp.path(), bytes)?;

    let file = std::fs::File::open(tmp.path())?;
    let result = if gzip {
        extract_tar(GzDecoder::new(file), model_dir)
    } else {
        extract_tar(file, model_dir)
    };

    // tmp is removed on drop regardless of the outcome above.
    result
}

fn extract_tar<R: Read>(reader: R, model_dir: &Path) -> Result<BTreeSet<String>, GatewayError> {
    let mut archive = tar::Archive::new(reader);
    let mut touched = BTreeSet::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        let entry_path = entry.path()?.into_owned();
        let dest = safe_join(model_dir, &entry_path)?;

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        entry.unpack(&dest)?;

        if let Some(name) = top_level_dir(&entry_path) {
            touched.insert(name);
        }
    }

    Ok(touched)
}

/// Multipart upload fields, already extracted from the HTTP request by
/// the handler.
pub struct MultipartUpload<'a> {
    pub name: String,
    pub params_json: &'a [u8],
    pub model_filename: String,
    pub model_bytes: Vec<u8>,
    pub model_base64: bool,
    pub labels_filename: String,
    pub labels_bytes: &'a [u8],
}

/// Validate and materialize a multipart upload (§4.6). Returns the
/// ingested descriptor on success. Files are written in order; the
/// caller invalidates the cache and updates current-params only after
/// this returns `Ok`.
pub fn ingest_multipart(store: &ParamsStore, upload: MultipartUpload<'_>) -> Result<ModelParams, GatewayError> {
    if !is_filesystem_safe_name(&upload.name) {
        return Err(GatewayError::BadInput(format!(
            "model name '{}' is not filesystem-safe",
            upload.name
        )));
    }

    let mut params: ModelParams = serde_json::from_slice(upload.params_json)
        .map_err(|e| GatewayError::Malformed(format!("invalid params.json: {e}")))?;
    if params.name != upload.name {
        return Err(GatewayError::Conflict(format!(
            "params.name '{}' does not match upload name '{}'",
            params.name, upload.name
        )));
    }
    if params.timestamp.is_empty() {
        params.timestamp = now_timestamp();
    }

    store.write_params(&upload.name, &params)?;

    let model_dir = store.model_path(&upload.name);
    let model_bytes = if upload.model_base64 {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD
            .decode(&upload.model_bytes)
            .map_err(|e| GatewayError::BadInput(format!("invalid base64 model payload: {e}")))?
    } else {
        upload.model_bytes
    };
    let model_basename = Path::new(&upload.model_filename)
        .file_name()
        .ok_or_else(|| GatewayError::BadInput("missing model filename".to_string()))?;
    std::fs::write(model_dir.join(model_basename), &model_bytes)?;

    let labels_basename = Path::new(&upload.labels_filename)
        .file_name()
        .unwrap_or_else(|| std::ffi::OsStr::new("labels.txt"));
    std::fs::write(model_dir.join(labels_basename), upload.labels_bytes)?;

    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filesystem_safe_name_rejects_traversal() {
        assert!(is_filesystem_safe_name("mnist"));
        assert!(!is_filesystem_safe_name(""));
        assert!(!is_filesystem_safe_name("."));
        assert!(!is_filesystem_safe_name(".."));
        assert!(!is_filesystem_safe_name("a/b"));
    }

    #[test]
    fn safe_join_rejects_parent_dir_escape() {
        let root = Path::new("/models");
        assert!(safe_join(root, Path::new("../evil")).is_err());
        assert!(safe_join(root, Path::new("/etc/passwd")).is_err());
        assert!(safe_join(root, Path::new("mnist/params.json")).is_ok());
    }

    #[test]
    fn multipart_ingest_rejects_name_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParamsStore::new(dir.path());

        let upload = MultipartUpload {
            name: "mnist".to_string(),
            params_json: br#"{"name":"other"}"#,
            model_filename: "graph.pb".to_string(),
            model_bytes: vec![1, 2, 3],
            model_base64: false,
            labels_filename: "labels.txt".to_string(),
            labels_bytes: b"cat\ndog\n",
        };

        let err = ingest_multipart(&store, upload).unwrap_err();
        assert!(matches!(err, GatewayError::Conflict(_)));
    }

    #[test]
    fn multipart_ingest_writes_all_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParamsStore::new(dir.path());

        let upload = MultipartUpload {
            name: "mnist".to_string(),
            params_json: br#"{"name":"mnist","modelFile":"graph.pb"}"#,
            model_filename: "graph.pb".to_string(),
            model_bytes: vec![1, 2, 3],
            model_base64: false,
            labels_filename: "labels.txt".to_string(),
            labels_bytes: b"cat\ndog\n",
        };

        let params = ingest_multipart(&store, upload).unwrap();
        assert_eq!(params.name, "mnist");
        assert!(store.model_path("mnist").join("graph.pb").exists());
        assert!(store.model_path("mnist").join("labels.txt").exists());
        assert!(store.model_path("mnist").join("params.json").exists());
    }
}
