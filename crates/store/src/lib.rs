// SPDX-License-Identifier: PolyForm-Shield-1.0

//! On-disk layout and persistence for model parameter descriptors (C1).
//!
//! A model named `mnist` lives at `{model_dir}/mnist/` and owns three
//! things: a `params.json` descriptor, a model blob (file or `SavedModel`
//! directory), and a labels file. This crate only knows how to find and
//! persist the descriptor; backend detection and loading belong to
//! `tfaas-runtime`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use tfaas_protocol::ModelParams;

const PARAMS_FILE: &str = "params.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("model '{0}' not found")]
    NotFound(String),
    #[error("malformed params.json for model '{name}': {source}")]
    Malformed {
        name: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("io error for model '{name}': {source}")]
    Io {
        name: String,
        #[source]
        source: io::Error,
    },
}

/// Path helpers and read/write access to `params.json` descriptors rooted
/// under a single model directory.
#[derive(Debug, Clone)]
pub struct ParamsStore {
    model_dir: PathBuf,
}

impl ParamsStore {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        ParamsStore {
            model_dir: model_dir.into(),
        }
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    /// Directory that holds everything belonging to `name`.
    pub fn model_path(&self, name: &str) -> PathBuf {
        self.model_dir.join(name)
    }

    /// Path to `name`'s `params.json`.
    pub fn params_path(&self, name: &str) -> PathBuf {
        self.model_path(name).join(PARAMS_FILE)
    }

    /// Path to the graph/SavedModel blob named in `params.model_file`.
    pub fn model_file_path(&self, name: &str, params: &ModelParams) -> PathBuf {
        self.model_path(name).join(&params.model_file)
    }

    /// Path to the labels file named in `params.labels_file`.
    pub fn labels_path(&self, name: &str, params: &ModelParams) -> PathBuf {
        self.model_path(name).join(&params.labels_file)
    }

    /// Read and parse `{model_dir}/{name}/params.json`.
    ///
    /// `timestamp` is backfilled in the returned value if the file on disk
    /// left it empty; the file itself is not rewritten.
    pub fn read_params(&self, name: &str) -> Result<ModelParams, StoreError> {
        let path = self.params_path(name);
        let raw = fs::read_to_string(&path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                StoreError::NotFound(name.to_string())
            } else {
                StoreError::Io {
                    name: name.to_string(),
                    source,
                }
            }
        })?;

        let mut params: ModelParams =
            serde_json::from_str(&raw).map_err(|source| StoreError::Malformed {
                name: name.to_string(),
                source,
            })?;
        params.fill_timestamp_if_empty();
        Ok(params)
    }

    /// Write `params` to `{model_dir}/{name}/params.json` atomically via a
    /// temp-file-then-rename, creating the model directory if needed.
    pub fn write_params(&self, name: &str, params: &ModelParams) -> Result<(), StoreError> {
        let dir = self.model_path(name);
        create_model_dir(&dir).map_err(|source| StoreError::Io {
            name: name.to_string(),
            source,
        })?;

        let json = serde_json::to_string_pretty(params).expect("ModelParams always serialises");

        let final_path = dir.join(PARAMS_FILE);
        let tmp_path = dir.join(format!("{PARAMS_FILE}.tmp"));

        fs::write(&tmp_path, json.as_bytes()).map_err(|source| StoreError::Io {
            name: name.to_string(),
            source,
        })?;
        fs::rename(&tmp_path, &final_path).map_err(|source| StoreError::Io {
            name: name.to_string(),
            source,
        })?;
        Ok(())
    }

    /// Names of every entry directly under `model_dir` that looks like a
    /// model directory (i.e. is itself a directory). Malformed or
    /// unreadable entries are skipped, not surfaced as an error, matching
    /// the registry's tolerant listing contract (C7).
    pub fn list_model_names(&self) -> Result<Vec<String>, StoreError> {
        let entries = match fs::read_dir(&self.model_dir) {
            Ok(entries) => entries,
            Err(source) if source.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    name: self.model_dir.display().to_string(),
                    source,
                })
            }
        };

        let mut names = Vec::new();
        for entry in entries.flatten() {
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Recursively remove a model's directory. Idempotent: removing a
    /// model that is already gone is not an error.
    pub fn remove_model(&self, name: &str) -> Result<(), StoreError> {
        let dir = self.model_path(name);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(source) if source.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io {
                name: name.to_string(),
                source,
            }),
        }
    }
}

#[cfg(unix)]
fn create_model_dir(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::create_dir_all(dir)?;
    fs::set_permissions(dir, fs::Permissions::from_mode(0o744))
}

#[cfg(not(unix))]
fn create_model_dir(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_params(name: &str) -> ModelParams {
        serde_json::from_value(serde_json::json!({
            "name": name,
            "modelFile": "graph.pb",
            "labelsFile": "labels.txt",
            "inputNode": "input",
            "outputNode": "output",
        }))
        .unwrap()
    }

    #[test]
    fn write_then_read_roundtrips_and_fills_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParamsStore::new(dir.path());

        store.write_params("mnist", &sample_params("mnist")).unwrap();
        let loaded = store.read_params("mnist").unwrap();

        assert_eq!(loaded.name, "mnist");
        assert_eq!(loaded.model_file, "graph.pb");
        assert!(!loaded.timestamp.is_empty());
    }

    #[test]
    fn read_missing_model_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParamsStore::new(dir.path());

        let err = store.read_params("ghost").unwrap_err();
        assert!(matches!(err, StoreError::NotFound(name) if name == "ghost"));
    }

    #[test]
    fn list_model_names_is_sorted_and_skips_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParamsStore::new(dir.path());

        store.write_params("zebra", &sample_params("zebra")).unwrap();
        store.write_params("alpha", &sample_params("alpha")).unwrap();
        fs::write(dir.path().join("stray.txt"), b"not a model").unwrap();

        let names = store.list_model_names().unwrap();
        assert_eq!(names, vec!["alpha".to_string(), "zebra".to_string()]);
    }

    #[test]
    fn list_model_names_on_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        let store = ParamsStore::new(missing);

        assert!(store.list_model_names().unwrap().is_empty());
    }

    #[test]
    fn remove_model_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParamsStore::new(dir.path());

        store.write_params("mnist", &sample_params("mnist")).unwrap();
        assert!(store.model_path("mnist").exists());

        store.remove_model("mnist").unwrap();
        assert!(!store.model_path("mnist").exists());

        // removing again must not error
        store.remove_model("mnist").unwrap();
    }
}
