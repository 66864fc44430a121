// SPDX-License-Identifier: PolyForm-Shield-1.0

//! Backend loading (C2): turn a model directory into a [`LoadedModel`].

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use tensorflow::{Graph, ImportGraphDefOptions, SavedModelBundle, SessionOptions};
use thiserror::Error;

use tfaas_protocol::{Backend, ModelParams};
use tfaas_store::{ParamsStore, StoreError};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("model '{0}' not found")]
    NotFound(String),
    #[error("malformed params for model '{0}'")]
    Malformed(String),
    #[error("failed to read graph blob for model '{name}': {source}")]
    GraphUnreadable { name: String, source: io::Error },
    #[error("failed to import graph for model '{0}': {1}")]
    GraphImport(String, tensorflow::Status),
    #[error("labels file unreadable for model '{name}': {source}")]
    LabelsUnreadable { name: String, source: io::Error },
    #[error("failed to load SavedModel for '{0}': {1}")]
    SavedModelLoad(String, tensorflow::Status),
}

impl From<StoreError> for LoadError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(name) => LoadError::NotFound(name),
            StoreError::Malformed { name, .. } => LoadError::Malformed(name),
            StoreError::Io { name, .. } => LoadError::Malformed(name),
        }
    }
}

/// In-memory materialization of one model (§3).
///
/// Immutable after construction. Cheap to clone: the graph and session
/// config are reference-counted so evicting a cache entry does not
/// invalidate a reference an in-flight inference call is still holding.
#[derive(Clone)]
pub struct LoadedModel {
    pub params: ModelParams,
    pub backend: Backend,
    pub graph: Arc<Graph>,
    pub labels: Arc<Vec<String>>,
    pub session_config: Arc<Vec<u8>>,
}

impl LoadedModel {
    /// Build a fresh `SessionOptions` carrying the process-wide session
    /// config. A new one is created per inference call (§4.5 step 4); the
    /// bytes themselves are shared, not recomputed.
    pub fn session_options(&self) -> Result<SessionOptions, tensorflow::Status> {
        let opts = SessionOptions::new();
        if !self.session_config.is_empty() {
            opts.set_config(&self.session_config)?;
        }
        Ok(opts)
    }
}

const SAVED_MODEL_PB: &str = "saved_model.pb";
const SAVED_MODEL_VARIABLES: &str = "variables";
const SAVED_MODEL_ASSETS: &str = "assets";

fn looks_like_saved_model(dir: &Path) -> bool {
    dir.join(SAVED_MODEL_PB).is_file()
        && dir.join(SAVED_MODEL_VARIABLES).is_dir()
        && dir.join(SAVED_MODEL_ASSETS).is_dir()
}

fn read_labels(path: &Path, name: &str) -> Result<Vec<String>, LoadError> {
    let raw = fs::read_to_string(path).map_err(|source| LoadError::LabelsUnreadable {
        name: name.to_string(),
        source,
    })?;
    Ok(raw
        .lines()
        .map(|line| line.trim_end_matches('\r').to_string())
        .collect())
}

/// Load `name` from `store`, discriminating frozen-graph vs. SavedModel by
/// the sentinel files described in §3 (C2's algorithm).
pub fn load(
    store: &ParamsStore,
    name: &str,
    session_config: Arc<Vec<u8>>,
) -> Result<LoadedModel, LoadError> {
    let params = store.read_params(name).inspect_err(|e| {
        tracing::warn!("runtime::loader: params unreadable for model {}: {e}", name);
    })?;
    load_with_params(store, name, params, session_config)
}

/// Same as [`load`], but with an already-known [`ModelParams`] instead of
/// re-reading `params.json` from disk — used for the eager validate-load a
/// fresh `/params` update triggers (§6) against the descriptor the caller
/// just posted, before it is ever persisted.
pub fn load_with_params(
    store: &ParamsStore,
    name: &str,
    params: ModelParams,
    session_config: Arc<Vec<u8>>,
) -> Result<LoadedModel, LoadError> {
    let dir = store.model_path(name);

    let result = if looks_like_saved_model(&dir) {
        load_saved_model(&dir, name, params, session_config)
    } else {
        load_frozen_graph(store, name, params, session_config)
    };

    match &result {
        Ok(model) => tracing::info!(
            "runtime::loader: loaded model {} as {:?}",
            name,
            model.backend
        ),
        Err(e) => tracing::warn!("runtime::loader: failed to load model {}: {e}", name),
    }

    result
}

fn load_frozen_graph(
    store: &ParamsStore,
    name: &str,
    params: ModelParams,
    session_config: Arc<Vec<u8>>,
) -> Result<LoadedModel, LoadError> {
    let graph_path = store.model_file_path(name, &params);
    let bytes = fs::read(&graph_path).map_err(|source| LoadError::GraphUnreadable {
        name: name.to_string(),
        source,
    })?;

    let mut graph = Graph::new();
    graph
        .import_graph_def(&bytes, &ImportGraphDefOptions::new())
        .map_err(|status| LoadError::GraphImport(name.to_string(), status))?;

    let labels = if params.labels_file.is_empty() {
        Vec::new()
    } else {
        read_labels(&store.labels_path(name, &params), name)?
    };

    Ok(LoadedModel {
        params,
        backend: Backend::FrozenGraph,
        graph: Arc::new(graph),
        labels: Arc::new(labels),
        session_config,
    })
}

fn load_saved_model(
    dir: &Path,
    name: &str,
    params: ModelParams,
    session_config: Arc<Vec<u8>>,
) -> Result<LoadedModel, LoadError> {
    let opts = SessionOptions::new();
    let mut bundle_graph = Graph::new();
    let bundle = SavedModelBundle::load(&opts, &["serve"], &mut bundle_graph, dir)
        .map_err(|status| LoadError::SavedModelLoad(name.to_string(), status))?;
    // We only need the graph for later fresh session creation (§4.5 step
    // 4); drop the bundle's own session immediately.
    drop(bundle);

    let labels = if params.labels_file.is_empty() {
        Vec::new()
    } else {
        let path = dir.join(&params.labels_file);
        if path.is_file() {
            read_labels(&path, name)?
        } else {
            Vec::new()
        }
    };

    Ok(LoadedModel {
        params,
        backend: Backend::SavedModel,
        graph: Arc::new(bundle_graph),
        labels: Arc::new(labels),
        session_config,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn looks_like_saved_model_requires_all_three_sentinels() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!looks_like_saved_model(dir.path()));

        fs::write(dir.path().join(SAVED_MODEL_PB), b"x").unwrap();
        fs::create_dir(dir.path().join(SAVED_MODEL_VARIABLES)).unwrap();
        assert!(!looks_like_saved_model(dir.path()));

        fs::create_dir(dir.path().join(SAVED_MODEL_ASSETS)).unwrap();
        assert!(looks_like_saved_model(dir.path()));
    }

    #[test]
    fn read_labels_trims_trailing_carriage_return() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.txt");
        fs::write(&path, "cat\r\ndog\r\nbird\n").unwrap();

        let labels = read_labels(&path, "m").unwrap();
        assert_eq!(labels, vec!["cat", "dog", "bird"]);
    }

    #[test]
    fn load_missing_model_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParamsStore::new(dir.path());

        let err = load(&store, "ghost", Arc::new(Vec::new())).unwrap_err();
        assert!(matches!(err, LoadError::NotFound(name) if name == "ghost"));
    }
}
