// SPDX-License-Identifier: PolyForm-Shield-1.0

//! Process-wide mutable state (§5, §9): current-params and the
//! `SessionConfig` blob, plus the handles every HTTP handler needs.

use std::sync::{Arc, RwLock};
use std::time::Instant;

use tfaas_protocol::ModelParams;
use tfaas_runtime::LoadError;
use tfaas_store::ParamsStore;

use crate::cache::{ModelCache, ModelLoader};

struct StoreLoader {
    store: ParamsStore,
    session_config: Arc<Vec<u8>>,
}

impl ModelLoader for StoreLoader {
    fn load(&self, name: &str) -> Result<tfaas_runtime::LoadedModel, LoadError> {
        tfaas_runtime::load(&self.store, name, self.session_config.clone())
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: ParamsStore,
    pub cache: Arc<ModelCache>,
    pub session_config: Arc<Vec<u8>>,
    /// Default model used when a request omits `model`. Swapped wholesale
    /// by ingest and by `POST /params`, never partially mutated.
    current_params: Arc<RwLock<Option<Arc<ModelParams>>>>,
    started_at: Instant,
}

impl AppState {
    pub fn new(model_dir: impl Into<std::path::PathBuf>, session_config: Vec<u8>, cache_limit: usize) -> Self {
        let store = ParamsStore::new(model_dir);
        let session_config = Arc::new(session_config);
        let loader = Arc::new(StoreLoader {
            store: store.clone(),
            session_config: session_config.clone(),
        });
        AppState {
            store,
            cache: Arc::new(ModelCache::new(loader, cache_limit)),
            session_config,
            current_params: Arc::new(RwLock::new(None)),
            started_at: Instant::now(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn current_model_name(&self) -> Option<String> {
        self.current_params
            .read()
            .expect("current_params lock poisoned")
            .as_ref()
            .map(|p| p.name.clone())
    }

    pub fn set_current_params(&self, params: ModelParams) {
        *self.current_params.write().expect("current_params lock poisoned") = Some(Arc::new(params));
    }
}
