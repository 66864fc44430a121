// SPDX-License-Identifier: PolyForm-Shield-1.0

//! Bounded model cache (C3): LRU eviction, single-flight cold loads,
//! shared-ownership `LoadedModel` references that outlive eviction.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::OnceCell;

use tfaas_runtime::{LoadError, LoadedModel};

/// Produces a [`LoadedModel`] for a given name. Implemented by
/// [`StoreLoader`] in production and by closures in tests, mirroring the
/// runtime's `ChatInference`-style trait-object indirection.
pub trait ModelLoader: Send + Sync {
    fn load(&self, name: &str) -> Result<LoadedModel, LoadError>;
}

impl<F> ModelLoader for F
where
    F: Fn(&str) -> Result<LoadedModel, LoadError> + Send + Sync,
{
    fn load(&self, name: &str) -> Result<LoadedModel, LoadError> {
        self(name)
    }
}

struct Slot {
    cell: Arc<OnceCell<Arc<LoadedModel>>>,
    last_access: Instant,
}

pub struct ModelCache {
    loader: Arc<dyn ModelLoader>,
    limit: usize,
    slots: Mutex<HashMap<String, Slot>>,
}

impl ModelCache {
    pub fn new(loader: Arc<dyn ModelLoader>, limit: usize) -> Self {
        ModelCache {
            loader,
            limit: limit.max(1),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Returns a live reference to `name`'s model, loading it on a cold
    /// miss. At most one load per name is ever in flight (§4.3, §8
    /// property 2); failed loads are not cached (§7) — `OnceCell` leaves
    /// itself uninitialized on an `Err`, so the next caller retries.
    pub async fn get(&self, name: &str) -> Result<Arc<LoadedModel>, LoadError> {
        let cell = self.cell_for(name);

        let loader = self.loader.clone();
        let owned_name = name.to_string();
        let result = cell
            .get_or_try_init(|| async move {
                tokio::task::spawn_blocking(move || loader.load(&owned_name))
                    .await
                    .unwrap_or_else(|join_err| {
                        Err(LoadError::Malformed(format!(
                            "loader task panicked: {join_err}"
                        )))
                    })
                    .map(Arc::new)
            })
            .await;

        match result {
            Ok(model) => {
                self.touch(name);
                Ok(model.clone())
            }
            Err(err) => {
                self.forget_if_unresolved(name, &cell);
                Err(err)
            }
        }
    }

    /// Install (or reuse) the pending slot for `name`, evicting the
    /// least-recently-used *resolved* entry first if the cache is at
    /// capacity.
    ///
    /// Only resolved slots are eviction candidates: a slot whose `OnceCell`
    /// hasn't resolved yet is a load in flight, and its `last_access` is
    /// only ever stamped once, at creation — it would otherwise look like
    /// the oldest entry in the cache for the entire duration of a slow cold
    /// load. Evicting it out from under the in-flight loader and letting a
    /// second `get` for the same name recreate the slot would invoke the
    /// loader twice concurrently, violating single-flight (§8 property 2).
    /// If every slot is currently pending, the cache is allowed to
    /// temporarily exceed `limit` rather than evict one.
    fn cell_for(&self, name: &str) -> Arc<OnceCell<Arc<LoadedModel>>> {
        let mut slots = self.slots.lock().expect("cache lock poisoned");

        if let Some(slot) = slots.get_mut(name) {
            slot.last_access = Instant::now();
            return slot.cell.clone();
        }

        if slots.len() >= self.limit {
            if let Some(victim) = least_recently_used_resolved(&slots) {
                slots.remove(&victim);
            }
        }

        let cell = Arc::new(OnceCell::new());
        slots.insert(
            name.to_string(),
            Slot {
                cell: cell.clone(),
                last_access: Instant::now(),
            },
        );
        cell
    }

    fn touch(&self, name: &str) {
        let mut slots = self.slots.lock().expect("cache lock poisoned");
        if let Some(slot) = slots.get_mut(name) {
            slot.last_access = Instant::now();
        }
    }

    /// A load that failed must not stay cached (§7): remove the slot if it
    /// still holds the cell we just saw fail (it may already have been
    /// invalidated or replaced by a concurrent caller).
    fn forget_if_unresolved(&self, name: &str, cell: &Arc<OnceCell<Arc<LoadedModel>>>) {
        let mut slots = self.slots.lock().expect("cache lock poisoned");
        if let Some(slot) = slots.get(name) {
            if Arc::ptr_eq(&slot.cell, cell) {
                slots.remove(name);
            }
        }
    }

    /// Remove `name`'s entry, if present. A subsequent `get` reloads from
    /// scratch.
    pub fn invalidate(&self, name: &str) {
        self.slots.lock().expect("cache lock poisoned").remove(name);
    }

    pub fn clear(&self) {
        self.slots.lock().expect("cache lock poisoned").clear();
    }

    pub fn len(&self) -> usize {
        self.slots.lock().expect("cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn least_recently_used_resolved(slots: &HashMap<String, Slot>) -> Option<String> {
    slots
        .iter()
        .filter(|(_, slot)| slot.cell.get().is_some())
        .min_by(|(name_a, a), (name_b, b)| {
            a.last_access
                .cmp(&b.last_access)
                .then_with(|| name_a.cmp(name_b))
        })
        .map(|(name, _)| name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc as StdArc;
    use std::time::Duration;

    use tfaas_protocol::{Backend, ModelParams};
    use tensorflow::Graph;

    fn fake_model(name: &str) -> LoadedModel {
        LoadedModel {
            params: ModelParams {
                name: name.to_string(),
                model_file: String::new(),
                labels_file: String::new(),
                op: None,
                input_node: None,
                output_node: None,
                img_channels: 3,
                description: String::new(),
                timestamp: String::new(),
            },
            backend: Backend::FrozenGraph,
            graph: StdArc::new(Graph::new()),
            labels: StdArc::new(Vec::new()),
            session_config: StdArc::new(Vec::new()),
        }
    }

    #[tokio::test]
    async fn evicts_least_recently_used_entry() {
        let loader = Arc::new(|name: &str| Ok(fake_model(name)));
        let cache = ModelCache::new(loader, 2);

        cache.get("a").await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        cache.get("b").await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        cache.get("a").await.unwrap(); // touches a again, b now oldest
        tokio::time::sleep(Duration::from_millis(2)).await;
        cache.get("c").await.unwrap(); // evicts b

        assert_eq!(cache.len(), 2);
        let remaining: std::collections::HashSet<String> =
            cache.slots.lock().unwrap().keys().cloned().collect();
        assert!(remaining.contains("a"));
        assert!(remaining.contains("c"));
        assert!(!remaining.contains("b"));
    }

    #[tokio::test]
    async fn single_flight_loads_once_for_concurrent_callers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_for_loader = calls.clone();
        let loader = Arc::new(move |name: &str| {
            calls_for_loader.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            Ok(fake_model(name))
        });
        let cache = Arc::new(ModelCache::new(loader, 10));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move { cache.get("m").await.unwrap() }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for model in &results {
            assert!(Arc::ptr_eq(model, &results[0]));
        }
    }

    #[tokio::test]
    async fn pending_load_is_not_evicted_by_a_concurrent_cold_miss() {
        let m_calls = Arc::new(AtomicUsize::new(0));
        let m_calls_for_loader = m_calls.clone();
        let loader = Arc::new(move |name: &str| {
            if name == "m" {
                m_calls_for_loader.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(50));
            }
            Ok(fake_model(name))
        });
        let cache = Arc::new(ModelCache::new(loader, 1));

        let cache_for_m = cache.clone();
        let m_handle = tokio::spawn(async move { cache_for_m.get("m").await.unwrap() });

        // Give "m"'s load time to start and its slot to be installed before a
        // distinct cold miss arrives; at limit 1 that miss must not pick the
        // still-pending "m" slot as the LRU victim.
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.get("other").await.unwrap();

        m_handle.await.unwrap();
        assert_eq!(m_calls.load(Ordering::SeqCst), 1);

        // "m" must still be live in the cache, not silently reloaded.
        cache.get("m").await.unwrap();
        assert_eq!(m_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_load_is_not_cached_and_can_be_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_for_loader = calls.clone();
        let loader = Arc::new(move |_: &str| {
            let attempt = calls_for_loader.fetch_add(1, Ordering::SeqCst);
            if attempt == 0 {
                Err(LoadError::NotFound("m".to_string()))
            } else {
                Ok(fake_model("m"))
            }
        });
        let cache = ModelCache::new(loader, 10);

        assert!(cache.get("m").await.is_err());
        assert!(cache.get("m").await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_fresh_load() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_for_loader = calls.clone();
        let loader = Arc::new(move |name: &str| {
            calls_for_loader.fetch_add(1, Ordering::SeqCst);
            Ok(fake_model(name))
        });
        let cache = ModelCache::new(loader, 10);

        cache.get("m").await.unwrap();
        cache.invalidate("m");
        cache.get("m").await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
