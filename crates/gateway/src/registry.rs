// SPDX-License-Identifier: PolyForm-Shield-1.0

//! Model registry (C7): enumerate every model present on disk.

use tfaas_protocol::ModelParams;
use tfaas_store::ParamsStore;

/// List every model under `store`'s root, skipping (not aborting on)
/// malformed descriptors. Ordered by directory name.
pub fn list(store: &ParamsStore) -> Result<Vec<ModelParams>, tfaas_store::StoreError> {
    let names = store.list_model_names()?;
    let mut params = Vec::with_capacity(names.len());
    for name in names {
        match store.read_params(&name) {
            Ok(p) => params.push(p),
            Err(err) => {
                tracing::warn!(model = %name, error = %err, "skipping malformed model descriptor");
            }
        }
    }
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_malformed_descriptors_but_keeps_good_ones() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParamsStore::new(dir.path());

        store
            .write_params(
                "good",
                &serde_json::from_value(serde_json::json!({"name": "good"})).unwrap(),
            )
            .unwrap();

        std::fs::create_dir_all(dir.path().join("bad")).unwrap();
        std::fs::write(dir.path().join("bad").join("params.json"), b"{not json").unwrap();

        let listed = list(&store).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "good");
    }
}
