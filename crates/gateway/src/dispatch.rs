// SPDX-License-Identifier: PolyForm-Shield-1.0

//! Inference dispatcher (C5): row and image prediction against a loaded
//! model.

use std::cmp::Ordering;

use tensorflow::{Session, SessionRunArgs, Tensor};

use tfaas_protocol::{Backend, ClassifyResult, LabelResult, Row};
use tfaas_runtime::{ImageFormat, LoadedModel};

use crate::cache::ModelCache;
use crate::error::GatewayError;

const SAVED_MODEL_ENTRY_POINT: &str = "StatefulPartitionedCall";

/// Resolve the effective model name for a row: its own override, or the
/// server's current default (§4.5 step 1).
pub fn effective_model_name<'a>(row_model: &'a str, default_model: Option<&'a str>) -> Result<&'a str, GatewayError> {
    if !row_model.is_empty() {
        Ok(row_model)
    } else {
        default_model.ok_or_else(|| GatewayError::BadInput("no model specified and no default model configured".to_string()))
    }
}

/// Predict a single row of floats against the resolved model. Shared by
/// both the JSON and protobuf entry points — only the wire codec differs
/// between them.
pub async fn predict_row(cache: &ModelCache, default_model: Option<&str>, row: &Row) -> Result<Vec<f32>, GatewayError> {
    let name = effective_model_name(&row.model, default_model)?;
    let model = cache.get(name).await?;

    let mut input = Tensor::<f32>::new(&[1, row.values.len() as u64]);
    input.copy_from_slice(&row.values);

    run_session(&model, input)
}

/// Classify an image against the resolved model, returning the top-K
/// ranked labels (§4.5 shaping rule).
pub async fn classify_image(
    cache: &ModelCache,
    model_name: &str,
    filename: &str,
    image_bytes: &[u8],
) -> Result<ClassifyResult, GatewayError> {
    let model = cache.get(model_name).await?;

    let format = ImageFormat::from_filename(filename);
    let channels = model.params.img_channels;

    let input = tfaas_runtime::build_tensor(image_bytes, format, channels, &model.session_config)?;
    let probs = run_session(&model, input)?;

    Ok(ClassifyResult {
        filename: filename.to_string(),
        labels: top_k_labels(&probs, &model.labels),
    })
}

fn top_k_labels(probs: &[f32], labels: &[String]) -> Vec<LabelResult> {
    let top_n = labels.len().min(5);
    let k = probs.len().min(labels.len());

    let mut ranked: Vec<(usize, f32)> = (0..k).map(|i| (i, probs[i])).collect();
    ranked.sort_by(|(ia, pa), (ib, pb)| {
        pb.partial_cmp(pa).unwrap_or(Ordering::Equal).then_with(|| ia.cmp(ib))
    });
    ranked.truncate(top_n);

    ranked
        .into_iter()
        .map(|(i, p)| LabelResult {
            label: labels[i].clone(),
            probability: p,
        })
        .collect()
}

/// Create a fresh session for `model` and run it once with `input` bound
/// to the correct input operation (§4.5 steps 4-6). The session closes
/// when it drops, on every exit path including `?` early-returns.
fn run_session(model: &LoadedModel, input: Tensor<f32>) -> Result<Vec<f32>, GatewayError> {
    let options = model
        .session_options()
        .map_err(|e| GatewayError::RuntimeError(e.to_string()))?;
    let session = Session::new(&options, &model.graph).map_err(|e| GatewayError::RuntimeError(e.to_string()))?;

    let (input_op_name, output_op_name) = match model.backend {
        Backend::FrozenGraph => (
            model
                .params
                .input_node
                .as_deref()
                .ok_or_else(|| GatewayError::BadInput("model has no inputNode configured".to_string()))?,
            model
                .params
                .output_node
                .as_deref()
                .ok_or_else(|| GatewayError::BadInput("model has no outputNode configured".to_string()))?,
        ),
        Backend::SavedModel => (
            model
                .params
                .op
                .as_deref()
                .ok_or_else(|| GatewayError::BadInput("SavedModel has no op configured".to_string()))?,
            SAVED_MODEL_ENTRY_POINT,
        ),
    };

    let input_op = model
        .graph
        .operation_by_name_required(input_op_name)
        .map_err(|e| GatewayError::RuntimeError(e.to_string()))?;
    let output_op = model
        .graph
        .operation_by_name_required(output_op_name)
        .map_err(|e| GatewayError::RuntimeError(e.to_string()))?;

    let mut args = SessionRunArgs::new();
    args.add_feed(&input_op, 0, &input);
    let fetch = args.request_fetch(&output_op, 0);

    session.run(&mut args).map_err(|e| GatewayError::RuntimeError(e.to_string()))?;

    let output: Tensor<f32> = args
        .fetch(fetch)
        .map_err(|e| GatewayError::RuntimeError(e.to_string()))?;

    Ok(output.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_model_name_prefers_row_override() {
        assert_eq!(effective_model_name("mnist", Some("default")).unwrap(), "mnist");
        assert_eq!(effective_model_name("", Some("default")).unwrap(), "default");
        assert!(effective_model_name("", None).is_err());
    }

    #[test]
    fn top_k_labels_orders_by_descending_probability() {
        let probs = vec![0.1, 0.7, 0.2];
        let labels = vec!["cat".to_string(), "dog".to_string(), "bird".to_string()];

        let ranked = top_k_labels(&probs, &labels);
        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].label, "dog");
        assert_eq!(ranked[1].label, "bird");
        assert_eq!(ranked[2].label, "cat");
    }

    #[test]
    fn top_k_labels_truncates_to_five() {
        let probs: Vec<f32> = (0..10).map(|i| i as f32).collect();
        let labels: Vec<String> = (0..10).map(|i| format!("label{i}")).collect();

        let ranked = top_k_labels(&probs, &labels);
        assert_eq!(ranked.len(), 5);
        assert_eq!(ranked[0].label, "label9");
    }

    #[test]
    fn top_k_labels_empty_when_no_labels() {
        let probs = vec![0.1, 0.2, 0.3];
        let ranked = top_k_labels(&probs, &[]);
        assert!(ranked.is_empty());
    }

    #[test]
    fn top_k_labels_breaks_ties_by_original_index() {
        let probs = vec![0.5, 0.5, 0.9];
        let labels = vec!["a".to_string(), "b".to_string(), "c".to_string()];

        let ranked = top_k_labels(&probs, &labels);
        assert_eq!(ranked[0].label, "c");
        assert_eq!(ranked[1].label, "a");
        assert_eq!(ranked[2].label, "b");
    }
}
