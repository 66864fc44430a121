// SPDX-License-Identifier: PolyForm-Shield-1.0

//! Wire and domain types shared between `tfaas-store`, `tfaas-runtime`,
//! `tfaas-gateway` and `tfaas-cli`.
//!
//! This crate intentionally has no knowledge of HTTP, the filesystem, or the
//! TensorFlow runtime; it only describes the shapes that cross those
//! boundaries.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

pub mod wire {
    //! Generated protobuf types for the binary `/proto` endpoint.
    include!(concat!(env!("OUT_DIR"), "/tfaas.rs"));
}

/// Backend discriminator for a loaded model (§3, §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    FrozenGraph,
    SavedModel,
}

/// Persistent per-model metadata descriptor (`params.json`).
///
/// Unknown JSON fields are tolerated on read (no `deny_unknown_fields`);
/// `timestamp` is filled in by the reader if empty, never by this type
/// itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelParams {
    /// Unique identifier; must equal the on-disk directory name.
    pub name: String,
    /// Relative filename of the graph blob, or the SavedModel directory marker.
    #[serde(default, rename = "modelFile")]
    pub model_file: String,
    /// Relative filename of the newline-separated labels file.
    #[serde(default, rename = "labelsFile")]
    pub labels_file: String,
    /// Operation name used when calling a SavedModel's entry point.
    #[serde(default)]
    pub op: Option<String>,
    /// Input operation name, for a frozen graph.
    #[serde(default, rename = "inputNode")]
    pub input_node: Option<String>,
    /// Output operation name, for a frozen graph.
    #[serde(default, rename = "outputNode")]
    pub output_node: Option<String>,
    /// Number of image channels this model expects (1 or 3).
    #[serde(default = "default_img_channels", rename = "imgChannels")]
    pub img_channels: u8,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub timestamp: String,
}

fn default_img_channels() -> u8 {
    3
}

impl ModelParams {
    /// Fill `timestamp` with the current wall-clock time if it is empty, as
    /// required by C1's read contract.
    pub fn fill_timestamp_if_empty(&mut self) {
        if self.timestamp.is_empty() {
            self.timestamp = now_timestamp();
        }
    }
}

/// Returns the current wall-clock time as a Unix-epoch-seconds string.
///
/// Used anywhere a `ModelParams.timestamp` needs to be backfilled: C1 reads,
/// C6 ingest, and C7 registry listing all go through this single helper so
/// that "current wall time" means the same thing everywhere.
pub fn now_timestamp() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    secs.to_string()
}

/// One inference input record (§3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Row {
    #[serde(default)]
    pub keys: Vec<String>,
    pub values: Vec<f32>,
    /// Optional override of the default model name.
    #[serde(default)]
    pub model: String,
}

/// A single ranked label/probability pair in an image classification result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelResult {
    pub label: String,
    pub probability: f32,
}

/// Image classification response (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifyResult {
    pub filename: String,
    pub labels: Vec<LabelResult>,
}
