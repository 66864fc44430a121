// SPDX-License-Identifier: PolyForm-Shield-1.0

//! Backend loading (C2) and image preprocessing (C4): the two pieces of
//! the core that talk to the TensorFlow C API directly.

mod image;
mod loader;

pub use image::{build_tensor, ImageError, ImageFormat};
pub use loader::{load, load_with_params, LoadError, LoadedModel};
