// SPDX-License-Identifier: PolyForm-Shield-1.0

//! Image preprocessing (C4): bytes → normalized 4-D float tensor.

use tensorflow::{DataType, Graph, Scope, Session, SessionOptions, SessionRunArgs, Status, Tensor};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
}

impl ImageFormat {
    /// Infer a format from a client-supplied filename, per §4.4: the
    /// lowercased portion of the filename before the first dot, decoding
    /// PNG only when that token is exactly `"png"` and falling back to
    /// JPEG for everything else (never a hard error — format inference
    /// cannot fail).
    pub fn from_filename(name: &str) -> ImageFormat {
        let token = name.split('.').next().unwrap_or("").to_ascii_lowercase();
        if token == "png" {
            ImageFormat::Png
        } else {
            ImageFormat::Jpeg
        }
    }
}

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("failed to build decode graph: {0}")]
    GraphBuild(Status),
    #[error("failed to create decode session: {0}")]
    SessionCreate(Status),
    #[error("failed to run decode session: {0}")]
    SessionRun(Status),
}

/// Build a one-shot decode graph (placeholder → decode → cast → expand
/// dims) and run it once against `bytes`. No caching: a fresh graph and
/// session are created per call (§4.4).
pub fn build_tensor(
    bytes: &[u8],
    format: ImageFormat,
    channels: u8,
    session_config: &[u8],
) -> Result<Tensor<f32>, ImageError> {
    let mut scope = Scope::new_root_scope();

    let content = tensorflow::ops::Placeholder::new()
        .dtype(DataType::String)
        .build(&mut scope.with_op_name("content"))
        .map_err(ImageError::GraphBuild)?;

    let decoded = match format {
        ImageFormat::Png => tensorflow::ops::DecodePng::new()
            .channels(channels as i64)
            .build(content.clone(), &mut scope.with_op_name("decode_png"))
            .map_err(ImageError::GraphBuild)?,
        ImageFormat::Jpeg => tensorflow::ops::DecodeJpeg::new()
            .channels(channels as i64)
            .build(content.clone(), &mut scope.with_op_name("decode_jpeg"))
            .map_err(ImageError::GraphBuild)?,
    };

    let cast = tensorflow::ops::Cast::new()
        .DstT(DataType::Float)
        .build(decoded, &mut scope.with_op_name("cast"))
        .map_err(ImageError::GraphBuild)?;

    let axis = tensorflow::ops::constant(0i32, &mut scope.with_op_name("axis"))
        .map_err(ImageError::GraphBuild)?;

    let expanded = tensorflow::ops::ExpandDims::new()
        .build(cast, axis, &mut scope.with_op_name("expand_dims"))
        .map_err(ImageError::GraphBuild)?;

    let graph: Graph = scope.graph_mut().clone();

    let options = SessionOptions::new();
    if !session_config.is_empty() {
        options.set_config(session_config).map_err(ImageError::SessionCreate)?;
    }
    let session = Session::new(&options, &graph).map_err(|status| {
        tracing::warn!("runtime::image: failed to create decode session: {status}");
        ImageError::SessionCreate(status)
    })?;

    // TF string tensors are raw byte buffers, not necessarily valid UTF-8;
    // `String` is just FFI's carrier type here, mirroring the upstream
    // crate's own image-decoding examples.
    let mut content_tensor = Tensor::<String>::new(&[]);
    content_tensor[0] = unsafe { String::from_utf8_unchecked(bytes.to_vec()) };

    let mut args = SessionRunArgs::new();
    args.add_feed(&content.operation, 0, &content_tensor);
    let fetch = args.request_fetch(&expanded.operation, 0);

    session.run(&mut args).map_err(|status| {
        tracing::warn!("runtime::image: decode session run failed for {:?}: {status}", format);
        ImageError::SessionRun(status)
    })?;

    args.fetch(fetch).map_err(ImageError::SessionRun)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_inferred_from_token_before_first_dot() {
        assert_eq!(ImageFormat::from_filename("png.image1"), ImageFormat::Png);
        assert_eq!(ImageFormat::from_filename("PNG.image1"), ImageFormat::Png);
        assert_eq!(ImageFormat::from_filename("cat.png"), ImageFormat::Jpeg);
        assert_eq!(ImageFormat::from_filename("cat.jpg"), ImageFormat::Jpeg);
        assert_eq!(ImageFormat::from_filename("noext"), ImageFormat::Jpeg);
    }
}
