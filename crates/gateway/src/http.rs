// SPDX-License-Identifier: PolyForm-Shield-1.0

//! HTTP surface (§6): thin handlers that translate requests into calls
//! against C1/C3/C5/C6/C7 and shape the response.

use std::path::{Component, PathBuf};

use axum::body::Bytes;
use axum::extract::{FromRequest, Multipart, Path as AxPath, Query, Request, State};
use axum::http::{header, Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Form, Json, Router};
use prost::Message;
use serde::Deserialize;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use tfaas_protocol::{wire, ModelParams, Row};

use crate::error::GatewayError;
use crate::ingest::{self, MultipartUpload};
use crate::state::AppState;
use crate::{dispatch, registry};

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE])
        .allow_origin(AllowOrigin::any());

    Router::new()
        .route("/", get(root))
        .route("/upload", post(upload))
        .route("/delete", delete(delete_default))
        .route("/delete/{model}", delete(delete_named))
        .route("/models", get(list_models))
        .route("/params", post(set_params))
        .route("/params/{model}", get(get_params))
        .route("/json", post(predict_json))
        .route("/proto", post(predict_proto))
        .route("/image", post(classify))
        .route("/data", get(serve_data))
        .route("/status", get(status))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Trivial liveness probe (§12 Default/root handler).
async fn root() -> &'static str {
    "tfaas gateway"
}

/// Auto-detect bundle vs. multipart mode from `Content-Type` (§6) and
/// dispatch to the matching ingest path. Both extractors consume the
/// request body, so the branch is taken before either one runs.
async fn upload(State(state): State<AppState>, request: Request) -> Result<axum::response::Response, GatewayError> {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("multipart/form-data"))
        .unwrap_or(false);

    if is_multipart {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| GatewayError::BadInput(e.to_string()))?;
        Ok(upload_multipart(&state, multipart).await?.into_response())
    } else {
        let gzip = request
            .headers()
            .get(header::CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(|v| v == "gzip");

        let body = Bytes::from_request(request, &state)
            .await
            .map_err(|e| GatewayError::BadInput(e.to_string()))?;
        let gzip = gzip.unwrap_or_else(|| body.starts_with(&[0x1f, 0x8b]));

        let touched = ingest::ingest_bundle(state.store.model_dir(), &body, gzip)?;
        for name in &touched {
            state.cache.invalidate(name);
        }

        Ok(StatusCode::OK.into_response())
    }
}

async fn upload_multipart(state: &AppState, mut multipart: Multipart) -> Result<impl IntoResponse, GatewayError> {
    let mut name = None;
    let mut params_json = None;
    let mut model_filename = None;
    let mut model_bytes = None;
    let mut model_base64 = false;
    let mut labels_filename = None;
    let mut labels_bytes = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| GatewayError::BadInput(e.to_string()))?
    {
        match field.name().unwrap_or("").to_string().as_str() {
            "name" => {
                name = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| GatewayError::BadInput(e.to_string()))?,
                )
            }
            "params" => {
                params_json = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| GatewayError::BadInput(e.to_string()))?,
                )
            }
            "model" => {
                model_filename = Some(field.file_name().unwrap_or("model.bin").to_string());
                model_base64 = field
                    .headers()
                    .get(header::CONTENT_ENCODING)
                    .and_then(|v| v.to_str().ok())
                    .map(|v| v.eq_ignore_ascii_case("base64"))
                    .unwrap_or(false);
                model_bytes = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| GatewayError::BadInput(e.to_string()))?,
                )
            }
            "labels" => {
                labels_filename = Some(field.file_name().unwrap_or("labels.txt").to_string());
                labels_bytes = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| GatewayError::BadInput(e.to_string()))?,
                )
            }
            _ => {}
        }
    }

    let name = name.ok_or_else(|| GatewayError::BadInput("missing required field 'name'".to_string()))?;
    let params_json = params_json.ok_or_else(|| GatewayError::BadInput("missing required field 'params'".to_string()))?;
    let model_filename = model_filename.ok_or_else(|| GatewayError::BadInput("missing required field 'model'".to_string()))?;
    let model_bytes = model_bytes.ok_or_else(|| GatewayError::BadInput("missing required field 'model'".to_string()))?;
    let labels_filename = labels_filename.ok_or_else(|| GatewayError::BadInput("missing required field 'labels'".to_string()))?;
    let labels_bytes = labels_bytes.ok_or_else(|| GatewayError::BadInput("missing required field 'labels'".to_string()))?;

    let upload = MultipartUpload {
        name: name.clone(),
        params_json: &params_json,
        model_filename,
        model_bytes: model_bytes.to_vec(),
        model_base64,
        labels_filename,
        labels_bytes: &labels_bytes,
    };

    let params = ingest::ingest_multipart(&state.store, upload)?;
    state.cache.invalidate(&name);
    state.set_current_params(params.clone());

    Ok(Json(params))
}

#[derive(Deserialize)]
struct DeleteForm {
    model: String,
}

async fn delete_default(State(state): State<AppState>, Form(form): Form<DeleteForm>) -> Result<impl IntoResponse, GatewayError> {
    delete_model(&state, &form.model)
}

async fn delete_named(State(state): State<AppState>, AxPath(model): AxPath<String>) -> Result<impl IntoResponse, GatewayError> {
    delete_model(&state, &model)
}

fn delete_model(state: &AppState, name: &str) -> Result<StatusCode, GatewayError> {
    state.store.remove_model(name)?;
    state.cache.invalidate(name);
    Ok(StatusCode::OK)
}

async fn list_models(State(state): State<AppState>) -> Result<impl IntoResponse, GatewayError> {
    let models = registry::list(&state.store)?;
    Ok(Json(models))
}

async fn get_params(State(state): State<AppState>, AxPath(model): AxPath<String>) -> Result<impl IntoResponse, GatewayError> {
    let params = state.store.read_params(&model)?;
    Ok(Json(params))
}

async fn set_params(State(state): State<AppState>, Json(mut params): Json<ModelParams>) -> Result<impl IntoResponse, GatewayError> {
    rebase_relative_paths(&mut params, state.store.model_dir());

    // Eagerly try loading the posted model so a misconfigured default
    // surfaces in logs right away, rather than on the first prediction
    // request. A failed load here is not a request failure (§6).
    let name = params.name.clone();
    let probe_params = params.clone();
    let store = state.store.clone();
    let session_config = state.session_config.clone();
    let probe = tokio::task::spawn_blocking(move || {
        tfaas_runtime::load_with_params(&store, &name, probe_params, session_config)
    })
    .await;
    match probe {
        Ok(Err(e)) => tracing::warn!("gateway::http: unable to open model '{}': {e}", params.name),
        Err(join_err) => tracing::warn!(
            "gateway::http: model probe task panicked for '{}': {join_err}",
            params.name
        ),
        Ok(Ok(_)) => {}
    }

    state.set_current_params(params.clone());
    Ok(Json(params))
}

/// `POST /params` rebases relative `modelFile`/`labelsFile` paths under
/// the configured model directory (§6).
fn rebase_relative_paths(params: &mut ModelParams, model_dir: &std::path::Path) {
    if !params.model_file.is_empty() && !PathBuf::from(&params.model_file).is_absolute() {
        params.model_file = model_dir.join(&params.model_file).display().to_string();
    }
    if !params.labels_file.is_empty() && !PathBuf::from(&params.labels_file).is_absolute() {
        params.labels_file = model_dir.join(&params.labels_file).display().to_string();
    }
}

async fn predict_json(State(state): State<AppState>, Json(row): Json<Row>) -> Result<impl IntoResponse, GatewayError> {
    let default_model = state.current_model_name();
    let values = dispatch::predict_row(&state.cache, default_model.as_deref(), &row).await?;
    Ok(Json(values))
}

async fn predict_proto(State(state): State<AppState>, body: Bytes) -> Result<impl IntoResponse, GatewayError> {
    let wire_row =
        wire::Row::decode(body).map_err(|e| GatewayError::Malformed(format!("invalid protobuf Row: {e}")))?;
    let row = Row {
        keys: wire_row.key,
        values: wire_row.value,
        model: wire_row.model,
    };

    let default_model = state.current_model_name();
    let values = dispatch::predict_row(&state.cache, default_model.as_deref(), &row).await?;

    let predictions = wire::Predictions {
        prediction: values
            .into_iter()
            .map(|probability| wire::Class {
                label: String::new(),
                probability,
            })
            .collect(),
    };

    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        predictions.encode_to_vec(),
    ))
}

async fn classify(State(state): State<AppState>, mut multipart: Multipart) -> Result<impl IntoResponse, GatewayError> {
    let mut model = None;
    let mut filename = None;
    let mut image_bytes = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| GatewayError::BadInput(e.to_string()))?
    {
        match field.name().unwrap_or("").to_string().as_str() {
            "model" => {
                model = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| GatewayError::BadInput(e.to_string()))?,
                )
            }
            "image" => {
                filename = Some(field.file_name().unwrap_or("image").to_string());
                image_bytes = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| GatewayError::BadInput(e.to_string()))?,
                )
            }
            _ => {}
        }
    }

    let model = model.ok_or_else(|| GatewayError::BadInput("missing required field 'model'".to_string()))?;
    let filename = filename.ok_or_else(|| GatewayError::BadInput("missing required field 'image'".to_string()))?;
    let image_bytes = image_bytes.ok_or_else(|| GatewayError::BadInput("missing required field 'image'".to_string()))?;

    let result = dispatch::classify_image(&state.cache, &model, &filename, &image_bytes).await?;
    Ok(Json(result))
}

#[derive(Deserialize)]
struct DataQuery {
    model: String,
}

async fn serve_data(State(state): State<AppState>, Query(query): Query<DataQuery>) -> Result<impl IntoResponse, GatewayError> {
    let requested = PathBuf::from(&query.model);
    if requested.is_absolute() || requested.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(GatewayError::NotFound("path outside model directory".to_string()));
    }

    let full_path = state.store.model_dir().join(&requested);
    let bytes = tokio::fs::read(&full_path)
        .await
        .map_err(|_| GatewayError::NotFound(format!("no file at '{}'", query.model)))?;

    Ok(bytes)
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "cachedModels": state.cache.len(),
        "uptimeSecs": state.uptime_secs(),
    }))
}
