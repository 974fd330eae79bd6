//! Actix Web surface: validation endpoint, health, and pool metrics.
//!
//! The validation handler dispatches body decoding on `Content-Type`, leases
//! a session from the pool, and runs the CPU-bound pipeline on the blocking
//! thread pool. Client disconnects cancel the per-request token so queued
//! work is abandoned instead of finished into the void.

use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use actix_multipart::Multipart;
use actix_web::http::header;
use actix_web::{web, HttpRequest, HttpResponse, Responder};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use face_core::{Preprocessor, Session};
use futures_util::{StreamExt, TryStreamExt};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::service::config::ServiceConfig;
use crate::service::data::{ProcessingTimings, ValidationResponse};
use crate::service::error::AppError;
use crate::service::pipeline::{run_detection, PipelineError};
use crate::service::pool::SessionPool;

pub(crate) const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Shared state backing the HTTP handlers.
pub(crate) struct AppState {
    pub pool: SessionPool<Session>,
    pub preprocessor: Arc<Preprocessor>,
    pub config: ServiceConfig,
}

pub(crate) fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/validate-face", web::post().to(validate_face))
        .route("/health", web::get().to(health))
        .route("/metrics", web::get().to(metrics));
}

async fn validate_face(
    req: HttpRequest,
    payload: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let total_start = Instant::now();
    let mut timings = ProcessingTimings::default();

    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    let bytes = if content_type.starts_with("application/json") {
        decode_json_body(payload).await?
    } else if content_type.starts_with("multipart/form-data") {
        read_multipart_file(&req, payload).await?
    } else {
        read_payload_bytes(payload).await?
    };

    // Cancelled when this handler future is dropped, i.e. the client is gone.
    let cancel = CancellationToken::new();
    let _cancel_guard = cancel.clone().drop_guard();

    let decode_start = Instant::now();
    let image = web::block(move || image::load_from_memory(&bytes))
        .await
        .map_err(|err| AppError::Processing(err.to_string()))?
        .map_err(|err| AppError::InvalidImage(err.to_string()))?;
    timings.decode = decode_start.elapsed();

    let mut lease = state.pool.acquire(&cancel).await?;

    let preprocessor = state.preprocessor.clone();
    let channels = state.config.output_channels;
    let grid = state.config.output_grid_size;
    let worker_cancel = cancel.clone();
    let (result, mut timings) = web::block(move || {
        let result = run_detection(
            &image,
            &mut lease,
            &preprocessor,
            channels,
            grid,
            &worker_cancel,
            &mut timings,
        );
        // The lease drops here, returning the session to the pool even when
        // the pipeline failed.
        (result, timings)
    })
    .await
    .map_err(|err| AppError::Processing(err.to_string()))?;

    let boxes = result.map_err(|err| match err {
        PipelineError::Cancelled => AppError::Processing("request cancelled".to_string()),
        PipelineError::Failed(cause) => AppError::Processing(format!("{cause:#}")),
    })?;

    timings.total = total_start.elapsed();
    if state.config.debug {
        timings.log(request_id());
    }

    Ok(HttpResponse::Ok().json(ValidationResponse::from_face_count(boxes.len())))
}

async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({ "status": "healthy" }))
}

async fn metrics(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(state.pool.metrics())
}

#[derive(Deserialize)]
struct ImageEnvelope {
    image: String,
}

/// `application/json` branch: `{ "image": "<base64>" }`.
async fn decode_json_body(payload: web::Payload) -> Result<Vec<u8>, AppError> {
    let bytes = read_payload_bytes(payload).await?;
    let envelope: ImageEnvelope = serde_json::from_slice(&bytes)
        .map_err(|err| AppError::InvalidRequest(format!("malformed JSON body: {err}")))?;
    BASE64
        .decode(envelope.image.as_bytes())
        .map_err(|err| AppError::InvalidRequest(format!("invalid base64 image data: {err}")))
}

/// `multipart/form-data` branch: the image travels in the `file` field.
async fn read_multipart_file(
    req: &HttpRequest,
    payload: web::Payload,
) -> Result<Vec<u8>, AppError> {
    let mut multipart = Multipart::new(req.headers(), payload);

    while let Some(mut field) = multipart
        .try_next()
        .await
        .map_err(|err| AppError::InvalidRequest(format!("malformed multipart body: {err}")))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = field
            .try_next()
            .await
            .map_err(|err| AppError::InvalidRequest(format!("malformed multipart body: {err}")))?
        {
            if bytes.len() + chunk.len() > MAX_BODY_BYTES {
                return Err(AppError::InvalidRequest(
                    "file exceeds the 10 MiB limit".to_string(),
                ));
            }
            bytes.extend_from_slice(&chunk);
        }

        if !bytes.is_empty() {
            return Ok(bytes);
        }
    }

    Err(AppError::InvalidRequest(
        "multipart form is missing an image in the `file` field".to_string(),
    ))
}

/// Raw-bytes branch, also used to slurp the JSON body.
async fn read_payload_bytes(mut payload: web::Payload) -> Result<Vec<u8>, AppError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = payload.next().await {
        let chunk =
            chunk.map_err(|err| AppError::InvalidRequest(format!("failed to read body: {err}")))?;
        if bytes.len() + chunk.len() > MAX_BODY_BYTES {
            return Err(AppError::InvalidRequest(
                "request body exceeds the 10 MiB limit".to_string(),
            ));
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

fn request_id() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default()
}
