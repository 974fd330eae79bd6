//! Per-request detection pipeline.
//!
//! Runs the CPU-bound stages in strict order — resize, preprocess, inference,
//! postprocess, cluster — against a leased session, retrying the whole inner
//! pipeline with linear back-off when the engine fails. Clustering cannot
//! fail, so a request only errors out of here after every attempt is spent.

use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use face_core::{cluster_boxes, decode_predictions, profile, Preprocessor, Session};
use image::{DynamicImage, GenericImageView};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::service::data::ProcessingTimings;

#[derive(Debug, Error)]
pub(crate) enum PipelineError {
    /// The caller went away; the result would be discarded anyway.
    #[error("request cancelled during processing")]
    Cancelled,
    #[error("{0:#}")]
    Failed(anyhow::Error),
}

/// Run detection over a decoded image with the configured retry policy.
///
/// `channels`/`grid` describe the model output head for this deployment. The
/// cancellation token is checked before every attempt so a disconnected
/// client never burns further inference time.
pub(crate) fn run_detection(
    image: &DynamicImage,
    session: &mut Session,
    preprocessor: &Preprocessor,
    channels: usize,
    grid: usize,
    cancel: &CancellationToken,
    timings: &mut ProcessingTimings,
) -> Result<Vec<[i32; 4]>, PipelineError> {
    let mut last_err = None;

    for attempt in 1..=profile::RETRY_ATTEMPTS {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        match detect_once(image, session, preprocessor, channels, grid, timings) {
            Ok(boxes) => return Ok(boxes),
            Err(err) => {
                warn!(attempt, "detection attempt failed: {err:#}");
                last_err = Some(err);
                if attempt < profile::RETRY_ATTEMPTS {
                    thread::sleep(Duration::from_millis(
                        u64::from(attempt) * profile::RETRY_DELAY_MS,
                    ));
                }
            }
        }
    }

    Err(PipelineError::Failed(
        last_err.unwrap_or_else(|| anyhow!("unknown detection failure")),
    ))
}

fn detect_once(
    image: &DynamicImage,
    session: &mut Session,
    preprocessor: &Preprocessor,
    channels: usize,
    grid: usize,
    timings: &mut ProcessingTimings,
) -> Result<Vec<[i32; 4]>> {
    let resize_start = Instant::now();
    let resized = preprocessor.resize(image);
    timings.resize = resize_start.elapsed();

    let preprocess_start = Instant::now();
    preprocessor.fill_input(&resized, session.input_mut());
    timings.preprocess = preprocess_start.elapsed();

    let inference_start = Instant::now();
    let output = session.run()?;
    timings.inference = inference_start.elapsed();

    let postprocess_start = Instant::now();
    let detections = decode_predictions(output, channels, grid, image.width(), image.height())
        .context("process predictions")?;
    timings.postprocess = postprocess_start.elapsed();

    let cluster_start = Instant::now();
    let boxes = cluster_boxes(&detections);
    timings.cluster = cluster_start.elapsed();

    Ok(boxes)
}
