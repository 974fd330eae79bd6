//! Configuration parsing for the validation service.
//!
//! This module owns translation of environment variables into a
//! `ServiceConfig` struct which the rest of the service uses without
//! re-reading the environment.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use face_core::profile;

#[cfg(not(feature = "yolo-640"))]
const DEFAULT_MODEL_PATH: &str = "models/yolo11n_9ir_256_haface.onnx";
#[cfg(feature = "yolo-640")]
const DEFAULT_MODEL_PATH: &str = "models/yolo11n_9ir_640_hface.onnx";

const DEFAULT_PORT: u16 = 8080;

#[derive(Clone, Debug)]
/// Canonical configuration shared by every part of the service.
pub(crate) struct ServiceConfig {
    /// TCP port the HTTP server binds.
    pub port: u16,
    /// Emit per-request processing timings at debug level.
    pub debug: bool,
    /// ONNX model file loaded by every pool session.
    pub model_path: PathBuf,
    /// Number of inference sessions held by the pool. Zero selects the
    /// documented default.
    pub pool_size: usize,
    /// Per-cell attribute count of the model output head.
    pub output_channels: usize,
    /// Grid cell count of the model output head.
    pub output_grid_size: usize,
}

impl ServiceConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Parse configuration out of an arbitrary variable lookup.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let port = match lookup("PORT") {
            Some(value) => value
                .parse::<u16>()
                .with_context(|| format!("PORT must be a TCP port, got {value:?}"))?,
            None => DEFAULT_PORT,
        };

        let debug = lookup("DEBUG").as_deref() == Some("true");

        let model_path = lookup("MODEL_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH));

        let pool_size = match lookup("POOL_SIZE") {
            Some(value) => {
                let parsed = value
                    .parse::<i64>()
                    .with_context(|| format!("POOL_SIZE must be an integer, got {value:?}"))?;
                // Non-positive sizes fall back to the pool's documented default.
                usize::try_from(parsed).unwrap_or(0)
            }
            None => 0,
        };

        let output_channels = parse_dimension(
            &lookup,
            "MODEL_OUTPUT_CHANNELS",
            profile::OUTPUT_CHANNELS,
        )?;
        if output_channels < 5 {
            bail!("MODEL_OUTPUT_CHANNELS must be at least 5 (x, y, w, h, confidence)");
        }

        let output_grid_size = parse_dimension(
            &lookup,
            "MODEL_OUTPUT_GRID_SIZE",
            profile::OUTPUT_GRID_SIZE,
        )?;
        if output_grid_size == 0 {
            bail!("MODEL_OUTPUT_GRID_SIZE must be positive");
        }

        Ok(Self {
            port,
            debug,
            model_path,
            pool_size,
            output_channels,
            output_grid_size,
        })
    }

    /// Total float count of the model output buffer.
    pub fn output_len(&self) -> usize {
        self.output_channels * self.output_grid_size
    }
}

fn parse_dimension(
    lookup: impl Fn(&str) -> Option<String>,
    key: &str,
    default: usize,
) -> Result<usize> {
    match lookup(key) {
        Some(value) => value
            .parse::<usize>()
            .with_context(|| format!("{key} must be a positive integer, got {value:?}")),
        None => Ok(default),
    }
}
