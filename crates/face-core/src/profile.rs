//! Compile-time constants describing the detection model in use.
//!
//! Two model variants exist: the default 256x256 build with a 6x1344 output
//! head, and the larger 640x640 build with a 5x8400 head (enabled by the
//! `yolo-640` feature). The output head dimensions are defaults only; the
//! service may override them at startup to match the model file it loads.

#[cfg(not(feature = "yolo-640"))]
mod variant {
    pub const INPUT_WIDTH: usize = 256;
    pub const INPUT_HEIGHT: usize = 256;
    pub const CONF_THRESHOLD: f32 = 0.8;
    pub const OUTPUT_CHANNELS: usize = 6;
    pub const OUTPUT_GRID_SIZE: usize = 1344;
}

#[cfg(feature = "yolo-640")]
mod variant {
    pub const INPUT_WIDTH: usize = 640;
    pub const INPUT_HEIGHT: usize = 640;
    pub const CONF_THRESHOLD: f32 = 0.6;
    pub const OUTPUT_CHANNELS: usize = 5;
    pub const OUTPUT_GRID_SIZE: usize = 8400;
}

pub use variant::{CONF_THRESHOLD, INPUT_HEIGHT, INPUT_WIDTH, OUTPUT_CHANNELS, OUTPUT_GRID_SIZE};

/// Total float count of the planar RGB input tensor.
pub const INPUT_TENSOR_LEN: usize = 3 * INPUT_WIDTH * INPUT_HEIGHT;

/// Inference attempts per request before the error is reported.
pub const RETRY_ATTEMPTS: u32 = 3;
/// Linear back-off unit between failed inference attempts.
pub const RETRY_DELAY_MS: u64 = 100;

/// Overlap above which a stray box is considered part of an existing cluster.
pub const IOU_THRESHOLD: f64 = 0.45;
/// Floor for the clustering radius when detected boxes are very small.
pub const DEFAULT_CLUSTER_SIZE: f64 = 50.0;
