//! Core face-detection pipeline shared by the validation service.
//!
//! The crate covers everything between a decoded image and a list of face
//! boxes: model profile constants, planar-tensor preprocessing with a SIMD
//! fast path, strided YOLO output decoding, and the density clustering that
//! collapses duplicate proposals into one box per face. HTTP concerns and
//! session pooling live in the service binary.

pub mod cluster;
pub mod geometry;
pub mod postprocess;
pub mod preprocess;
pub mod profile;
pub mod session;
mod simd;

pub use cluster::cluster_boxes;
pub use postprocess::{decode_predictions, Detection, OutputShapeError};
pub use preprocess::Preprocessor;
pub use session::Session;
