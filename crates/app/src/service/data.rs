//! Response envelopes and per-request timing records.

use std::time::Duration;

use serde::Serialize;
use tracing::debug;

#[derive(Debug, Serialize)]
pub(crate) struct ValidationResponse {
    pub is_valid: bool,
    pub face_count: usize,
    pub message: String,
}

impl ValidationResponse {
    /// Build the response for a final face count.
    pub fn from_face_count(face_count: usize) -> Self {
        let message = match face_count {
            0 => "No faces detected".to_string(),
            1 => "Valid single face detected".to_string(),
            n => format!("Multiple faces detected: {n}"),
        };
        Self {
            is_valid: face_count == 1,
            face_count,
            message,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Default)]
/// Wall-clock duration of every pipeline stage for one request.
///
/// Only surfaced through debug logging; never part of the response.
pub(crate) struct ProcessingTimings {
    pub decode: Duration,
    pub resize: Duration,
    pub preprocess: Duration,
    pub inference: Duration,
    pub postprocess: Duration,
    pub cluster: Duration,
    pub total: Duration,
}

impl ProcessingTimings {
    pub fn log(&self, request_id: u128) {
        debug!(
            request_id,
            decode_ms = self.decode.as_secs_f64() * 1e3,
            resize_ms = self.resize.as_secs_f64() * 1e3,
            preprocess_ms = self.preprocess.as_secs_f64() * 1e3,
            inference_ms = self.inference.as_secs_f64() * 1e3,
            postprocess_ms = self.postprocess.as_secs_f64() * 1e3,
            cluster_ms = self.cluster.as_secs_f64() * 1e3,
            total_ms = self.total.as_secs_f64() * 1e3,
            "request processing times"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn face_count_messages() {
        let none = ValidationResponse::from_face_count(0);
        assert!(!none.is_valid);
        assert_eq!(none.message, "No faces detected");

        let one = ValidationResponse::from_face_count(1);
        assert!(one.is_valid);
        assert_eq!(one.message, "Valid single face detected");

        let many = ValidationResponse::from_face_count(3);
        assert!(!many.is_valid);
        assert_eq!(many.message, "Multiple faces detected: 3");
    }

    #[test]
    fn error_body_omits_empty_details() {
        let body = ErrorBody {
            code: "invalid_request",
            message: "bad payload".into(),
            details: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("details").is_none());
        assert_eq!(json["code"], "invalid_request");
    }
}
