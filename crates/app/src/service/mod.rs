//! Face validation service wiring the HTTP surface to the detection core.
//!
//! The module is split into focused submodules:
//! - `config`: environment configuration parsing.
//! - `pool`: bounded session pool with health-check replenishment.
//! - `pipeline`: per-request detection pipeline with bounded retries.
//! - `server`: Actix Web routes, body decoding, and error mapping.
//! - `data`: response envelopes and per-request timing records.
//! - `error`: domain-to-HTTP error translation.
//! - `telemetry`: tracing bootstrap.

pub(crate) mod config;
pub(crate) mod data;
pub(crate) mod error;
pub(crate) mod pipeline;
pub(crate) mod pool;
pub(crate) mod server;
pub(crate) mod telemetry;
