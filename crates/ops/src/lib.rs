#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Top-level patch-and-install orchestration
//!
//! Drives one installation request through its strictly sequential
//! stages: download, validate, extract, patch the manifest, repack,
//! sign, install. Each stage's artifact must exist on disk before the
//! next stage starts. This is the only layer that converts typed errors
//! into user-facing log events; nothing below it retries, and this layer
//! retries nothing either - downloads retry internally.

mod pipeline;

pub use pipeline::{PatchPipeline, PatchRequest, PipelineConfig};
