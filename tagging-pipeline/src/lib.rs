#![allow(clippy::missing_docs_in_private_items)]

pub mod pipeline;
mod reservoir;

pub use pipeline::{TaggingConfig, TaggingPipeline, TaggingRunOutcome, TaggingRunRequest};
