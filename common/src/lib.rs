#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]
pub mod config;
pub mod error;
pub mod progress;
pub mod storage;
