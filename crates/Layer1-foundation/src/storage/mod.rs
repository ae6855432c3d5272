//! Storage module for taskpod
//!
//! - `json`: JSON - file-backed documents (config, task store)

mod json;

pub use json::{JsonStore, APP_DIR};
