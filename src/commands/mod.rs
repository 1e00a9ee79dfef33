//! CLI command handlers

pub mod catalog;
pub mod config;
pub mod download;
pub mod models;
pub mod storage;

pub use catalog::run_catalog;
pub use config::run_config;
pub use download::run_download;
pub use models::{run_activate, run_delete, run_import, run_list};
pub use storage::{run_cleanup, run_storage};
