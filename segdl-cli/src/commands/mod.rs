//! CLI command implementations.

pub mod common;
pub mod config;
pub mod get;
pub mod list;
pub mod manage;
pub mod resume;
