//! HTTP handlers.

pub mod files;
pub mod tus;
