//! Durable storage of partial and finished uploads.
//!
//! Every upload is a data file `<dir>/<id>` plus a JSON sidecar
//! `<dir>/<id>.json` holding its [`PersistedUpload`] record. The offset in
//! the sidecar is only advanced after the bytes it covers have been synced,
//! so a crash can lose an in-flight chunk but never claim bytes that are not
//! on disk.

pub mod error;
pub mod record;
pub mod store;

pub use error::StoreError;
pub use record::{PersistedUpload, generate_upload_id};
pub use store::{FileStore, Finalized};
