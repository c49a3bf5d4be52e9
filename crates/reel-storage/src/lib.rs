//! Cloudflare R2 storage client for published renders and reference images.

pub mod client;
pub mod error;
pub mod operations;

pub use client::{R2Client, R2Config};
pub use error::{StorageError, StorageResult};
