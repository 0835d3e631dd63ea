//! # Blob Port
//!
//! Byte storage for generated artifacts (rendered PDFs, email
//! attachments). Kept separate from [`crate::ports::data::DataPort`]
//! because blob stores and row stores scale and fail independently.

use crate::error::TaskerResult;
use async_trait::async_trait;

#[async_trait]
pub trait BlobPort: Send + Sync + std::fmt::Debug {
    /// Store `bytes` under `key`, returning a URL or path a client can use
    /// to retrieve it later.
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> TaskerResult<String>;
    async fn get(&self, key: &str) -> TaskerResult<Option<Vec<u8>>>;
    async fn delete(&self, key: &str) -> TaskerResult<()>;
}
