//! In-memory [`BlobPort`]: bytes keyed by path, with `put` idempotent on
//! an existing key per spec.md's "blob put uses upsert: false" rule — a
//! conflicting write is treated as success rather than overwritten.

use async_trait::async_trait;
use dashmap::DashMap;
use tasker_shared::error::TaskerResult;
use tasker_shared::ports::BlobPort;

#[derive(Debug, Default)]
pub struct InMemoryBlob {
    objects: DashMap<String, Vec<u8>>,
    base_url: String,
}

impl InMemoryBlob {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            objects: DashMap::new(),
            base_url: base_url.into(),
        }
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), key)
    }
}

#[async_trait]
impl BlobPort for InMemoryBlob {
    async fn put(&self, key: &str, bytes: Vec<u8>, _content_type: &str) -> TaskerResult<String> {
        self.objects.entry(key.to_string()).or_insert(bytes);
        Ok(self.url_for(key))
    }

    async fn get(&self, key: &str) -> TaskerResult<Option<Vec<u8>>> {
        Ok(self.objects.get(key).map(|b| b.clone()))
    }

    async fn delete(&self, key: &str) -> TaskerResult<()> {
        self.objects.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_is_idempotent_on_conflicting_second_write() {
        let blob = InMemoryBlob::new("https://blobs.local");
        blob.put("t1/invoices/inv-1.pdf", b"first".to_vec(), "application/pdf")
            .await
            .unwrap();
        blob.put("t1/invoices/inv-1.pdf", b"second".to_vec(), "application/pdf")
            .await
            .unwrap();

        let bytes = blob.get("t1/invoices/inv-1.pdf").await.unwrap().unwrap();
        assert_eq!(bytes, b"first");
    }

    #[tokio::test]
    async fn delete_removes_the_object() {
        let blob = InMemoryBlob::new("https://blobs.local");
        blob.put("k", b"data".to_vec(), "application/octet-stream").await.unwrap();
        blob.delete("k").await.unwrap();
        assert!(blob.get("k").await.unwrap().is_none());
    }
}
