//! Receipt store collaborator.
//!
//! Accepts raw upload bytes, enforces the mime allowlist and size
//! ceiling, writes the bytes to disk under a UUID filename, and returns
//! the metadata the review core records. The core never inspects file
//! content.

use std::path::PathBuf;

use chrono::Utc;
use uuid::Uuid;

use crate::error::AppError;
use crate::review::state::ReceiptMeta;

/// Upload size ceiling: 5 MB.
pub const MAX_RECEIPT_BYTES: usize = 5 * 1024 * 1024;

const ACCEPTED_MIME_TYPES: &[(&str, &str)] = &[
    ("image/png", "png"),
    ("image/jpeg", "jpg"),
    ("application/pdf", "pdf"),
];

fn extension_for(mime_type: &str) -> Option<&'static str> {
    ACCEPTED_MIME_TYPES
        .iter()
        .find(|(mime, _)| *mime == mime_type)
        .map(|(_, ext)| *ext)
}

/// Disk-backed receipt store.
pub struct ReceiptStore {
    root: PathBuf,
}

impl ReceiptStore {
    pub fn new(root: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Validate and persist an uploaded receipt.
    pub async fn store(
        &self,
        original_name: &str,
        mime_type: &str,
        bytes: &[u8],
    ) -> Result<ReceiptMeta, AppError> {
        let Some(extension) = extension_for(mime_type) else {
            return Err(AppError::Validation(format!(
                "unsupported receipt type {}; accepted: png, jpeg, pdf",
                mime_type
            )));
        };
        if bytes.is_empty() {
            return Err(AppError::Validation("receipt file is empty".to_string()));
        }
        if bytes.len() > MAX_RECEIPT_BYTES {
            return Err(AppError::Validation(format!(
                "receipt exceeds the {} MB limit",
                MAX_RECEIPT_BYTES / (1024 * 1024)
            )));
        }

        let filename = format!("{}.{}", Uuid::new_v4(), extension);
        let path = self.root.join(&filename);
        tokio::fs::write(&path, bytes).await.map_err(|e| {
            AppError::Storage(crate::review::repository::RepositoryError::storage(
                "write receipt",
                e.to_string(),
            ))
        })?;

        Ok(ReceiptMeta {
            filename,
            original_name: original_name.to_string(),
            mime_type: mime_type.to_string(),
            size: bytes.len() as u64,
            path: path.to_string_lossy().to_string(),
            uploaded_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ReceiptStore {
        let dir = tempfile::tempdir().unwrap();
        // Leak the tempdir so the path outlives the test body.
        ReceiptStore::new(dir.keep()).unwrap()
    }

    #[tokio::test]
    async fn test_store_accepts_valid_receipt() {
        let store = store();
        let meta = store
            .store("receipt.png", "image/png", b"fake png bytes")
            .await
            .unwrap();

        assert!(meta.filename.ends_with(".png"));
        assert_eq!(meta.original_name, "receipt.png");
        assert_eq!(meta.mime_type, "image/png");
        assert_eq!(meta.size, 14);
        assert!(meta.is_complete());
        assert!(std::path::Path::new(&meta.path).exists());
    }

    #[tokio::test]
    async fn test_store_rejects_unsupported_mime() {
        let store = store();
        let err = store
            .store("notes.txt", "text/plain", b"hello")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_store_rejects_oversized_file() {
        let store = store();
        let oversized = vec![0u8; MAX_RECEIPT_BYTES + 1];
        let err = store
            .store("big.pdf", "application/pdf", &oversized)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_store_rejects_empty_file() {
        let store = store();
        let err = store.store("empty.pdf", "application/pdf", b"").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
