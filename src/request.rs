//! Download request identity.
//!
//! A downloadable unit is identified by three parts: the bundle it belongs
//! to, the item number within the bundle, and the file format variant. The
//! triple forms the [`RequestKey`] used for in-flight deduplication; the
//! ledger additionally keys completed downloads by a canonical resource
//! locator derived from the same triple.

/// A request to download one format variant of one bundle item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    /// Bundle identifier, e.g. `"sci-fi-megabundle"`.
    pub collection_key: String,
    /// Item number within the bundle (1-based, from the details table).
    pub item_id: u32,
    /// File format variant, e.g. `"epub"` or `"pdf"`. Case-insensitive.
    pub variant: String,
}

/// Deduplication key for an in-flight request.
///
/// Two requests for the same (bundle, item, variant) triple compare equal
/// regardless of variant casing, so `"EPUB"` and `"epub"` cannot run
/// concurrently.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    collection_key: String,
    item_id: u32,
    variant: String,
}

impl DownloadRequest {
    /// Creates a request for one format variant of one bundle item.
    #[must_use]
    pub fn new(
        collection_key: impl Into<String>,
        item_id: u32,
        variant: impl Into<String>,
    ) -> Self {
        Self {
            collection_key: collection_key.into(),
            item_id,
            variant: variant.into(),
        }
    }

    /// Returns the deduplication key for this request.
    #[must_use]
    pub fn key(&self) -> RequestKey {
        RequestKey {
            collection_key: self.collection_key.clone(),
            item_id: self.item_id,
            variant: self.variant.to_lowercase(),
        }
    }

    /// Returns the canonical resource locator used as ledger identity.
    ///
    /// Format: `{collection_key}_{item_id}_{variant}` with the variant
    /// lowercased. Stable across runs, so a re-download of the same item
    /// overwrites its prior ledger row instead of duplicating it.
    #[must_use]
    pub fn resource_url(&self) -> String {
        format!(
            "{}_{}_{}",
            self.collection_key,
            self.item_id,
            self.variant.to_lowercase()
        )
    }

    /// Returns the filename the downloaded artifact is recorded under.
    #[must_use]
    pub fn filename(&self) -> String {
        format!("item_{}.{}", self.item_id, self.variant.to_lowercase())
    }
}

impl std::fmt::Display for RequestKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}#{} ({})",
            self.collection_key, self.item_id, self.variant
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_key_ignores_variant_case() {
        let upper = DownloadRequest::new("bundle-1", 7, "EPUB");
        let lower = DownloadRequest::new("bundle-1", 7, "epub");
        assert_eq!(upper.key(), lower.key());
    }

    #[test]
    fn test_request_key_distinguishes_items_and_variants() {
        let base = DownloadRequest::new("bundle-1", 7, "epub");
        assert_ne!(base.key(), DownloadRequest::new("bundle-1", 8, "epub").key());
        assert_ne!(base.key(), DownloadRequest::new("bundle-1", 7, "pdf").key());
        assert_ne!(base.key(), DownloadRequest::new("bundle-2", 7, "epub").key());
    }

    #[test]
    fn test_resource_url_is_stable_and_lowercased() {
        let request = DownloadRequest::new("humble_books", 3, "PDF");
        assert_eq!(request.resource_url(), "humble_books_3_pdf");
    }

    #[test]
    fn test_filename_derivation() {
        let request = DownloadRequest::new("humble_books", 3, "EPUB");
        assert_eq!(request.filename(), "item_3.epub");
    }
}
