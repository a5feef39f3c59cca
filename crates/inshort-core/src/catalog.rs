//! Boundary between the pipeline and a concrete remote catalog

use crate::http::FetchError;

/// One page of catalog items.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// Items to process, in catalog order
    pub items: Vec<T>,
    /// Catalog positions this page covered, including filtered-out entries.
    /// Zero means the catalog is exhausted.
    pub consumed: u64,
}

impl<T> Page<T> {
    /// Page where every returned entry is kept
    pub fn of(items: Vec<T>) -> Self {
        let consumed = items.len() as u64;
        Self { items, consumed }
    }

    pub fn is_exhausted(&self) -> bool {
        self.consumed == 0
    }
}

/// A paged remote collection whose items are assembled from several fetches.
///
/// Each method is one network call. Callers rate-limit; implementations
/// must not.
pub trait Catalog {
    type Item;

    /// Total number of items, `None` if the catalog does not say
    fn total_count(&self) -> Result<Option<u64>, FetchError>;

    fn fetch_page(&self, offset: u64, limit: u32) -> Result<Page<Self::Item>, FetchError>;

    /// Stable unique key, `None` if identifying fields are missing
    fn item_key(&self, item: &Self::Item) -> Option<String>;

    /// Short label for log lines
    fn describe(&self, item: &Self::Item) -> String {
        self.item_key(item)
            .unwrap_or_else(|| "<unidentified item>".to_string())
    }

    fn fetch_primary(&self, item: &Self::Item) -> Result<serde_json::Value, FetchError>;

    /// Sub-resource endpoint names fetched for every item
    fn sub_resources(&self) -> &[String];

    /// Field name used for `endpoint` in the assembled record
    fn sub_resource_field(&self, endpoint: &str) -> String {
        endpoint.to_string()
    }

    fn fetch_sub_resource(
        &self,
        item: &Self::Item,
        endpoint: &str,
    ) -> Result<serde_json::Value, FetchError>;

    /// Network calls needed to assemble one item
    fn requests_per_item(&self) -> u64 {
        1 + self.sub_resources().len() as u64
    }
}
