//! Congress.gov v3 bill catalog

use inshort_core::{Catalog, FetchError, HttpClient, Page};
use serde_json::Value;

use crate::state::{field_name, BillRef};

/// List ordering: most recently updated first
const SORT: &str = "updateDate desc";

/// Congress.gov endpoints for one congress.
pub struct CongressCatalog {
    http: HttpClient,
    base_url: String,
    api_key: String,
    congress: u32,
    sub_resources: Vec<String>,
}

impl std::fmt::Debug for CongressCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CongressCatalog")
            .field("base_url", &self.base_url)
            .field("congress", &self.congress)
            .field("sub_resources", &self.sub_resources)
            .finish_non_exhaustive()
    }
}

impl CongressCatalog {
    pub fn new(
        http: HttpClient,
        base_url: &str,
        api_key: impl Into<String>,
        congress: u32,
        sub_resources: Vec<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            congress,
            sub_resources,
        }
    }

    fn list_url(&self) -> String {
        format!("{}/bill/{}", self.base_url, self.congress)
    }

    fn detail_url(&self, bill: &BillRef) -> Result<String, FetchError> {
        let (congress, bill_type, number) = bill
            .path_parts()
            .ok_or_else(|| FetchError::Malformed("bill without identifying fields".into()))?;
        Ok(format!("{}/bill/{congress}/{bill_type}/{number}", self.base_url))
    }

    fn query(&self, extra: &[(&'static str, String)]) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("api_key", self.api_key.clone()),
            ("format", "json".to_string()),
        ];
        query.extend_from_slice(extra);
        query
    }
}

impl Catalog for CongressCatalog {
    type Item = BillRef;

    fn total_count(&self) -> Result<Option<u64>, FetchError> {
        let body = self
            .http
            .get_json(&self.list_url(), &self.query(&[("limit", "1".into())]))?;
        Ok(parse_count(&body))
    }

    fn fetch_page(&self, offset: u64, limit: u32) -> Result<Page<BillRef>, FetchError> {
        let query = self.query(&[
            ("offset", offset.to_string()),
            ("limit", limit.to_string()),
            ("sort", SORT.to_string()),
        ]);
        let body = self.http.get_json(&self.list_url(), &query)?;
        parse_page(&body, self.congress)
    }

    fn item_key(&self, bill: &BillRef) -> Option<String> {
        bill.key()
    }

    fn describe(&self, bill: &BillRef) -> String {
        match &bill.title {
            Some(title) => {
                let short: String = title.chars().take(60).collect();
                format!("{} {short}", bill.label())
            }
            None => bill.label(),
        }
    }

    fn fetch_primary(&self, bill: &BillRef) -> Result<Value, FetchError> {
        let body = self.http.get_json(&self.detail_url(bill)?, &self.query(&[]))?;
        if body.get("bill").is_none() {
            return Err(FetchError::Malformed("detail response has no bill".into()));
        }
        Ok(body)
    }

    fn sub_resources(&self) -> &[String] {
        &self.sub_resources
    }

    fn sub_resource_field(&self, endpoint: &str) -> String {
        field_name(endpoint)
    }

    fn fetch_sub_resource(&self, bill: &BillRef, endpoint: &str) -> Result<Value, FetchError> {
        let url = format!("{}/{endpoint}", self.detail_url(bill)?);
        self.http.get_json(&url, &self.query(&[]))
    }
}

/// `pagination.count` of a list response
pub fn parse_count(body: &Value) -> Option<u64> {
    body.pointer("/pagination/count").and_then(Value::as_u64)
}

/// Bills of `congress` from a list response.
///
/// `consumed` counts every entry so the offset advances past filtered ones.
pub fn parse_page(body: &Value, congress: u32) -> Result<Page<BillRef>, FetchError> {
    let bills = body
        .get("bills")
        .and_then(Value::as_array)
        .ok_or_else(|| FetchError::Malformed("list response has no bills array".into()))?;

    let items: Vec<BillRef> = bills
        .iter()
        .map(BillRef::from_json)
        .filter(|bill| {
            let keep = bill.congress.is_none_or(|c| c == congress);
            if !keep {
                log::debug!("Skipping {} from congress {:?}", bill.label(), bill.congress);
            }
            keep
        })
        .collect();

    Ok(Page {
        items,
        consumed: bills.len() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_count_reads_pagination() {
        let body = json!({ "bills": [], "pagination": { "count": 12931, "next": null } });
        assert_eq!(parse_count(&body), Some(12931));
        assert_eq!(parse_count(&json!({ "bills": [] })), None);
    }

    #[test]
    fn parse_page_filters_other_congresses() {
        let body = json!({
            "bills": [
                { "congress": 119, "type": "HR", "number": "1" },
                { "congress": 118, "type": "HR", "number": "2" },
                { "congress": 119, "type": "S", "number": "3" },
            ]
        });
        let page = parse_page(&body, 119).unwrap();
        assert_eq!(page.consumed, 3);
        let keys: Vec<_> = page.items.iter().filter_map(BillRef::key).collect();
        assert_eq!(keys, vec!["119-HR-1", "119-S-3"]);
    }

    #[test]
    fn parse_page_keeps_unidentified_entries() {
        let body = json!({ "bills": [{ "type": "HR" }] });
        let page = parse_page(&body, 119).unwrap();
        assert_eq!(page.items.len(), 1);
        assert!(page.items[0].key().is_none());
    }

    #[test]
    fn empty_page_is_exhausted() {
        let page = parse_page(&json!({ "bills": [] }), 119).unwrap();
        assert!(page.is_exhausted());
    }

    #[test]
    fn missing_bills_is_malformed() {
        let err = parse_page(&json!({ "error": "bad key" }), 119).unwrap_err();
        assert!(matches!(err, FetchError::Malformed(_)));
    }
}
