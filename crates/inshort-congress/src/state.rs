//! Bill identities and the sub-resource set

use serde_json::Value;

/// Sub-resource endpoints fetched for every bill by default
pub const DEFAULT_SUB_RESOURCES: [&str; 11] = [
    "actions",
    "sponsors",
    "cosponsors",
    "amendments",
    "subjects",
    "summaries",
    "titles",
    "text",
    "related",
    "committees",
    "cbo-cost-estimates",
];

pub fn default_sub_resources() -> Vec<String> {
    DEFAULT_SUB_RESOURCES.iter().map(|s| s.to_string()).collect()
}

/// Record field name for an endpoint (`cbo-cost-estimates` → `cbo_cost_estimates`)
pub fn field_name(endpoint: &str) -> String {
    endpoint.replace('-', "_")
}

/// One entry of the bill list endpoint.
///
/// Identifying fields stay optional: list entries occasionally arrive
/// without them and must be skipped rather than rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillRef {
    pub congress: Option<u32>,
    pub bill_type: Option<String>,
    pub number: Option<String>,
    pub title: Option<String>,
}

impl BillRef {
    /// Read a list entry. `number` and `congress` may be strings or numbers.
    pub fn from_json(value: &Value) -> Self {
        Self {
            congress: value.get("congress").and_then(as_u32),
            bill_type: non_empty(value.get("type").and_then(Value::as_str)),
            number: value.get("number").and_then(as_string),
            title: non_empty(value.get("title").and_then(Value::as_str)),
        }
    }

    /// `"{congress}-{TYPE}-{number}"`, `None` if any part is missing
    pub fn key(&self) -> Option<String> {
        let (congress, bill_type, number) = self.parts()?;
        Some(format!("{congress}-{}-{number}", bill_type.to_uppercase()))
    }

    /// `(congress, lower-case type, number)` as used in detail URLs
    pub fn path_parts(&self) -> Option<(u32, String, &str)> {
        let (congress, bill_type, number) = self.parts()?;
        Some((congress, bill_type.to_lowercase(), number))
    }

    /// `HR1234` style label
    pub fn label(&self) -> String {
        format!(
            "{}{}",
            self.bill_type.as_deref().unwrap_or("?").to_uppercase(),
            self.number.as_deref().unwrap_or("?")
        )
    }

    fn parts(&self) -> Option<(u32, &str, &str)> {
        Some((
            self.congress?,
            self.bill_type.as_deref()?,
            self.number.as_deref()?,
        ))
    }
}

fn non_empty(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

fn as_u32(v: &Value) -> Option<u32> {
    match v {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => non_empty(Some(s.as_str())),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_uppercases_type() {
        let bill = BillRef::from_json(&json!({
            "congress": 119, "type": "hr", "number": "1234", "title": "An Act"
        }));
        assert_eq!(bill.key().as_deref(), Some("119-HR-1234"));
        assert_eq!(bill.path_parts(), Some((119, "hr".to_string(), "1234")));
        assert_eq!(bill.label(), "HR1234");
    }

    #[test]
    fn numeric_number_and_string_congress() {
        let bill = BillRef::from_json(&json!({ "congress": "119", "type": "S", "number": 5 }));
        assert_eq!(bill.key().as_deref(), Some("119-S-5"));
        assert!(bill.title.is_none());
    }

    #[test]
    fn missing_fields_have_no_key() {
        let bill = BillRef::from_json(&json!({ "congress": 119, "type": "HR" }));
        assert_eq!(bill.key(), None);
        let blank = BillRef::from_json(&json!({ "congress": 119, "type": " ", "number": "1" }));
        assert_eq!(blank.key(), None);
    }

    #[test]
    fn field_names_use_underscores() {
        assert_eq!(field_name("cbo-cost-estimates"), "cbo_cost_estimates");
        assert_eq!(field_name("actions"), "actions");
        assert_eq!(default_sub_resources().len(), 11);
    }
}
