//! Access layer data models
//!
//! Items are plain attribute maps; the table schema is owned by the store, so
//! the layer never interprets key attributes beyond passing them through.

use aws_sdk_dynamodb::types::{AttributeValue, ReturnValue};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

/// Attribute name to value mapping for one stored item
pub type Item = HashMap<String, AttributeValue>;

/// Primary key attributes identifying one item
pub type Key = HashMap<String, AttributeValue>;

/// Table name to the keys requested from (or left unprocessed in) that table
pub type BatchKeys = HashMap<String, Vec<Key>>;

/// Set exactly once, the first time an item is written through [`put`].
///
/// [`put`]: crate::db::DynamoDbClient::put
pub const CREATED_AT: &str = "created_at";

/// Refreshed on every [`put`].
///
/// [`put`]: crate::db::DynamoDbClient::put
pub const UPDATED_AT: &str = "updated_at";

/// Attributes returned by an update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ReturnPolicy {
    None,
    AllOld,
    UpdatedOld,
    AllNew,
    #[default]
    UpdatedNew,
}

impl From<ReturnPolicy> for ReturnValue {
    fn from(policy: ReturnPolicy) -> Self {
        match policy {
            ReturnPolicy::None => ReturnValue::None,
            ReturnPolicy::AllOld => ReturnValue::AllOld,
            ReturnPolicy::UpdatedOld => ReturnValue::UpdatedOld,
            ReturnPolicy::AllNew => ReturnValue::AllNew,
            ReturnPolicy::UpdatedNew => ReturnValue::UpdatedNew,
        }
    }
}

/// A partial update: an update expression plus its bound parameters.
#[derive(Debug, Clone, Default)]
pub struct UpdateRequest {
    /// Store update expression, e.g. `SET total = :total REMOVE note`
    pub update_expression: String,

    /// Values bound to `:placeholders` in the expression
    pub expression_attribute_values: HashMap<String, AttributeValue>,

    /// Names bound to `#placeholders` in the expression
    pub expression_attribute_names: HashMap<String, String>,

    pub return_policy: ReturnPolicy,
}

impl UpdateRequest {
    pub fn new(update_expression: impl Into<String>) -> Self {
        Self {
            update_expression: update_expression.into(),
            ..Self::default()
        }
    }

    /// Bind a `:placeholder` value
    pub fn value(mut self, placeholder: impl Into<String>, value: AttributeValue) -> Self {
        self.expression_attribute_values.insert(placeholder.into(), value);
        self
    }

    /// Bind a `#placeholder` attribute name
    pub fn name(mut self, placeholder: impl Into<String>, attribute: impl Into<String>) -> Self {
        self.expression_attribute_names.insert(placeholder.into(), attribute.into());
        self
    }

    pub fn with_values(mut self, values: HashMap<String, AttributeValue>) -> Self {
        self.expression_attribute_values.extend(values);
        self
    }

    pub fn with_return_policy(mut self, policy: ReturnPolicy) -> Self {
        self.return_policy = policy;
        self
    }
}

/// Recognized scan options.
///
/// Unset and empty options are not sent to the store.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Filter applied by the store to each page after it is read. A filtered
    /// page may be empty while more pages remain.
    pub filter_expression: Option<String>,

    /// Attributes to return instead of whole items
    pub projection_expression: Option<String>,

    /// Names bound to `#placeholders` in the filter or projection
    pub expression_attribute_names: HashMap<String, String>,

    /// Values bound to `:placeholders` in the filter
    pub expression_attribute_values: HashMap<String, AttributeValue>,

    /// Maximum items evaluated per page
    pub limit: Option<i32>,

    pub consistent_read: bool,
}

impl ScanOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, expression: impl Into<String>) -> Self {
        self.filter_expression = Some(expression.into());
        self
    }

    pub fn with_projection(mut self, expression: impl Into<String>) -> Self {
        self.projection_expression = Some(expression.into());
        self
    }

    pub fn name(mut self, placeholder: impl Into<String>, attribute: impl Into<String>) -> Self {
        self.expression_attribute_names.insert(placeholder.into(), attribute.into());
        self
    }

    pub fn value(mut self, placeholder: impl Into<String>, value: AttributeValue) -> Self {
        self.expression_attribute_values.insert(placeholder.into(), value);
        self
    }

    pub fn with_limit(mut self, limit: i32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_consistent_read(mut self, consistent_read: bool) -> Self {
        self.consistent_read = consistent_read;
        self
    }

    pub(crate) fn filter(&self) -> Option<&str> {
        self.filter_expression.as_deref().filter(|s| !s.is_empty())
    }

    pub(crate) fn projection(&self) -> Option<&str> {
        self.projection_expression.as_deref().filter(|s| !s.is_empty())
    }

    pub(crate) fn page_limit(&self) -> Option<i32> {
        self.limit.filter(|limit| *limit > 0)
    }
}

/// One page returned by a store scan call
#[derive(Debug, Clone, Default)]
pub struct ScanPage {
    pub items: Vec<Item>,

    /// Opaque continuation token; `None` on the last page
    pub last_evaluated_key: Option<Key>,
}

/// One batch-get call's response
#[derive(Debug, Clone, Default)]
pub struct BatchGetResponse {
    /// Items resolved in this call, by table
    pub responses: HashMap<String, Vec<Item>>,

    /// Keys the store did not get to in this call, by table
    pub unprocessed_keys: BatchKeys,
}

/// Result of a batched get after the retry loop finished.
///
/// Running out of attempts with keys outstanding is not an error: the keys
/// that were never resolved are reported in `unprocessed_keys` and the
/// items that were resolved are returned as usual.
#[derive(Debug, Clone, Default)]
pub struct BatchGetOutput {
    /// One entry per requested table, holding the items resolved for it
    pub responses: HashMap<String, Vec<Item>>,

    /// Keys still outstanding when the attempt budget ran out
    pub unprocessed_keys: BatchKeys,

    /// Number of batch-get calls issued
    pub attempts: u32,

    /// Total time spent sleeping between calls
    pub total_backoff: Duration,
}

impl BatchGetOutput {
    /// Whether every requested key was resolved
    pub fn is_complete(&self) -> bool {
        count_keys(&self.unprocessed_keys) == 0
    }

    /// Resolved items for one table
    pub fn items(&self, table: &str) -> &[Item] {
        self.responses.get(table).map(Vec::as_slice).unwrap_or_default()
    }
}

/// Total number of keys across all tables
pub fn count_keys(keys: &BatchKeys) -> usize {
    keys.values().map(Vec::len).sum()
}

/// Whether an item carries a usable value for `attribute`.
///
/// NULL and empty strings count as missing.
pub fn has_attribute(item: &Item, attribute: &str) -> bool {
    match item.get(attribute) {
        None | Some(AttributeValue::Null(_)) => false,
        Some(AttributeValue::S(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

/// Timestamp attribute value: Unix epoch seconds with microsecond precision
pub fn timestamp_value(now: DateTime<Utc>) -> AttributeValue {
    AttributeValue::N(format!("{}.{:06}", now.timestamp(), now.timestamp_subsec_micros()))
}

/// Stamp the layer-managed timestamps onto an item about to be written.
///
/// Returns `true` when `created_at` was missing and has been set here.
pub fn stamp_timestamps(item: &mut Item, now: DateTime<Utc>) -> bool {
    let stamped_created = !has_attribute(item, CREATED_AT);
    if stamped_created {
        item.insert(CREATED_AT.to_string(), timestamp_value(now));
    }
    item.insert(UPDATED_AT.to_string(), timestamp_value(now));
    stamped_created
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn s(value: &str) -> AttributeValue {
        AttributeValue::S(value.to_string())
    }

    fn seconds(item: &Item, attribute: &str) -> Option<f64> {
        item.get(attribute)?.as_n().ok()?.parse().ok()
    }

    #[test]
    fn test_timestamp_value_has_microseconds() {
        let now = Utc.timestamp_opt(1_700_000_000, 42_000).unwrap();
        assert_eq!(timestamp_value(now).as_n().unwrap(), "1700000000.000042");
    }

    #[test]
    fn test_stamp_sets_both_when_created_missing() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let mut item: Item = HashMap::from([("id".to_string(), s("o1"))]);

        assert!(stamp_timestamps(&mut item, now));
        assert_eq!(seconds(&item, CREATED_AT), Some(1_700_000_000.0));
        assert_eq!(seconds(&item, UPDATED_AT), Some(1_700_000_000.0));
    }

    #[test]
    fn test_stamp_keeps_existing_created_at() {
        let now = Utc.timestamp_opt(1_700_000_500, 0).unwrap();
        let mut item: Item = HashMap::from([
            ("id".to_string(), s("o1")),
            (CREATED_AT.to_string(), AttributeValue::N("1600000000.000000".to_string())),
        ]);

        assert!(!stamp_timestamps(&mut item, now));
        assert_eq!(
            item.get(CREATED_AT).unwrap().as_n().unwrap(),
            "1600000000.000000"
        );
        assert_eq!(seconds(&item, UPDATED_AT), Some(1_700_000_500.0));
    }

    #[test]
    fn test_null_and_empty_created_at_count_as_missing() {
        let null_item: Item = HashMap::from([(CREATED_AT.to_string(), AttributeValue::Null(true))]);
        let empty_item: Item = HashMap::from([(CREATED_AT.to_string(), s(""))]);

        assert!(!has_attribute(&null_item, CREATED_AT));
        assert!(!has_attribute(&empty_item, CREATED_AT));
    }

    #[test]
    fn test_scan_options_skip_empty_values() {
        let options = ScanOptions::new().with_filter("").with_projection("id").with_limit(0);

        assert_eq!(options.filter(), None);
        assert_eq!(options.projection(), Some("id"));
        assert_eq!(options.page_limit(), None);
    }

    #[test]
    fn test_update_request_defaults_to_updated_new() {
        let request = UpdateRequest::new("SET total = :total")
            .value(":total", AttributeValue::N("30".to_string()));

        assert_eq!(request.return_policy, ReturnPolicy::UpdatedNew);
        assert_eq!(ReturnValue::from(request.return_policy), ReturnValue::UpdatedNew);
        assert_eq!(request.expression_attribute_values.len(), 1);
    }

    #[test]
    fn test_batch_output_completeness() {
        let mut output = BatchGetOutput::default();
        output.unprocessed_keys.insert("orders".to_string(), Vec::new());
        assert!(output.is_complete());
        assert!(output.items("orders").is_empty());

        output
            .unprocessed_keys
            .insert("orders".to_string(), vec![HashMap::from([("id".to_string(), s("o3"))])]);
        assert!(!output.is_complete());
    }
}
