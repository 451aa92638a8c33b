//! In-memory [`ItemStore`] for tests.
//!
//! Mimics the store's bounded calls: scans return pages of at most
//! `page_size` items with a continuation key whenever a page is full, and
//! batch gets can be told to leave chosen keys unprocessed. Failures can be
//! injected per operation.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;

use crate::db::conversions::describe_key;
use crate::db::models::{
    BatchGetResponse, BatchKeys, Item, Key, ReturnPolicy, ScanOptions, ScanPage, UpdateRequest,
};
use crate::db::store::{ItemStore, PutCondition};
use crate::error::{Operation, StoreError};

#[derive(Default)]
pub struct MockStore {
    state: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    /// Key attribute names per table
    key_schema: HashMap<String, Vec<String>>,
    /// Items per table, in insertion order
    tables: HashMap<String, Vec<Item>>,
    page_size: Option<usize>,
    /// (table, rendered key) -> remaining calls to leave it unprocessed;
    /// `None` means forever
    deferred: HashMap<(String, String), Option<usize>>,
    failures: HashMap<Operation, StoreError>,
    calls: HashMap<Operation, usize>,
    scan_requests: Vec<(ScanOptions, Option<Key>)>,
    batch_requests: Vec<BatchKeys>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(self, table: &str, key_attributes: &[&str]) -> Self {
        self.lock()
            .key_schema
            .insert(table.to_string(), key_attributes.iter().map(|a| a.to_string()).collect());
        self
    }

    /// Cap every scan page at `page_size` items
    pub fn with_page_size(self, page_size: usize) -> Self {
        self.lock().page_size = Some(page_size);
        self
    }

    /// Store an item directly, bypassing the access layer
    pub fn seed(&self, table: &str, item: Item) {
        let mut state = self.lock();
        state.upsert(table, item);
    }

    /// Leave `key` unprocessed for its first `times` batch-get appearances
    pub fn defer_key(&self, table: &str, key: &Key, times: usize) {
        self.lock()
            .deferred
            .insert((table.to_string(), describe_key(key)), Some(times));
    }

    /// Never resolve `key` in a batch get
    pub fn never_resolve(&self, table: &str, key: &Key) {
        self.lock()
            .deferred
            .insert((table.to_string(), describe_key(key)), None);
    }

    /// Make every call of `operation` fail with `error`
    pub fn fail(&self, operation: Operation, error: StoreError) {
        self.lock().failures.insert(operation, error);
    }

    pub fn calls(&self, operation: Operation) -> usize {
        self.lock().calls.get(&operation).copied().unwrap_or(0)
    }

    pub fn item(&self, table: &str, key: &Key) -> Option<Item> {
        let state = self.lock();
        state.find(table, key).cloned()
    }

    pub fn scan_requests(&self) -> Vec<(ScanOptions, Option<Key>)> {
        self.lock().scan_requests.clone()
    }

    pub fn batch_requests(&self) -> Vec<BatchKeys> {
        self.lock().batch_requests.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    fn begin(&self, operation: Operation) -> Result<std::sync::MutexGuard<'_, MockState>, StoreError> {
        let mut state = self.lock();
        *state.calls.entry(operation).or_default() += 1;
        if let Some(error) = state.failures.get(&operation).cloned() {
            return Err(error);
        }
        Ok(state)
    }
}

impl MockState {
    fn key_of(&self, table: &str, item: &Item) -> Key {
        self.key_schema
            .get(table)
            .map(|attributes| {
                attributes
                    .iter()
                    .filter_map(|a| item.get(a).map(|v| (a.clone(), v.clone())))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn find(&self, table: &str, key: &Key) -> Option<&Item> {
        self.tables
            .get(table)?
            .iter()
            .find(|item| &self.key_of(table, item) == key)
    }

    fn upsert(&mut self, table: &str, item: Item) {
        let key = self.key_of(table, &item);
        let position = self
            .tables
            .get(table)
            .and_then(|items| items.iter().position(|i| self.key_of(table, i) == key));

        let items = self.tables.entry(table.to_string()).or_default();
        match position {
            Some(index) => items[index] = item,
            None => items.push(item),
        }
    }

    /// Whether `key` should be left unprocessed on this call
    fn take_deferral(&mut self, table: &str, key: &Key) -> bool {
        let id = (table.to_string(), describe_key(key));
        match self.deferred.get_mut(&id) {
            Some(None) => true,
            Some(Some(0)) | None => false,
            Some(Some(remaining)) => {
                *remaining -= 1;
                true
            }
        }
    }
}

fn validation(message: &str) -> StoreError {
    StoreError::service("ValidationException", message)
}

#[async_trait]
impl ItemStore for MockStore {
    async fn put_item(
        &self,
        table: &str,
        item: Item,
        condition: Option<PutCondition>,
    ) -> Result<(), StoreError> {
        let mut state = self.begin(Operation::PutItem)?;
        let key = state.key_of(table, &item);

        if let Some(PutCondition::AttributeNotExists(attribute)) = condition {
            if let Some(existing) = state.find(table, &key) {
                if existing.contains_key(&attribute) {
                    return Err(StoreError::ConditionalCheckFailed {
                        existing: Some(existing.clone()),
                    });
                }
            }
        }

        state.upsert(table, item);
        Ok(())
    }

    async fn get_item(&self, table: &str, key: Key) -> Result<Option<Item>, StoreError> {
        let state = self.begin(Operation::GetItem)?;
        Ok(state.find(table, &key).cloned())
    }

    /// Supports `SET name = :value, ...` expressions only
    async fn update_item(
        &self,
        table: &str,
        key: Key,
        request: UpdateRequest,
    ) -> Result<Item, StoreError> {
        let mut state = self.begin(Operation::UpdateItem)?;

        let assignments = request
            .update_expression
            .trim()
            .strip_prefix("SET ")
            .ok_or_else(|| validation("only SET expressions are supported"))?;

        let mut updates: Vec<(String, AttributeValue)> = Vec::new();
        for assignment in assignments.split(',') {
            let (name, placeholder) = assignment
                .split_once('=')
                .ok_or_else(|| validation("malformed assignment"))?;
            let name = name.trim();
            let name = request
                .expression_attribute_names
                .get(name)
                .cloned()
                .unwrap_or_else(|| name.to_string());
            let value = request
                .expression_attribute_values
                .get(placeholder.trim())
                .cloned()
                .ok_or_else(|| validation("unbound expression attribute value"))?;
            updates.push((name, value));
        }

        let old = state.find(table, &key).cloned();
        let mut new = old.clone().unwrap_or_else(|| key.clone());
        for (name, value) in &updates {
            new.insert(name.clone(), value.clone());
        }
        state.upsert(table, new.clone());

        let pick = |item: &Item| -> Item {
            updates
                .iter()
                .filter_map(|(name, _)| item.get(name).map(|v| (name.clone(), v.clone())))
                .collect()
        };

        Ok(match request.return_policy {
            ReturnPolicy::None => Item::new(),
            ReturnPolicy::AllOld => old.unwrap_or_default(),
            ReturnPolicy::UpdatedOld => old.as_ref().map(pick).unwrap_or_default(),
            ReturnPolicy::AllNew => new,
            ReturnPolicy::UpdatedNew => pick(&new),
        })
    }

    async fn delete_item(&self, table: &str, key: Key) -> Result<(), StoreError> {
        let mut state = self.begin(Operation::DeleteItem)?;
        let remaining: Vec<Item> = state
            .tables
            .get(table)
            .map(|items| {
                items
                    .iter()
                    .filter(|item| state.key_of(table, item) != key)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        state.tables.insert(table.to_string(), remaining);
        Ok(())
    }

    async fn scan(
        &self,
        table: &str,
        options: &ScanOptions,
        exclusive_start_key: Option<Key>,
    ) -> Result<ScanPage, StoreError> {
        let mut state = self.begin(Operation::Scan)?;
        state
            .scan_requests
            .push((options.clone(), exclusive_start_key.clone()));

        let items = state.tables.get(table).cloned().unwrap_or_default();
        let start = match &exclusive_start_key {
            Some(start_key) => items
                .iter()
                .position(|item| &state.key_of(table, item) == start_key)
                .map(|index| index + 1)
                .ok_or_else(|| validation("exclusive start key does not match an item"))?,
            None => 0,
        };

        let page_size = match (state.page_size, options.page_limit()) {
            (Some(size), Some(limit)) => size.min(limit as usize),
            (Some(size), None) => size,
            (None, Some(limit)) => limit as usize,
            (None, None) => usize::MAX,
        };

        let page: Vec<Item> = items.iter().skip(start).take(page_size).cloned().collect();

        // A full page always carries a continuation key, even when it
        // happens to end the table; the following call then comes back empty.
        let last_evaluated_key = if page.len() == page_size {
            page.last().map(|item| state.key_of(table, item))
        } else {
            None
        };

        Ok(ScanPage {
            items: page,
            last_evaluated_key,
        })
    }

    async fn batch_get_item(&self, request: BatchKeys) -> Result<BatchGetResponse, StoreError> {
        let mut state = self.begin(Operation::BatchGetItem)?;
        state.batch_requests.push(request.clone());

        let mut response = BatchGetResponse::default();
        for (table, keys) in request {
            for key in keys {
                if state.take_deferral(&table, &key) {
                    response
                        .unprocessed_keys
                        .entry(table.clone())
                        .or_default()
                        .push(key);
                } else if let Some(item) = state.find(&table, &key).cloned() {
                    response.responses.entry(table.clone()).or_default().push(item);
                }
            }
        }

        Ok(response)
    }
}

/// `{attribute: S(value)}` key, the common single-attribute string key
pub fn string_key(attribute: &str, value: &str) -> Key {
    HashMap::from([(attribute.to_string(), AttributeValue::S(value.to_string()))])
}
