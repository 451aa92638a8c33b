//! DynamoDB access layer
//!
//! This module provides [`DynamoDbClient`], the single entry point through
//! which request handlers read and write tables. It owns a lazily-built
//! store handle and adds three things on top of the raw store calls:
//! upserts that keep `created_at`, scans that follow continuation keys, and
//! batched gets that retry unprocessed keys with backoff.

use std::sync::Arc;

use async_stream::try_stream;
use chrono::Utc;
use futures::{Stream, TryStreamExt};
use tokio::sync::OnceCell;

use crate::config::{create_dynamodb_client, Settings};
use crate::db::conversions::{describe_batch_keys, describe_key};
use crate::db::models::{
    count_keys, has_attribute, stamp_timestamps, BatchGetOutput, BatchKeys, Item, Key,
    ScanOptions, ScanPage, UpdateRequest, CREATED_AT,
};
use crate::db::store::{ItemStore, PutCondition, SdkStore};
use crate::error::{DbError, Operation, StoreError};

/// Access layer over one store handle.
///
/// The handle is either injected with [`DynamoDbClient::with_store`] or built
/// from settings on first use and then reused for the lifetime of this value.
/// Share one instance (e.g. behind an `Arc`) to share the handle.
pub struct DynamoDbClient {
    /// Application settings
    settings: Arc<Settings>,

    /// Store handle, empty until first use
    store: OnceCell<Arc<dyn ItemStore>>,
}

impl DynamoDbClient {
    /// Create a client that builds its store handle from `settings` on first use.
    pub fn new(settings: Arc<Settings>) -> Self {
        Self {
            settings,
            store: OnceCell::new(),
        }
    }

    /// Create a client around an existing store handle.
    pub fn with_store(settings: Arc<Settings>, store: Arc<dyn ItemStore>) -> Self {
        Self {
            settings,
            store: OnceCell::new_with(Some(store)),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Whether the store handle has been built (or was injected)
    pub fn is_initialized(&self) -> bool {
        self.store.initialized()
    }

    /// Get the store handle, building it on the first call.
    ///
    /// Concurrent first callers wait on a single construction; every caller
    /// gets the same handle.
    pub async fn get_client(&self) -> Arc<dyn ItemStore> {
        self.store
            .get_or_init(|| async {
                tracing::info!(
                    region = %self.settings.aws_region,
                    endpoint = ?self.settings.dynamodb_endpoint_url,
                    "Creating DynamoDB client"
                );
                let client = create_dynamodb_client(&self.settings).await;
                Arc::new(SdkStore::new(client)) as Arc<dyn ItemStore>
            })
            .await
            .clone()
    }

    /// Write `item`, creating or replacing it.
    ///
    /// `updated_at` is always set to now. `created_at` is set to now only when
    /// the item lacks one; if an item already stored under the same key has a
    /// `created_at`, that value is carried over instead.
    pub async fn put(&self, table: &str, mut item: Item) -> Result<(), DbError> {
        let stamped_created = stamp_timestamps(&mut item, Utc::now());
        let store = self.get_client().await;

        if !stamped_created {
            return store
                .put_item(table, item.clone(), None)
                .await
                .map_err(|e| client_error(Operation::PutItem, table, &item, e));
        }

        let guard = PutCondition::AttributeNotExists(CREATED_AT.to_string());
        match store.put_item(table, item.clone(), Some(guard)).await {
            Ok(()) => Ok(()),
            Err(StoreError::ConditionalCheckFailed { existing }) => {
                if let Some(created_at) = existing
                    .filter(|existing| has_attribute(existing, CREATED_AT))
                    .and_then(|mut existing| existing.remove(CREATED_AT))
                {
                    item.insert(CREATED_AT.to_string(), created_at);
                }

                tracing::debug!(table = %table, "Item exists, keeping its created_at");

                store
                    .put_item(table, item.clone(), None)
                    .await
                    .map_err(|e| client_error(Operation::PutItem, table, &item, e))
            }
            Err(e) => Err(client_error(Operation::PutItem, table, &item, e)),
        }
    }

    /// Read the item under `key`, if there is one.
    pub async fn find(&self, table: &str, key: &Key) -> Result<Option<Item>, DbError> {
        self.get_client()
            .await
            .get_item(table, key.clone())
            .await
            .map_err(|e| client_error(Operation::GetItem, table, key, e))
    }

    /// Read the item under `key`.
    ///
    /// Fails with [`DbError::NotFound`] when the store holds no such item,
    /// and with [`DbError::Client`] when the call itself failed.
    pub async fn get(&self, table: &str, key: &Key) -> Result<Item, DbError> {
        match self.find(table, key).await? {
            Some(item) => Ok(item),
            None => {
                let key = describe_key(key);
                tracing::error!(table = %table, key = %key, "Item not found");
                Err(DbError::NotFound {
                    table: table.to_string(),
                    key,
                })
            }
        }
    }

    /// Apply a partial update and return the attributes its return policy selects.
    pub async fn update(
        &self,
        table: &str,
        key: &Key,
        request: UpdateRequest,
    ) -> Result<Item, DbError> {
        self.get_client()
            .await
            .update_item(table, key.clone(), request)
            .await
            .map_err(|e| client_error(Operation::UpdateItem, table, key, e))
    }

    /// Remove the item under `key`. Removing a missing item is not an error.
    pub async fn delete(&self, table: &str, key: &Key) -> Result<(), DbError> {
        self.get_client()
            .await
            .delete_item(table, key.clone())
            .await
            .map_err(|e| client_error(Operation::DeleteItem, table, key, e))
    }

    /// Scan the whole table, one page per stream element.
    ///
    /// Nothing is fetched until the stream is polled, and each poll fetches at
    /// most one page. The stream ends after the page that carries no
    /// continuation key, or with the first store error.
    pub fn scan<'a>(
        &'a self,
        table: &'a str,
        options: ScanOptions,
    ) -> impl Stream<Item = Result<Vec<Item>, DbError>> + Send + 'a {
        try_stream! {
            let store = self.get_client().await;
            tracing::info!(table = %table, options = ?options, "Running scan");

            let mut start_key: Option<Key> = None;
            let mut pages = 0u32;

            loop {
                let ScanPage { items, last_evaluated_key } = store
                    .scan(table, &options, start_key.take())
                    .await
                    .map_err(|e| scan_error(table, &options, pages, e))?;

                pages += 1;
                tracing::debug!(
                    table = %table,
                    page = pages,
                    items = items.len(),
                    more = last_evaluated_key.is_some(),
                    "Scan page received"
                );

                yield items;

                match last_evaluated_key {
                    Some(key) if !key.is_empty() => start_key = Some(key),
                    _ => break,
                }
            }
        }
    }

    /// Scan the whole table into memory.
    ///
    /// Allocates proportionally to the table size; prefer [`scan`] when pages
    /// can be processed as they arrive.
    ///
    /// [`scan`]: DynamoDbClient::scan
    pub async fn get_all(&self, table: &str, options: ScanOptions) -> Result<Vec<Item>, DbError> {
        let items: Vec<Item> = self.scan(table, options).try_concat().await?;
        tracing::info!(table = %table, items = items.len(), "Scan complete");
        Ok(items)
    }

    /// Fetch many keys across tables, retrying the keys the store leaves
    /// unprocessed.
    ///
    /// Calls are capped at `batch_get.max_attempts` (5 by default) with
    /// exponential backoff between them (1s doubling up to 32s). When the cap
    /// is reached with keys still outstanding this returns normally: those
    /// keys are missing from `responses` and listed in `unprocessed_keys`.
    /// Only a failed store call is an error.
    pub async fn batch_get(&self, batch_keys: BatchKeys) -> Result<BatchGetOutput, DbError> {
        let retry = self.settings.batch_get.retry_config();
        let max_attempts = retry.max_attempts();

        let mut output = BatchGetOutput {
            responses: batch_keys.keys().map(|table| (table.clone(), Vec::new())).collect(),
            ..BatchGetOutput::default()
        };

        let mut outstanding = without_empty_tables(batch_keys);
        let requested = count_keys(&outstanding);

        while count_keys(&outstanding) > 0 && output.attempts < max_attempts {
            let store = self.get_client().await;
            let tables = table_names(&outstanding);
            let pending = count_keys(&outstanding);
            let attempted = describe_batch_keys(&outstanding);

            let response = store.batch_get_item(outstanding).await.map_err(|e| {
                tracing::error!(
                    operation = %Operation::BatchGetItem,
                    tables = %tables,
                    key_count = pending,
                    keys = %attempted,
                    code = %e.code(),
                    message = %e.message(),
                    "Couldn't batch get items"
                );
                DbError::Client {
                    operation: Operation::BatchGetItem,
                    table: tables.clone(),
                    code: e.code().to_string(),
                    message: e.message(),
                    source: e,
                }
            })?;
            output.attempts += 1;

            for (table, items) in response.responses {
                output.responses.entry(table).or_default().extend(items);
            }
            outstanding = without_empty_tables(response.unprocessed_keys);

            let remaining = count_keys(&outstanding);
            tracing::info!(
                attempt = output.attempts,
                requested = pending,
                unprocessed = remaining,
                "Batch get call finished"
            );

            if remaining > 0 && output.attempts < max_attempts {
                let delay = retry.calculate_delay(output.attempts - 1);
                tracing::info!(delay_ms = delay.as_millis() as u64, "Sleeping before retrying unprocessed keys");
                tokio::time::sleep(delay).await;
                output.total_backoff += delay;
            }
        }

        let unresolved = count_keys(&outstanding);
        if unresolved > 0 {
            tracing::warn!(
                attempts = output.attempts,
                requested,
                unresolved,
                tables = %table_names(&outstanding),
                "Batch get gave up with keys still unprocessed"
            );
        }
        output.unprocessed_keys = outstanding;

        Ok(output)
    }
}

/// Log a failed single-item call and wrap it for the caller
fn client_error(operation: Operation, table: &str, subject: &Item, err: StoreError) -> DbError {
    let subject = describe_key(subject);
    tracing::error!(
        operation = %operation,
        table = %table,
        subject = %subject,
        code = %err.code(),
        message = %err.message(),
        "Store call failed"
    );
    DbError::Client {
        operation,
        table: table.to_string(),
        code: err.code().to_string(),
        message: err.message(),
        source: err,
    }
}

fn scan_error(table: &str, options: &ScanOptions, pages: u32, err: StoreError) -> DbError {
    tracing::error!(
        operation = %Operation::Scan,
        table = %table,
        options = ?options,
        pages_read = pages,
        code = %err.code(),
        message = %err.message(),
        "Couldn't scan table"
    );
    DbError::Client {
        operation: Operation::Scan,
        table: table.to_string(),
        code: err.code().to_string(),
        message: err.message(),
        source: err,
    }
}

fn without_empty_tables(keys: BatchKeys) -> BatchKeys {
    keys.into_iter().filter(|(_, keys)| !keys.is_empty()).collect()
}

fn table_names(keys: &BatchKeys) -> String {
    let mut names: Vec<&str> = keys.keys().map(String::as_str).collect();
    names.sort_unstable();
    names.join(",")
}
