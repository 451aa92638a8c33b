//! Store seam
//!
//! [`ItemStore`] describes the six calls the access layer makes against the
//! store. [`SdkStore`] implements it on top of the AWS DynamoDB SDK client;
//! tests use an in-memory implementation instead.

use std::collections::HashMap;
use std::fmt::Debug;

use async_trait::async_trait;
use aws_sdk_dynamodb::operation::batch_get_item::BatchGetItemOutput;
use aws_sdk_dynamodb::operation::put_item::PutItemError;
use aws_sdk_dynamodb::operation::scan::ScanOutput;
use aws_sdk_dynamodb::types::{KeysAndAttributes, ReturnValuesOnConditionCheckFailure};
use aws_sdk_dynamodb::Client as DynamoDbSdkClient;
use aws_smithy_runtime_api::client::result::SdkError;
use aws_smithy_types::error::display::DisplayErrorContext;
use aws_smithy_types::error::metadata::ProvideErrorMetadata;

use crate::db::models::{BatchGetResponse, BatchKeys, Item, Key, ScanOptions, ScanPage, UpdateRequest};
use crate::error::StoreError;

/// Precondition attached to a put
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutCondition {
    /// Write only when the stored item (if any) lacks this attribute. On
    /// failure the store reports the stored item in
    /// [`StoreError::ConditionalCheckFailed`].
    AttributeNotExists(String),
}

/// The store API consumed by the access layer.
///
/// Each call is bounded by the store: scans return one page at a time and
/// batch gets may leave keys unprocessed instead of failing.
#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn put_item(
        &self,
        table: &str,
        item: Item,
        condition: Option<PutCondition>,
    ) -> Result<(), StoreError>;

    /// `Ok(None)` when the call succeeded but no item exists under `key`
    async fn get_item(&self, table: &str, key: Key) -> Result<Option<Item>, StoreError>;

    /// Returns the attributes selected by the request's return policy
    async fn update_item(
        &self,
        table: &str,
        key: Key,
        request: UpdateRequest,
    ) -> Result<Item, StoreError>;

    async fn delete_item(&self, table: &str, key: Key) -> Result<(), StoreError>;

    /// Read one page, resuming after `exclusive_start_key` when given
    async fn scan(
        &self,
        table: &str,
        options: &ScanOptions,
        exclusive_start_key: Option<Key>,
    ) -> Result<ScanPage, StoreError>;

    async fn batch_get_item(&self, request: BatchKeys) -> Result<BatchGetResponse, StoreError>;
}

/// [`ItemStore`] backed by the AWS DynamoDB SDK client
#[derive(Clone, Debug)]
pub struct SdkStore {
    client: DynamoDbSdkClient,
}

impl SdkStore {
    pub fn new(client: DynamoDbSdkClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ItemStore for SdkStore {
    async fn put_item(
        &self,
        table: &str,
        item: Item,
        condition: Option<PutCondition>,
    ) -> Result<(), StoreError> {
        let mut request = self.client.put_item().table_name(table).set_item(Some(item));

        if let Some(PutCondition::AttributeNotExists(attribute)) = condition {
            request = request
                .condition_expression("attribute_not_exists(#guarded)")
                .expression_attribute_names("#guarded", attribute)
                .return_values_on_condition_check_failure(ReturnValuesOnConditionCheckFailure::AllOld);
        }

        request.send().await.map_err(put_failure)?;
        Ok(())
    }

    async fn get_item(&self, table: &str, key: Key) -> Result<Option<Item>, StoreError> {
        let output = self
            .client
            .get_item()
            .table_name(table)
            .set_key(Some(key))
            .send()
            .await
            .map_err(service_failure)?;

        Ok(output.item)
    }

    async fn update_item(
        &self,
        table: &str,
        key: Key,
        request: UpdateRequest,
    ) -> Result<Item, StoreError> {
        let output = self
            .client
            .update_item()
            .table_name(table)
            .set_key(Some(key))
            .update_expression(request.update_expression)
            .set_expression_attribute_values(non_empty(request.expression_attribute_values))
            .set_expression_attribute_names(non_empty(request.expression_attribute_names))
            .return_values(request.return_policy.into())
            .send()
            .await
            .map_err(service_failure)?;

        Ok(output.attributes.unwrap_or_default())
    }

    async fn delete_item(&self, table: &str, key: Key) -> Result<(), StoreError> {
        self.client
            .delete_item()
            .table_name(table)
            .set_key(Some(key))
            .send()
            .await
            .map_err(service_failure)?;

        Ok(())
    }

    async fn scan(
        &self,
        table: &str,
        options: &ScanOptions,
        exclusive_start_key: Option<Key>,
    ) -> Result<ScanPage, StoreError> {
        let mut request = self
            .client
            .scan()
            .table_name(table)
            .set_exclusive_start_key(exclusive_start_key)
            .set_filter_expression(options.filter().map(str::to_string))
            .set_projection_expression(options.projection().map(str::to_string))
            .set_expression_attribute_names(non_empty(options.expression_attribute_names.clone()))
            .set_expression_attribute_values(non_empty(options.expression_attribute_values.clone()))
            .set_limit(options.page_limit());

        if options.consistent_read {
            request = request.consistent_read(true);
        }

        let output = request.send().await.map_err(service_failure)?;

        Ok(scan_page(output))
    }

    async fn batch_get_item(&self, request: BatchKeys) -> Result<BatchGetResponse, StoreError> {
        let mut request_items = HashMap::with_capacity(request.len());
        for (table, keys) in request {
            let keys_and_attributes = KeysAndAttributes::builder()
                .set_keys(Some(keys))
                .build()
                .map_err(|e| StoreError::service("ValidationException", e.to_string()))?;
            request_items.insert(table, keys_and_attributes);
        }

        let output = self
            .client
            .batch_get_item()
            .set_request_items(Some(request_items))
            .send()
            .await
            .map_err(service_failure)?;

        Ok(batch_get_response(output))
    }
}

/// An empty continuation key ends the scan like an absent one
fn scan_page(output: ScanOutput) -> ScanPage {
    ScanPage {
        items: output.items.unwrap_or_default(),
        last_evaluated_key: output.last_evaluated_key.filter(|key| !key.is_empty()),
    }
}

fn batch_get_response(output: BatchGetItemOutput) -> BatchGetResponse {
    let unprocessed_keys = output
        .unprocessed_keys
        .unwrap_or_default()
        .into_iter()
        .map(|(table, pending)| (table, pending.keys().to_vec()))
        .filter(|(_, keys)| !keys.is_empty())
        .collect();

    BatchGetResponse {
        responses: output.responses.unwrap_or_default(),
        unprocessed_keys,
    }
}

/// Translate an SDK failure into the store's code and message.
///
/// Transport failures carry no service code and are reported as `Unknown`
/// with the full error chain as the message. The SDK error is kept as the
/// source.
fn service_failure<E, R>(err: SdkError<E, R>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: Debug + Send + Sync + 'static,
{
    let code = err.code().unwrap_or("Unknown").to_string();
    let message = err
        .message()
        .map(str::to_string)
        .unwrap_or_else(|| DisplayErrorContext(&err).to_string());

    StoreError::service(code, message).with_source(err)
}

fn put_failure<R: Debug + Send + Sync + 'static>(err: SdkError<PutItemError, R>) -> StoreError {
    if let Some(PutItemError::ConditionalCheckFailedException(e)) = err.as_service_error() {
        return StoreError::ConditionalCheckFailed {
            existing: e.item().cloned(),
        };
    }
    service_failure(err)
}

fn non_empty<K, V>(map: HashMap<K, V>) -> Option<HashMap<K, V>> {
    (!map.is_empty()).then_some(map)
}
