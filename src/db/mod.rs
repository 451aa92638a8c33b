//! Database module
//!
//! Contains the DynamoDB access layer, the store seam it talks through, and
//! the item model shared by both.

pub mod conversions;
pub mod dynamodb;
#[cfg(test)]
pub mod mock;
pub mod models;
pub mod store;

pub use dynamodb::DynamoDbClient;
pub use models::{
    BatchGetOutput, BatchKeys, Item, Key, ReturnPolicy, ScanOptions, UpdateRequest, CREATED_AT,
    UPDATED_AT,
};
pub use store::{ItemStore, PutCondition, SdkStore};
