//! DynamoDB access layer library

// Public modules
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod utils;

// Re-export commonly used types
pub use config::Settings;
pub use db::{BatchGetOutput, DynamoDbClient, Item, Key, ScanOptions, UpdateRequest};
pub use error::{DbError, StoreError};
