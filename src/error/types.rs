//! Access layer error types

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::db::Item;

/// Store call that produced an error, used for log and error context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    PutItem,
    GetItem,
    UpdateItem,
    DeleteItem,
    Scan,
    BatchGetItem,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::PutItem => "PutItem",
            Operation::GetItem => "GetItem",
            Operation::UpdateItem => "UpdateItem",
            Operation::DeleteItem => "DeleteItem",
            Operation::Scan => "Scan",
            Operation::BatchGetItem => "BatchGetItem",
        };
        f.write_str(name)
    }
}

/// Errors surfaced to callers of the access layer.
///
/// A batched get that runs out of attempts is not an error; see
/// [`BatchGetOutput`](crate::db::BatchGetOutput).
#[derive(Error, Debug)]
pub enum DbError {
    /// The store rejected or failed a call (throttling, validation,
    /// permission, service fault). `code` is the store's own error code.
    #[error("{operation} on table {table} failed: {code}: {message}")]
    Client {
        operation: Operation,
        table: String,
        code: String,
        message: String,
        #[source]
        source: StoreError,
    },

    /// The store answered a `get` successfully but holds no item for the key.
    #[error("Item {key} not found in table {table}")]
    NotFound { table: String, key: String },
}

impl DbError {
    /// Store error code, when this is a client error
    pub fn code(&self) -> Option<&str> {
        match self {
            DbError::Client { code, .. } => Some(code),
            DbError::NotFound { .. } => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DbError::NotFound { .. })
    }

    /// Whether the failed call may succeed if issued again later
    pub fn is_retryable(&self) -> bool {
        match self {
            DbError::Client { source, .. } => source.is_retryable(),
            DbError::NotFound { .. } => false,
        }
    }
}

/// Service codes the store uses for transient, capacity or server-side failures
const RETRYABLE_CODES: &[&str] = &[
    "ProvisionedThroughputExceededException",
    "RequestLimitExceeded",
    "ThrottlingException",
    "InternalServerError",
    "ServiceUnavailable",
    "Unknown",
];

/// Errors reported by an [`ItemStore`](crate::db::ItemStore) implementation.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// `source` holds the underlying SDK error when there is one.
    #[error("{code}: {message}")]
    Service {
        code: String,
        message: String,
        #[source]
        source: Option<Arc<dyn StdError + Send + Sync>>,
    },

    /// A conditional write was rejected. Carries the item currently stored
    /// under the key when the store returned it.
    #[error("ConditionalCheckFailedException: the conditional request failed")]
    ConditionalCheckFailed { existing: Option<Item> },
}

impl StoreError {
    pub fn service(code: impl Into<String>, message: impl Into<String>) -> Self {
        StoreError::Service {
            code: code.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Keep `source` as the cause of this error
    pub fn with_source(self, source: impl StdError + Send + Sync + 'static) -> Self {
        match self {
            StoreError::Service { code, message, .. } => StoreError::Service {
                code,
                message,
                source: Some(Arc::new(source)),
            },
            other => other,
        }
    }

    /// Throttling, capacity and server faults; a failed condition never is
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Service { code, .. } => RETRYABLE_CODES.contains(&code.as_str()),
            StoreError::ConditionalCheckFailed { .. } => false,
        }
    }

    /// Error code as the store reports it
    pub fn code(&self) -> &str {
        match self {
            StoreError::Service { code, .. } => code,
            StoreError::ConditionalCheckFailed { .. } => "ConditionalCheckFailedException",
        }
    }

    pub fn message(&self) -> String {
        match self {
            StoreError::Service { message, .. } => message.clone(),
            StoreError::ConditionalCheckFailed { .. } => {
                "The conditional request failed".to_string()
            }
        }
    }
}

/// Errors converting between JSON documents and store attribute maps.
#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("Expected a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}
