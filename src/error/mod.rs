//! Error types

mod types;

pub use types::{ConversionError, DbError, Operation, StoreError};
