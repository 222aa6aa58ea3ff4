//! Error types for store access and admin operations.

use std::time::Duration;
use thiserror::Error;

/// Failure reported by a document store client.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The authenticated user lacks the privilege for the command
    #[error("not authorized: {0}")]
    Unauthorized(String),

    #[error("operation timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Failure of an admin operation, as surfaced to callers.
#[derive(Debug, Error)]
pub enum AdminError {
    #[error("failed to connect '{name}'")]
    Connect {
        name: String,
        #[source]
        source: StoreError,
    },

    #[error("connection '{0}' not found")]
    ConnectionNotFound(String),

    #[error("user is not authorized to list databases")]
    NotAuthorized,

    #[error("failed to list databases")]
    ListDatabases(#[source] StoreError),

    #[error("failed to list collections of database '{database}'")]
    ListCollections {
        database: String,
        #[source]
        source: StoreError,
    },

    #[error("lookup in collection '{collection}' failed")]
    Lookup {
        collection: String,
        #[source]
        source: StoreError,
    },

    #[error("document not found: no document with _id '{id}' in collection '{collection}'")]
    DocumentNotFound { collection: String, id: String },

    #[error("failed to fetch server status")]
    ServerStatus(#[source] StoreError),

    #[error("operation cancelled")]
    Cancelled,
}

impl AdminError {
    /// Map a database-listing failure, keeping authorization failures distinct.
    pub fn from_database_listing(err: StoreError) -> Self {
        match err {
            StoreError::Unauthorized(_) => Self::NotAuthorized,
            other => Self::ListDatabases(other),
        }
    }
}
