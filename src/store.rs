//! Document store abstraction.
//! The admin core only talks to the store through these traits; `mongo_store`
//! provides the driver-backed implementation.

use async_trait::async_trait;
use mongodb::bson::Document;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::StoreError;

/// URI options applied on top of a connection string (e.g. `appName`, `tls`).
pub type ConnectionOptions = BTreeMap<String, String>;

/// Raw collection descriptor as returned by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionInfo {
    pub name: String,
    /// Views have no storage of their own
    pub view: bool,
}

/// Storage figures of one collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StorageStats {
    /// Uncompressed data size in bytes
    pub size: u64,
    pub count: u64,
}

/// Establishes client handles from connection strings.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(
        &self,
        connection_string: &str,
        options: &ConnectionOptions,
    ) -> Result<Arc<dyn StoreClient>, StoreError>;
}

/// A live client handle to one deployment.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Release the underlying connections
    async fn close(&self) -> Result<(), StoreError>;

    /// Names of all databases visible to the authenticated user
    async fn list_databases(&self) -> Result<Vec<String>, StoreError>;

    async fn list_collections(&self, database: &str) -> Result<Vec<CollectionInfo>, StoreError>;

    async fn collection_stats(
        &self,
        database: &str,
        collection: &str,
    ) -> Result<StorageStats, StoreError>;

    /// Fetch a single document matching `filter`
    async fn find_one(
        &self,
        database: &str,
        collection: &str,
        filter: Document,
    ) -> Result<Option<Document>, StoreError>;

    async fn server_status(&self) -> Result<Document, StoreError>;
}
