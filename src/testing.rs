//! In-memory store used by unit tests.

use anyhow::anyhow;
use async_trait::async_trait;
use mongodb::bson::{Document, doc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::error::StoreError;
use crate::store::{CollectionInfo, ConnectionOptions, StorageStats, StoreClient, StoreConnector};

type Namespace = (String, String);

fn ns(database: &str, collection: &str) -> Namespace {
    (database.to_string(), collection.to_string())
}

#[derive(Clone, Copy)]
enum Failure {
    Unauthorized,
    Backend,
}

impl Failure {
    fn into_error(self, what: &str) -> StoreError {
        match self {
            Self::Unauthorized => StoreError::Unauthorized(format!("{what} requires privileges")),
            Self::Backend => StoreError::Backend(anyhow!("{what} failed")),
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    databases: Vec<String>,
    collections: HashMap<String, Vec<String>>,
    views: HashSet<Namespace>,
    stats: HashMap<Namespace, StorageStats>,
    documents: HashMap<Namespace, Vec<Document>>,
    list_databases_failure: Option<Failure>,
    failing_collections: HashSet<String>,
    failing_stats: HashSet<Namespace>,
    stalled_stats: HashSet<Namespace>,
    failing_find: bool,
    failing_close: bool,
    find_calls: AtomicUsize,
    list_database_calls: AtomicUsize,
    stats_calls: AtomicUsize,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_database(mut self, database: &str) -> Self {
        if !self.databases.iter().any(|d| d == database) {
            self.databases.push(database.to_string());
            self.collections.entry(database.to_string()).or_default();
        }
        self
    }

    pub fn with_collection(mut self, database: &str, collection: &str, size: u64, count: u64) -> Self {
        self = self.with_database(database);
        self.collections
            .entry(database.to_string())
            .or_default()
            .push(collection.to_string());
        self.stats
            .insert(ns(database, collection), StorageStats { size, count });
        self
    }

    pub fn with_view(mut self, database: &str, view: &str) -> Self {
        self = self.with_database(database);
        self.collections
            .entry(database.to_string())
            .or_default()
            .push(view.to_string());
        self.views.insert(ns(database, view));
        self
    }

    pub fn with_document(mut self, database: &str, collection: &str, document: Document) -> Self {
        self.documents
            .entry(ns(database, collection))
            .or_default()
            .push(document);
        self
    }

    pub fn deny_list_databases(mut self) -> Self {
        self.list_databases_failure = Some(Failure::Unauthorized);
        self
    }

    pub fn fail_list_databases(mut self) -> Self {
        self.list_databases_failure = Some(Failure::Backend);
        self
    }

    pub fn fail_collections(mut self, database: &str) -> Self {
        self.failing_collections.insert(database.to_string());
        self
    }

    pub fn fail_stats(mut self, database: &str, collection: &str) -> Self {
        self.failing_stats.insert(ns(database, collection));
        self
    }

    /// Stats for this collection never return
    pub fn stall_stats(mut self, database: &str, collection: &str) -> Self {
        self.stalled_stats.insert(ns(database, collection));
        self
    }

    pub fn fail_find(mut self) -> Self {
        self.failing_find = true;
        self
    }

    pub fn fail_close(mut self) -> Self {
        self.failing_close = true;
        self
    }

    pub fn find_calls(&self) -> usize {
        self.find_calls.load(Ordering::SeqCst)
    }

    pub fn list_database_calls(&self) -> usize {
        self.list_database_calls.load(Ordering::SeqCst)
    }

    pub fn stats_calls(&self) -> usize {
        self.stats_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoreClient for MemoryStore {
    async fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::SeqCst);
        if self.failing_close {
            return Err(StoreError::Backend(anyhow!("socket already closed")));
        }
        Ok(())
    }

    async fn list_databases(&self) -> Result<Vec<String>, StoreError> {
        self.list_database_calls.fetch_add(1, Ordering::SeqCst);
        match self.list_databases_failure {
            Some(failure) => Err(failure.into_error("listDatabases")),
            None => Ok(self.databases.clone()),
        }
    }

    async fn list_collections(&self, database: &str) -> Result<Vec<CollectionInfo>, StoreError> {
        if self.failing_collections.contains(database) {
            return Err(Failure::Backend.into_error("listCollections"));
        }
        Ok(self
            .collections
            .get(database)
            .map(|names| {
                names
                    .iter()
                    .map(|name| CollectionInfo {
                        name: name.clone(),
                        view: self.views.contains(&ns(database, name)),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn collection_stats(
        &self,
        database: &str,
        collection: &str,
    ) -> Result<StorageStats, StoreError> {
        self.stats_calls.fetch_add(1, Ordering::SeqCst);
        let key = ns(database, collection);
        if self.views.contains(&key) {
            return Err(Failure::Backend.into_error("collStats on a view"));
        }
        if self.stalled_stats.contains(&key) {
            std::future::pending::<()>().await;
        }
        if self.failing_stats.contains(&key) {
            return Err(Failure::Backend.into_error("collStats"));
        }
        Ok(self.stats.get(&key).copied().unwrap_or_default())
    }

    async fn find_one(
        &self,
        database: &str,
        collection: &str,
        filter: Document,
    ) -> Result<Option<Document>, StoreError> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_find {
            return Err(Failure::Backend.into_error("find"));
        }
        let wanted = filter.get("_id");
        Ok(self
            .documents
            .get(&ns(database, collection))
            .and_then(|docs| docs.iter().find(|d| d.get("_id") == wanted))
            .cloned())
    }

    async fn server_status(&self) -> Result<Document, StoreError> {
        Ok(doc! { "ok": 1.0, "host": "memory" })
    }
}

/// Hands out pre-built stores keyed by connection string.
#[derive(Default)]
pub struct MemoryConnector {
    stores: Mutex<HashMap<String, Arc<MemoryStore>>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(self, connection_string: &str, store: Arc<MemoryStore>) -> Self {
        self.stores
            .lock()
            .expect("connector lock poisoned")
            .insert(connection_string.to_string(), store);
        self
    }
}

#[async_trait]
impl StoreConnector for MemoryConnector {
    async fn connect(
        &self,
        connection_string: &str,
        _options: &ConnectionOptions,
    ) -> Result<Arc<dyn StoreClient>, StoreError> {
        let store = self
            .stores
            .lock()
            .expect("connector lock poisoned")
            .get(connection_string)
            .cloned();
        match store {
            Some(store) => Ok(store as Arc<dyn StoreClient>),
            None => Err(StoreError::Backend(anyhow!(
                "server selection timeout for {connection_string}"
            ))),
        }
    }
}
