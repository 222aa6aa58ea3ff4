//! Database and collection statistics aggregation.
//!
//! Every store call is bounded by the engine's operation timeout. Per-collection
//! stats failures degrade to zero; listing failures propagate.

use futures::future::{join_all, try_join_all};
use indexmap::IndexMap;
use mongodb::bson::Document;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::connection::ConnectionRecord;
use crate::error::{AdminError, StoreError};
use crate::ordering;
use crate::store::{CollectionInfo, StoreClient};

/// Reserved databases never enumerated
pub const SKIPPED_DATABASES: [&str; 3] = ["null", "admin", "local"];

pub fn is_skipped(database: &str) -> bool {
    SKIPPED_DATABASES.contains(&database)
}

/// Statistics of one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "StatsView")]
pub enum CollectionStats {
    Measured { storage: u64, documents: u64 },
    /// Stats could not be fetched; reported as zero
    Degraded { reason: String },
}

impl CollectionStats {
    pub fn storage(&self) -> u64 {
        match self {
            Self::Measured { storage, .. } => *storage,
            Self::Degraded { .. } => 0,
        }
    }

    pub fn documents(&self) -> u64 {
        match self {
            Self::Measured { documents, .. } => *documents,
            Self::Degraded { .. } => 0,
        }
    }

    #[cfg(test)]
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct StatsView {
    storage: u64,
    documents: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    degraded: Option<String>,
}

impl From<CollectionStats> for StatsView {
    fn from(stats: CollectionStats) -> Self {
        Self {
            storage: stats.storage(),
            documents: stats.documents(),
            degraded: match stats {
                CollectionStats::Degraded { reason } => Some(reason),
                CollectionStats::Measured { .. } => None,
            },
        }
    }
}

/// collection name -> stats
pub type CollectionStatsMap = IndexMap<String, CollectionStats>;

/// database name -> collection name -> stats
pub type DatabaseStats = IndexMap<String, CollectionStatsMap>;

/// database name -> collection names
pub type SidebarListing = IndexMap<String, Vec<String>>;

/// Extract collection names from raw descriptors
pub fn collection_names(descriptors: &[CollectionInfo]) -> Vec<String> {
    descriptors.iter().map(|info| info.name.clone()).collect()
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    run: impl Future<Output = Result<T, AdminError>>,
) -> Result<T, AdminError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(AdminError::Cancelled),
        result = run => result,
    }
}

pub struct StatsEngine {
    operation_timeout: Duration,
}

impl StatsEngine {
    pub fn new(operation_timeout: Duration) -> Self {
        Self { operation_timeout }
    }

    async fn bounded<T>(
        &self,
        op: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.operation_timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.operation_timeout)),
        }
    }

    /// Non-reserved database names, unordered
    async fn discover_databases(&self, client: &dyn StoreClient) -> Result<Vec<String>, AdminError> {
        let databases = self
            .bounded(client.list_databases())
            .await
            .map_err(AdminError::from_database_listing)?;

        Ok(databases.into_iter().filter(|db| !is_skipped(db)).collect())
    }

    async fn list_collections(
        &self,
        client: &dyn StoreClient,
        database: &str,
    ) -> Result<Vec<CollectionInfo>, AdminError> {
        self.bounded(client.list_collections(database))
            .await
            .map_err(|source| AdminError::ListCollections {
                database: database.to_string(),
                source,
            })
    }

    async fn collection_stats(
        &self,
        client: &dyn StoreClient,
        database: &str,
        info: &CollectionInfo,
    ) -> CollectionStats {
        // collStats always fails on a view
        if info.view {
            return CollectionStats::Degraded {
                reason: "view has no storage".to_string(),
            };
        }

        let collection = info.name.as_str();
        match self.bounded(client.collection_stats(database, collection)).await {
            Ok(stats) => CollectionStats::Measured {
                storage: stats.size,
                documents: stats.count,
            },
            Err(e) => {
                tracing::warn!(
                    database,
                    collection,
                    error = %e,
                    "Collection stats unavailable, reporting zero"
                );
                CollectionStats::Degraded {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn database_collection_stats(
        &self,
        client: &dyn StoreClient,
        database: &str,
    ) -> Result<CollectionStatsMap, AdminError> {
        let descriptors = self.list_collections(client, database).await?;

        let stats = join_all(
            descriptors
                .iter()
                .map(|info| self.collection_stats(client, database, info)),
        )
        .await;

        Ok(ordering::order_entries(
            collection_names(&descriptors).into_iter().zip(stats),
        ))
    }

    /// Storage and document counts per collection.
    ///
    /// With `database` set only that database is read; otherwise every
    /// non-reserved database is discovered and read concurrently.
    pub async fn database_stats(
        &self,
        client: &dyn StoreClient,
        database: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<DatabaseStats, AdminError> {
        cancellable(cancel, async {
            let databases = match database {
                Some(db) => vec![db.to_string()],
                None => self.discover_databases(client).await?,
            };

            tracing::debug!("Aggregating stats for {} database(s)", databases.len());

            let per_database = try_join_all(
                databases
                    .iter()
                    .map(|db| self.database_collection_stats(client, db)),
            )
            .await?;

            Ok::<_, AdminError>(ordering::order_entries(
                databases.into_iter().zip(per_database),
            ))
        })
        .await
    }

    async fn sidebar_collections(&self, client: &dyn StoreClient, database: &str) -> Vec<String> {
        match self.list_collections(client, database).await {
            Ok(descriptors) => {
                let mut names = collection_names(&descriptors);
                ordering::order_names(&mut names);
                names
            }
            Err(e) => {
                tracing::warn!(database, error = %e, "Listing collections failed, showing none");
                Vec::new()
            }
        }
    }

    /// Collection names per database for navigation. Best-effort: listing
    /// failures yield empty entries instead of errors.
    pub async fn sidebar_listing(
        &self,
        client: &dyn StoreClient,
        database: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<SidebarListing, AdminError> {
        cancellable(cancel, async {
            let databases = match database {
                Some(db) => vec![db.to_string()],
                None => match self.discover_databases(client).await {
                    Ok(databases) => databases,
                    Err(e) => {
                        tracing::warn!(error = %e, "Database listing unavailable for sidebar");
                        return Ok(SidebarListing::new());
                    }
                },
            };

            let collections = join_all(
                databases
                    .iter()
                    .map(|db| self.sidebar_collections(client, db)),
            )
            .await;

            Ok::<_, AdminError>(ordering::order_entries(databases.into_iter().zip(collections)))
        })
        .await
    }

    /// Ordered non-reserved database names, or `None` when the connection
    /// string pins a database.
    pub async fn database_names(
        &self,
        record: &ConnectionRecord,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<String>>, AdminError> {
        if let Some(database) = &record.database {
            tracing::debug!(
                "Connection '{}' is pinned to '{}', skipping discovery",
                record.name,
                database
            );
            return Ok(None);
        }

        let mut names =
            cancellable(cancel, self.discover_databases(record.client.as_ref())).await?;
        ordering::order_names(&mut names);
        Ok(Some(names))
    }

    pub async fn server_status(&self, client: &dyn StoreClient) -> Result<Document, AdminError> {
        self.bounded(client.server_status())
            .await
            .map_err(AdminError::ServerStatus)
    }
}
