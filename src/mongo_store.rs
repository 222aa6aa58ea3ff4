//! MongoDB driver implementation of the store traits.

use anyhow::Context;
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{
    Client,
    bson::{Bson, Document, doc},
    error::ErrorKind,
    options::ClientOptions,
    results::CollectionType,
};
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use std::sync::Arc;
use std::time::Duration;

use crate::error::StoreError;
use crate::store::{CollectionInfo, ConnectionOptions, StorageStats, StoreClient, StoreConnector};

/// Server error code for a missing privilege
const UNAUTHORIZED_CODE: i32 = 13;

/// Map a driver error, keeping authorization failures distinct.
fn classify(err: mongodb::error::Error, context: &'static str) -> StoreError {
    if let ErrorKind::Command(command) = err.kind.as_ref() {
        if command.code == UNAUTHORIZED_CODE {
            return StoreError::Unauthorized(command.message.clone());
        }
    }
    StoreError::Backend(anyhow::Error::new(err).context(context))
}

/// Characters escaped in option values so they survive query parsing
const OPTION_VALUE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'+')
    .add(b'<')
    .add(b'=')
    .add(b'>')
    .add(b'?');

/// Apply URI options to a connection string's query part.
///
/// Options replace query keys of the same name (compared case-insensitively,
/// as the server does); the remaining query pairs keep their order.
pub fn merge_uri_options(connection_string: &str, options: &ConnectionOptions) -> String {
    if options.is_empty() {
        return connection_string.to_string();
    }

    let (base, query) = match connection_string.split_once('?') {
        Some((base, query)) => (base, query),
        None => (connection_string, ""),
    };

    let overridden = |pair: &str| {
        let key = pair.split_once('=').map_or(pair, |(key, _)| key);
        options.keys().any(|option| option.eq_ignore_ascii_case(key))
    };

    let pairs = query
        .split('&')
        .filter(|pair| !pair.is_empty() && !overridden(pair))
        .map(str::to_string)
        .chain(
            options
                .iter()
                .map(|(key, value)| format!("{key}={}", utf8_percent_encode(value, OPTION_VALUE))),
        )
        .collect::<Vec<_>>()
        .join("&");

    // Options must follow the path slash: mongodb://host/?opt=1
    let after_scheme = base.split_once("://").map_or(base, |(_, rest)| rest);
    let slash = if after_scheme.contains('/') { "" } else { "/" };
    format!("{base}{slash}?{pairs}")
}

/// Read a numeric field that the server may encode as int32, int64 or double.
fn numeric_field(document: &Document, key: &str) -> u64 {
    match document.get(key) {
        Some(Bson::Int32(v)) => u64::try_from(*v).unwrap_or(0),
        Some(Bson::Int64(v)) => u64::try_from(*v).unwrap_or(0),
        Some(Bson::Double(v)) if *v > 0.0 => *v as u64,
        _ => 0,
    }
}

/// Creates driver-backed clients.
pub struct MongoConnector {
    connect_timeout: Duration,
    server_selection_timeout: Duration,
}

impl MongoConnector {
    pub fn new(connect_timeout: Duration, server_selection_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            server_selection_timeout,
        }
    }
}

#[async_trait]
impl StoreConnector for MongoConnector {
    async fn connect(
        &self,
        connection_string: &str,
        options: &ConnectionOptions,
    ) -> Result<Arc<dyn StoreClient>, StoreError> {
        let uri = merge_uri_options(connection_string, options);

        let mut client_options = ClientOptions::parse(&uri)
            .await
            .context("Failed to parse MongoDB connection string")?;

        // Defaults unless the URI already set them
        client_options
            .connect_timeout
            .get_or_insert(self.connect_timeout);
        client_options
            .server_selection_timeout
            .get_or_insert(self.server_selection_timeout);

        let client =
            Client::with_options(client_options).context("Failed to create MongoDB client")?;

        // The driver connects lazily; ping so an unreachable server fails here
        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| classify(e, "Failed to reach MongoDB server"))?;

        Ok(Arc::new(MongoStoreClient { client }))
    }
}

/// Live driver client.
pub struct MongoStoreClient {
    client: Client,
}

#[async_trait]
impl StoreClient for MongoStoreClient {
    async fn close(&self) -> Result<(), StoreError> {
        self.client.clone().shutdown().await;
        Ok(())
    }

    async fn list_databases(&self) -> Result<Vec<String>, StoreError> {
        self.client
            .list_database_names()
            .await
            .map_err(|e| classify(e, "Failed to list databases"))
    }

    async fn list_collections(&self, database: &str) -> Result<Vec<CollectionInfo>, StoreError> {
        let cursor = self
            .client
            .database(database)
            .list_collections()
            .await
            .map_err(|e| classify(e, "Failed to list collections"))?;

        let specs: Vec<_> = cursor
            .try_collect()
            .await
            .map_err(|e| classify(e, "Failed to collect collection list"))?;

        Ok(specs
            .into_iter()
            .map(|spec| CollectionInfo {
                view: matches!(spec.collection_type, CollectionType::View),
                name: spec.name,
            })
            .collect())
    }

    async fn collection_stats(
        &self,
        database: &str,
        collection: &str,
    ) -> Result<StorageStats, StoreError> {
        let stats = self
            .client
            .database(database)
            .run_command(doc! { "collStats": collection })
            .await
            .map_err(|e| classify(e, "collStats command failed"))?;

        Ok(StorageStats {
            size: numeric_field(&stats, "size"),
            count: numeric_field(&stats, "count"),
        })
    }

    async fn find_one(
        &self,
        database: &str,
        collection: &str,
        filter: Document,
    ) -> Result<Option<Document>, StoreError> {
        self.client
            .database(database)
            .collection::<Document>(collection)
            .find_one(filter)
            .await
            .map_err(|e| classify(e, "findOne failed"))
    }

    async fn server_status(&self) -> Result<Document, StoreError> {
        self.client
            .database("admin")
            .run_command(doc! { "serverStatus": 1 })
            .await
            .map_err(|e| classify(e, "serverStatus command failed"))
    }
}
