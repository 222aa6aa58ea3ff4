//! MCP server implementation with tool handlers.

use anyhow::Result;
use indexmap::IndexMap;
use mongodb::bson::Bson;
use rmcp::{
    ServerHandler,
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::connection::{ConnectionRecord, ConnectionRegistry};
use crate::error::AdminError;
use crate::identifier;
use crate::ordering;
use crate::stats::StatsEngine;
use crate::tools::*;

/// Format an error with its full cause chain
fn format_error(e: &(dyn std::error::Error + 'static)) -> String {
    let mut msg = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        msg.push_str(": ");
        msg.push_str(&cause.to_string());
        source = cause.source();
    }
    msg
}

fn admin_error(e: &AdminError) -> rmcp::ErrorData {
    match e {
        AdminError::ConnectionNotFound(_) | AdminError::DocumentNotFound { .. } => {
            rmcp::ErrorData::invalid_params(format_error(e), None)
        }
        _ => rmcp::ErrorData::internal_error(format_error(e), None),
    }
}

fn json_result(value: &impl Serialize) -> Result<CallToolResult, rmcp::ErrorData> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| rmcp::ErrorData::internal_error(e.to_string(), None))?;
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

pub struct McpServer {
    name: String,
    version: String,
    connections: Arc<ConnectionRegistry>,
    engine: StatsEngine,
    operation_timeout: Duration,
    shutdown: CancellationToken,
    tool_router: ToolRouter<Self>,
}

impl McpServer {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        connections: Arc<ConnectionRegistry>,
        operation_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            connections,
            engine: StatsEngine::new(operation_timeout),
            operation_timeout,
            shutdown,
            tool_router: Self::tool_router(),
        }
    }

    pub async fn run(self) -> Result<()> {
        use rmcp::ServiceExt;

        tracing::info!("MCP server starting: {} v{}", self.name, self.version);

        let connections = self.connections.clone();
        let shutdown = self.shutdown.clone();

        let transport = rmcp::transport::stdio();
        let server = self.serve(transport).await?;

        tokio::select! {
            result = server.waiting() => {
                result?;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupt received");
            }
        }

        shutdown.cancel();
        connections.close_all().await;

        tracing::info!("MCP server shutting down");
        Ok(())
    }

    async fn connection(&self, name: &str) -> Result<Arc<ConnectionRecord>, rmcp::ErrorData> {
        match self.connections.get(name).await {
            Some(record) => Ok(record),
            None => {
                let available = self.connections.list_names().await.join(", ");
                Err(rmcp::ErrorData::invalid_params(
                    format!(
                        "{}. Available: {available}",
                        AdminError::ConnectionNotFound(name.to_string())
                    ),
                    None,
                ))
            }
        }
    }
}

#[tool_router]
impl McpServer {
    /// Lists all live MongoDB connections.
    ///
    /// Passwords in connection strings are masked. `database` is set when the
    /// connection string pins a single database.
    #[tool]
    async fn list_connections(&self) -> Result<CallToolResult, rmcp::ErrorData> {
        let connections = self.connections.list().await;

        json_result(&serde_json::json!({
            "connections": connections,
            "count": connections.len()
        }))
    }

    /// Opens a MongoDB connection and registers it under a name.
    ///
    /// An existing connection with the same name is replaced (and closed) once the
    /// new one is established. Nothing is registered if connecting fails.
    #[tool]
    async fn add_connection(
        &self,
        Parameters(params): Parameters<AddConnectionParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let record = self
            .connections
            .add_connection(
                &params.connection_name,
                &params.connection_string,
                params.options,
            )
            .await
            .map_err(|e| admin_error(&e))?;

        Ok(CallToolResult::success(vec![Content::text(format!(
            "Connection '{}' added",
            record.name
        ))]))
    }

    /// Closes a connection and removes it from the registry.
    ///
    /// Removing an unknown connection is not an error.
    #[tool]
    async fn remove_connection(
        &self,
        Parameters(params): Parameters<ConnectionParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let message = if self.connections.remove_connection(&params.connection_name).await {
            format!("Connection '{}' removed", params.connection_name)
        } else {
            format!("Connection '{}' was not registered", params.connection_name)
        };

        Ok(CallToolResult::success(vec![Content::text(message)]))
    }

    /// Lists database names of a connection, ordered case-insensitively.
    ///
    /// admin, local and null are never listed. Returns null databases when the
    /// connection string pins a single database.
    #[tool]
    async fn list_databases(
        &self,
        Parameters(params): Parameters<ConnectionParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let connection = self.connection(&params.connection_name).await?;

        let databases = self
            .engine
            .database_names(&connection, &self.shutdown.child_token())
            .await
            .map_err(|e| admin_error(&e))?;

        json_result(&serde_json::json!({
            "connection": connection.name,
            "pinned_database": connection.database,
            "databases": databases
        }))
    }

    /// Lists collection names per database, for navigation.
    ///
    /// Best-effort: databases or collections that cannot be listed come back empty
    /// instead of failing.
    #[tool]
    async fn get_sidebar(
        &self,
        Parameters(params): Parameters<DatabaseScopeParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let connection = self.connection(&params.connection_name).await?;

        let sidebar = self
            .engine
            .sidebar_listing(
                connection.client.as_ref(),
                params.database_name.as_deref(),
                &self.shutdown.child_token(),
            )
            .await
            .map_err(|e| admin_error(&e))?;

        json_result(&sidebar)
    }

    /// Returns storage size (bytes) and document count of every collection,
    /// grouped by database and ordered by name.
    ///
    /// Collections whose stats cannot be read report 0/0 with a "Degraded" reason.
    /// Fails if the user may not list databases and no database_name is given.
    #[tool]
    async fn get_db_stats(
        &self,
        Parameters(params): Parameters<DatabaseScopeParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let connection = self.connection(&params.connection_name).await?;

        tracing::info!(
            "Aggregating stats for connection '{}' ({})",
            connection.name,
            params.database_name.as_deref().unwrap_or("all databases")
        );

        let stats = self
            .engine
            .database_stats(
                connection.client.as_ref(),
                params.database_name.as_deref(),
                &self.shutdown.child_token(),
            )
            .await
            .map_err(|e| admin_error(&e))?;

        json_result(&stats)
    }

    /// Fetches one document by its _id given as text.
    ///
    /// The stored _id type is unknown, so it is tried as an ObjectId (24 hex digits),
    /// otherwise as an integer, and finally as a string. The matching typed id is
    /// returned along with the document.
    #[tool]
    async fn get_document(
        &self,
        Parameters(params): Parameters<GetDocumentParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let connection = self.connection(&params.connection_name).await?;

        let resolved = identifier::resolve_identifier(
            connection.client.as_ref(),
            &params.database_name,
            &params.collection_name,
            params.document_id.as_deref(),
            self.operation_timeout,
        )
        .await
        .map_err(|e| admin_error(&e))?;

        let response = match resolved {
            Some(found) => serde_json::json!({
                "id": found.id.into_relaxed_extjson(),
                "document": Bson::Document(found.document).into_relaxed_extjson()
            }),
            None => serde_json::json!({ "id": null, "document": null }),
        };

        json_result(&response)
    }

    /// Returns the serverStatus output of a connection's deployment, sections
    /// ordered by name.
    #[tool]
    async fn get_server_status(
        &self,
        Parameters(params): Parameters<ConnectionParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let connection = self.connection(&params.connection_name).await?;

        let status = self
            .engine
            .server_status(connection.client.as_ref())
            .await
            .map_err(|e| admin_error(&e))?;

        let sections: IndexMap<String, serde_json::Value> = status
            .into_iter()
            .map(|(section, value)| (section, value.into_relaxed_extjson()))
            .collect();

        json_result(&ordering::order_keys(&sections))
    }
}

#[tool_handler]
impl ServerHandler for McpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: rmcp::model::Implementation {
                name: self.name.clone(),
                version: self.version.clone(),
                ..Default::default()
            },
            instructions: Some(
                "MongoDB administration server. Workflow: \
                 1) list_connections to see live connections (add_connection to open one), \
                 2) list_databases or get_sidebar to discover databases and collections, \
                 3) get_db_stats for storage size and document counts, \
                 4) get_document to fetch a document by _id without knowing its type. \
                 Names are case-sensitive."
                    .to_string(),
            ),
            ..Default::default()
        }
    }
}
