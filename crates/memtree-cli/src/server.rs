use memtree_core::{LongTermParams, RecallError, RecallRequest};
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::*;
use rmcp::{ErrorData as McpError, ServerHandler, tool, tool_handler, tool_router};
use schemars::JsonSchema;
use serde::Deserialize;

use crate::app::{App, NewMemory};

#[derive(Clone)]
pub struct MemtreeServer {
    app: App,
    tool_router: ToolRouter<Self>,
}

impl MemtreeServer {
    pub fn new(app: App) -> Self {
        Self {
            app,
            tool_router: Self::tool_router(),
        }
    }

    /// Flush the WAL so a clean exit leaves no pending pages behind.
    pub fn checkpoint_wal(&self) {
        match self.app.store.checkpoint_truncate() {
            Ok(()) => tracing::info!("WAL checkpoint complete"),
            Err(e) => tracing::warn!("WAL checkpoint failed: {e}"),
        }
    }
}

fn recall_error(e: RecallError) -> McpError {
    if e.is_client_error() {
        McpError::invalid_params(e.to_string(), None)
    } else {
        McpError::internal_error(e.to_string(), None)
    }
}

fn json_result(value: &impl serde::Serialize) -> Result<CallToolResult, McpError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| McpError::internal_error(e.to_string(), None))?;
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

// --- Tool parameter types ---

#[derive(Debug, Default, Deserialize, JsonSchema)]
struct RecallParams {
    /// User whose memories are searched
    user_id: String,
    /// How many of the most recent exchanges to return as short-term context
    short_term_k: Option<usize>,
    /// Anchor long-term recall on a stored exchange's prompt embedding
    pair_id: Option<String>,
    /// Anchor long-term recall on an explicit query vector
    vector: Option<Vec<f32>>,
    /// Fan-out per tree depth. The first entry caps the root search; its
    /// length is the tree depth. Long-term recall runs only when this is set.
    node_counts: Option<Vec<usize>>,
    /// Maximum distance per depth, same length as node_counts
    node_thresholds: Option<Vec<f32>>,
    /// Search with the anchor alone, not blended with recent context
    #[serde(default)]
    skip_short_term_context: bool,
    /// Remove markdown images instead of presigning them
    #[serde(default)]
    strip_images: bool,
}

impl RecallParams {
    fn into_request(self) -> RecallRequest {
        let mut request = RecallRequest::new(self.user_id).with_strip_images(self.strip_images);
        if let Some(k) = self.short_term_k {
            request = request.with_short_term(k);
        }
        if let Some(node_counts) = self.node_counts {
            request = request.with_long_term(LongTermParams {
                pair_id: self.pair_id,
                vector: self.vector,
                node_counts,
                node_thresholds: self.node_thresholds.unwrap_or_default(),
                skip_short_term_context: self.skip_short_term_context,
            });
        }
        request
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
struct AddParams {
    /// Owner of the new memories
    user_id: String,
    /// Exchanges to store, with precomputed embeddings
    memories: Vec<NewMemory>,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
struct StatsParams {
    /// Limit counts to one user
    user_id: Option<String>,
}

#[tool_router]
impl MemtreeServer {
    #[tool(
        description = "Recall memories for a user. Returns short-term context (the most recent exchanges, newest first) and long-term context: trees of related past exchanges found by similarity to an anchor exchange or vector, each node expanded into its own nearest neighbors. No exchange appears twice in one result."
    )]
    async fn memory_recall(
        &self,
        Parameters(params): Parameters<RecallParams>,
    ) -> Result<CallToolResult, McpError> {
        let request = params.into_request();
        let response = self.app.recall(&request).await.map_err(recall_error)?;
        json_result(&response)
    }

    #[tool(
        description = "Store conversation exchanges for a user. Each memory carries its prompt, response and precomputed prompt/response embeddings. Ids are generated when omitted."
    )]
    async fn memory_add(
        &self,
        Parameters(params): Parameters<AddParams>,
    ) -> Result<CallToolResult, McpError> {
        if params.user_id.trim().is_empty() {
            return Err(McpError::invalid_params("user_id is required", None));
        }
        let ids = self
            .app
            .add(&params.user_id, params.memories)
            .await
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        json_result(&serde_json::json!({ "added": ids.len(), "ids": ids }))
    }

    #[tool(description = "Memory counts per user and the store schema version.")]
    async fn memory_stats(
        &self,
        Parameters(params): Parameters<StatsParams>,
    ) -> Result<CallToolResult, McpError> {
        let stats = self
            .app
            .stats(params.user_id.as_deref())
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        json_result(&stats)
    }
}

#[tool_handler]
impl ServerHandler for MemtreeServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Conversational memory keyed by user.\n\n\
                 - Call memory_add with each finished exchange and its embeddings.\n\
                 - Call memory_recall before answering: short_term_k for recent turns, \
                   node_counts plus pair_id or vector for related past exchanges.\n\
                 - Results never repeat an exchange; deeper tree levels hold looser associations."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
