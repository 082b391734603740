//! State shared by the CLI commands, the MCP server and the HTTP endpoint.

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use memtree_core::{Memory, RecallEngine, RecallRequest, RecallResponse};
use memtree_store::{DB_FILE, Settings, Store};
use schemars::JsonSchema;
use serde::Deserialize;

#[derive(Clone)]
pub struct App {
    pub store: Store,
    pub engine: RecallEngine,
    pub settings: Settings,
}

/// One exchange to store, with embeddings computed by the caller.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewMemory {
    /// Stable id; a UUID is generated when omitted
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub response: String,
    /// Unix milliseconds; defaults to now
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default, alias = "prompt_embedding")]
    pub prompt_embedding: Option<Vec<f32>>,
    #[serde(default, alias = "response_embedding")]
    pub response_embedding: Option<Vec<f32>>,
}

impl NewMemory {
    fn into_memory(self, now: i64) -> Memory {
        let mut memory = Memory::new(
            self.id.unwrap_or_default(),
            &self.prompt,
            &self.response,
            self.timestamp.unwrap_or(now),
        );
        memory.prompt_embedding = self.prompt_embedding.filter(|v| !v.is_empty());
        memory.response_embedding = self.response_embedding.filter(|v| !v.is_empty());
        memory
    }
}

impl App {
    /// Open the store and settings under `data_dir`, creating it if needed.
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;
        let settings = Settings::load(data_dir).context("failed to load config.toml")?;
        let store = Store::open(&data_dir.join(DB_FILE)).context("failed to open memory store")?;
        Ok(Self::build(store, settings))
    }

    pub fn in_memory(settings: Settings) -> Result<Self> {
        let store = Store::open_in_memory().context("failed to open in-memory store")?;
        Ok(Self::build(store, settings))
    }

    fn build(store: Store, settings: Settings) -> Self {
        let engine = RecallEngine::new(Arc::new(store.clone()), settings.file_storage())
            .with_options(settings.engine_options());
        Self {
            store,
            engine,
            settings,
        }
    }

    /// Run a recall and drop embeddings from the result.
    pub async fn recall(&self, request: &RecallRequest) -> memtree_core::Result<RecallResponse> {
        let mut response = self.engine.recall(request).await?;
        response.strip_embeddings();
        Ok(response)
    }

    /// Store `memories` for `user_id` in one transaction; returns their ids.
    pub async fn add(&self, user_id: &str, memories: Vec<NewMemory>) -> Result<Vec<String>> {
        if user_id.trim().is_empty() {
            bail!("userId is required");
        }
        let now = now_millis();
        let batch: Vec<Memory> = memories.into_iter().map(|m| m.into_memory(now)).collect();
        let store = self.store.clone();
        let user_id = user_id.to_string();
        let ids = tokio::task::spawn_blocking(move || store.insert_batch(&user_id, &batch))
            .await
            .context("insert task failed")??;
        tracing::info!(count = ids.len(), "stored memories");
        Ok(ids)
    }

    /// Memory counts, for one user or for every user.
    pub fn stats(&self, user_id: Option<&str>) -> Result<serde_json::Value> {
        let schema_version = self
            .store
            .get_metadata("schema_version")?
            .and_then(|v| v.parse::<i64>().ok());
        let users: Vec<(String, usize)> = match user_id {
            Some(user) => vec![(user.to_string(), self.store.count(user)?)],
            None => self.store.user_counts()?,
        };
        let total: usize = users.iter().map(|(_, n)| n).sum();
        Ok(serde_json::json!({
            "users": users
                .iter()
                .map(|(user, n)| serde_json::json!({ "userId": user, "memories": n }))
                .collect::<Vec<_>>(),
            "memories": total,
            "schemaVersion": schema_version,
        }))
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
