use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::config::{EngineOptions, LongTermConfig};
use crate::error::{RecallError, Result};
use crate::expand::expand_roots;
use crate::format::MemoryFormatter;
use crate::long_term::{context_vector, resolve_base_vector, search_roots};
use crate::request::{RecallRequest, RecallResponse};
use crate::scope::RequestScope;
use crate::seen::SeenSet;
use crate::short_term::fetch_short_term;
use crate::store::{FileStorage, VectorStore};

/// Stateless recall engine. Each call builds its own dedup set and task tree
/// and discards them when it returns.
#[derive(Clone)]
pub struct RecallEngine {
    store: Arc<dyn VectorStore>,
    files: Arc<dyn FileStorage>,
    options: EngineOptions,
}

impl RecallEngine {
    pub fn new(store: Arc<dyn VectorStore>, files: Arc<dyn FileStorage>) -> Self {
        Self {
            store,
            files,
            options: EngineOptions::default(),
        }
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub async fn recall(&self, request: &RecallRequest) -> Result<RecallResponse> {
        self.recall_with_cancel(request, CancellationToken::new())
            .await
    }

    /// Like [`RecallEngine::recall`], stopping early once `cancel` fires.
    /// The token is also cancelled when the call fails or times out.
    pub async fn recall_with_cancel(
        &self,
        request: &RecallRequest,
        cancel: CancellationToken,
    ) -> Result<RecallResponse> {
        let started = Instant::now();
        let run = self.run(request, cancel.clone());
        let result = match self.options.timeout {
            Some(limit) => tokio::time::timeout(limit, run)
                .await
                .unwrap_or(Err(RecallError::TimedOut)),
            None => run.await,
        };

        match &result {
            Ok(response) => tracing::info!(
                user = %request.user_id,
                short_term = response.short_term.len(),
                long_term_roots = response.long_term.len(),
                long_term_nodes = response.long_term_len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "recall complete"
            ),
            Err(e) => {
                cancel.cancel();
                tracing::warn!(user = %request.user_id, "recall failed: {e}");
            }
        }
        result
    }

    async fn run(&self, request: &RecallRequest, cancel: CancellationToken) -> Result<RecallResponse> {
        if request.user_id.trim().is_empty() {
            return Err(RecallError::validation("userId is required"));
        }
        let config = request
            .long_term
            .as_ref()
            .map(|lt| LongTermConfig::resolve(lt, &self.options))
            .transpose()?;

        let k = request.short_term_k();
        if k == 0 && config.is_none() {
            return Ok(RecallResponse::default());
        }

        let scope = Arc::new(RequestScope::new(
            Arc::clone(&self.store),
            MemoryFormatter::new(Arc::clone(&self.files), &request.user_id, request.strip_images),
            &request.user_id,
            self.options.metric,
            cancel,
        ));

        let anchor = request.anchor_pair_id();
        let short_term = fetch_short_term(&scope, k, anchor).await?;

        let Some(config) = config else {
            return Ok(RecallResponse {
                short_term,
                long_term: Vec::new(),
            });
        };

        let seen = Arc::new(SeenSet::seeded(
            short_term
                .iter()
                .map(|m| m.id.as_str())
                .chain(anchor),
        ));

        let base = resolve_base_vector(&scope, &config).await?;
        let context = context_vector(&config, &short_term);
        let roots = search_roots(&scope, &seen, &config, &base, context.as_deref()).await?;
        let long_term = expand_roots(scope, seen, Arc::new(config), roots).await?;

        Ok(RecallResponse {
            short_term,
            long_term,
        })
    }
}
