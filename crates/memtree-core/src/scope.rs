use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::error::{RecallError, Result, Stage};
use crate::format::MemoryFormatter;
use crate::memory::Memory;
use crate::store::VectorStore;
use crate::vector::DistanceMetric;

/// Collaborators and signals shared by every task of a single recall.
///
/// The only mutable state is the failure slot; the dedup set travels
/// separately so each task's signature shows that it touches it.
pub(crate) struct RequestScope {
    pub store: Arc<dyn VectorStore>,
    pub formatter: MemoryFormatter,
    pub user_id: Arc<str>,
    pub metric: DistanceMetric,
    pub cancel: CancellationToken,
    /// First real error of the request; later `Cancelled` results are its echoes.
    failure: Mutex<Option<RecallError>>,
}

impl RequestScope {
    pub fn new(
        store: Arc<dyn VectorStore>,
        formatter: MemoryFormatter,
        user_id: &str,
        metric: DistanceMetric,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            formatter,
            user_id: Arc::from(user_id),
            metric,
            cancel,
            failure: Mutex::new(None),
        }
    }

    /// Record `error` as the request's failure (unless one is already
    /// recorded) and cancel every outstanding task.
    pub fn abort(&self, error: RecallError) {
        if !matches!(error, RecallError::Cancelled) {
            let mut slot = self.failure.lock().unwrap_or_else(|p| p.into_inner());
            if slot.is_none() {
                *slot = Some(error);
            }
        }
        self.cancel.cancel();
    }

    /// The recorded failure if there is one, else `error` itself.
    pub fn root_cause(&self, error: RecallError) -> RecallError {
        let mut slot = self.failure.lock().unwrap_or_else(|p| p.into_inner());
        slot.take().unwrap_or(error)
    }

    /// Run `fut` unless the request is cancelled first.
    pub async fn guard<T>(&self, fut: impl Future<Output = T>) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(RecallError::Cancelled),
            out = fut => Ok(out),
        }
    }

    pub async fn nearest(
        &self,
        query: &[f32],
        limit: usize,
        max_distance: f32,
        stage: Stage,
    ) -> Result<Vec<Memory>> {
        let found = self
            .guard(self.store.nearest_neighbors(
                &self.user_id,
                query,
                limit,
                self.metric,
                max_distance,
            ))
            .await?
            .map_err(|e| RecallError::store(stage, e))?;
        tracing::debug!(%stage, limit, max_distance, found = found.len(), "nearest neighbors");
        Ok(found)
    }

    pub async fn format_all(&self, memories: &mut [Memory]) -> Result<()> {
        self.guard(self.formatter.apply_all(memories)).await?
    }
}
