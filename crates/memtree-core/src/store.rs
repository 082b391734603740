//! Collaborator interfaces the engine calls into.

use async_trait::async_trait;

use crate::error::BoxError;
use crate::memory::Memory;
use crate::vector::DistanceMetric;

/// Semantic store holding a user's exchanges and their embeddings.
#[async_trait]
pub trait VectorStore: Send + Sync + 'static {
    /// Stored prompt embedding of `pair_id`, or `None` if the pair is unknown
    /// or has no embedding.
    async fn get_embedding_by_id(
        &self,
        user_id: &str,
        pair_id: &str,
    ) -> Result<Option<Vec<f32>>, BoxError>;

    /// The `k` most recent exchanges, newest first.
    async fn list_recent(&self, user_id: &str, k: usize) -> Result<Vec<Memory>, BoxError>;

    /// Up to `limit` exchanges within `max_distance` of `query`, closest first,
    /// each with `match_distance` set.
    async fn nearest_neighbors(
        &self,
        user_id: &str,
        query: &[f32],
        limit: usize,
        metric: DistanceMetric,
        max_distance: f32,
    ) -> Result<Vec<Memory>, BoxError>;
}

/// File storage able to hand out time-bounded URLs for stored images.
#[async_trait]
pub trait FileStorage: Send + Sync + 'static {
    async fn presign(&self, user_id: &str, image_ref: &str) -> Result<String, BoxError>;
}

/// Storage for deployments that never presign; every call fails.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoFileStorage;

#[async_trait]
impl FileStorage for NoFileStorage {
    async fn presign(&self, _user_id: &str, image_ref: &str) -> Result<String, BoxError> {
        Err(format!("no file storage configured for '{image_ref}'").into())
    }
}
