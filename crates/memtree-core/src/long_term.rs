//! Base-vector resolution and the depth-0 search that seeds each tree.

use crate::config::{Anchor, LongTermConfig};
use crate::error::{RecallError, Result, Stage};
use crate::memory::Memory;
use crate::scope::RequestScope;
use crate::seen::SeenSet;
use crate::vector::combine_embeddings;

/// Query vector the root search starts from.
pub(crate) async fn resolve_base_vector(
    scope: &RequestScope,
    config: &LongTermConfig,
) -> Result<Vec<f32>> {
    match &config.anchor {
        Anchor::Vector(v) => Ok(v.clone()),
        Anchor::PairId(pair_id) => {
            let embedding = scope
                .guard(scope.store.get_embedding_by_id(&scope.user_id, pair_id))
                .await?
                .map_err(|e| RecallError::store(Stage::Anchor, e))?;
            match embedding {
                Some(v) if !v.is_empty() => Ok(v),
                _ => Err(RecallError::NotFound(format!(
                    "no stored embedding for pair '{pair_id}'"
                ))),
            }
        }
    }
}

/// Centroid of the short-term memories, unless the request opts out.
pub(crate) fn context_vector(config: &LongTermConfig, short_term: &[Memory]) -> Option<Vec<f32>> {
    if config.skip_short_term_context || short_term.is_empty() {
        return None;
    }
    combine_embeddings(short_term)
}

/// Depth-0 search: the base vector (fatal on failure) and, when available,
/// the context vector (dropped on failure), merged through `seen`.
pub(crate) async fn search_roots(
    scope: &RequestScope,
    seen: &SeenSet,
    config: &LongTermConfig,
    base: &[f32],
    context: Option<&[f32]>,
) -> Result<Vec<Memory>> {
    let root = config.root();

    let target = scope.nearest(base, root.count, root.threshold, Stage::RootSearch);
    let combined = async {
        let Some(context) = context.filter(|v| !v.is_empty()) else {
            return Ok::<_, RecallError>(Vec::new());
        };
        match scope
            .nearest(context, root.count, root.threshold, Stage::RootSearch)
            .await
        {
            Ok(found) => Ok(found),
            Err(e) => {
                tracing::warn!("combined-vector root search failed, continuing without it: {e}");
                Ok(Vec::new())
            }
        }
    };

    let (target_hits, combined_hits) = tokio::try_join!(target, combined)?;
    let (n_target, n_combined) = (target_hits.len(), combined_hits.len());

    let mut roots = Vec::with_capacity(n_target + n_combined);
    for mut m in target_hits.into_iter().chain(combined_hits) {
        if seen.claim(&m.id) {
            m.depth = 0;
            m.children.clear();
            roots.push(m);
        }
    }

    scope.format_all(&mut roots).await?;
    tracing::debug!(
        target = n_target,
        combined = n_combined,
        kept = roots.len(),
        "root search merged"
    );
    Ok(roots)
}
