//! Concurrent tree expansion below the root search.
//!
//! Every node is expanded in its own tokio task. A parent owns the
//! [`JoinSet`] of its children's tasks, so when a parent bails out on an
//! error the set is dropped and every descendant task is aborted with it.
//! Siblings in other subtrees stop at their next store call once the
//! request's cancellation token fires. They report `Cancelled`, so the
//! error that started the teardown is parked on the scope and handed back
//! by [`expand_roots`] whichever task finishes first.

use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::task::JoinSet;

use crate::config::LongTermConfig;
use crate::error::{RecallError, Result, Stage};
use crate::memory::Memory;
use crate::scope::RequestScope;
use crate::seen::SeenSet;

/// Grow each root into a tree of `config.depth()` levels.
pub(crate) async fn expand_roots(
    scope: Arc<RequestScope>,
    seen: Arc<SeenSet>,
    config: Arc<LongTermConfig>,
    roots: Vec<Memory>,
) -> Result<Vec<Memory>> {
    if config.depth() <= 1 || roots.is_empty() {
        return Ok(roots);
    }
    expand_all(Arc::clone(&scope), seen, config, roots, 1)
        .await
        .map_err(|e| scope.root_cause(e))
}

/// Expand `nodes` concurrently, looking for their children at `depth`.
/// Output keeps the input order.
fn expand_all(
    scope: Arc<RequestScope>,
    seen: Arc<SeenSet>,
    config: Arc<LongTermConfig>,
    nodes: Vec<Memory>,
    depth: usize,
) -> BoxFuture<'static, Result<Vec<Memory>>> {
    async move {
        let mut tasks = JoinSet::new();
        let n = nodes.len();
        for (idx, node) in nodes.into_iter().enumerate() {
            let scope = Arc::clone(&scope);
            let seen = Arc::clone(&seen);
            let config = Arc::clone(&config);
            tasks.spawn(async move { (idx, expand_node(scope, seen, config, node, depth).await) });
        }

        let mut slots: Vec<Option<Memory>> = (0..n).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined
                .map_err(RecallError::from)
                .and_then(|(idx, result)| result.map(|node| (idx, node)));
            match outcome {
                Ok((idx, node)) => slots[idx] = Some(node),
                Err(e) => {
                    scope.abort(e);
                    return Err(RecallError::Cancelled);
                }
            }
        }

        Ok(slots.into_iter().flatten().collect())
    }
    .boxed()
}

/// Attach up to `level.count` unclaimed neighbors of `node` as its children,
/// then expand those children one level further.
async fn expand_node(
    scope: Arc<RequestScope>,
    seen: Arc<SeenSet>,
    config: Arc<LongTermConfig>,
    mut node: Memory,
    depth: usize,
) -> Result<Memory> {
    let Some(level) = config.level(depth) else {
        return Ok(node);
    };
    let Some(query) = node.outbound_embedding().map(<[f32]>::to_vec) else {
        tracing::debug!(id = %node.id, depth, "no embedding to expand from");
        return Ok(node);
    };

    let limit = level.count.saturating_mul(config.oversample);
    let candidates = scope
        .nearest(&query, limit, level.threshold, Stage::Expansion { depth })
        .await?;

    let mut children = Vec::with_capacity(level.count);
    for mut candidate in candidates {
        if children.len() >= level.count {
            break;
        }
        if seen.claim(&candidate.id) {
            candidate.depth = depth;
            candidate.children.clear();
            children.push(candidate);
        }
    }
    scope.format_all(&mut children).await?;

    node.children = if depth + 1 < config.depth() && !children.is_empty() {
        expand_all(scope, seen, config, children, depth + 1).await?
    } else {
        children
    };
    Ok(node)
}
