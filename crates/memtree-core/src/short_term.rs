use crate::error::{RecallError, Result, Stage};
use crate::memory::Memory;
use crate::scope::RequestScope;

/// The `k` most recent exchanges for the request's user, newest first and
/// formatted. `exclude` (the long-term anchor) never appears in the result.
pub(crate) async fn fetch_short_term(
    scope: &RequestScope,
    k: usize,
    exclude: Option<&str>,
) -> Result<Vec<Memory>> {
    if k == 0 {
        return Ok(Vec::new());
    }

    // One extra row so dropping the anchor still leaves k.
    let limit = if exclude.is_some() { k + 1 } else { k };
    let mut records = scope
        .guard(scope.store.list_recent(&scope.user_id, limit))
        .await?
        .map_err(|e| RecallError::store(Stage::ShortTerm, e))?;

    records.retain(|m| Some(m.id.as_str()) != exclude);
    records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    records.truncate(k);
    for m in &mut records {
        m.depth = 0;
        m.match_distance = None;
        m.children.clear();
    }

    scope.format_all(&mut records).await?;
    tracing::debug!(requested = k, returned = records.len(), "short-term recall");
    Ok(records)
}
