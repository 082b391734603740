use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

use memtree_core::{BoxError, DistanceMetric, Memory, VectorStore};

use crate::error::{Result, StoreError};
use crate::schema;

const MEMORY_COLUMNS: &str =
    "id, prompt, response, timestamp, prompt_embedding, response_embedding";

/// SQLite-backed memory store.
///
/// Cloning is cheap and shares the connection. Similarity search is a brute
/// force scan over one user's rows, which is fine for a local store holding
/// thousands of exchanges.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        schema::initialize(&conn)?;
        Ok(Self::from_conn(conn))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self::from_conn(conn))
    }

    fn from_conn(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| StoreError::Task("connection lock poisoned".into()))?;
        f(&conn)
    }

    // --- Metadata ---

    pub fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row("SELECT value FROM metadata WHERE key = ?1", [key], |row| {
                    row.get(0)
                })
                .optional()?)
        })
    }

    pub fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
                params![key, value],
            )?;
            Ok(())
        })
    }

    // --- Writes ---

    /// Store one exchange for `user_id`. An empty id is replaced with a fresh
    /// UUID. Ids are scoped per user: re-using one overwrites only that
    /// user's exchange. Returns the stored id.
    pub fn insert_memory(&self, user_id: &str, memory: &Memory) -> Result<String> {
        self.with_conn(|conn| insert_on(conn, user_id, memory))
    }

    /// Store many exchanges in one transaction.
    pub fn insert_batch(&self, user_id: &str, memories: &[Memory]) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let ids = memories
                .iter()
                .map(|m| insert_on(&tx, user_id, m))
                .collect::<Result<Vec<_>>>()?;
            tx.commit()?;
            Ok(ids)
        })
    }

    pub fn delete_memory(&self, user_id: &str, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let rows = conn.execute(
                "DELETE FROM memories WHERE user_id = ?1 AND id = ?2",
                params![user_id, id],
            )?;
            Ok(rows > 0)
        })
    }

    // --- Reads ---

    pub fn count(&self, user_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM memories WHERE user_id = ?1",
                [user_id],
                |row| row.get(0),
            )?;
            Ok(n as usize)
        })
    }

    /// Every user with stored memories and how many each has.
    pub fn user_counts(&self) -> Result<Vec<(String, usize)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, COUNT(*) FROM memories GROUP BY user_id ORDER BY user_id",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
                })?
                .collect::<std::result::Result<_, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_memory(&self, user_id: &str, id: &str) -> Result<Option<Memory>> {
        self.with_conn(|conn| {
            let raw = conn
                .query_row(
                    &format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE user_id = ?1 AND id = ?2"),
                    params![user_id, id],
                    RawMemory::from_row,
                )
                .optional()?;
            raw.map(RawMemory::into_memory).transpose()
        })
    }

    pub fn prompt_embedding(&self, user_id: &str, id: &str) -> Result<Option<Vec<f32>>> {
        self.with_conn(|conn| {
            let blob: Option<Option<Vec<u8>>> = conn
                .query_row(
                    "SELECT prompt_embedding FROM memories WHERE user_id = ?1 AND id = ?2",
                    params![user_id, id],
                    |row| row.get(0),
                )
                .optional()?;
            blob.flatten().map(|b| decode_embedding(&b)).transpose()
        })
    }

    /// The `k` newest exchanges for `user_id`, newest first.
    pub fn recent(&self, user_id: &str, k: usize) -> Result<Vec<Memory>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MEMORY_COLUMNS} FROM memories
                 WHERE user_id = ?1 ORDER BY timestamp DESC, id LIMIT ?2"
            ))?;
            let raws = stmt
                .query_map(params![user_id, k as i64], RawMemory::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            raws.into_iter().map(RawMemory::into_memory).collect()
        })
    }

    /// Up to `limit` exchanges within `max_distance` of `query`, closest first
    /// (ties by id). Rows are indexed by their prompt embedding, or their
    /// response embedding when the prompt has none.
    pub fn nearest(
        &self,
        user_id: &str,
        query: &[f32],
        limit: usize,
        metric: DistanceMetric,
        max_distance: f32,
    ) -> Result<Vec<Memory>> {
        if limit == 0 || query.is_empty() {
            return Ok(Vec::new());
        }
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MEMORY_COLUMNS} FROM memories
                 WHERE user_id = ?1
                   AND (prompt_embedding IS NOT NULL OR response_embedding IS NOT NULL)"
            ))?;
            let raws = stmt
                .query_map([user_id], RawMemory::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let mut hits = Vec::new();
            for raw in raws {
                let memory = raw.into_memory()?;
                let index = memory
                    .prompt_embedding
                    .as_deref()
                    .filter(|v| !v.is_empty())
                    .or(memory.response_embedding.as_deref());
                let Some(distance) = index.and_then(|v| metric.distance(query, v)) else {
                    continue;
                };
                if distance <= max_distance {
                    hits.push((distance, memory));
                }
            }

            hits.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));
            hits.truncate(limit);
            Ok(hits
                .into_iter()
                .map(|(d, mut m)| {
                    m.match_distance = Some(d);
                    m
                })
                .collect())
        })
    }

    /// Flush the WAL into the main database file.
    pub fn checkpoint_truncate(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
            Ok(())
        })
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Store) -> Result<T> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(store)).await?
    }
}

#[async_trait]
impl VectorStore for Store {
    async fn get_embedding_by_id(
        &self,
        user_id: &str,
        pair_id: &str,
    ) -> std::result::Result<Option<Vec<f32>>, BoxError> {
        let (user_id, pair_id) = (user_id.to_string(), pair_id.to_string());
        Ok(self
            .blocking(move |s| s.prompt_embedding(&user_id, &pair_id))
            .await?)
    }

    async fn list_recent(
        &self,
        user_id: &str,
        k: usize,
    ) -> std::result::Result<Vec<Memory>, BoxError> {
        let user_id = user_id.to_string();
        Ok(self.blocking(move |s| s.recent(&user_id, k)).await?)
    }

    async fn nearest_neighbors(
        &self,
        user_id: &str,
        query: &[f32],
        limit: usize,
        metric: DistanceMetric,
        max_distance: f32,
    ) -> std::result::Result<Vec<Memory>, BoxError> {
        let (user_id, query) = (user_id.to_string(), query.to_vec());
        Ok(self
            .blocking(move |s| s.nearest(&user_id, &query, limit, metric, max_distance))
            .await?)
    }
}

fn insert_on(conn: &Connection, user_id: &str, memory: &Memory) -> Result<String> {
    if user_id.is_empty() {
        return Err(StoreError::InvalidData("user id is empty".into()));
    }
    let id = if memory.id.is_empty() {
        Uuid::new_v4().to_string()
    } else {
        memory.id.clone()
    };
    conn.execute(
        "INSERT OR REPLACE INTO memories
            (id, user_id, prompt, response, timestamp, prompt_embedding, response_embedding)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            id,
            user_id,
            memory.prompt,
            memory.response,
            memory.timestamp,
            memory.prompt_embedding.as_deref().map(encode_embedding),
            memory.response_embedding.as_deref().map(encode_embedding),
        ],
    )?;
    Ok(id)
}

struct RawMemory {
    id: String,
    prompt: String,
    response: String,
    timestamp: i64,
    prompt_embedding: Option<Vec<u8>>,
    response_embedding: Option<Vec<u8>>,
}

impl RawMemory {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            prompt: row.get(1)?,
            response: row.get(2)?,
            timestamp: row.get(3)?,
            prompt_embedding: row.get(4)?,
            response_embedding: row.get(5)?,
        })
    }

    fn into_memory(self) -> Result<Memory> {
        let mut memory = Memory::new(self.id, &self.prompt, &self.response, self.timestamp);
        memory.prompt_embedding = self.prompt_embedding.as_deref().map(decode_embedding).transpose()?;
        memory.response_embedding = self
            .response_embedding
            .as_deref()
            .map(decode_embedding)
            .transpose()?;
        Ok(memory)
    }
}

/// Little-endian f32s, back to back.
pub fn encode_embedding(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_le_bytes()).collect()
}

pub fn decode_embedding(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(StoreError::InvalidData(format!(
            "embedding blob of {} bytes is not a whole number of f32s",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem(id: &str, ts: i64, prompt: Option<Vec<f32>>, response: Option<Vec<f32>>) -> Memory {
        let mut m = Memory::new(id, &format!("q {id}"), &format!("a {id}"), ts);
        m.prompt_embedding = prompt;
        m.response_embedding = response;
        m
    }

    fn seeded() -> Store {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_batch(
                "u",
                &[
                    mem("a", 1, Some(vec![1.0, 0.0]), Some(vec![0.0, 1.0])),
                    mem("b", 3, Some(vec![0.9, 0.1]), None),
                    mem("c", 2, None, Some(vec![0.0, 1.0])),
                    mem("d", 4, None, None),
                ],
            )
            .unwrap();
        store
            .insert_memory("other", &mem("z", 9, Some(vec![1.0, 0.0]), None))
            .unwrap();
        store
    }

    #[test]
    fn test_embedding_blob_roundtrip() {
        let v = vec![0.25, -1.5, 3.0];
        assert_eq!(decode_embedding(&encode_embedding(&v)).unwrap(), v);
        assert!(decode_embedding(&[0, 1, 2]).is_err());
    }

    #[test]
    fn test_insert_assigns_id_when_missing() {
        let store = Store::open_in_memory().unwrap();
        let id = store.insert_memory("u", &mem("", 1, None, None)).unwrap();
        assert_eq!(id.len(), 36);
        assert!(store.get_memory("u", &id).unwrap().is_some());
    }

    #[test]
    fn test_same_id_for_two_users_keeps_both() {
        let store = Store::open_in_memory().unwrap();
        store.insert_memory("u", &mem("a", 1, Some(vec![1.0, 0.0]), None)).unwrap();
        store.insert_memory("other", &mem("a", 2, Some(vec![0.0, 1.0]), None)).unwrap();

        assert_eq!(store.count("u").unwrap(), 1);
        assert_eq!(store.count("other").unwrap(), 1);
        let mine = store.get_memory("u", "a").unwrap().unwrap();
        assert_eq!(mine.timestamp, 1);
        assert_eq!(store.prompt_embedding("u", "a").unwrap(), Some(vec![1.0, 0.0]));
        assert_eq!(store.prompt_embedding("other", "a").unwrap(), Some(vec![0.0, 1.0]));

        // Re-inserting replaces only the owner's row.
        store.insert_memory("u", &mem("a", 5, Some(vec![1.0, 0.0]), None)).unwrap();
        assert_eq!(store.get_memory("u", "a").unwrap().unwrap().timestamp, 5);
        assert_eq!(store.get_memory("other", "a").unwrap().unwrap().timestamp, 2);
        assert_eq!(
            store.user_counts().unwrap(),
            vec![("other".to_string(), 1), ("u".to_string(), 1)]
        );
    }

    #[test]
    fn test_insert_rejects_empty_user() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.insert_memory("", &mem("x", 1, None, None)).is_err());
    }

    #[test]
    fn test_recent_newest_first_per_user() {
        let store = seeded();
        let ids: Vec<_> = store.recent("u", 3).unwrap().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, ["d", "b", "c"]);
        assert_eq!(store.recent("other", 10).unwrap().len(), 1);
        assert!(store.recent("nobody", 10).unwrap().is_empty());
    }

    #[test]
    fn test_prompt_embedding_lookup() {
        let store = seeded();
        assert_eq!(store.prompt_embedding("u", "a").unwrap(), Some(vec![1.0, 0.0]));
        assert_eq!(store.prompt_embedding("u", "c").unwrap(), None);
        assert_eq!(store.prompt_embedding("u", "missing").unwrap(), None);
        // user scoping
        assert_eq!(store.prompt_embedding("other", "a").unwrap(), None);
    }

    #[test]
    fn test_nearest_orders_by_distance_and_filters() {
        let store = seeded();
        let hits = store
            .nearest("u", &[1.0, 0.0], 10, DistanceMetric::Cosine, 0.5)
            .unwrap();
        let ids: Vec<_> = hits.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
        assert_eq!(hits[0].match_distance, Some(0.0));
        assert!(hits[1].match_distance.unwrap() > 0.0);
    }

    #[test]
    fn test_nearest_falls_back_to_response_embedding() {
        let store = seeded();
        let hits = store
            .nearest("u", &[0.0, 1.0], 10, DistanceMetric::Cosine, 0.01)
            .unwrap();
        let ids: Vec<_> = hits.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["c"]);
    }

    #[test]
    fn test_nearest_limit() {
        let store = seeded();
        let hits = store
            .nearest("u", &[1.0, 0.0], 1, DistanceMetric::Cosine, 2.0)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
        assert!(store.nearest("u", &[1.0, 0.0], 0, DistanceMetric::Cosine, 2.0).unwrap().is_empty());
    }

    #[test]
    fn test_delete_and_count() {
        let store = seeded();
        assert_eq!(store.count("u").unwrap(), 4);
        assert!(store.delete_memory("u", "a").unwrap());
        assert!(!store.delete_memory("u", "a").unwrap());
        assert_eq!(store.count("u").unwrap(), 3);
        assert_eq!(
            store.user_counts().unwrap(),
            vec![("other".to_string(), 1), ("u".to_string(), 3)]
        );
    }

    #[test]
    fn test_metadata() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.get_metadata("foo").unwrap().is_none());
        store.set_metadata("foo", "bar").unwrap();
        assert_eq!(store.get_metadata("foo").unwrap(), Some("bar".to_string()));
    }

    #[test]
    fn test_open_file_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("memtree.db");
        let store = Store::open(&path).unwrap();
        store.insert_memory("u", &mem("a", 1, None, None)).unwrap();
        drop(store);

        let reopened = Store::open(&path).unwrap();
        assert_eq!(reopened.count("u").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_vector_store_impl() {
        let store = seeded();
        let recent = store.list_recent("u", 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, "d");

        let emb = store.get_embedding_by_id("u", "b").await.unwrap();
        assert_eq!(emb, Some(vec![0.9, 0.1]));

        let hits = store
            .nearest_neighbors("u", &[1.0, 0.0], 5, DistanceMetric::Cosine, 0.3)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
    }
}
