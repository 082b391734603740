//! In-memory store with call counters, injected failures and latency.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use memtree_core::{BoxError, DistanceMetric, FileStorage, Memory, RecallEngine, VectorStore};

pub const USER: &str = "user-1";

struct Entry {
    memory: Memory,
    index: Vec<f32>,
}

#[derive(Default)]
pub struct FakeStore {
    entries: Vec<Entry>,
    failing_queries: Vec<Vec<f32>>,
    slow_queries: Vec<(Vec<f32>, Duration)>,
    fail_recent: bool,
    pub recent_calls: AtomicUsize,
    pub lookup_calls: AtomicUsize,
    pub nn_calls: AtomicUsize,
    /// Nearest-neighbor calls that ran to completion (not aborted mid-sleep).
    pub nn_completed: AtomicUsize,
}

fn same(a: &[f32], b: &[f32]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-5)
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a memory, searchable by its prompt embedding (or response if none).
    pub fn with(mut self, memory: Memory) -> Self {
        let index = memory
            .prompt_embedding
            .clone()
            .or_else(|| memory.response_embedding.clone())
            .unwrap_or_default();
        self.entries.push(Entry { memory, index });
        self
    }

    /// Add a memory searchable by `index` regardless of its own embeddings.
    pub fn with_indexed(mut self, memory: Memory, index: Vec<f32>) -> Self {
        self.entries.push(Entry { memory, index });
        self
    }

    pub fn failing_query(mut self, query: Vec<f32>) -> Self {
        self.failing_queries.push(query);
        self
    }

    pub fn slow_query(mut self, query: Vec<f32>, delay: Duration) -> Self {
        self.slow_queries.push((query, delay));
        self
    }

    pub fn failing_recent(mut self) -> Self {
        self.fail_recent = true;
        self
    }

    pub fn total_calls(&self) -> usize {
        self.recent_calls.load(Ordering::SeqCst)
            + self.lookup_calls.load(Ordering::SeqCst)
            + self.nn_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VectorStore for FakeStore {
    async fn get_embedding_by_id(
        &self,
        _user_id: &str,
        pair_id: &str,
    ) -> Result<Option<Vec<f32>>, BoxError> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .entries
            .iter()
            .find(|e| e.memory.id == pair_id)
            .and_then(|e| e.memory.prompt_embedding.clone()))
    }

    async fn list_recent(&self, _user_id: &str, k: usize) -> Result<Vec<Memory>, BoxError> {
        self.recent_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_recent {
            return Err("recent listing unavailable".into());
        }
        let mut all: Vec<Memory> = self.entries.iter().map(|e| e.memory.clone()).collect();
        all.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        all.truncate(k);
        Ok(all)
    }

    async fn nearest_neighbors(
        &self,
        _user_id: &str,
        query: &[f32],
        limit: usize,
        metric: DistanceMetric,
        max_distance: f32,
    ) -> Result<Vec<Memory>, BoxError> {
        self.nn_calls.fetch_add(1, Ordering::SeqCst);
        if let Some((_, delay)) = self.slow_queries.iter().find(|(q, _)| same(q, query)) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing_queries.iter().any(|q| same(q, query)) {
            return Err(format!("injected failure for query {query:?}").into());
        }

        let mut hits: Vec<(f32, Memory)> = self
            .entries
            .iter()
            .filter_map(|e| {
                let d = metric.distance(query, &e.index)?;
                (d <= max_distance).then(|| (d, e.memory.clone()))
            })
            .collect();
        hits.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));
        hits.truncate(limit);

        self.nn_completed.fetch_add(1, Ordering::SeqCst);
        Ok(hits
            .into_iter()
            .map(|(d, mut m)| {
                m.match_distance = Some(d);
                m
            })
            .collect())
    }
}

/// Presigner that records every ref it signs.
#[derive(Default)]
pub struct RecordingFiles {
    pub signed: std::sync::Mutex<Vec<String>>,
}

#[async_trait]
impl FileStorage for RecordingFiles {
    async fn presign(&self, user_id: &str, image_ref: &str) -> Result<String, BoxError> {
        self.signed
            .lock()
            .map_err(|e| e.to_string())?
            .push(image_ref.to_string());
        Ok(format!("https://signed.test/{user_id}/{image_ref}"))
    }
}

pub fn memory(id: &str, ts: i64, prompt: Option<Vec<f32>>, response: Option<Vec<f32>>) -> Memory {
    let mut m = Memory::new(id, &format!("prompt {id}"), &format!("response {id}"), ts);
    m.prompt_embedding = prompt;
    m.response_embedding = response;
    m
}

pub fn engine(store: Arc<FakeStore>) -> RecallEngine {
    RecallEngine::new(store, Arc::new(RecordingFiles::default()))
}

/// A dense cluster: every memory sits close to every other, so expansion
/// keeps rediscovering the same ids and dedup does real work.
pub fn cluster(n: usize) -> FakeStore {
    let mut store = FakeStore::new();
    for i in 0..n {
        let a = i as f32 * 0.05;
        let prompt = vec![a.cos(), a.sin(), 0.2];
        let b = a + 0.4;
        let response = vec![b.cos(), b.sin(), 0.2];
        store = store.with(memory(&format!("m{i:02}"), i as i64, Some(prompt), Some(response)));
    }
    store
}

pub fn hashmap_counts(ids: &[&str]) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for id in ids {
        *counts.entry(id.to_string()).or_insert(0) += 1;
    }
    counts
}
