use serde::{Deserialize, Serialize};

use crate::memory::Memory;

/// Parameters for one recall call. Read-only once handed to the engine.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecallRequest {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_term: Option<ShortTermParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_term: Option<LongTermParams>,
    #[serde(default)]
    pub strip_images: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShortTermParams {
    pub k: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LongTermParams {
    /// Existing exchange whose prompt embedding anchors the search.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pair_id: Option<String>,
    /// Explicit query vector. Mutually exclusive with `pair_id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
    /// Per-depth fan-out cap; index 0 bounds the root search.
    pub node_counts: Vec<usize>,
    /// Per-depth maximum distance. Empty means use the defaults.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub node_thresholds: Vec<f32>,
    #[serde(default)]
    pub skip_short_term_context: bool,
}

impl RecallRequest {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    pub fn with_short_term(mut self, k: usize) -> Self {
        self.short_term = Some(ShortTermParams { k });
        self
    }

    pub fn with_long_term(mut self, long_term: LongTermParams) -> Self {
        self.long_term = Some(long_term);
        self
    }

    pub fn with_strip_images(mut self, strip: bool) -> Self {
        self.strip_images = strip;
        self
    }

    /// Requested short-term size, treating an absent block as zero.
    pub fn short_term_k(&self) -> usize {
        self.short_term.map(|s| s.k).unwrap_or(0)
    }

    /// The anchor pair id, if the long-term block names one.
    pub fn anchor_pair_id(&self) -> Option<&str> {
        self.long_term.as_ref()?.pair_id.as_deref()
    }
}

impl LongTermParams {
    pub fn from_pair(pair_id: impl Into<String>, node_counts: Vec<usize>) -> Self {
        Self {
            pair_id: Some(pair_id.into()),
            node_counts,
            ..Default::default()
        }
    }

    pub fn from_vector(vector: Vec<f32>, node_counts: Vec<usize>) -> Self {
        Self {
            vector: Some(vector),
            node_counts,
            ..Default::default()
        }
    }

    pub fn with_thresholds(mut self, thresholds: Vec<f32>) -> Self {
        self.node_thresholds = thresholds;
        self
    }

    pub fn skipping_short_term_context(mut self) -> Self {
        self.skip_short_term_context = true;
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecallResponse {
    pub short_term: Vec<Memory>,
    pub long_term: Vec<Memory>,
}

impl RecallResponse {
    /// Every memory id in the response, short-term first, then each long-term
    /// tree depth first.
    pub fn all_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.short_term.iter().map(|m| m.id.as_str()).collect();
        for root in &self.long_term {
            root.walk(&mut |m| ids.push(m.id.as_str()));
        }
        ids
    }

    /// Total long-term nodes across all trees.
    pub fn long_term_len(&self) -> usize {
        self.long_term.iter().map(Memory::subtree_len).sum()
    }

    pub fn strip_embeddings(&mut self) {
        for m in self.short_term.iter_mut().chain(self.long_term.iter_mut()) {
            m.strip_embeddings();
        }
    }
}
