//! Engine options and per-request long-term configuration.
//!
//! A [`LongTermConfig`] is built from the caller's [`LongTermParams`] before
//! any store call is made, so every validation failure surfaces without I/O
//! and the expansion code only ever sees a fully-populated value.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{CHILD_THRESHOLD, OVERSAMPLE, ROOT_THRESHOLD};
use crate::error::{RecallError, Result};
use crate::request::LongTermParams;
use crate::vector::DistanceMetric;

/// Engine-wide knobs, fixed for the lifetime of a [`crate::RecallEngine`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Candidates requested per child slot during expansion.
    pub oversample: usize,
    /// Threshold used at depth 0 when the request gives none.
    pub root_threshold: f32,
    /// Threshold used below depth 0 when the request gives none.
    pub child_threshold: f32,
    pub metric: DistanceMetric,
    /// Deadline for a whole recall call.
    #[serde(with = "opt_millis")]
    pub timeout: Option<Duration>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            oversample: OVERSAMPLE,
            root_threshold: ROOT_THRESHOLD,
            child_threshold: CHILD_THRESHOLD,
            metric: DistanceMetric::Cosine,
            timeout: None,
        }
    }
}

mod opt_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

/// Where the long-term base vector comes from.
#[derive(Clone, Debug, PartialEq)]
pub enum Anchor {
    PairId(String),
    Vector(Vec<f32>),
}

/// Fan-out cap and distance threshold for one tree depth.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Level {
    pub count: usize,
    pub threshold: f32,
}

/// Validated long-term settings for a single request.
#[derive(Clone, Debug, PartialEq)]
pub struct LongTermConfig {
    pub anchor: Anchor,
    pub levels: Vec<Level>,
    pub oversample: usize,
    pub skip_short_term_context: bool,
}

impl LongTermConfig {
    pub fn resolve(params: &LongTermParams, options: &EngineOptions) -> Result<Self> {
        let anchor = match (&params.pair_id, &params.vector) {
            (Some(_), Some(_)) => {
                return Err(RecallError::validation(
                    "longTerm accepts either pairId or vector, not both",
                ));
            }
            (None, None) => {
                return Err(RecallError::validation(
                    "longTerm requires one of pairId or vector",
                ));
            }
            (Some(id), None) if id.is_empty() => {
                return Err(RecallError::validation("longTerm pairId is empty"));
            }
            (Some(id), None) => Anchor::PairId(id.clone()),
            (None, Some(v)) if v.is_empty() => {
                return Err(RecallError::validation("longTerm vector is empty"));
            }
            (None, Some(v)) => Anchor::Vector(v.clone()),
        };

        if params.node_counts.is_empty() {
            return Err(RecallError::validation(
                "nodeCounts must have at least one entry",
            ));
        }
        if let Some(depth) = params.node_counts.iter().position(|&c| c == 0) {
            return Err(RecallError::validation(format!(
                "nodeCounts[{depth}] must be greater than zero"
            )));
        }

        let thresholds = if params.node_thresholds.is_empty() {
            default_thresholds(params.node_counts.len(), options)
        } else if params.node_thresholds.len() != params.node_counts.len() {
            return Err(RecallError::validation(format!(
                "nodeThresholds has {} entries but nodeCounts has {}",
                params.node_thresholds.len(),
                params.node_counts.len()
            )));
        } else {
            params.node_thresholds.clone()
        };

        if let Some(t) = thresholds.iter().find(|t| !t.is_finite() || **t < 0.0) {
            return Err(RecallError::validation(format!(
                "node threshold {t} must be a non-negative number"
            )));
        }

        let levels = params
            .node_counts
            .iter()
            .zip(thresholds)
            .map(|(&count, threshold)| Level { count, threshold })
            .collect();

        Ok(Self {
            anchor,
            levels,
            oversample: options.oversample.max(1),
            skip_short_term_context: params.skip_short_term_context,
        })
    }

    /// Number of tree levels, root included.
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    pub fn root(&self) -> Level {
        self.levels[0]
    }

    pub fn level(&self, depth: usize) -> Option<Level> {
        self.levels.get(depth).copied()
    }

    pub fn thresholds(&self) -> Vec<f32> {
        self.levels.iter().map(|l| l.threshold).collect()
    }
}

fn default_thresholds(len: usize, options: &EngineOptions) -> Vec<f32> {
    (0..len)
        .map(|i| {
            if i == 0 {
                options.root_threshold
            } else {
                options.child_threshold
            }
        })
        .collect()
}
