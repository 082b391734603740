//! Conversational memory recall.
//!
//! Assembles context for an assistant from a semantic store in two parts:
//! short-term recall (the most recent exchanges) and long-term recall, where a
//! query vector seeds a nearest-neighbor search and every match is expanded
//! into a tree by re-querying on its own embedding. Expansion runs
//! concurrently and a request-scoped [`SeenSet`] keeps any memory from
//! appearing twice in one response.
//!
//! No storage of its own: the engine talks to a [`VectorStore`] and a
//! [`FileStorage`] supplied by the caller.

pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
mod expand;
pub mod format;
mod long_term;
pub mod memory;
pub mod request;
mod scope;
pub mod seen;
mod short_term;
pub mod store;
pub mod vector;

pub use config::{Anchor, EngineOptions, Level, LongTermConfig};
pub use constants::{CHILD_THRESHOLD, EPSILON, OVERSAMPLE, ROOT_THRESHOLD};
pub use engine::RecallEngine;
pub use error::{BoxError, RecallError, Result, Stage};
pub use format::{MemoryFormatter, format_response, presign_images, strip_images};
pub use memory::Memory;
pub use request::{LongTermParams, RecallRequest, RecallResponse, ShortTermParams};
pub use seen::SeenSet;
pub use store::{FileStorage, NoFileStorage, VectorStore};
pub use vector::{DistanceMetric, combine, combine_embeddings, cosine_distance, normalize};
