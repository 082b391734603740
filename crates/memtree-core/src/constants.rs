/// Default maximum distance for root (depth 0) neighbors
pub const ROOT_THRESHOLD: f32 = 0.3;

/// Default maximum distance for neighbors below the root
pub const CHILD_THRESHOLD: f32 = 0.1;

/// Candidates requested per child slot when expanding a node.
/// Extra candidates make up for ones already claimed elsewhere in the tree.
pub const OVERSAMPLE: usize = 2;

/// Numerical epsilon for near-zero norms
pub const EPSILON: f32 = 1e-12;
