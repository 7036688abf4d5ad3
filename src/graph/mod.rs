/// Graph traversal over document snapshots.
pub mod traversal;

pub use traversal::{neighborhood, MAX_CONTEXT_DEPTH};
