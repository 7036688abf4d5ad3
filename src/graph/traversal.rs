use std::collections::HashSet;

use crate::types::DocumentSnapshot;

/// Hard cap on context expansion depth. A query may ask for any depth; the
/// traversal never walks more hops than this.
pub const MAX_CONTEXT_DEPTH: i64 = 3;

/// Expands `targets` into their bounded-depth neighborhood within `snapshot`.
///
/// Depth is clamped to `[0, MAX_CONTEXT_DEPTH]`. Target ids that are not
/// snapshot keys are ignored. With depth 0 the result is exactly the targets
/// present in the snapshot; otherwise a breadth-first expansion follows
/// `sources ∪ targets` edges level by level, visiting each node at most once
/// (source/target edges may form cycles in a user-built graph), and stops
/// early once a level produces no new neighbors.
///
/// The returned map is the sub-map of `snapshot` restricted to the expanded
/// id set. Given the same snapshot and inputs, that id set is identical on
/// every call.
pub fn neighborhood(
    snapshot: &DocumentSnapshot,
    targets: &HashSet<String>,
    depth: i64,
) -> DocumentSnapshot {
    let depth = depth.clamp(0, MAX_CONTEXT_DEPTH);

    let mut included: HashSet<String> = targets
        .iter()
        .filter(|id| snapshot.contains_key(*id))
        .cloned()
        .collect();

    if depth > 0 && !included.is_empty() {
        let mut visited = included.clone();
        let mut frontier = included.clone();

        for _ in 0..depth {
            let mut next_frontier: HashSet<String> = HashSet::new();
            for id in &frontier {
                let Some(node) = snapshot.get(id) else {
                    continue;
                };
                for neighbor in node.sources.iter().chain(node.targets.iter()) {
                    if snapshot.contains_key(neighbor) && visited.insert(neighbor.clone()) {
                        next_frontier.insert(neighbor.clone());
                        included.insert(neighbor.clone());
                    }
                }
            }
            if next_frontier.is_empty() {
                break;
            }
            frontier = next_frontier;
        }
    }

    snapshot
        .iter()
        .filter(|(id, _)| included.contains(*id))
        .map(|(id, node)| (id.clone(), node.clone()))
        .collect()
}
