use std::collections::HashMap;

use crate::chunk::{ChunkRecord, SceneContainer};
use crate::session::{DiagnosticKind, Diagnostics};

/// One node of the transient chunk tree produced by [`build`]. Owned by
/// the build call; never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    pub chunk: ChunkRecord,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    /// Number of nodes in this subtree including the node itself.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(TreeNode::count).sum::<usize>()
    }
}

/// Reconstructs the parent/child forest from a flat container.
///
/// Chunks are matched to parents by `sub_name`: at the root level the
/// anchor is the container header name (an empty `sub_name` also counts
/// as root), below it the anchor is the parent chunk's name. Selection
/// follows container order, and a chunk is assigned at most once, so the
/// result is deterministic for a given input.
///
/// A chunk whose `sub_name` never resolves is unreachable; it is dropped
/// with a diagnostic rather than silently lost.
pub fn build(container: &SceneContainer, diagnostics: &mut Diagnostics) -> Vec<TreeNode> {
    // Candidate indices keyed by sub_name, in container order. Assignment
    // is tracked separately so duplicate (oct_) names behave exactly like
    // a shrinking pool scanned front to back.
    let mut by_sub_name: HashMap<&str, Vec<usize>> = HashMap::new();
    for (index, chunk) in container.chunks.iter().enumerate() {
        by_sub_name
            .entry(chunk.sub_name.as_str())
            .or_default()
            .push(index);
    }
    let mut assigned = vec![false; container.chunks.len()];

    let mut root_indices = take_matches(&by_sub_name, &mut assigned, &container.header_name);
    if !container.header_name.is_empty() {
        let empty_roots = take_matches(&by_sub_name, &mut assigned, "");
        root_indices.extend(empty_roots);
        root_indices.sort_unstable();
    }

    let forest = root_indices
        .into_iter()
        .map(|index| build_node(index, container, &by_sub_name, &mut assigned))
        .collect();

    for (index, taken) in assigned.iter().enumerate() {
        if !taken {
            let chunk = &container.chunks[index];
            diagnostics.report(
                DiagnosticKind::OrphanChunk,
                format!(
                    "chunk '{}' references unknown parent '{}' and was dropped",
                    chunk.name, chunk.sub_name
                ),
            );
        }
    }

    forest
}

fn take_matches(
    by_sub_name: &HashMap<&str, Vec<usize>>,
    assigned: &mut [bool],
    anchor: &str,
) -> Vec<usize> {
    let Some(candidates) = by_sub_name.get(anchor) else {
        return Vec::new();
    };
    let mut taken = Vec::new();
    for &index in candidates {
        if !assigned[index] {
            assigned[index] = true;
            taken.push(index);
        }
    }
    taken
}

fn build_node(
    index: usize,
    container: &SceneContainer,
    by_sub_name: &HashMap<&str, Vec<usize>>,
    assigned: &mut [bool],
) -> TreeNode {
    let chunk = container.chunks[index].clone();
    let child_indices = take_matches(by_sub_name, assigned, &chunk.name);
    let children = child_indices
        .into_iter()
        .map(|child| build_node(child, container, by_sub_name, assigned))
        .collect();
    TreeNode { chunk, children }
}
