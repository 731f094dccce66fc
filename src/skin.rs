use glam::Mat4;

use crate::chunk::{WeightBone, WeightEntry};
use crate::session::{DiagnosticKind, Diagnostics};

/// One bone influence on a vertex, in the index space of
/// [`SkinBinding::bones`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoneWeight {
    pub bone_index: u32,
    pub weight: f32,
}

/// Per-vertex skin data as the host engine consumes it: a bone count per
/// vertex and a vertex-major flattened influence list, plus the resolved
/// bone names and their bind poses (the two arrays are parallel).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SkinBinding {
    pub bones_per_vertex: Vec<u8>,
    pub weights: Vec<BoneWeight>,
    pub bones: Vec<String>,
    pub bind_poses: Vec<Mat4>,
}

impl SkinBinding {
    /// Influences of one vertex as a slice into the flattened list.
    pub fn vertex_weights(&self, vertex: usize) -> &[BoneWeight] {
        let start: usize = self.bones_per_vertex[..vertex]
            .iter()
            .map(|&count| count as usize)
            .sum();
        let len = self.bones_per_vertex[vertex] as usize;
        &self.weights[start..start + len]
    }
}

/// Converts per-bone weight lists into per-vertex arrays.
///
/// `resolve` answers whether a named bone exists among the already-built
/// objects. A bone that does not resolve is skipped with a diagnostic and
/// contributes neither a name nor a bind pose, keeping the output arrays
/// parallel. No weight normalization happens here in either direction.
pub fn unflatten_weights(
    weight_bones: &[WeightBone],
    vertex_count: usize,
    mut resolve: impl FnMut(&str) -> bool,
    diagnostics: &mut Diagnostics,
) -> SkinBinding {
    let mut bones = Vec::new();
    let mut bind_poses = Vec::new();
    let mut per_vertex: Vec<Vec<BoneWeight>> = vec![Vec::new(); vertex_count];

    for weight_bone in weight_bones {
        if !resolve(&weight_bone.name) {
            diagnostics.report(
                DiagnosticKind::UnresolvedBone,
                format!(
                    "weight bone '{}' does not match any built bone, skipping its weights",
                    weight_bone.name
                ),
            );
            continue;
        }
        let bone_index = bones.len() as u32;
        bones.push(weight_bone.name.clone());
        bind_poses.push(weight_bone.bind_pose);

        for entry in &weight_bone.weights {
            let Some(slot) = per_vertex.get_mut(entry.vertex as usize) else {
                diagnostics.report(
                    DiagnosticKind::WeightOutOfRange,
                    format!(
                        "weight bone '{}' references vertex {} outside the mesh ({} vertices)",
                        weight_bone.name, entry.vertex, vertex_count
                    ),
                );
                continue;
            };
            slot.push(BoneWeight {
                bone_index,
                weight: entry.weight,
            });
        }
    }

    let mut bones_per_vertex = Vec::with_capacity(vertex_count);
    let mut weights = Vec::new();
    for influences in per_vertex {
        bones_per_vertex.push(influences.len() as u8);
        weights.extend(influences);
    }

    SkinBinding {
        bones_per_vertex,
        weights,
        bones,
        bind_poses,
    }
}

/// Converts per-vertex arrays back into per-bone weight lists, one
/// [`WeightBone`] per entry of `binding.bones` with its weights grouped in
/// vertex-ascending order. Exact inverse of [`unflatten_weights`] for a
/// fully resolvable binding.
pub fn flatten_weights(binding: &SkinBinding) -> Vec<WeightBone> {
    let mut out: Vec<WeightBone> = binding
        .bones
        .iter()
        .zip(&binding.bind_poses)
        .map(|(name, pose)| WeightBone::new(name.clone(), *pose))
        .collect();

    let mut cursor = 0usize;
    for (vertex, &count) in binding.bones_per_vertex.iter().enumerate() {
        for _ in 0..count {
            let influence = binding.weights[cursor];
            cursor += 1;
            if let Some(bone) = out.get_mut(influence.bone_index as usize) {
                bone.weights.push(WeightEntry {
                    vertex: vertex as u32,
                    weight: influence.weight,
                });
            }
        }
    }

    out
}
