//! Materializes a built chunk forest into plain scene nodes, the part of
//! an import that does not touch the host engine. The produced
//! [`GraphNode`] tree implements the flattener's [`SceneNode`] adapter,
//! so a materialized scene can be flattened straight back into a
//! container.

use std::collections::HashSet;

use anyhow::{Context, Result};
use glam::{Mat4, Vec3};

use crate::chunk::{
    is_oct_name, AnimationTrack, ChunkPayload, ChunkType, MeshData, SceneContainer,
    SkyLightPayload, TextureData, Transform, OCT_PREFIX,
};
use crate::dds::{self, DecodedTexture};
use crate::flatten::{CollisionSource, MeshSource, SceneNode, SkinnedMeshSource, BLAST_FLAG};
use crate::session::{DiagnosticKind, ImportSession, MaterialHandle};
use crate::skin::{self, SkinBinding};
use crate::tree::{self, TreeNode};

/// Provides raw texture file bytes by name. Returning `None` triggers the
/// blank-material fallback.
pub trait TextureSource {
    fn load(&self, file_name: &str) -> Option<Vec<u8>>;
}

/// Host-engine seam that turns decoded pixel data into material handles.
pub trait MaterialAdapter {
    fn create(&mut self, name: &str, texture: &DecodedTexture) -> MaterialHandle;
    fn blank(&mut self) -> MaterialHandle;
}

/// Geometry surface of a materialized node.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshInstance {
    pub mesh: MeshData,
    pub textures: TextureData,
    pub render_flags: u32,
    pub animation: Vec<AnimationTrack>,
    pub materials: Vec<MaterialHandle>,
}

/// What a materialized node is, mirroring the chunk types plus the
/// plain grouping case.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphKind {
    Group,
    Bone { animation: Vec<AnimationTrack> },
    BoneSystem,
    StaticMesh(MeshInstance),
    SkinnedMesh { surface: MeshInstance, skin: SkinBinding },
    CollisionMesh { mesh: MeshData, flag: String },
    BoxCollider { extents: Vec3 },
    LineShape { points: Vec<Vec3> },
    SkyLight(SkyLightPayload),
}

/// One node of the materialized scene. `world` is cached from the local
/// transforms; call [`GraphNode::refresh_world_transforms`] after editing
/// a tree by hand.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    pub name: String,
    pub local: Transform,
    pub world: Mat4,
    pub kind: GraphKind,
    pub children: Vec<GraphNode>,
}

impl GraphNode {
    pub fn new(name: impl Into<String>, local: Transform, kind: GraphKind) -> Self {
        Self {
            name: name.into(),
            local,
            world: local.to_matrix(),
            kind,
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<GraphNode>) -> Self {
        self.children = children;
        self
    }

    /// Recomputes the cached world transforms for this subtree.
    pub fn refresh_world_transforms(&mut self, parent_world: Mat4) {
        self.world = parent_world * self.local.to_matrix();
        for child in &mut self.children {
            child.refresh_world_transforms(self.world);
        }
    }
}

/// Builds the chunk tree from a container and materializes it in one
/// call. Session caches start empty and die with the session.
pub fn import_container(
    container: &SceneContainer,
    session: &mut ImportSession,
    textures: &dyn TextureSource,
    materials: &mut dyn MaterialAdapter,
) -> Result<Vec<GraphNode>> {
    let forest = tree::build(container, &mut session.diagnostics);
    materialize(&forest, session, textures, materials)
}

/// Turns a built forest into scene nodes: divides file units out of every
/// transform and mesh, promotes single static animation tracks into node
/// transforms, resolves skin weights against the bones present in the
/// forest and loads referenced textures through the session memo table.
pub fn materialize(
    forest: &[TreeNode],
    session: &mut ImportSession,
    textures: &dyn TextureSource,
    materials: &mut dyn MaterialAdapter,
) -> Result<Vec<GraphNode>> {
    let mut known_names = HashSet::new();
    for node in forest {
        collect_names(node, &mut known_names);
    }

    forest
        .iter()
        .map(|node| {
            materialize_node(
                node,
                Mat4::IDENTITY,
                Mat4::IDENTITY,
                false,
                &known_names,
                session,
                textures,
                materials,
            )
        })
        .collect()
}

fn collect_names(node: &TreeNode, names: &mut HashSet<String>) {
    names.insert(node.chunk.name.clone());
    for child in &node.children {
        collect_names(child, names);
    }
}

#[allow(clippy::too_many_arguments)]
fn materialize_node(
    node: &TreeNode,
    parent_world: Mat4,
    reference_world: Mat4,
    parent_is_model: bool,
    known_names: &HashSet<String>,
    session: &mut ImportSession,
    textures: &dyn TextureSource,
    materials: &mut dyn MaterialAdapter,
) -> Result<GraphNode> {
    let chunk = &node.chunk;
    let scale = session.config.scale;

    let mut stored = chunk.transform;
    stored.translation /= scale;

    let (kind, promoted) = match &chunk.payload {
        ChunkPayload::Bone { animation } => {
            let (tracks, promoted) = import_tracks(animation, scale);
            (GraphKind::Bone { animation: tracks }, promoted)
        }
        ChunkPayload::BoneSystem => (GraphKind::BoneSystem, None),
        ChunkPayload::Box(payload) => (
            GraphKind::BoxCollider {
                extents: payload.extents / scale,
            },
            None,
        ),
        ChunkPayload::Shape(payload) => {
            let mut points = Vec::with_capacity(payload.point_pairs.len() * 2);
            for (a, b) in &payload.point_pairs {
                points.push(*a / scale);
                points.push(*b / scale);
            }
            (GraphKind::LineShape { points }, None)
        }
        ChunkPayload::SkyLight(payload) => (GraphKind::SkyLight(*payload), None),
        ChunkPayload::ModelData(model) => {
            let mut mesh = model.mesh.clone();
            for vertex in &mut mesh.vertices {
                *vertex /= scale;
            }

            if is_oct_name(&chunk.name) {
                // Collision geometry: parented chunks are breakables, a
                // root-anchored chunk is named after its collision class.
                let flag = if parent_is_model {
                    BLAST_FLAG.to_string()
                } else {
                    chunk.name[OCT_PREFIX.len()..].to_string()
                };
                (GraphKind::CollisionMesh { mesh, flag }, None)
            } else {
                let handles =
                    resolve_materials(&model.textures, session, textures, materials)?;
                let (tracks, promoted) = import_tracks(&model.animation, scale);
                let surface = MeshInstance {
                    mesh,
                    textures: model.textures.clone(),
                    render_flags: model.render_flags,
                    animation: tracks,
                    materials: handles,
                };
                if model.is_skinned() {
                    let skin = skin::unflatten_weights(
                        &model.weight_bones,
                        surface.mesh.vertex_count(),
                        |name| known_names.contains(name),
                        &mut session.diagnostics,
                    );
                    (GraphKind::SkinnedMesh { surface, skin }, promoted)
                } else {
                    (GraphKind::StaticMesh(surface), promoted)
                }
            }
        }
    };

    let local_in_anchor_space = promoted.unwrap_or(stored);

    // Chunks under a model are stored relative to the reference ancestor,
    // everything else relative to its actual parent. Re-express in true
    // parent space so the node tree composes plainly.
    let anchor = if parent_is_model {
        reference_world
    } else {
        parent_world
    };
    let world = anchor * local_in_anchor_space.to_matrix();
    let local = Transform::from_matrix(parent_world.inverse() * world);

    let is_model = chunk.chunk_type() == ChunkType::ModelData;
    let next_reference = if is_model { reference_world } else { world };

    let children = node
        .children
        .iter()
        .map(|child| {
            materialize_node(
                child,
                world,
                next_reference,
                is_model,
                known_names,
                session,
                textures,
                materials,
            )
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(GraphNode {
        name: chunk.name.clone(),
        local,
        world,
        kind,
        children,
    })
}

/// Converts file-space animation tracks to engine units. A single track
/// without key curves is a plain transform: it is promoted into the
/// node's local transform and dropped from the track list, unless it
/// carries float keys, in which case it is applied and kept.
fn import_tracks(tracks: &[AnimationTrack], scale: f32) -> (Vec<AnimationTrack>, Option<Transform>) {
    let mut imported: Vec<AnimationTrack> = tracks
        .iter()
        .map(|track| {
            let mut track = track.clone();
            track.translation /= scale;
            track
        })
        .collect();

    if imported.len() != 1 || imported[0].has_curves {
        return (imported, None);
    }

    let track = &imported[0];
    let promoted = Transform::new(track.translation, track.rotation, track.scale);
    if !track.has_float_keys {
        imported.clear();
    }
    (imported, Some(promoted))
}

fn resolve_materials(
    textures: &TextureData,
    session: &mut ImportSession,
    source: &dyn TextureSource,
    materials: &mut dyn MaterialAdapter,
) -> Result<Vec<MaterialHandle>> {
    let mut handles = Vec::with_capacity(textures.entries.len());
    for entry in &textures.entries {
        if entry.primary_file.is_empty() {
            handles.push(materials.blank());
            continue;
        }
        // Container entries reference the authoring-time .tga names; the
        // shipped files are .dds.
        let file_name = entry.primary_file.replace(".tga", ".dds");

        if let Some(handle) = session.cached_material(&file_name) {
            handles.push(handle);
            continue;
        }
        let handle = match source.load(&file_name) {
            Some(bytes) => {
                let decoded = dds::decode(&bytes)
                    .with_context(|| format!("while decoding texture {file_name}"))?;
                materials.create(&file_name, &decoded)
            }
            None => {
                session.diagnostics.report(
                    DiagnosticKind::MissingTexture,
                    format!("texture {file_name} does not exist, using a blank material"),
                );
                materials.blank()
            }
        };
        session.cache_material(file_name, handle);
        handles.push(handle);
    }
    Ok(handles)
}

impl SceneNode for GraphNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn world_transform(&self) -> Mat4 {
        self.world
    }

    fn children(&self) -> &[Self] {
        &self.children
    }

    fn as_bone(&self) -> Option<&[AnimationTrack]> {
        match &self.kind {
            GraphKind::Bone { animation } => Some(animation),
            _ => None,
        }
    }

    fn is_bone_system(&self) -> bool {
        matches!(self.kind, GraphKind::BoneSystem)
    }

    fn as_skinned_mesh(&self) -> Option<SkinnedMeshSource<'_>> {
        match &self.kind {
            GraphKind::SkinnedMesh { surface, skin } => Some(SkinnedMeshSource {
                surface: surface_source(surface),
                skin,
            }),
            _ => None,
        }
    }

    fn as_static_mesh(&self) -> Option<MeshSource<'_>> {
        match &self.kind {
            GraphKind::StaticMesh(surface) => Some(surface_source(surface)),
            _ => None,
        }
    }

    fn as_collision(&self) -> Option<CollisionSource<'_>> {
        match &self.kind {
            GraphKind::CollisionMesh { mesh, flag } => Some(CollisionSource { mesh, flag }),
            _ => None,
        }
    }

    fn as_box_collider(&self) -> Option<Vec3> {
        match &self.kind {
            GraphKind::BoxCollider { extents } => Some(*extents),
            _ => None,
        }
    }

    fn as_line_shape(&self) -> Option<&[Vec3]> {
        match &self.kind {
            GraphKind::LineShape { points } => Some(points),
            _ => None,
        }
    }

    fn as_sky_light(&self) -> Option<&SkyLightPayload> {
        match &self.kind {
            GraphKind::SkyLight(payload) => Some(payload),
            _ => None,
        }
    }
}

fn surface_source(surface: &MeshInstance) -> MeshSource<'_> {
    MeshSource {
        mesh: &surface.mesh,
        textures: &surface.textures,
        render_flags: surface.render_flags,
        animation: &surface.animation,
        flip_uv_vertical: false,
        flip_uv_horizontal: false,
    }
}

/// Texture source with no files, for headless use and tests.
#[derive(Debug, Default)]
pub struct NoTextures;

impl TextureSource for NoTextures {
    fn load(&self, _file_name: &str) -> Option<Vec<u8>> {
        None
    }
}

/// Material adapter that hands out sequential handles and counts how
/// many textures it was asked to create.
#[derive(Debug, Default)]
pub struct CountingMaterials {
    pub created: usize,
    pub blanks: usize,
}

impl MaterialAdapter for CountingMaterials {
    fn create(&mut self, _name: &str, _texture: &DecodedTexture) -> MaterialHandle {
        self.created += 1;
        MaterialHandle(self.created as u64)
    }

    fn blank(&mut self) -> MaterialHandle {
        self.blanks += 1;
        MaterialHandle(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{BoxPayload, ChunkRecord, ModelPayload, TextureEntry};
    use crate::dds::DxtFormat;
    use crate::session::ScnConfig;
    use std::collections::HashMap;

    struct MapTextures(HashMap<String, Vec<u8>>);

    impl TextureSource for MapTextures {
        fn load(&self, file_name: &str) -> Option<Vec<u8>> {
            self.0.get(file_name).cloned()
        }
    }

    fn model_with_texture(name: &str, file: &str) -> ChunkRecord {
        let mut model = ModelPayload::default();
        model.mesh.vertices = vec![Vec3::ZERO, Vec3::X, Vec3::Y];
        model.mesh.indices = vec![0, 1, 2];
        model.textures.entries.push(TextureEntry {
            face_offset: 0,
            face_count: 1,
            primary_file: file.to_string(),
            secondary_file: String::new(),
        });
        ChunkRecord::new(name, ChunkPayload::ModelData(model))
    }

    #[test]
    fn import_divides_by_scale() {
        let mut container = SceneContainer::new("Scene");
        let mut boxed = ChunkRecord::new(
            "Spawn",
            ChunkPayload::Box(BoxPayload {
                extents: Vec3::splat(100.0),
            }),
        );
        boxed.transform.translation = Vec3::new(200.0, 0.0, 0.0);
        container.push(boxed);

        let mut session = ImportSession::new(ScnConfig {
            scale: 100.0,
            ..ScnConfig::default()
        });
        let nodes = import_container(
            &container,
            &mut session,
            &NoTextures,
            &mut CountingMaterials::default(),
        )
        .unwrap();

        assert_eq!(nodes.len(), 1);
        assert!(nodes[0]
            .local
            .translation
            .abs_diff_eq(Vec3::new(2.0, 0.0, 0.0), 1e-5));
        match &nodes[0].kind {
            GraphKind::BoxCollider { extents } => {
                assert!(extents.abs_diff_eq(Vec3::ONE, 1e-5))
            }
            other => panic!("expected box collider, got {other:?}"),
        }
    }

    #[test]
    fn missing_texture_falls_back_to_blank_with_diagnostic() {
        let mut container = SceneContainer::new("Scene");
        container.push(model_with_texture("Wall", "missing.tga"));

        let mut session = ImportSession::new(ScnConfig::default());
        let mut materials = CountingMaterials::default();
        let nodes = import_container(&container, &mut session, &NoTextures, &mut materials)
            .unwrap();

        assert_eq!(nodes.len(), 1);
        assert_eq!(materials.blanks, 1);
        assert_eq!(
            session
                .diagnostics
                .of_kind(DiagnosticKind::MissingTexture)
                .count(),
            1
        );
        // The .tga reference was rewritten before lookup.
        assert!(session.diagnostics.entries()[0]
            .message
            .contains("missing.dds"));
    }

    #[test]
    fn texture_memo_decodes_each_file_once() {
        let pixels = vec![0x7F; 2 * 2 * 4];
        let dds_bytes = dds::encode(&pixels, 2, 2, DxtFormat::Dxt1).unwrap();
        let mut files = HashMap::new();
        files.insert("wall.dds".to_string(), dds_bytes);

        let mut container = SceneContainer::new("Scene");
        container.push(model_with_texture("A", "wall.tga"));
        container.push(model_with_texture("B", "wall.tga"));

        let mut session = ImportSession::new(ScnConfig::default());
        let mut materials = CountingMaterials::default();
        let nodes = import_container(
            &container,
            &mut session,
            &MapTextures(files),
            &mut materials,
        )
        .unwrap();

        assert_eq!(nodes.len(), 2);
        assert_eq!(materials.created, 1);
        assert!(session.diagnostics.is_empty());
    }

    #[test]
    fn corrupt_texture_aborts_the_import() {
        let mut files = HashMap::new();
        files.insert("bad.dds".to_string(), vec![0u8; 200]);

        let mut container = SceneContainer::new("Scene");
        container.push(model_with_texture("Wall", "bad.dds"));

        let mut session = ImportSession::new(ScnConfig::default());
        let result = import_container(
            &container,
            &mut session,
            &MapTextures(files),
            &mut CountingMaterials::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn skinned_model_resolves_bones_in_forest() {
        let mut container = SceneContainer::new("Scene");
        container.push(ChunkRecord::new(
            "Hip",
            ChunkPayload::Bone { animation: vec![] },
        ));

        let mut record = model_with_texture("Body", "");
        if let ChunkPayload::ModelData(model) = &mut record.payload {
            model.textures.entries.clear();
            model.weight_bones.push(crate::chunk::WeightBone {
                name: "Hip".to_string(),
                bind_pose: Mat4::IDENTITY,
                weights: vec![crate::chunk::WeightEntry {
                    vertex: 0,
                    weight: 1.0,
                }],
            });
            model.weight_bones.push(crate::chunk::WeightBone {
                name: "Missing".to_string(),
                bind_pose: Mat4::IDENTITY,
                weights: vec![],
            });
        }
        record.sub_name = "Hip".to_string();
        container.push(record);

        let mut session = ImportSession::new(ScnConfig::default());
        let nodes = import_container(
            &container,
            &mut session,
            &NoTextures,
            &mut CountingMaterials::default(),
        )
        .unwrap();

        let body = &nodes[0].children[0];
        match &body.kind {
            GraphKind::SkinnedMesh { skin, .. } => {
                assert_eq!(skin.bones, vec!["Hip"]);
                assert_eq!(skin.bones_per_vertex[0], 1);
            }
            other => panic!("expected skinned mesh, got {other:?}"),
        }
        assert_eq!(
            session
                .diagnostics
                .of_kind(DiagnosticKind::UnresolvedBone)
                .count(),
            1
        );
    }

    #[test]
    fn single_plain_track_is_promoted_into_the_transform() {
        let mut container = SceneContainer::new("Scene");
        let mut bone = ChunkRecord::new(
            "Hip",
            ChunkPayload::Bone {
                animation: vec![AnimationTrack {
                    name: "default".to_string(),
                    translation: Vec3::new(4.0, 0.0, 0.0),
                    rotation: glam::Quat::IDENTITY,
                    scale: Vec3::ONE,
                    has_curves: false,
                    has_float_keys: false,
                }],
            },
        );
        bone.transform.translation = Vec3::new(9.0, 9.0, 9.0);
        container.push(bone);

        let mut session = ImportSession::new(ScnConfig::default());
        let nodes = import_container(
            &container,
            &mut session,
            &NoTextures,
            &mut CountingMaterials::default(),
        )
        .unwrap();

        // The track wins over the stored matrix, and is consumed by the
        // promotion.
        assert!(nodes[0]
            .local
            .translation
            .abs_diff_eq(Vec3::new(4.0, 0.0, 0.0), 1e-5));
        match &nodes[0].kind {
            GraphKind::Bone { animation } => assert!(animation.is_empty()),
            other => panic!("expected bone, got {other:?}"),
        }
    }

    #[test]
    fn keyed_animation_is_kept_and_not_promoted() {
        let mut container = SceneContainer::new("Scene");
        container.push(ChunkRecord::new(
            "Hip",
            ChunkPayload::Bone {
                animation: vec![AnimationTrack {
                    name: "walk".to_string(),
                    translation: Vec3::X,
                    rotation: glam::Quat::IDENTITY,
                    scale: Vec3::ONE,
                    has_curves: true,
                    has_float_keys: false,
                }],
            },
        ));

        let mut session = ImportSession::new(ScnConfig::default());
        let nodes = import_container(
            &container,
            &mut session,
            &NoTextures,
            &mut CountingMaterials::default(),
        )
        .unwrap();

        assert!(nodes[0].local.translation.abs_diff_eq(Vec3::ZERO, 1e-5));
        match &nodes[0].kind {
            GraphKind::Bone { animation } => assert_eq!(animation.len(), 1),
            other => panic!("expected bone, got {other:?}"),
        }
    }

    #[test]
    fn parented_oct_chunk_is_a_breakable() {
        let mut container = SceneContainer::new("Scene");
        let mut owner = model_with_texture("Crate", "");
        if let ChunkPayload::ModelData(model) = &mut owner.payload {
            model.textures.entries.clear();
        }
        container.push(owner);

        let mut shards = model_with_texture("oct_Crate", "");
        if let ChunkPayload::ModelData(model) = &mut shards.payload {
            model.textures.entries.clear();
        }
        shards.sub_name = "Crate".to_string();
        container.push(shards);

        let mut rooted = model_with_texture("oct_land", "");
        if let ChunkPayload::ModelData(model) = &mut rooted.payload {
            model.textures.entries.clear();
        }
        container.push(rooted);

        let mut session = ImportSession::new(ScnConfig::default());
        let nodes = import_container(
            &container,
            &mut session,
            &NoTextures,
            &mut CountingMaterials::default(),
        )
        .unwrap();

        match &nodes[0].children[0].kind {
            GraphKind::CollisionMesh { flag, .. } => assert_eq!(flag, BLAST_FLAG),
            other => panic!("expected collision mesh, got {other:?}"),
        }
        match &nodes[1].kind {
            GraphKind::CollisionMesh { flag, .. } => assert_eq!(flag, "land"),
            other => panic!("expected collision mesh, got {other:?}"),
        }
    }
}
