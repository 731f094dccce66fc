//! Scene graph → flat chunk list, the inverse of [`crate::tree::build`].
//!
//! The flattener walks an external scene graph through the [`SceneNode`]
//! adapter trait, classifies each object into at most one chunk type via
//! priority-ordered capability queries, and anchors every chunk transform
//! according to the type of its structural parent. The walk never mutates
//! the source graph; relative transforms come from matrix algebra alone.

use glam::{Mat4, Vec3};

use crate::chunk::{
    is_oct_name, AnimationTrack, BoxPayload, ChunkPayload, ChunkRecord, ChunkType, MeshData,
    ModelPayload, SceneContainer, ShapePayload, SkyLightPayload, TextureData, Transform,
};
use crate::session::{DiagnosticKind, ExportSession};
use crate::skin::{self, SkinBinding};

/// Geometry surface exposed by an adapter object.
#[derive(Debug, Clone, Copy)]
pub struct MeshSource<'a> {
    pub mesh: &'a MeshData,
    pub textures: &'a TextureData,
    pub render_flags: u32,
    pub animation: &'a [AnimationTrack],
    pub flip_uv_vertical: bool,
    pub flip_uv_horizontal: bool,
}

/// Skinned surface: the geometry plus its per-vertex bone binding.
#[derive(Debug, Clone, Copy)]
pub struct SkinnedMeshSource<'a> {
    pub surface: MeshSource<'a>,
    pub skin: &'a SkinBinding,
}

/// Collision capability. `flag` is the engine's collision class name and
/// becomes part of the exported `oct_` chunk name.
#[derive(Debug, Clone, Copy)]
pub struct CollisionSource<'a> {
    pub mesh: &'a MeshData,
    pub flag: &'a str,
}

/// Breakable collision geometry stays parented to its owning chunk
/// instead of anchoring to the container root.
pub const BLAST_FLAG: &str = "blast";

/// Adapter over the host engine's scene-graph objects. Capability
/// queries default to "absent" so an implementation only provides what
/// its objects can actually carry.
pub trait SceneNode: Sized {
    fn name(&self) -> &str;
    fn world_transform(&self) -> Mat4;
    fn children(&self) -> &[Self];

    /// Bone capability; `Some` marks the object as a bone, carrying its
    /// animation tracks (possibly empty).
    fn as_bone(&self) -> Option<&[AnimationTrack]> {
        None
    }

    fn is_bone_system(&self) -> bool {
        false
    }

    fn as_skinned_mesh(&self) -> Option<SkinnedMeshSource<'_>> {
        None
    }

    fn as_static_mesh(&self) -> Option<MeshSource<'_>> {
        None
    }

    fn as_collision(&self) -> Option<CollisionSource<'_>> {
        None
    }

    /// Box collider extents, in engine units.
    fn as_box_collider(&self) -> Option<Vec3> {
        None
    }

    /// Line shape as a flat point list; points are consumed in pairs.
    fn as_line_shape(&self) -> Option<&[Vec3]> {
        None
    }

    fn as_sky_light(&self) -> Option<&SkyLightPayload> {
        None
    }
}

/// Flattens a live scene graph into a container with the given header
/// name. Uses a fresh [`ExportSession`] per call; the session's name
/// registry guarantees the output satisfies the uniqueness invariant.
pub fn flatten<N: SceneNode>(
    roots: &[N],
    header_name: &str,
    session: &mut ExportSession,
) -> SceneContainer {
    let mut container = SceneContainer::new(header_name);
    for root in roots {
        visit(root, None, Mat4::IDENTITY, &mut container, session);
    }
    container
}

/// Structural-parent context carried down the walk.
#[derive(Debug, Clone)]
struct ParentChunk {
    name: String,
    chunk_type: ChunkType,
    world: Mat4,
}

fn visit<N: SceneNode>(
    node: &N,
    parent: Option<&ParentChunk>,
    reference_world: Mat4,
    container: &mut SceneContainer,
    session: &mut ExportSession,
) {
    let produced = create_chunk(node, parent, reference_world, container, session);

    // A chunk-producing object becomes the structural parent below it; a
    // non-ModelData chunk also becomes the reference ancestor. Collider
    // and shape-only leftovers (None) leave both unchanged.
    let (next_parent, next_reference) = match &produced {
        Some(chunk) if chunk.chunk_type != ChunkType::ModelData => {
            (produced.clone(), chunk.world)
        }
        Some(_) => (produced.clone(), reference_world),
        None => (parent.cloned(), reference_world),
    };

    for child in node.children() {
        visit(child, next_parent.as_ref(), next_reference, container, session);
    }
}

/// Computes the chunk-space transform for an object per the anchoring
/// rules: local to a Bone/Box/other parent chunk, relative to the
/// reference ancestor under a ModelData parent, world at the root.
fn anchored_transform(
    world: Mat4,
    parent: Option<&ParentChunk>,
    reference_world: Mat4,
    scale: f32,
) -> Transform {
    let local = match parent {
        None => world,
        Some(p) if p.chunk_type == ChunkType::ModelData => reference_world.inverse() * world,
        Some(p) => p.world.inverse() * world,
    };
    let mut transform = Transform::from_matrix(local);
    transform.translation *= scale;
    transform
}

fn sub_name_for(parent: Option<&ParentChunk>, container: &SceneContainer) -> String {
    parent
        .map(|p| p.name.clone())
        .unwrap_or_else(|| container.header_name.clone())
}

fn create_chunk<N: SceneNode>(
    node: &N,
    parent: Option<&ParentChunk>,
    reference_world: Mat4,
    container: &mut SceneContainer,
    session: &mut ExportSession,
) -> Option<ParentChunk> {
    let world = node.world_transform();
    let scale = session.config.scale;

    if let Some(tracks) = node.as_bone() {
        let transform = anchored_transform(world, parent, reference_world, scale);
        let animation = export_tracks(tracks, &transform, session);
        return Some(push_chunk(
            node,
            ChunkPayload::Bone { animation },
            transform,
            parent,
            world,
            container,
            session,
        ));
    }

    if node.is_bone_system() {
        if node.name() != "BONESYSTEM" {
            log::warn!(
                "bone system '{}' is not named BONESYSTEM; the engine expects that name",
                node.name()
            );
        }
        let transform = anchored_transform(world, parent, reference_world, scale);
        return Some(push_chunk(
            node,
            ChunkPayload::BoneSystem,
            transform,
            parent,
            world,
            container,
            session,
        ));
    }

    if let Some(skinned) = node.as_skinned_mesh() {
        let transform = anchored_transform(world, parent, reference_world, scale);
        let mut model = capture_surface(&skinned.surface, &transform, session);
        model.weight_bones = skin::flatten_weights(skinned.skin);
        return Some(push_chunk(
            node,
            ChunkPayload::ModelData(model),
            transform,
            parent,
            world,
            container,
            session,
        ));
    }

    if let Some(surface) = node.as_static_mesh() {
        let transform = anchored_transform(world, parent, reference_world, scale);
        let model = capture_surface(&surface, &transform, session);
        let chunk = push_chunk(
            node,
            ChunkPayload::ModelData(model),
            transform,
            parent,
            world,
            container,
            session,
        );
        if let Some(collision) = node.as_collision() {
            create_collision_chunk(
                node,
                &collision,
                Some(&chunk),
                reference_world,
                container,
                session,
            );
        }
        return Some(chunk);
    }

    if let Some(collision) = node.as_collision() {
        // Collider-only objects emit a chunk but do not become a
        // structural parent; their children attach past them.
        create_collision_chunk(node, &collision, parent, reference_world, container, session);
        return None;
    }

    if let Some(extents) = node.as_box_collider() {
        let transform = anchored_transform(world, parent, reference_world, scale);
        return Some(push_chunk(
            node,
            ChunkPayload::Box(BoxPayload {
                extents: extents * scale,
            }),
            transform,
            parent,
            world,
            container,
            session,
        ));
    }

    if let Some(points) = node.as_line_shape() {
        let transform = anchored_transform(world, parent, reference_world, scale);
        if points.len() % 2 != 0 {
            session.diagnostics.report(
                DiagnosticKind::OddShapePoints,
                format!(
                    "line shape '{}' has an odd point count ({}); dropping its geometry",
                    node.name(),
                    points.len()
                ),
            );
            let name = session
                .names
                .register(&format!("{}_empty", node.name()), &mut session.diagnostics);
            let mut chunk = ChunkRecord::new(name.clone(), ChunkPayload::Shape(ShapePayload::default()));
            chunk.sub_name = sub_name_for(parent, container);
            chunk.transform = transform;
            container.push(chunk);
            return Some(ParentChunk {
                name,
                chunk_type: ChunkType::Shape,
                world,
            });
        }
        let point_pairs = points
            .chunks_exact(2)
            .map(|pair| (pair[0] * scale, pair[1] * scale))
            .collect();
        return Some(push_chunk(
            node,
            ChunkPayload::Shape(ShapePayload { point_pairs }),
            transform,
            parent,
            world,
            container,
            session,
        ));
    }

    if let Some(sky) = node.as_sky_light() {
        let transform = anchored_transform(world, parent, reference_world, scale);
        return Some(push_chunk(
            node,
            ChunkPayload::SkyLight(*sky),
            transform,
            parent,
            world,
            container,
            session,
        ));
    }

    None
}

fn push_chunk<N: SceneNode>(
    node: &N,
    payload: ChunkPayload,
    transform: Transform,
    parent: Option<&ParentChunk>,
    world: Mat4,
    container: &mut SceneContainer,
    session: &mut ExportSession,
) -> ParentChunk {
    let name = session
        .names
        .register(node.name(), &mut session.diagnostics);
    let chunk_type = payload.chunk_type();
    let mut chunk = ChunkRecord::new(name.clone(), payload);
    chunk.sub_name = sub_name_for(parent, container);
    chunk.transform = transform;
    container.push(chunk);
    ParentChunk {
        name,
        chunk_type,
        world,
    }
}

fn create_collision_chunk<N: SceneNode>(
    node: &N,
    collision: &CollisionSource<'_>,
    parent: Option<&ParentChunk>,
    reference_world: Mat4,
    container: &mut SceneContainer,
    session: &mut ExportSession,
) {
    let scale = session.config.scale;
    let world = node.world_transform();

    // Breakable ("blast") geometry stays under its owning chunk; every
    // other collision class anchors to the container root so the engine's
    // octree build sees it in scene space.
    let (name, sub_name, transform) = if collision.flag == BLAST_FLAG {
        let transform = anchored_transform(world, parent, reference_world, scale);
        let name = if is_oct_name(node.name()) {
            node.name().to_string()
        } else {
            format!("oct_{}", node.name())
        };
        (name, sub_name_for(parent, container), transform)
    } else {
        let transform = anchored_transform(world, None, reference_world, scale);
        (
            format!("oct_{}", collision.flag),
            container.header_name.clone(),
            transform,
        )
    };

    let mut model = ModelPayload {
        mesh: scaled_mesh(collision.mesh, scale, false, false),
        ..ModelPayload::default()
    };
    model
        .animation
        .push(AnimationTrack::static_transform(
            session.config.main_animation_name.clone(),
            &transform,
        ));

    // oct_ names bypass the allocator by design.
    let mut chunk = ChunkRecord::new(name, ChunkPayload::ModelData(model));
    chunk.sub_name = sub_name;
    chunk.transform = transform;
    container.push(chunk);
}

fn capture_surface(
    surface: &MeshSource<'_>,
    transform: &Transform,
    session: &mut ExportSession,
) -> ModelPayload {
    let flip_v = session.config.flip_uv_vertical ^ surface.flip_uv_vertical;
    let flip_h = session.config.flip_uv_horizontal ^ surface.flip_uv_horizontal;
    let mesh = scaled_mesh(surface.mesh, session.config.scale, flip_v, flip_h);

    let mut textures = surface.textures.clone();
    textures.extra_uv = if mesh.uv2.is_empty() { 0 } else { 1 };

    let animation = export_tracks(surface.animation, transform, session);

    ModelPayload {
        mesh,
        textures,
        weight_bones: Vec::new(),
        animation,
        render_flags: surface.render_flags,
    }
}

fn scaled_mesh(mesh: &MeshData, scale: f32, flip_v: bool, flip_h: bool) -> MeshData {
    let mut out = mesh.clone();
    for vertex in &mut out.vertices {
        *vertex *= scale;
    }
    if flip_v {
        for uv in &mut out.uv {
            uv.y = -uv.y;
        }
    }
    if flip_h {
        for uv in &mut out.uv {
            uv.x = -uv.x;
        }
    }
    out
}

/// Passes animation tracks through with translations converted to file
/// units; objects without any animation get a single static track
/// carrying the chunk's transform.
fn export_tracks(
    tracks: &[AnimationTrack],
    transform: &Transform,
    session: &ExportSession,
) -> Vec<AnimationTrack> {
    if tracks.is_empty() {
        return vec![AnimationTrack::static_transform(
            session.config.main_animation_name.clone(),
            transform,
        )];
    }
    tracks
        .iter()
        .map(|track| {
            let mut track = track.clone();
            track.translation *= session.config.scale;
            track
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ScnConfig;
    use glam::Quat;

    /// Minimal in-memory adapter used by the flattener tests.
    struct TestNode {
        name: String,
        world: Mat4,
        kind: TestKind,
        tracks: Vec<AnimationTrack>,
        children: Vec<TestNode>,
    }

    enum TestKind {
        Group,
        Bone,
        Mesh(MeshData, TextureData),
        BoxCollider(Vec3),
        LineShape(Vec<Vec3>),
    }

    impl TestNode {
        fn new(name: &str, world: Mat4, kind: TestKind) -> Self {
            Self {
                name: name.to_string(),
                world,
                kind,
                tracks: Vec::new(),
                children: Vec::new(),
            }
        }

        fn with_children(mut self, children: Vec<TestNode>) -> Self {
            self.children = children;
            self
        }
    }

    impl SceneNode for TestNode {
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
            matches!(self.kind, TestKind::Bone).then_some(self.tracks.as_slice())
        }

        fn as_static_mesh(&self) -> Option<MeshSource<'_>> {
            match &self.kind {
                TestKind::Mesh(mesh, textures) => Some(MeshSource {
                    mesh,
                    textures,
                    render_flags: 0,
                    animation: &[],
                    flip_uv_vertical: false,
                    flip_uv_horizontal: false,
                }),
                _ => None,
            }
        }

        fn as_box_collider(&self) -> Option<Vec3> {
            match self.kind {
                TestKind::BoxCollider(extents) => Some(extents),
                _ => None,
            }
        }

        fn as_line_shape(&self) -> Option<&[Vec3]> {
            match &self.kind {
                TestKind::LineShape(points) => Some(points),
                _ => None,
            }
        }
    }

    fn translation(x: f32, y: f32, z: f32) -> Mat4 {
        Mat4::from_translation(Vec3::new(x, y, z))
    }

    #[test]
    fn root_and_child_get_header_and_parent_sub_names() {
        let root = TestNode::new("Root", Mat4::IDENTITY, TestKind::Bone).with_children(vec![
            TestNode::new("Child", translation(1.0, 0.0, 0.0), TestKind::Bone),
        ]);
        let mut session = ExportSession::new(ScnConfig::default());
        let container = flatten(&[root], "Scene", &mut session);

        assert_eq!(container.chunks.len(), 2);
        assert_eq!(container.chunks[0].name, "Root");
        assert_eq!(container.chunks[0].sub_name, "Scene");
        assert_eq!(container.chunks[1].name, "Child");
        assert_eq!(container.chunks[1].sub_name, "Root");
    }

    #[test]
    fn group_nodes_are_descended_but_produce_no_chunk() {
        let root = TestNode::new("Root", Mat4::IDENTITY, TestKind::Bone).with_children(vec![
            TestNode::new("Holder", translation(5.0, 0.0, 0.0), TestKind::Group).with_children(
                vec![TestNode::new(
                    "Deep",
                    translation(5.0, 2.0, 0.0),
                    TestKind::Bone,
                )],
            ),
        ]);
        let mut session = ExportSession::new(ScnConfig::default());
        let container = flatten(&[root], "Scene", &mut session);

        assert_eq!(container.chunks.len(), 2);
        let deep = container.find("Deep").unwrap();
        // The group holder is skipped: Deep attaches to Root and keeps its
        // transform relative to Root, not to Holder.
        assert_eq!(deep.sub_name, "Root");
        assert!(deep
            .transform
            .translation
            .abs_diff_eq(Vec3::new(5.0, 2.0, 0.0), 1e-5));
    }

    #[test]
    fn nested_geometry_anchors_to_reference_ancestor() {
        let mesh = MeshData::default();
        let bone_world = Mat4::from_translation(Vec3::new(10.0, 0.0, 0.0));
        let inner_world = Mat4::from_translation(Vec3::new(13.0, 1.0, 0.0));

        let root = TestNode::new("Hip", bone_world, TestKind::Bone).with_children(vec![
            TestNode::new(
                "Outer",
                translation(12.0, 0.0, 0.0),
                TestKind::Mesh(mesh.clone(), TextureData::default()),
            )
            .with_children(vec![TestNode::new(
                "Inner",
                inner_world,
                TestKind::Mesh(mesh, TextureData::default()),
            )]),
        ]);

        let mut session = ExportSession::new(ScnConfig::default());
        let container = flatten(&[root], "Scene", &mut session);

        // Inner's structural parent is ModelData, so its transform is
        // relative to the bone (the nearest non-ModelData ancestor), not
        // to Outer.
        let inner = container.find("Inner").unwrap();
        assert_eq!(inner.sub_name, "Outer");
        assert!(inner
            .transform
            .translation
            .abs_diff_eq(Vec3::new(3.0, 1.0, 0.0), 1e-5));
    }

    #[test]
    fn export_scale_multiplies_translations_and_extents() {
        let root = TestNode::new(
            "Spawn",
            translation(2.0, 0.0, 0.0),
            TestKind::BoxCollider(Vec3::ONE),
        );
        let mut session = ExportSession::new(ScnConfig {
            scale: 100.0,
            ..ScnConfig::default()
        });
        let container = flatten(&[root], "Scene", &mut session);

        let chunk = &container.chunks[0];
        assert!(chunk
            .transform
            .translation
            .abs_diff_eq(Vec3::new(200.0, 0.0, 0.0), 1e-3));
        match &chunk.payload {
            ChunkPayload::Box(payload) => {
                assert!(payload.extents.abs_diff_eq(Vec3::splat(100.0), 1e-3))
            }
            other => panic!("expected box payload, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_names_are_repaired() {
        let roots = vec![
            TestNode::new("Wall", Mat4::IDENTITY, TestKind::Bone),
            TestNode::new("Wall", translation(1.0, 0.0, 0.0), TestKind::Bone),
        ];
        let mut session = ExportSession::new(ScnConfig::default());
        let container = flatten(&roots, "Scene", &mut session);

        assert_eq!(container.chunks[0].name, "Wall");
        assert_eq!(container.chunks[1].name, "Wall_001");
        assert_eq!(
            session
                .diagnostics
                .of_kind(DiagnosticKind::NameCollision)
                .count(),
            1
        );
    }

    #[test]
    fn odd_line_shape_produces_empty_chunk_and_diagnostic() {
        let root = TestNode::new(
            "Rail",
            Mat4::IDENTITY,
            TestKind::LineShape(vec![Vec3::ZERO, Vec3::X, Vec3::Y]),
        );
        let mut session = ExportSession::new(ScnConfig::default());
        let container = flatten(&[root], "Scene", &mut session);

        assert_eq!(container.chunks.len(), 1);
        assert_eq!(container.chunks[0].name, "Rail_empty");
        match &container.chunks[0].payload {
            ChunkPayload::Shape(shape) => assert!(shape.point_pairs.is_empty()),
            other => panic!("expected shape payload, got {other:?}"),
        }
        assert_eq!(
            session
                .diagnostics
                .of_kind(DiagnosticKind::OddShapePoints)
                .count(),
            1
        );
    }

    #[test]
    fn bone_without_animation_gets_static_track() {
        let world = Mat4::from_rotation_translation(
            Quat::from_rotation_y(0.4),
            Vec3::new(0.0, 3.0, 0.0),
        );
        let root = TestNode::new("Hip", world, TestKind::Bone);
        let mut session = ExportSession::new(ScnConfig::default());
        let container = flatten(&[root], "Scene", &mut session);

        match &container.chunks[0].payload {
            ChunkPayload::Bone { animation } => {
                assert_eq!(animation.len(), 1);
                assert_eq!(animation[0].name, "default");
                assert!(animation[0]
                    .translation
                    .abs_diff_eq(Vec3::new(0.0, 3.0, 0.0), 1e-5));
                assert!(!animation[0].has_curves);
            }
            other => panic!("expected bone payload, got {other:?}"),
        }
    }
}
