use glam::{Mat4, Quat, Vec2, Vec3, Vec4};
use serde::{Deserialize, Serialize};

/// Names with this prefix mark procedurally generated collision geometry.
/// They are exempt from uniqueness enforcement by convention.
pub const OCT_PREFIX: &str = "oct_";

/// Returns true for names following the collision-geometry convention.
pub fn is_oct_name(name: &str) -> bool {
    name.starts_with(OCT_PREFIX)
}

/// Closed set of chunk kinds stored in a scene container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChunkType {
    Bone,
    BoneSystem,
    Box,
    ModelData,
    Shape,
    SkyLight,
}

/// Affine transform stored per chunk, decomposed as TRS.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Self = Self {
        translation: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    pub fn new(translation: Vec3, rotation: Quat, scale: Vec3) -> Self {
        Self {
            translation,
            rotation,
            scale,
        }
    }

    pub fn to_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }

    pub fn from_matrix(matrix: Mat4) -> Self {
        let (scale, rotation, translation) = matrix.to_scale_rotation_translation();
        Self {
            translation,
            rotation,
            scale,
        }
    }

    /// Component-wise comparison with an absolute tolerance. Rotations are
    /// compared up to quaternion sign.
    pub fn approx_eq(&self, other: &Self, epsilon: f32) -> bool {
        let rot = self
            .rotation
            .dot(other.rotation)
            .abs()
            .clamp(0.0, 1.0);
        self.translation.abs_diff_eq(other.translation, epsilon)
            && self.scale.abs_diff_eq(other.scale, epsilon)
            && (1.0 - rot) < epsilon
    }
}

/// One animation track attached to a bone or model chunk. The key curves
/// themselves are pass-through data for this layer; the flags record
/// whether curves were present so importers can tell a plain transform
/// from an animated one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimationTrack {
    pub name: String,
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
    pub has_curves: bool,
    pub has_float_keys: bool,
}

impl AnimationTrack {
    /// Track carrying a single static transform, as written for objects
    /// that have no animation of their own.
    pub fn static_transform(name: impl Into<String>, transform: &Transform) -> Self {
        Self {
            name: name.into(),
            translation: transform.translation,
            rotation: transform.rotation,
            scale: transform.scale,
            has_curves: false,
            has_float_keys: false,
        }
    }
}

/// Geometry buffers carried by a model chunk.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MeshData {
    pub vertices: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub uv: Vec<Vec2>,
    pub uv2: Vec<Vec2>,
    pub tangents: Vec<Vec4>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }
}

/// Per-submesh texture reference. Face offsets and counts index into the
/// shared triangle list in units of whole triangles.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TextureEntry {
    pub face_offset: u32,
    pub face_count: u32,
    pub primary_file: String,
    pub secondary_file: String,
}

/// Texture table of a model chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextureData {
    pub version: f32,
    pub extra_uv: u32,
    pub entries: Vec<TextureEntry>,
}

impl Default for TextureData {
    fn default() -> Self {
        Self {
            // Version constant used by the target engine's exporter.
            version: 0.2,
            extra_uv: 0,
            entries: Vec::new(),
        }
    }
}

/// One vertex influence inside a weight bone's list.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightEntry {
    pub vertex: u32,
    pub weight: f32,
}

/// Per-bone skin weights as stored in the container: the bone is named,
/// carries its bind pose and lists the vertices it influences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightBone {
    pub name: String,
    pub bind_pose: Mat4,
    pub weights: Vec<WeightEntry>,
}

impl WeightBone {
    pub fn new(name: impl Into<String>, bind_pose: Mat4) -> Self {
        Self {
            name: name.into(),
            bind_pose,
            weights: Vec::new(),
        }
    }
}

/// Payload of a model chunk: geometry, texture table, optional skin
/// weights and the animation track list.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModelPayload {
    pub mesh: MeshData,
    pub textures: TextureData,
    pub weight_bones: Vec<WeightBone>,
    pub animation: Vec<AnimationTrack>,
    pub render_flags: u32,
}

impl ModelPayload {
    pub fn is_skinned(&self) -> bool {
        !self.weight_bones.is_empty()
    }
}

/// Payload of a box chunk: collider extents.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoxPayload {
    pub extents: Vec3,
}

/// Payload of a line-shape chunk: an ordered list of point pairs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ShapePayload {
    pub point_pairs: Vec<(Vec3, Vec3)>,
}

/// Payload of a sky-light chunk: six fixed light colors.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SkyLightPayload {
    pub colors: [Vec4; 6],
}

/// Type-specific chunk payload. The chunk's type is implied by the
/// variant, keeping the two from drifting apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChunkPayload {
    Bone { animation: Vec<AnimationTrack> },
    BoneSystem,
    Box(BoxPayload),
    ModelData(ModelPayload),
    Shape(ShapePayload),
    SkyLight(SkyLightPayload),
}

impl ChunkPayload {
    pub fn chunk_type(&self) -> ChunkType {
        match self {
            ChunkPayload::Bone { .. } => ChunkType::Bone,
            ChunkPayload::BoneSystem => ChunkType::BoneSystem,
            ChunkPayload::Box(_) => ChunkType::Box,
            ChunkPayload::ModelData(_) => ChunkType::ModelData,
            ChunkPayload::Shape(_) => ChunkType::Shape,
            ChunkPayload::SkyLight(_) => ChunkType::SkyLight,
        }
    }
}

/// One named record in a scene container. `sub_name` is the parent
/// reference: empty or equal to the container header name means root,
/// anything else must match exactly one other chunk's name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub name: String,
    pub sub_name: String,
    pub transform: Transform,
    pub payload: ChunkPayload,
}

impl ChunkRecord {
    pub fn new(name: impl Into<String>, payload: ChunkPayload) -> Self {
        Self {
            name: name.into(),
            sub_name: String::new(),
            transform: Transform::IDENTITY,
            payload,
        }
    }

    pub fn chunk_type(&self) -> ChunkType {
        self.payload.chunk_type()
    }

    pub fn model(&self) -> Option<&ModelPayload> {
        match &self.payload {
            ChunkPayload::ModelData(model) => Some(model),
            _ => None,
        }
    }
}

/// Flat, ordered scene container as stored on disk. Chunk order is the
/// tie-break input to the tree builder, nothing more.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SceneContainer {
    pub header_name: String,
    pub chunks: Vec<ChunkRecord>,
}

impl SceneContainer {
    pub fn new(header_name: impl Into<String>) -> Self {
        Self {
            header_name: header_name.into(),
            chunks: Vec::new(),
        }
    }

    pub fn push(&mut self, chunk: ChunkRecord) {
        self.chunks.push(chunk);
    }

    pub fn find(&self, name: &str) -> Option<&ChunkRecord> {
        self.chunks.iter().find(|chunk| chunk.name == name)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}
