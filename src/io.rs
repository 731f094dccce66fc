//! Binary serialization of [`SceneContainer`]: little-endian fields,
//! length-prefixed UTF-8 strings, one type-tagged record per chunk.

use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use glam::{Mat4, Quat, Vec2, Vec3, Vec4};

use crate::chunk::{
    AnimationTrack, BoxPayload, ChunkPayload, ChunkRecord, MeshData, ModelPayload, SceneContainer,
    ShapePayload, SkyLightPayload, TextureData, TextureEntry, Transform, WeightBone, WeightEntry,
};

const MAGIC: &[u8; 4] = b"SCNC";
const VERSION: u32 = 1;

const TAG_BONE: u8 = 0;
const TAG_BONE_SYSTEM: u8 = 1;
const TAG_BOX: u8 = 2;
const TAG_MODEL: u8 = 3;
const TAG_SHAPE: u8 = 4;
const TAG_SKY_LIGHT: u8 = 5;

/// Reads a container from a file on disk.
pub fn read_file<P: AsRef<Path>>(path: P) -> Result<SceneContainer> {
    let path = path.as_ref();
    let bytes =
        fs::read(path).with_context(|| format!("unable to open {}", path.display()))?;
    from_bytes(&bytes).with_context(|| format!("while reading {}", path.display()))
}

/// Writes a container to a file on disk.
pub fn write_file<P: AsRef<Path>>(path: P, container: &SceneContainer) -> Result<()> {
    let path = path.as_ref();
    fs::write(path, to_bytes(container))
        .with_context(|| format!("unable to write {}", path.display()))
}

/// Parses a container from bytes already resident in memory.
pub fn from_bytes(bytes: &[u8]) -> Result<SceneContainer> {
    let mut reader = Reader::new(bytes);
    let magic = reader.take(4).context("reading container magic")?;
    if magic != MAGIC {
        return Err(anyhow!(
            "invalid container magic: expected {MAGIC:?}, found {magic:?}"
        ));
    }
    let version = reader.read_u32()?;
    if version != VERSION {
        return Err(anyhow!("unsupported container version {version}"));
    }

    let header_name = reader.read_string()?;
    let chunk_count = reader.read_u32()? as usize;
    let mut chunks = Vec::with_capacity(chunk_count.min(4096));
    for index in 0..chunk_count {
        let chunk = read_chunk(&mut reader)
            .with_context(|| format!("while reading chunk {index} of {chunk_count}"))?;
        chunks.push(chunk);
    }
    if !reader.is_empty() {
        return Err(anyhow!(
            "{} trailing bytes after the last chunk",
            reader.remaining()
        ));
    }

    Ok(SceneContainer {
        header_name,
        chunks,
    })
}

/// Serializes a container into its on-disk byte layout.
pub fn to_bytes(container: &SceneContainer) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    write_u32(&mut out, VERSION);
    write_string(&mut out, &container.header_name);
    write_u32(&mut out, container.chunks.len() as u32);
    for chunk in &container.chunks {
        write_chunk(&mut out, chunk);
    }
    out
}

fn read_chunk(reader: &mut Reader<'_>) -> Result<ChunkRecord> {
    let tag = reader.read_u8()?;
    let name = reader.read_string()?;
    let sub_name = reader.read_string()?;
    let transform = reader.read_transform()?;

    let payload = match tag {
        TAG_BONE => ChunkPayload::Bone {
            animation: read_tracks(reader)?,
        },
        TAG_BONE_SYSTEM => ChunkPayload::BoneSystem,
        TAG_BOX => ChunkPayload::Box(BoxPayload {
            extents: reader.read_vec3()?,
        }),
        TAG_MODEL => ChunkPayload::ModelData(read_model(reader)?),
        TAG_SHAPE => {
            let pair_count = reader.read_u32()? as usize;
            let mut point_pairs = Vec::with_capacity(pair_count.min(4096));
            for _ in 0..pair_count {
                point_pairs.push((reader.read_vec3()?, reader.read_vec3()?));
            }
            ChunkPayload::Shape(ShapePayload { point_pairs })
        }
        TAG_SKY_LIGHT => {
            let mut colors = [Vec4::ZERO; 6];
            for color in &mut colors {
                *color = reader.read_vec4()?;
            }
            ChunkPayload::SkyLight(SkyLightPayload { colors })
        }
        other => return Err(anyhow!("unknown chunk type tag {other}")),
    };

    Ok(ChunkRecord {
        name,
        sub_name,
        transform,
        payload,
    })
}

fn write_chunk(out: &mut Vec<u8>, chunk: &ChunkRecord) {
    let tag = match &chunk.payload {
        ChunkPayload::Bone { .. } => TAG_BONE,
        ChunkPayload::BoneSystem => TAG_BONE_SYSTEM,
        ChunkPayload::Box(_) => TAG_BOX,
        ChunkPayload::ModelData(_) => TAG_MODEL,
        ChunkPayload::Shape(_) => TAG_SHAPE,
        ChunkPayload::SkyLight(_) => TAG_SKY_LIGHT,
    };
    out.push(tag);
    write_string(out, &chunk.name);
    write_string(out, &chunk.sub_name);
    write_transform(out, &chunk.transform);

    match &chunk.payload {
        ChunkPayload::Bone { animation } => write_tracks(out, animation),
        ChunkPayload::BoneSystem => {}
        ChunkPayload::Box(payload) => write_vec3(out, payload.extents),
        ChunkPayload::ModelData(model) => write_model(out, model),
        ChunkPayload::Shape(payload) => {
            write_u32(out, payload.point_pairs.len() as u32);
            for (a, b) in &payload.point_pairs {
                write_vec3(out, *a);
                write_vec3(out, *b);
            }
        }
        ChunkPayload::SkyLight(payload) => {
            for color in &payload.colors {
                write_vec4(out, *color);
            }
        }
    }
}

fn read_model(reader: &mut Reader<'_>) -> Result<ModelPayload> {
    let mesh = MeshData {
        vertices: reader.read_counted(Reader::read_vec3)?,
        normals: reader.read_counted(Reader::read_vec3)?,
        uv: reader.read_counted(Reader::read_vec2)?,
        uv2: reader.read_counted(Reader::read_vec2)?,
        tangents: reader.read_counted(Reader::read_vec4)?,
        indices: reader.read_counted(Reader::read_u32)?,
    };

    let version = reader.read_f32()?;
    let extra_uv = reader.read_u32()?;
    let entry_count = reader.read_u32()? as usize;
    let mut entries = Vec::with_capacity(entry_count.min(4096));
    for _ in 0..entry_count {
        entries.push(TextureEntry {
            face_offset: reader.read_u32()?,
            face_count: reader.read_u32()?,
            primary_file: reader.read_string()?,
            secondary_file: reader.read_string()?,
        });
    }
    let textures = TextureData {
        version,
        extra_uv,
        entries,
    };

    let bone_count = reader.read_u32()? as usize;
    let mut weight_bones = Vec::with_capacity(bone_count.min(4096));
    for _ in 0..bone_count {
        let name = reader.read_string()?;
        let bind_pose = reader.read_mat4()?;
        let weights = reader.read_counted(|r| {
            Ok(WeightEntry {
                vertex: r.read_u32()?,
                weight: r.read_f32()?,
            })
        })?;
        weight_bones.push(WeightBone {
            name,
            bind_pose,
            weights,
        });
    }

    let animation = read_tracks(reader)?;
    let render_flags = reader.read_u32()?;

    Ok(ModelPayload {
        mesh,
        textures,
        weight_bones,
        animation,
        render_flags,
    })
}

fn write_model(out: &mut Vec<u8>, model: &ModelPayload) {
    write_counted(out, &model.mesh.vertices, |out, v| write_vec3(out, *v));
    write_counted(out, &model.mesh.normals, |out, v| write_vec3(out, *v));
    write_counted(out, &model.mesh.uv, |out, v| write_vec2(out, *v));
    write_counted(out, &model.mesh.uv2, |out, v| write_vec2(out, *v));
    write_counted(out, &model.mesh.tangents, |out, v| write_vec4(out, *v));
    write_counted(out, &model.mesh.indices, |out, v| write_u32(out, *v));

    write_f32(out, model.textures.version);
    write_u32(out, model.textures.extra_uv);
    write_u32(out, model.textures.entries.len() as u32);
    for entry in &model.textures.entries {
        write_u32(out, entry.face_offset);
        write_u32(out, entry.face_count);
        write_string(out, &entry.primary_file);
        write_string(out, &entry.secondary_file);
    }

    write_u32(out, model.weight_bones.len() as u32);
    for bone in &model.weight_bones {
        write_string(out, &bone.name);
        write_mat4(out, &bone.bind_pose);
        write_counted(out, &bone.weights, |out, entry| {
            write_u32(out, entry.vertex);
            write_f32(out, entry.weight);
        });
    }

    write_tracks(out, &model.animation);
    write_u32(out, model.render_flags);
}

fn read_tracks(reader: &mut Reader<'_>) -> Result<Vec<AnimationTrack>> {
    reader.read_counted(|r| {
        Ok(AnimationTrack {
            name: r.read_string()?,
            translation: r.read_vec3()?,
            rotation: r.read_quat()?,
            scale: r.read_vec3()?,
            has_curves: r.read_u8()? != 0,
            has_float_keys: r.read_u8()? != 0,
        })
    })
}

fn write_tracks(out: &mut Vec<u8>, tracks: &[AnimationTrack]) {
    write_counted(out, tracks, |out, track| {
        write_string(out, &track.name);
        write_vec3(out, track.translation);
        write_quat(out, track.rotation);
        write_vec3(out, track.scale);
        out.push(track.has_curves as u8);
        out.push(track.has_float_keys as u8);
    });
}

struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(anyhow!(
                "unexpected end of container at offset {} (wanted {len} bytes, {} left)",
                self.offset,
                self.remaining()
            ));
        }
        let slice = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().expect("length checked")))
    }

    fn read_f32(&mut self) -> Result<f32> {
        let bytes = self.take(4)?;
        Ok(f32::from_le_bytes(bytes.try_into().expect("length checked")))
    }

    fn read_string(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|err| anyhow!("invalid UTF-8 in string at offset {}: {err}", self.offset))
    }

    fn read_vec2(&mut self) -> Result<Vec2> {
        Ok(Vec2::new(self.read_f32()?, self.read_f32()?))
    }

    fn read_vec3(&mut self) -> Result<Vec3> {
        Ok(Vec3::new(self.read_f32()?, self.read_f32()?, self.read_f32()?))
    }

    fn read_vec4(&mut self) -> Result<Vec4> {
        Ok(Vec4::new(
            self.read_f32()?,
            self.read_f32()?,
            self.read_f32()?,
            self.read_f32()?,
        ))
    }

    fn read_quat(&mut self) -> Result<Quat> {
        Ok(Quat::from_xyzw(
            self.read_f32()?,
            self.read_f32()?,
            self.read_f32()?,
            self.read_f32()?,
        ))
    }

    fn read_mat4(&mut self) -> Result<Mat4> {
        let mut values = [0f32; 16];
        for value in &mut values {
            *value = self.read_f32()?;
        }
        Ok(Mat4::from_cols_array(&values))
    }

    fn read_transform(&mut self) -> Result<Transform> {
        Ok(Transform {
            translation: self.read_vec3()?,
            rotation: self.read_quat()?,
            scale: self.read_vec3()?,
        })
    }

    fn read_counted<T>(
        &mut self,
        mut read_one: impl FnMut(&mut Self) -> Result<T>,
    ) -> Result<Vec<T>> {
        let count = self.read_u32()? as usize;
        let mut items = Vec::with_capacity(count.min(65536));
        for _ in 0..count {
            items.push(read_one(self)?);
        }
        Ok(items)
    }
}

fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn write_f32(out: &mut Vec<u8>, value: f32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn write_string(out: &mut Vec<u8>, value: &str) {
    write_u32(out, value.len() as u32);
    out.extend_from_slice(value.as_bytes());
}

fn write_vec2(out: &mut Vec<u8>, value: Vec2) {
    write_f32(out, value.x);
    write_f32(out, value.y);
}

fn write_vec3(out: &mut Vec<u8>, value: Vec3) {
    write_f32(out, value.x);
    write_f32(out, value.y);
    write_f32(out, value.z);
}

fn write_vec4(out: &mut Vec<u8>, value: Vec4) {
    write_f32(out, value.x);
    write_f32(out, value.y);
    write_f32(out, value.z);
    write_f32(out, value.w);
}

fn write_quat(out: &mut Vec<u8>, value: Quat) {
    write_f32(out, value.x);
    write_f32(out, value.y);
    write_f32(out, value.z);
    write_f32(out, value.w);
}

fn write_transform(out: &mut Vec<u8>, value: &Transform) {
    write_vec3(out, value.translation);
    write_quat(out, value.rotation);
    write_vec3(out, value.scale);
}

fn write_mat4(out: &mut Vec<u8>, value: &Mat4) {
    for column in value.to_cols_array() {
        write_f32(out, column);
    }
}

fn write_counted<T>(out: &mut Vec<u8>, items: &[T], mut write_one: impl FnMut(&mut Vec<u8>, &T)) {
    write_u32(out, items.len() as u32);
    for item in items {
        write_one(out, item);
    }
}
