use std::collections::HashMap;

use crate::names::NameAllocator;

/// Settings shared by one import or export call.
#[derive(Debug, Clone, PartialEq)]
pub struct ScnConfig {
    /// Uniform unit factor between file space and engine space. Positions
    /// and geometry are divided by it on import and multiplied on export.
    pub scale: f32,
    /// Track name written for objects that carry no animation of their own.
    pub main_animation_name: String,
    pub flip_uv_vertical: bool,
    pub flip_uv_horizontal: bool,
}

impl Default for ScnConfig {
    fn default() -> Self {
        Self {
            scale: 1.0,
            main_animation_name: "default".to_string(),
            flip_uv_vertical: false,
            flip_uv_horizontal: false,
        }
    }
}

/// Category of a recoverable condition surfaced during a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// A chunk whose `sub_name` matched neither another chunk nor the
    /// container header; the chunk was dropped.
    OrphanChunk,
    /// A duplicate chunk name was repaired with a generated suffix.
    NameCollision,
    /// A referenced texture could not be loaded; a blank material was used.
    MissingTexture,
    /// A weight bone named a bone that does not exist; its contribution
    /// was skipped.
    UnresolvedBone,
    /// A weight entry referenced a vertex outside the mesh; skipped.
    WeightOutOfRange,
    /// A line shape had an odd point count; its geometry was dropped.
    OddShapePoints,
}

/// One non-fatal diagnostic. Fatal conditions are errors, not diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
}

/// Ordered sink for non-fatal diagnostics, scoped to one session. Every
/// entry is also logged at warn level when it is recorded.
#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, kind: DiagnosticKind, message: impl Into<String>) {
        let message = message.into();
        log::warn!("{message}");
        self.entries.push(Diagnostic { kind, message });
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn of_kind(&self, kind: DiagnosticKind) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().filter(move |d| d.kind == kind)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Opaque token for a material created by the host engine's adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MaterialHandle(pub u64);

/// State for one import call: configuration, the diagnostics sink and the
/// texture/material memo table. A fresh session starts with empty caches;
/// nothing here outlives the call it was created for.
#[derive(Debug, Default)]
pub struct ImportSession {
    pub config: ScnConfig,
    pub diagnostics: Diagnostics,
    materials: HashMap<String, MaterialHandle>,
}

impl ImportSession {
    pub fn new(config: ScnConfig) -> Self {
        Self {
            config,
            diagnostics: Diagnostics::new(),
            materials: HashMap::new(),
        }
    }

    pub fn cached_material(&self, file_name: &str) -> Option<MaterialHandle> {
        self.materials.get(file_name).copied()
    }

    pub fn cache_material(&mut self, file_name: impl Into<String>, handle: MaterialHandle) {
        self.materials.insert(file_name.into(), handle);
    }
}

/// State for one export call: configuration, diagnostics and the name
/// registration set (via the allocator).
#[derive(Debug, Default)]
pub struct ExportSession {
    pub config: ScnConfig,
    pub diagnostics: Diagnostics,
    pub names: NameAllocator,
}

impl ExportSession {
    pub fn new(config: ScnConfig) -> Self {
        Self {
            config,
            diagnostics: Diagnostics::new(),
            names: NameAllocator::new(),
        }
    }
}
