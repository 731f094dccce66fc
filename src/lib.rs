//! Import/export core for `.scn` scene containers.
//!
//! The crate works on a flat list of typed, name-linked chunks: `io`
//! reads and writes the container, `tree` reconstructs the parent/child
//! forest on import and `flatten` walks a live scene graph back into the
//! flat list on export.  `graph` materializes a built forest into plain
//! scene nodes, while the host engine stays behind small adapter traits
//! so the crate remains testable and easy to embed in headless tools.

pub mod chunk;
pub mod dds;
pub mod flatten;
pub mod graph;
pub mod io;
pub mod names;
pub mod session;
pub mod skin;
pub mod tree;

pub use chunk::{ChunkPayload, ChunkRecord, ChunkType, SceneContainer, Transform};
pub use flatten::{flatten, SceneNode};
pub use graph::{import_container, GraphKind, GraphNode, MaterialAdapter, TextureSource};
pub use session::{
    Diagnostic, DiagnosticKind, Diagnostics, ExportSession, ImportSession, ScnConfig,
};
pub use tree::{build as build_tree, TreeNode};
