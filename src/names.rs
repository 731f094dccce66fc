use std::collections::HashSet;

use crate::chunk::is_oct_name;
use crate::session::{DiagnosticKind, Diagnostics};

/// Enforces chunk-name uniqueness for one export session. `oct_` names are
/// exempt by convention and bypass the registry entirely. Collisions are
/// repaired with sequential suffixes so that repeated exports of the same
/// scene produce identical output.
#[derive(Debug, Default)]
pub struct NameAllocator {
    used: HashSet<String>,
}

impl NameAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a candidate name and returns the final name to use. The
    /// candidate comes back unchanged unless it collides with a name
    /// already registered this session, in which case a suffixed variant
    /// is chosen and a diagnostic is emitted.
    pub fn register(&mut self, candidate: &str, diagnostics: &mut Diagnostics) -> String {
        if is_oct_name(candidate) {
            return candidate.to_string();
        }
        if self.used.insert(candidate.to_string()) {
            return candidate.to_string();
        }

        let mut counter = 1u32;
        loop {
            let renamed = format!("{candidate}_{counter:03}");
            if self.used.insert(renamed.clone()) {
                diagnostics.report(
                    DiagnosticKind::NameCollision,
                    format!("chunk name '{candidate}' is already in use, renamed to '{renamed}'"),
                );
                return renamed;
            }
            counter += 1;
        }
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.used.contains(name)
    }
}
