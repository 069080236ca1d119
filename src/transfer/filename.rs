//! Filename sanitization and per-batch collision handling.

use std::collections::HashMap;

/// Sanitizes a display name for filesystem safety.
///
/// Replaces characters that are invalid on common filesystems
/// (`/ \ : * ? " < > |`) and control characters with underscores. Empty
/// input becomes a single underscore.
#[must_use]
pub(crate) fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let trimmed = sanitized.trim();
    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Tracks filenames used within one batch, suffixing collisions.
///
/// The first job keeps its name; later jobs resolving to the same sanitized
/// name get ` (N)` inserted before the extension, counting from 1.
#[derive(Debug, Default)]
pub(crate) struct NameRegistry {
    used: HashMap<String, u32>,
}

impl NameRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Claims a unique filename for this batch.
    pub(crate) fn claim(&mut self, name: &str) -> String {
        let count = self.used.entry(name.to_string()).or_insert(0);
        *count += 1;
        if *count == 1 {
            return name.to_string();
        }
        let suffix = *count - 1;
        match name.rfind('.') {
            Some(dot) if dot > 0 => {
                format!("{} ({}){}", &name[..dot], suffix, &name[dot..])
            }
            _ => format!("{name} ({suffix})"),
        }
    }
}
