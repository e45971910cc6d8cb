//! Display names for reference identities.

use std::path::Path;

/// Label shown for faces with no match in the reference database.
pub const INTRUDER_LABEL: &str = "INTRU";

/// Derive a display name from a reference image path.
///
/// Takes the file name up to its first `.`, lowercased with the first
/// character uppercased: `db/alice.jpg` → `Alice`, `db/BOB.smith.png` → `Bob`.
pub fn display_label(identity: &Path) -> String {
    let name = identity
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();
    let stem = name.split('.').next().unwrap_or_default();

    let mut chars = stem.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}
