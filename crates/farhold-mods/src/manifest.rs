//! Mod manifest parsing and validation.
//!
//! Parses `mod.json` files that declare mod metadata, permissions, and
//! dependencies. Validation collects every problem instead of stopping at
//! the first one, so an operator sees the full list of reasons when a mod
//! folder is rejected.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Fixed manifest filename inside each mod folder.
pub const MANIFEST_FILE: &str = "mod.json";

/// Entrypoint used when the manifest leaves the field blank.
pub const DEFAULT_ENTRYPOINT: &str = "main.lua";

/// Mod manifest parsed from `mod.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModManifest {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub entrypoint: Option<String>,
    #[serde(default)]
    pub required_asset_packs: Vec<String>,
    #[serde(default)]
    pub permissions: BTreeSet<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub preload: bool,
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
}

// ─── Validation helpers ─────────────────────────────────────────────

/// Check an id against the allowed charset: lowercase letters, digits,
/// hyphens, underscores; non-empty.
fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

/// Collapse `.` components without touching the filesystem. `..` never
/// reaches this point; it is rejected before resolution.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

impl ModManifest {
    /// Parse a manifest from a JSON string.
    pub fn parse(json: &str) -> Result<Self, crate::error::ModError> {
        let manifest: ModManifest = serde_json::from_str(json)?;
        Ok(manifest)
    }

    /// The declared entrypoint, or the default when blank.
    pub fn entrypoint_or_default(&self) -> &str {
        match self.entrypoint.as_deref() {
            Some(value) if !value.trim().is_empty() => value,
            _ => DEFAULT_ENTRYPOINT,
        }
    }

    /// Validate the manifest against the mod folder it was found in.
    ///
    /// Returns every problem found; an empty list means the mod may load.
    pub fn validate(&self, mod_root: &Path) -> Vec<String> {
        let mut errors = Vec::new();

        if self.id.trim().is_empty() {
            errors.push("missing required field 'id'".to_string());
        } else if !is_valid_id(&self.id) {
            errors.push(
                "invalid 'id': use lowercase letters, numbers, hyphens or underscores only"
                    .to_string(),
            );
        }

        if self.name.trim().is_empty() {
            errors.push("missing required field 'name'".to_string());
        }

        if self.version.trim().is_empty() {
            errors.push("missing required field 'version'".to_string());
        } else if semver::Version::parse(&self.version).is_err() {
            errors.push(format!(
                "version should follow semantic versioning (e.g. 1.2.3), got '{}'",
                self.version
            ));
        }

        let entrypoint = self.entrypoint_or_default();
        let resolved = self.check_entrypoint_path(mod_root, entrypoint, &mut errors);

        if self.required_asset_packs.iter().any(|p| p.trim().is_empty()) {
            errors.push("requiredAssetPacks contains blank entries".to_string());
        }
        if self.permissions.iter().any(|p| p.trim().is_empty()) {
            errors.push("permissions contains blank entries".to_string());
        }
        if self.dependencies.iter().any(|d| d.trim().is_empty()) {
            errors.push("dependencies contains blank entries".to_string());
        }
        if self
            .dependencies
            .iter()
            .any(|d| !d.trim().is_empty() && !is_valid_id(d))
        {
            errors.push(
                "dependencies must match the id pattern (lowercase letters, numbers, hyphens, underscores)"
                    .to_string(),
            );
        }
        if self.dependencies.contains(&self.id) {
            errors.push("dependencies must not include the mod's own id".to_string());
        }

        // Filesystem checks only make sense once everything else is clean;
        // they also resolve symlinks, which the lexical checks cannot.
        if errors.is_empty() {
            if let Some(candidate) = resolved {
                self.check_entrypoint_file(mod_root, &candidate, entrypoint, &mut errors);
            }
        }

        errors
    }

    /// Lexical entrypoint checks: relative, no `..`, stays inside the root.
    fn check_entrypoint_path(
        &self,
        mod_root: &Path,
        entrypoint: &str,
        errors: &mut Vec<String>,
    ) -> Option<PathBuf> {
        if entrypoint.contains("..") {
            errors.push("entrypoint must not contain parent directory navigation ('..')".to_string());
            return None;
        }
        let entrypoint_path = Path::new(entrypoint);
        if entrypoint_path.is_absolute() {
            errors.push("entrypoint must be a relative path inside the mod directory".to_string());
            return None;
        }

        let root = normalize_lexically(mod_root);
        let candidate = normalize_lexically(&mod_root.join(entrypoint_path));
        if !candidate.starts_with(&root) {
            errors.push("entrypoint must stay within the mod directory".to_string());
            return None;
        }
        Some(candidate)
    }

    /// Filesystem entrypoint checks: the file exists and, after symlink
    /// resolution, still lives inside the mod root.
    fn check_entrypoint_file(
        &self,
        mod_root: &Path,
        candidate: &Path,
        entrypoint: &str,
        errors: &mut Vec<String>,
    ) {
        if !candidate.is_file() {
            errors.push(format!("entrypoint file not found: {entrypoint}"));
            return;
        }
        match (mod_root.canonicalize(), candidate.canonicalize()) {
            (Ok(root_real), Ok(entry_real)) => {
                if !entry_real.starts_with(&root_real) {
                    errors.push("entrypoint must stay within the mod directory".to_string());
                }
            }
            _ => {
                errors.push(format!("entrypoint file could not be read: {entrypoint}"));
            }
        }
    }
}

// ─── Definition ─────────────────────────────────────────────────────

/// Immutable pairing of a mod folder with its validated manifest.
#[derive(Debug)]
pub struct ModDefinition {
    root_dir: PathBuf,
    manifest: ModManifest,
    entrypoint: PathBuf,
}

impl ModDefinition {
    pub fn new(root_dir: PathBuf, manifest: ModManifest) -> Self {
        let entrypoint = root_dir.join(manifest.entrypoint_or_default());
        Self {
            root_dir,
            manifest,
            entrypoint,
        }
    }

    pub fn id(&self) -> &str {
        &self.manifest.id
    }

    pub fn manifest(&self) -> &ModManifest {
        &self.manifest
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn entrypoint(&self) -> &Path {
        &self.entrypoint
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
