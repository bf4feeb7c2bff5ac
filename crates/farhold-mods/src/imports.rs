//! Intra-mod module imports.
//!
//! Implements the `require()` function injected into every mod context.
//! Imports are confined to the mod's own folder, evaluated once per
//! resolved file (two spellings of the same path share one export object),
//! and protected against circular import chains.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use mlua::{Lua, Value};

use crate::context;
use crate::error::ModError;

/// Per-runtime import resolver and module cache.
///
/// Owned by one mod runtime and recreated together with its context, so a
/// reload always starts from an empty cache.
pub struct ModuleImports {
    root: PathBuf,
    /// Resolved canonical path → evaluated export value.
    cache: Mutex<HashMap<PathBuf, Value>>,
    /// Paths currently being evaluated on the import chain, for cycle
    /// detection only.
    loading: Mutex<HashSet<PathBuf>>,
}

impl ModuleImports {
    pub fn new(root: PathBuf) -> Self {
        let root = root.canonicalize().unwrap_or(root);
        Self {
            root,
            cache: Mutex::new(HashMap::new()),
            loading: Mutex::new(HashSet::new()),
        }
    }

    /// Import a module by mod-relative path.
    ///
    /// Returns the cached export value when the resolved file was already
    /// evaluated; otherwise evaluates it in a fresh nested scope and caches
    /// the result.
    pub fn require(&self, lua: &Lua, requested: &str) -> Result<Value, ModError> {
        let target = self.resolve(requested)?;

        if let Some(cached) = self.lock_cache().get(&target) {
            return Ok(cached.clone());
        }

        let value = self.evaluate(lua, &target)?;
        self.lock_cache().insert(target, value.clone());
        Ok(value)
    }

    /// Number of evaluated modules in the cache.
    pub fn cached_count(&self) -> usize {
        self.lock_cache().len()
    }

    /// Resolve a requested path to a canonical file inside the mod root.
    fn resolve(&self, requested: &str) -> Result<PathBuf, ModError> {
        if requested.trim().is_empty() {
            return Err(ModError::InvalidImportPath(
                "require() needs a relative path".into(),
            ));
        }
        if requested.contains("..") {
            return Err(ModError::InvalidImportPath(format!(
                "require() cannot traverse outside the mod folder: {requested}"
            )));
        }
        if Path::new(requested).is_absolute()
            || requested.starts_with('/')
            || requested.starts_with('\\')
        {
            return Err(ModError::InvalidImportPath(format!(
                "require() expects a relative path, not an absolute path: {requested}"
            )));
        }

        let with_extension = if requested.ends_with(".lua") {
            requested.to_string()
        } else {
            format!("{requested}.lua")
        };

        let candidate = self.root.join(&with_extension);
        let resolved = candidate
            .canonicalize()
            .map_err(|_| ModError::ModuleNotFound(requested.to_string()))?;

        // Canonicalization resolved symlinks; reject anything that escaped.
        if !resolved.starts_with(&self.root) {
            return Err(ModError::InvalidImportPath(format!(
                "import path must stay within the mod directory: {requested}"
            )));
        }
        if !resolved.is_file() {
            return Err(ModError::ModuleNotFound(requested.to_string()));
        }
        Ok(resolved)
    }

    /// Evaluate one module file, guarding the loading set on every exit
    /// path.
    fn evaluate(&self, lua: &Lua, path: &Path) -> Result<Value, ModError> {
        {
            let mut loading = self.lock_loading();
            if !loading.insert(path.to_path_buf()) {
                return Err(ModError::CircularImport(display_name(path)));
            }
        }
        let _guard = LoadingGuard {
            imports: self,
            path,
        };

        let source = std::fs::read_to_string(path)?;
        context::eval_module(lua, &display_name(path), &source)
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, Value>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_loading(&self) -> std::sync::MutexGuard<'_, HashSet<PathBuf>> {
        self.loading.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Removes the path from the loading set when evaluation unwinds, whether
/// it succeeded or failed.
struct LoadingGuard<'a> {
    imports: &'a ModuleImports,
    path: &'a Path,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.imports.lock_loading().remove(self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    fn mod_dir(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        for (rel, content) in files {
            let path = dir.path().join(rel);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(path, content).unwrap();
        }
        dir
    }

    /// Build a context with a `require` global bound to one shared
    /// resolver, the way the runtime wires it when it builds a context.
    fn setup(dir: &tempfile::TempDir) -> (Lua, Arc<ModuleImports>) {
        let lua = Lua::new();
        let imports = Arc::new(ModuleImports::new(dir.path().to_path_buf()));
        let bound = Arc::clone(&imports);
        let require = lua
            .create_function(move |lua, path: String| {
                bound.require(lua, &path).map_err(mlua::Error::from)
            })
            .unwrap();
        lua.globals().set("require", require).unwrap();
        (lua, imports)
    }

    // ── Path resolution ─────────────────────────────────────────────

    #[test]
    fn test_resolve_rejects_blank() {
        let dir = mod_dir(&[]);
        let imports = ModuleImports::new(dir.path().to_path_buf());
        let err = imports.resolve("  ").unwrap_err();
        assert!(matches!(err, ModError::InvalidImportPath(_)));
    }

    #[test]
    fn test_resolve_rejects_parent_traversal() {
        let dir = mod_dir(&[]);
        let imports = ModuleImports::new(dir.path().to_path_buf());
        let err = imports.resolve("../escape").unwrap_err();
        assert!(matches!(err, ModError::InvalidImportPath(_)));
    }

    #[test]
    fn test_resolve_rejects_absolute() {
        let dir = mod_dir(&[]);
        let imports = ModuleImports::new(dir.path().to_path_buf());
        let err = imports.resolve("/etc/passwd").unwrap_err();
        assert!(matches!(err, ModError::InvalidImportPath(_)));
    }

    #[test]
    fn test_resolve_missing_module() {
        let dir = mod_dir(&[]);
        let imports = ModuleImports::new(dir.path().to_path_buf());
        let err = imports.resolve("nothing").unwrap_err();
        assert!(matches!(err, ModError::ModuleNotFound(_)));
    }

    #[test]
    fn test_resolve_appends_lua_extension() {
        let dir = mod_dir(&[("util/format.lua", "exports.x = 1")]);
        let imports = ModuleImports::new(dir.path().to_path_buf());
        let bare = imports.resolve("util/format").unwrap();
        let explicit = imports.resolve("util/format.lua").unwrap();
        assert_eq!(bare, explicit);
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_rejects_symlink_escape() {
        let outside = mod_dir(&[("secret.lua", "exports.leak = true")]);
        let dir = mod_dir(&[]);
        std::os::unix::fs::symlink(
            outside.path().join("secret.lua"),
            dir.path().join("link.lua"),
        )
        .unwrap();

        let imports = ModuleImports::new(dir.path().to_path_buf());
        let err = imports.resolve("link").unwrap_err();
        assert!(
            matches!(err, ModError::InvalidImportPath(_)),
            "symlink escape not caught: {err}"
        );
    }

    // ── Evaluation and caching ──────────────────────────────────────

    #[test]
    fn test_require_returns_exports() {
        let dir = mod_dir(&[(
            "util/math.lua",
            "exports.sum = function(a, b) return a + b end",
        )]);
        let (lua, imports) = setup(&dir);

        let value = imports.require(&lua, "util/math").unwrap();
        let Value::Table(table) = value else {
            panic!("expected exports table");
        };
        let sum: mlua::Function = table.get("sum").unwrap();
        assert_eq!(sum.call::<i64>((2, 3)).unwrap(), 5);
    }

    #[test]
    fn test_equivalent_spellings_share_one_export_object() {
        let dir = mod_dir(&[("util/format.lua", "exports.calls = {}")]);
        let (lua, imports) = setup(&dir);

        let first = imports.require(&lua, "util/format").unwrap();
        let second = imports.require(&lua, "util/format.lua").unwrap();
        assert_eq!(imports.cached_count(), 1);
        assert_eq!(
            first.to_pointer(),
            second.to_pointer(),
            "both spellings must return the identical export object"
        );
    }

    #[test]
    fn test_module_evaluated_once() {
        let dir = mod_dir(&[(
            "counter.lua",
            "exports.stamp = {}",
        )]);
        let (lua, imports) = setup(&dir);

        let first = imports.require(&lua, "counter").unwrap();
        let second = imports.require(&lua, "counter").unwrap();
        assert_eq!(imports.cached_count(), 1);
        assert_eq!(first.to_pointer(), second.to_pointer());
    }

    #[test]
    fn test_nested_requires() {
        let dir = mod_dir(&[
            ("a.lua", r#"local b = require("b"); exports.total = b.value + 1"#),
            ("b.lua", "exports.value = 41"),
        ]);
        let (lua, imports) = setup(&dir);

        let value = imports.require(&lua, "a").unwrap();
        let Value::Table(table) = value else {
            panic!("expected exports table");
        };
        assert_eq!(table.get::<i64>("total").unwrap(), 42);
        assert_eq!(imports.cached_count(), 2);
    }

    #[test]
    fn test_circular_import_fails_fast() {
        let dir = mod_dir(&[
            ("a.lua", r#"require("b"); exports.ok = true"#),
            ("b.lua", r#"require("a"); exports.ok = true"#),
        ]);
        let (lua, imports) = setup(&dir);

        let err = imports.require(&lua, "a").unwrap_err();
        assert!(
            err.to_string().contains("circular import"),
            "expected circular-import failure, got: {err}"
        );
    }

    #[test]
    fn test_self_import_fails_fast() {
        let dir = mod_dir(&[("selfish.lua", r#"require("selfish")"#)]);
        let (lua, imports) = setup(&dir);

        let err = imports.require(&lua, "selfish").unwrap_err();
        assert!(err.to_string().contains("circular import"));
    }

    #[test]
    fn test_circular_error_is_catchable_by_script() {
        // Resource errors surface inside the mod's own code, so a module
        // can pcall a risky import and keep going.
        let dir = mod_dir(&[
            (
                "a.lua",
                r#"
                local ok, err = pcall(require, "b")
                exports.recovered = not ok
                "#,
            ),
            ("b.lua", r#"require("a")"#),
        ]);
        let (lua, imports) = setup(&dir);

        let value = imports.require(&lua, "a").unwrap();
        let Value::Table(table) = value else {
            panic!("expected exports table");
        };
        assert!(table.get::<bool>("recovered").unwrap());
    }

    #[test]
    fn test_loading_set_cleared_after_failure() {
        let dir = mod_dir(&[("broken.lua", "this is not lua (")]);
        let (lua, imports) = setup(&dir);

        assert!(imports.require(&lua, "broken").is_err());
        // The path must not be stuck in the loading set after the failure.
        assert!(imports.lock_loading().is_empty());
    }

    #[test]
    fn test_failed_module_not_cached() {
        let dir = mod_dir(&[("broken.lua", "error('boom')")]);
        let (lua, imports) = setup(&dir);

        assert!(imports.require(&lua, "broken").is_err());
        assert_eq!(imports.cached_count(), 0);

        // A later import of a healthy module still works.
        std::fs::write(dir.path().join("fine.lua"), "exports.ok = true").unwrap();
        assert!(imports.require(&lua, "fine").is_ok());
    }
}
