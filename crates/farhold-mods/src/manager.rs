//! Mod discovery, ordering, and instance management.
//!
//! The `ModManager` walks the mods root, validates each folder's manifest,
//! resolves the dependency load order, and owns one `ModInstance` per
//! loaded mod. Reload and full-shutdown paths remove a mod's shared
//! services before its context is torn down so stale entries can never be
//! invoked.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::ModHostConfig;
use crate::error::ModError;
use crate::host::HostServices;
use crate::load_order::resolve_load_order;
use crate::manifest::{ModDefinition, ModManifest, MANIFEST_FILE};
use crate::runtime::ModRuntime;
use crate::services::SharedServiceRegistry;

// ─── Instance ───────────────────────────────────────────────────────

/// One loaded mod: its definition, its runtime, and an enabled flag.
///
/// The lifecycle mutex serializes load/disable/reload sequences per mod, so
/// an operator-triggered reload can never interleave with another reload of
/// the same mod.
pub struct ModInstance {
    definition: Arc<ModDefinition>,
    runtime: Arc<ModRuntime>,
    services: Arc<SharedServiceRegistry>,
    enabled: AtomicBool,
    lifecycle: Mutex<()>,
}

impl ModInstance {
    pub fn new(
        definition: Arc<ModDefinition>,
        runtime: Arc<ModRuntime>,
        services: Arc<SharedServiceRegistry>,
    ) -> Self {
        Self {
            definition,
            runtime,
            services,
            enabled: AtomicBool::new(false),
            lifecycle: Mutex::new(()),
        }
    }

    pub fn definition(&self) -> &Arc<ModDefinition> {
        &self.definition
    }

    pub fn runtime(&self) -> &Arc<ModRuntime> {
        &self.runtime
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Load the runtime and run its enable hook.
    pub fn load_and_enable(&self) -> Result<(), ModError> {
        let _lifecycle = self.lock_lifecycle();
        self.runtime.load()?;
        self.runtime.enable()?;
        self.enabled.store(true, Ordering::SeqCst);
        tracing::info!(
            mod_id = %self.definition.id(),
            name = %self.definition.manifest().name,
            version = %self.definition.manifest().version,
            "enabled mod"
        );
        Ok(())
    }

    /// Remove the mod's shared services and tear its runtime down.
    pub fn disable(&self) {
        let _lifecycle = self.lock_lifecycle();
        self.services.remove_owner(self.definition.id());
        self.runtime.disable();
        self.enabled.store(false, Ordering::SeqCst);
        tracing::info!(mod_id = %self.definition.id(), "disabled mod");
    }

    /// Cycle the runtime and re-enable it.
    ///
    /// Service entries are removed before the old context goes away; the
    /// re-run entry program republishes whatever the mod still offers.
    pub fn reload(&self) -> Result<(), ModError> {
        let _lifecycle = self.lock_lifecycle();
        self.services.remove_owner(self.definition.id());
        self.runtime.reload()?;
        self.runtime.enable()?;
        self.enabled.store(true, Ordering::SeqCst);
        tracing::info!(mod_id = %self.definition.id(), "reloaded mod");
        Ok(())
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, ()> {
        self.lifecycle.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ─── Manager ────────────────────────────────────────────────────────

/// Discovers mod folders and owns the live instance table.
pub struct ModManager {
    mods_root: PathBuf,
    config: ModHostConfig,
    host: Arc<dyn HostServices>,
    services: Arc<SharedServiceRegistry>,
    instances: Mutex<HashMap<String, Arc<ModInstance>>>,
}

impl ModManager {
    pub fn new(
        mods_root: impl Into<PathBuf>,
        config: ModHostConfig,
        host: Arc<dyn HostServices>,
    ) -> Self {
        Self {
            mods_root: mods_root.into(),
            config,
            host,
            services: Arc::new(SharedServiceRegistry::new()),
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// The process-wide shared service registry.
    pub fn services(&self) -> &Arc<SharedServiceRegistry> {
        &self.services
    }

    /// Discover every mod folder under the mods root, then load and enable
    /// them strictly in dependency order.
    ///
    /// Runs synchronously on the calling thread; a mod's `onEnable` may
    /// assume every dependency already finished its own `onEnable`.
    pub fn discover_and_load_mods(&self) {
        if let Err(e) = std::fs::create_dir_all(&self.mods_root) {
            tracing::error!(
                path = %self.mods_root.display(),
                "failed to create mods directory: {e}"
            );
            return;
        }

        let entries = match std::fs::read_dir(&self.mods_root) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!(
                    path = %self.mods_root.display(),
                    "unable to list mods directory: {e}"
                );
                return;
            }
        };

        let mut mod_dirs: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        // Directory listing order is filesystem-dependent; sort it so
        // duplicate-id precedence is reproducible.
        mod_dirs.sort();

        let mut definitions: Vec<Arc<ModDefinition>> = Vec::new();
        for dir in &mod_dirs {
            let Some(definition) = self.create_definition(dir) else {
                continue;
            };
            if definitions.iter().any(|d| d.id() == definition.id()) {
                tracing::warn!(
                    mod_id = %definition.id(),
                    folder = %dir.display(),
                    "duplicate mod id, skipping folder"
                );
                continue;
            }
            definitions.push(definition);
        }

        for definition in resolve_load_order(&definitions) {
            self.load_definition(definition);
        }
    }

    /// Reload one mod by id.
    ///
    /// Unknown ids fail without side effects. Load order is not recomputed;
    /// only this mod's runtime cycles.
    pub fn reload_mod(&self, id: &str) -> Result<(), ModError> {
        let instance = self
            .lock_instances()
            .get(id)
            .cloned()
            .ok_or_else(|| {
                tracing::warn!(mod_id = %id, "cannot reload unknown mod id");
                ModError::NotFound(id.to_string())
            })?;
        self.services.remove_owner(id);
        instance.reload()
    }

    /// Disable every loaded mod and clear the instance table.
    ///
    /// Teardown runs in table-iteration order, not reverse-dependency
    /// order; nothing keeps running after this returns.
    pub fn disable_all(&self) {
        let drained: Vec<Arc<ModInstance>> = {
            let mut instances = self.lock_instances();
            instances.drain().map(|(_, instance)| instance).collect()
        };
        for instance in drained {
            instance.disable();
        }
    }

    // ── Query methods ────────────────────────────────────────────────

    /// Number of currently loaded mods.
    pub fn loaded_count(&self) -> usize {
        self.lock_instances().len()
    }

    /// Check if a mod id is currently loaded.
    pub fn is_loaded(&self, id: &str) -> bool {
        self.lock_instances().contains_key(id)
    }

    /// Ids and names of all loaded mods.
    pub fn loaded_mods(&self) -> Vec<(String, String)> {
        self.lock_instances()
            .values()
            .map(|i| {
                (
                    i.definition().id().to_string(),
                    i.definition().manifest().name.clone(),
                )
            })
            .collect()
    }

    /// Get a loaded instance by id.
    pub fn get(&self, id: &str) -> Option<Arc<ModInstance>> {
        self.lock_instances().get(id).cloned()
    }

    // ── Internals ────────────────────────────────────────────────────

    /// Parse and validate one mod folder. Folders without a manifest are
    /// silently skipped; invalid manifests are logged and skipped.
    fn create_definition(&self, mod_dir: &Path) -> Option<Arc<ModDefinition>> {
        let manifest_path = mod_dir.join(MANIFEST_FILE);
        if !manifest_path.is_file() {
            tracing::debug!(folder = %mod_dir.display(), "skipping folder without manifest");
            return None;
        }

        let raw = match std::fs::read_to_string(&manifest_path) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!(
                    path = %manifest_path.display(),
                    "failed to read manifest: {e}"
                );
                return None;
            }
        };
        let manifest = match ModManifest::parse(&raw) {
            Ok(manifest) => manifest,
            Err(e) => {
                tracing::error!(
                    path = %manifest_path.display(),
                    "failed to parse manifest: {e}"
                );
                return None;
            }
        };

        let errors = manifest.validate(mod_dir);
        if !errors.is_empty() {
            tracing::warn!(
                folder = %mod_dir.display(),
                "rejected mod: {}",
                errors.join("; ")
            );
            return None;
        }

        Some(Arc::new(ModDefinition::new(mod_dir.to_path_buf(), manifest)))
    }

    /// Create and enable one instance; failures are contained to this mod.
    fn load_definition(&self, definition: Arc<ModDefinition>) {
        let id = definition.id().to_string();
        if self.lock_instances().contains_key(&id) {
            tracing::warn!(mod_id = %id, "mod id already loaded, skipping");
            return;
        }

        let runtime = ModRuntime::new(
            Arc::clone(&definition),
            self.config.clone(),
            Arc::clone(&self.host),
            Arc::clone(&self.services),
        );
        let instance = Arc::new(ModInstance::new(
            definition,
            runtime,
            Arc::clone(&self.services),
        ));
        match instance.load_and_enable() {
            Ok(()) => {
                self.lock_instances().insert(id, instance);
            }
            Err(e) => {
                tracing::error!(mod_id = %id, "failed to load mod: {e}");
            }
        }
    }

    fn lock_instances(&self) -> MutexGuard<'_, HashMap<String, Arc<ModInstance>>> {
        self.instances.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
