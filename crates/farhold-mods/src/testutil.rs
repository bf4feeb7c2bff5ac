//! Shared test fixtures: a recording host double and mod-folder builders.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::config::ModHostConfig;
use crate::error::ModError;
use crate::host::{CommandSpec, HostServices, Registration, ScriptCallback};
use crate::manifest::{ModDefinition, ModManifest};
use crate::runtime::ModRuntime;
use crate::services::SharedServiceRegistry;

/// Host double that records registrations and keeps the callbacks so tests
/// can fire them the way a live host would.
#[derive(Default)]
pub struct RecordingHost {
    commands: Mutex<Vec<CommandSpec>>,
    events: Mutex<HashMap<String, ScriptCallback>>,
    tasks: Mutex<Vec<(String, u64)>>,
    undone: Arc<Mutex<Vec<String>>>,
}

impl RecordingHost {
    pub fn command_specs(&self) -> Vec<String> {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .map(|spec| spec.name.clone())
            .collect()
    }

    pub fn scheduled(&self) -> Vec<(String, u64)> {
        self.tasks.lock().unwrap().clone()
    }

    pub fn undone(&self) -> Vec<String> {
        self.undone.lock().unwrap().clone()
    }

    pub fn event_callback(&self, event: &str) -> Option<ScriptCallback> {
        self.events.lock().unwrap().get(event).cloned()
    }

    /// Invoke a registered event hook the way a live event bus would.
    pub fn fire_event(
        &self,
        event: &str,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, ModError> {
        let callback = self
            .event_callback(event)
            .ok_or_else(|| ModError::NotFound(format!("no hook for event '{event}'")))?;
        callback(payload)
    }

    fn undo_action(&self, label: String) -> Registration {
        let undone = Arc::clone(&self.undone);
        Box::new(move || {
            undone.lock().unwrap().push(label);
            Ok(())
        })
    }
}

impl HostServices for RecordingHost {
    fn register_command(
        &self,
        _mod_id: &str,
        spec: CommandSpec,
        _handler: ScriptCallback,
    ) -> Result<Registration, ModError> {
        let label = format!("command:{}", spec.name);
        self.commands.lock().unwrap().push(spec);
        Ok(self.undo_action(label))
    }

    fn register_event_hook(
        &self,
        _mod_id: &str,
        event: &str,
        handler: ScriptCallback,
    ) -> Result<Registration, ModError> {
        self.events
            .lock()
            .unwrap()
            .insert(event.to_string(), handler);
        Ok(self.undo_action(format!("event:{event}")))
    }

    fn run_later(
        &self,
        mod_id: &str,
        delay_ms: u64,
        _task: ScriptCallback,
    ) -> Result<Registration, ModError> {
        self.tasks
            .lock()
            .unwrap()
            .push((mod_id.to_string(), delay_ms));
        Ok(self.undo_action(format!("task:{mod_id}")))
    }

    fn run_repeating(
        &self,
        mod_id: &str,
        initial_delay_ms: u64,
        _period_ms: u64,
        _task: ScriptCallback,
    ) -> Result<Registration, ModError> {
        self.tasks
            .lock()
            .unwrap()
            .push((mod_id.to_string(), initial_delay_ms));
        Ok(self.undo_action(format!("task:{mod_id}")))
    }

    fn resolve_asset(&self, pack: &str, path: &str) -> Option<PathBuf> {
        Some(PathBuf::from(format!("/assets/{pack}/{path}")))
    }
}

// ─── Fixture builders ───────────────────────────────────────────────

/// Minimal valid manifest for the given id.
pub fn simple_manifest(id: &str) -> String {
    format!(r#"{{"id": "{id}", "name": "{id}", "version": "1.0.0"}}"#)
}

/// Minimal manifest plus extra JSON fields (each a `"key": value` string).
pub fn manifest_with(id: &str, extras: &[&str]) -> String {
    let extras = extras.join(", ");
    format!(r#"{{"id": "{id}", "name": "{id}", "version": "1.0.0", {extras}}}"#)
}

/// Write one mod folder (manifest + `main.lua`) under the given root.
pub fn write_mod_folder(root: &Path, folder: &str, manifest_json: String, entry: &str) {
    let dir = root.join(folder);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(crate::manifest::MANIFEST_FILE), manifest_json).unwrap();
    std::fs::write(dir.join("main.lua"), entry).unwrap();
}

/// Build an unloaded runtime over a fresh temp mod folder.
pub fn runtime_with_entry(id: &str, entry: &str) -> (Arc<ModRuntime>, tempfile::TempDir) {
    runtime_from_parts(
        id,
        &simple_manifest(id),
        entry,
        Arc::new(RecordingHost::default()),
    )
}

/// Build and load a runtime over a fresh temp mod folder.
pub fn loaded_runtime(id: &str, entry: &str) -> (Arc<ModRuntime>, tempfile::TempDir) {
    let (runtime, dir) = runtime_with_entry(id, entry);
    runtime.load().expect("entry program should load");
    (runtime, dir)
}

/// Build and load a runtime with a custom manifest.
pub fn loaded_runtime_with_manifest(
    id: &str,
    manifest_json: &str,
    entry: &str,
) -> (Arc<ModRuntime>, tempfile::TempDir) {
    let (runtime, dir) =
        runtime_from_parts(id, manifest_json, entry, Arc::new(RecordingHost::default()));
    runtime.load().expect("entry program should load");
    (runtime, dir)
}

/// Build and load a runtime against a caller-provided host double.
pub fn loaded_runtime_with_host(
    id: &str,
    manifest_json: &str,
    entry: &str,
    host: Arc<RecordingHost>,
) -> (Arc<ModRuntime>, tempfile::TempDir) {
    let (runtime, dir) = runtime_from_parts(id, manifest_json, entry, host);
    runtime.load().expect("entry program should load");
    (runtime, dir)
}

fn runtime_from_parts(
    id: &str,
    manifest_json: &str,
    entry: &str,
    host: Arc<RecordingHost>,
) -> (Arc<ModRuntime>, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    std::fs::write(dir.path().join(crate::manifest::MANIFEST_FILE), manifest_json).unwrap();
    std::fs::write(dir.path().join("main.lua"), entry).unwrap();

    let manifest = ModManifest::parse(manifest_json).expect("test manifest must parse");
    assert_eq!(manifest.id, id, "fixture id mismatch");
    let definition = Arc::new(ModDefinition::new(dir.path().to_path_buf(), manifest));

    let runtime = ModRuntime::new(
        definition,
        ModHostConfig::default(),
        host as Arc<dyn HostServices>,
        Arc::new(SharedServiceRegistry::new()),
    );
    (runtime, dir)
}
