//! Host capability interfaces.
//!
//! The mod runtime does not implement commands, events, scheduling, or
//! asset storage itself; it is constructed with a [`HostServices`]
//! implementation provided by the embedding host. The core only calls the
//! registration methods and keeps the returned undo actions in the
//! registration tracker so everything a mod acquired can be torn down on
//! disable or reload.

use std::path::PathBuf;
use std::sync::Arc;

use crate::error::ModError;

/// Permission strings a manifest must declare before the matching
/// script-facing API may be used.
pub mod permissions {
    pub const COMMANDS: &str = "commands";
    pub const EVENTS: &str = "events";
    pub const TASKS: &str = "tasks";
}

/// An action that undoes exactly one host-side registration.
///
/// Unregistering a command, detaching an event hook, and cancelling a
/// scheduled task all share this one shape; the tracker never needs to know
/// which kind it holds.
pub type Registration = Box<dyn FnOnce() -> Result<(), ModError> + Send>;

/// A callable the host can invoke to run a mod-provided handler.
///
/// Arguments and return values are JSON so the host never touches an engine
/// handle; the callback re-enters the owning mod's context internally.
pub type ScriptCallback =
    Arc<dyn Fn(serde_json::Value) -> Result<serde_json::Value, ModError> + Send + Sync>;

/// A normalized command registration request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Primary command name, lowercase `[a-z0-9_-]+`, optionally already
    /// namespaced as `modid:command`.
    pub name: String,
    /// Namespaced alias generated for un-namespaced names.
    pub alias: Option<String>,
    pub description: Option<String>,
}

/// Registries the embedding host hands to the mod system.
///
/// Every successful registration returns the action that undoes it. A
/// cancellation racing an in-flight execution is tolerated; cancel is a
/// request, not a synchronous guarantee.
pub trait HostServices: Send + Sync {
    /// Register a chat/console command.
    fn register_command(
        &self,
        mod_id: &str,
        spec: CommandSpec,
        handler: ScriptCallback,
    ) -> Result<Registration, ModError>;

    /// Attach a handler to a named host event.
    fn register_event_hook(
        &self,
        mod_id: &str,
        event: &str,
        handler: ScriptCallback,
    ) -> Result<Registration, ModError>;

    /// Schedule a one-shot task. The returned action cancels it if still
    /// pending.
    fn run_later(
        &self,
        mod_id: &str,
        delay_ms: u64,
        task: ScriptCallback,
    ) -> Result<Registration, ModError>;

    /// Schedule a periodic task. The returned action cancels it.
    fn run_repeating(
        &self,
        mod_id: &str,
        initial_delay_ms: u64,
        period_ms: u64,
        task: ScriptCallback,
    ) -> Result<Registration, ModError>;

    /// Resolve a file inside a named asset pack, if the host knows it.
    fn resolve_asset(&self, pack: &str, path: &str) -> Option<PathBuf>;
}
