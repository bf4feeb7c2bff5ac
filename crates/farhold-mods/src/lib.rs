//! Farhold Mod Runtime
//!
//! Lua-based mod system for the Farhold server. Each mod is a folder with a
//! `mod.json` manifest and Lua sources, runs in its own isolated Lua
//! context, and is driven through a load/enable/disable/reload lifecycle.
//! The manager discovers mod folders, resolves a dependency-respecting load
//! order (with cycle detection), and guarantees that everything a mod
//! registered with the host (commands, event hooks, scheduled tasks,
//! shared services) is torn down when the mod is disabled or reloaded.

mod api;
mod context;
mod convert;

pub mod config;
pub mod error;
pub mod host;
pub mod imports;
pub mod load_order;
pub mod manager;
pub mod manifest;
pub mod runtime;
pub mod services;
pub mod tracker;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::ModHostConfig;
pub use error::ModError;
pub use host::{permissions, CommandSpec, HostServices, Registration, ScriptCallback};
pub use imports::ModuleImports;
pub use load_order::resolve_load_order;
pub use manager::{ModInstance, ModManager};
pub use manifest::{ModDefinition, ModManifest, DEFAULT_ENTRYPOINT, MANIFEST_FILE};
pub use runtime::ModRuntime;
pub use services::{ServiceEntry, SharedServiceRegistry};
pub use tracker::RegistrationTracker;
