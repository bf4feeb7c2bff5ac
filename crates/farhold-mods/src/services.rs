//! Cross-mod shared service registry.
//!
//! A mod may publish a named capability table for other mods to call. The
//! registry is process-wide; every entry remembers its owning mod so a name
//! can never be taken over by another mod, and so all of one owner's
//! entries can be dropped before that owner's context is destroyed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use mlua::Table;

use crate::runtime::ModRuntime;

/// One published service.
#[derive(Clone)]
pub struct ServiceEntry {
    pub name: String,
    pub owner_id: String,
    /// The owning mod's runtime. Cross-mod calls always go through this
    /// runtime so the call executes inside the provider's context.
    pub runtime: Arc<ModRuntime>,
    /// The exposed capability table, owned by the provider's context.
    pub api: Table,
}

/// Process-wide directory of published services.
#[derive(Default)]
pub struct SharedServiceRegistry {
    services: Mutex<HashMap<String, ServiceEntry>>,
}

impl SharedServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish or update a service.
    ///
    /// Returns false for a blank name or when the name is already owned by
    /// a different mod (the existing entry is left untouched). Re-exposing
    /// under the same owner overwrites; reload uses this to republish
    /// after recreating the context.
    pub fn expose(&self, name: &str, owner_id: &str, runtime: Arc<ModRuntime>, api: Table) -> bool {
        if name.trim().is_empty() {
            return false;
        }
        let mut services = self.lock();
        if let Some(existing) = services.get(name) {
            if existing.owner_id != owner_id {
                // Prevent accidental takeover by another mod.
                return false;
            }
        }
        services.insert(
            name.to_string(),
            ServiceEntry {
                name: name.to_string(),
                owner_id: owner_id.to_string(),
                runtime,
                api,
            },
        );
        true
    }

    /// Look up a service by name.
    pub fn get(&self, name: &str) -> Option<ServiceEntry> {
        self.lock().get(name).cloned()
    }

    /// Remove every service owned by the given mod.
    ///
    /// Called before both disable and reload so a stale entry can never be
    /// invoked against a context that is about to be destroyed.
    pub fn remove_owner(&self, owner_id: &str) {
        self.lock().retain(|_, entry| entry.owner_id != owner_id);
    }

    /// Number of published services.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ServiceEntry>> {
        self.services.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    fn runtime_with_table(id: &str) -> (Arc<ModRuntime>, Table, tempfile::TempDir) {
        let (runtime, dir) = testutil::loaded_runtime(id, "-- empty entry\n");
        let table = runtime
            .with_lua(|lua| lua.create_table().unwrap())
            .expect("runtime is loaded");
        (runtime, table, dir)
    }

    #[test]
    fn test_expose_and_get() {
        let registry = SharedServiceRegistry::new();
        let (runtime, api, _dir) = runtime_with_table("provider");

        assert!(registry.expose("greetings", "provider", runtime, api));
        let entry = registry.get("greetings").expect("service registered");
        assert_eq!(entry.name, "greetings");
        assert_eq!(entry.owner_id, "provider");
    }

    #[test]
    fn test_expose_blank_name_rejected() {
        let registry = SharedServiceRegistry::new();
        let (runtime, api, _dir) = runtime_with_table("provider");
        assert!(!registry.expose("  ", "provider", runtime, api));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_no_takeover_by_other_owner() {
        let registry = SharedServiceRegistry::new();
        let (provider, api_a, _dir_a) = runtime_with_table("provider");
        let (intruder, api_b, _dir_b) = runtime_with_table("intruder");

        assert!(registry.expose("greetings", "provider", provider, api_a));
        assert!(!registry.expose("greetings", "intruder", intruder, api_b));

        let entry = registry.get("greetings").unwrap();
        assert_eq!(entry.owner_id, "provider");
    }

    #[test]
    fn test_same_owner_update_allowed() {
        let registry = SharedServiceRegistry::new();
        let (runtime, first, _dir) = runtime_with_table("provider");
        first.set("version", 1).unwrap();
        let second = runtime
            .with_lua(|lua| {
                let t = lua.create_table().unwrap();
                t.set("version", 2).unwrap();
                t
            })
            .unwrap();

        assert!(registry.expose("greetings", "provider", Arc::clone(&runtime), first));
        assert!(registry.expose("greetings", "provider", runtime, second));

        let entry = registry.get("greetings").unwrap();
        assert_eq!(entry.api.get::<i64>("version").unwrap(), 2);
    }

    #[test]
    fn test_remove_owner_drops_all_entries() {
        let registry = SharedServiceRegistry::new();
        let (provider, api_a, _dir_a) = runtime_with_table("provider");
        let api_b = provider
            .with_lua(|lua| lua.create_table().unwrap())
            .unwrap();
        let (other, api_c, _dir_c) = runtime_with_table("other");

        registry.expose("greetings", "provider", Arc::clone(&provider), api_a);
        registry.expose("farewells", "provider", provider, api_b);
        registry.expose("weather", "other", other, api_c);
        assert_eq!(registry.len(), 3);

        registry.remove_owner("provider");
        assert!(registry.get("greetings").is_none());
        assert!(registry.get("farewells").is_none());
        assert!(registry.get("weather").is_some());
    }

    #[test]
    fn test_get_unknown_returns_none() {
        let registry = SharedServiceRegistry::new();
        assert!(registry.get("nothing").is_none());
    }
}
