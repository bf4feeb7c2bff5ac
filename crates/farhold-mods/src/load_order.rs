//! Dependency-graph load-order resolution.
//!
//! Produces the deterministic order in which discovered mods are loaded and
//! enabled: preloaded mods first, alphabetical within each group, and every
//! dependency strictly before its dependents. Mods with missing or cyclic
//! dependencies are excluded, together with everything that transitively
//! depends on them.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::manifest::ModDefinition;

/// Resolve the load order for a set of discovered definitions.
///
/// Definitions must already be deduplicated by id. Exclusions are logged
/// per mod with the reason; the returned order contains only loadable mods.
pub fn resolve_load_order(definitions: &[Arc<ModDefinition>]) -> Vec<Arc<ModDefinition>> {
    let by_id: HashMap<&str, Arc<ModDefinition>> = definitions
        .iter()
        .map(|def| (def.id(), Arc::clone(def)))
        .collect();

    // Eagerly invalidate mods whose declared dependencies were never
    // discovered, naming the missing id.
    let mut invalid: HashSet<String> = HashSet::new();
    for def in definitions {
        for dep in &def.manifest().dependencies {
            if !by_id.contains_key(dep.as_str()) {
                tracing::warn!(
                    mod_id = %def.id(),
                    dependency = %dep,
                    "skipping mod because dependency is missing"
                );
                invalid.insert(def.id().to_string());
                break;
            }
        }
    }

    // Seed order: preloaded mods first, then case-insensitive by id.
    let mut seeds: Vec<&Arc<ModDefinition>> = definitions.iter().collect();
    seeds.sort_by(|left, right| {
        let preload = right
            .manifest()
            .preload
            .cmp(&left.manifest().preload);
        preload.then_with(|| {
            left.id()
                .to_ascii_lowercase()
                .cmp(&right.id().to_ascii_lowercase())
        })
    });

    let mut ordered = Vec::new();
    let mut visiting = HashSet::new();
    let mut visited = HashSet::new();

    for def in seeds {
        visit(def, &by_id, &mut invalid, &mut visiting, &mut visited, &mut ordered);
    }

    for id in &invalid {
        tracing::warn!(mod_id = %id, "mod was not loaded due to dependency issues");
    }

    ordered
}

/// Depth-first visit with tri-color marking: `visiting` is the current DFS
/// path (a re-encounter means a cycle), `visited` is finished work, and
/// `invalid` propagates to every transitive dependent.
fn visit(
    def: &Arc<ModDefinition>,
    by_id: &HashMap<&str, Arc<ModDefinition>>,
    invalid: &mut HashSet<String>,
    visiting: &mut HashSet<String>,
    visited: &mut HashSet<String>,
    ordered: &mut Vec<Arc<ModDefinition>>,
) {
    let id = def.id();
    if invalid.contains(id) || visited.contains(id) {
        return;
    }
    if visiting.contains(id) {
        tracing::warn!(mod_id = %id, "dependency cycle detected, skipping");
        invalid.insert(id.to_string());
        return;
    }

    visiting.insert(id.to_string());
    // BTreeSet iteration already yields dependency ids in sorted order.
    for dep_id in &def.manifest().dependencies {
        let failed = match by_id.get(dep_id.as_str()) {
            None => true,
            Some(dep) => {
                if invalid.contains(dep_id) {
                    true
                } else {
                    visit(dep, by_id, invalid, visiting, visited, ordered);
                    invalid.contains(dep_id)
                }
            }
        };
        if failed {
            tracing::warn!(
                mod_id = %id,
                dependency = %dep_id,
                "skipping mod because dependency failed to load"
            );
            invalid.insert(id.to_string());
            visiting.remove(id);
            return;
        }
    }
    visiting.remove(id);
    visited.insert(id.to_string());
    if !invalid.contains(id) {
        ordered.push(Arc::clone(def));
    }
}
