//! Script-facing API bindings.
//!
//! Registers the fixed globals every mod context receives: the read-only
//! `manifest`, the mod-scoped `log` bridge, the `services` surface,
//! `require`, and the host capability APIs (`commands`, `events`, `tasks`,
//! `assets`). Capability APIs check the manifest's permission strings
//! before touching the host; denials surface as errors the script can
//! observe.

use std::sync::{Arc, Weak};

use mlua::{Function, Lua, Table, Value, Variadic};

use crate::context;
use crate::convert;
use crate::error::ModError;
use crate::host::{permissions, CommandSpec, ScriptCallback};
use crate::imports::ModuleImports;
use crate::manifest::ModDefinition;
use crate::runtime::{ModRuntime, HANDLER_REGISTRY_KEY};

/// Maximum log message length accepted from mod code.
const MAX_LOG_MESSAGE_LEN: usize = 2048;

/// Install all fixed globals into a freshly created context.
pub(crate) fn register_all(
    lua: &Lua,
    runtime: &ModRuntime,
    imports: &Arc<ModuleImports>,
) -> Result<(), ModError> {
    lua.set_named_registry_value(HANDLER_REGISTRY_KEY, lua.create_table()?)?;

    inject_manifest(lua, runtime.definition())?;
    register_log(lua, runtime.definition().id())?;
    register_require(lua, imports)?;
    register_services(lua, runtime)?;
    register_commands(lua, runtime)?;
    register_events(lua, runtime)?;
    register_tasks(lua, runtime)?;
    register_assets(lua, runtime)?;
    Ok(())
}

// ─── Manifest ───────────────────────────────────────────────────────

fn inject_manifest(lua: &Lua, definition: &Arc<ModDefinition>) -> Result<(), ModError> {
    let raw = serde_json::to_value(definition.manifest())?;
    let Value::Table(table) = convert::json_to_lua(lua, &raw)? else {
        return Err(ModError::InvalidArgument(
            "manifest did not convert to a table".into(),
        ));
    };
    let view = context::readonly_view(lua, table)?;
    lua.globals().set("manifest", view)?;
    Ok(())
}

// ─── Logging bridge ─────────────────────────────────────────────────

/// Strip control characters and truncate over-long messages before they
/// reach the host log.
fn sanitize_log_message(message: &str) -> String {
    let cleaned: String = message
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .take(MAX_LOG_MESSAGE_LEN)
        .collect();
    if message.len() > MAX_LOG_MESSAGE_LEN {
        format!("{cleaned}… (truncated)")
    } else {
        cleaned
    }
}

fn register_log(lua: &Lua, mod_id: &str) -> Result<(), ModError> {
    let log = lua.create_table()?;

    let id = mod_id.to_string();
    log.set(
        "info",
        lua.create_function(move |_, message: String| {
            tracing::info!(mod_id = %id, "{}", sanitize_log_message(&message));
            Ok(())
        })?,
    )?;

    let id = mod_id.to_string();
    log.set(
        "warn",
        lua.create_function(move |_, message: String| {
            tracing::warn!(mod_id = %id, "{}", sanitize_log_message(&message));
            Ok(())
        })?,
    )?;

    let id = mod_id.to_string();
    log.set(
        "error",
        lua.create_function(move |_, message: String| {
            tracing::error!(mod_id = %id, "{}", sanitize_log_message(&message));
            Ok(())
        })?,
    )?;

    lua.globals().set("log", log)?;
    Ok(())
}

// ─── Imports ────────────────────────────────────────────────────────

fn register_require(lua: &Lua, imports: &Arc<ModuleImports>) -> Result<(), ModError> {
    let imports = Arc::clone(imports);
    let require = lua.create_function(move |lua, path: String| {
        imports.require(lua, &path).map_err(mlua::Error::from)
    })?;
    lua.globals().set("require", require)?;
    Ok(())
}

// ─── Shared services ────────────────────────────────────────────────

fn register_services(lua: &Lua, runtime: &ModRuntime) -> Result<(), ModError> {
    let services = lua.create_table()?;
    let registry = Arc::clone(runtime.services());
    let weak = runtime.weak_self();
    let mod_id = runtime.definition().id().to_string();

    {
        let registry = Arc::clone(&registry);
        let weak = weak.clone();
        let mod_id = mod_id.clone();
        services.set(
            "expose",
            lua.create_function(move |_, (name, api): (String, Value)| {
                let Value::Table(table) = api else {
                    tracing::warn!(
                        mod_id = %mod_id,
                        service = %name,
                        "expose requires a table of functions"
                    );
                    return Ok(false);
                };
                let Some(runtime) = weak.upgrade() else {
                    return Ok(false);
                };
                let accepted = registry.expose(&name, &mod_id, runtime, table);
                if !accepted {
                    tracing::warn!(
                        mod_id = %mod_id,
                        service = %name,
                        "service name rejected (blank or already claimed by another mod)"
                    );
                }
                Ok(accepted)
            })?,
        )?;
    }

    {
        let registry = Arc::clone(&registry);
        services.set(
            "call",
            lua.create_function(
                move |lua, (name, method, args): (String, String, Variadic<Value>)| {
                    let entry = registry
                        .get(&name)
                        .ok_or_else(|| mlua::Error::from(ModError::ServiceNotFound(name.clone())))?;

                    let mut json_args = Vec::with_capacity(args.len());
                    for value in args.iter() {
                        json_args.push(convert::lua_to_json(value).map_err(mlua::Error::from)?);
                    }
                    // Always execute inside the provider's context, never ours.
                    let result = entry
                        .runtime
                        .invoke_function(&entry.api, &method, &json_args)
                        .map_err(mlua::Error::from)?;
                    convert::json_to_lua(lua, &result).map_err(mlua::Error::from)
                },
            )?,
        )?;
    }

    lua.globals().set("services", services)?;
    Ok(())
}

// ─── Host callbacks ─────────────────────────────────────────────────

/// Park a handler function in the context's handler table and return its
/// slot. The engine handle stays inside the context; only the slot number
/// leaves it.
fn store_handler(lua: &Lua, handler: Function) -> mlua::Result<i64> {
    let handlers: Table = lua.named_registry_value(HANDLER_REGISTRY_KEY)?;
    let slot = handlers.raw_len() as i64 + 1;
    handlers.raw_set(slot, handler)?;
    Ok(slot)
}

/// Build the host-side callable for a parked handler.
fn script_callback(weak: Weak<ModRuntime>, slot: i64) -> ScriptCallback {
    Arc::new(move |payload| match weak.upgrade() {
        Some(runtime) => runtime.call_registered(slot, payload),
        None => Err(ModError::Registration(
            "mod runtime no longer exists".into(),
        )),
    })
}

fn require_permission(definition: &ModDefinition, permission: &str) -> Result<(), ModError> {
    if definition.manifest().permissions.contains(permission) {
        Ok(())
    } else {
        Err(ModError::PermissionDenied(format!(
            "mod '{}' does not declare the '{permission}' permission",
            definition.id()
        )))
    }
}

// ─── Commands ───────────────────────────────────────────────────────

/// Check a command name against `[a-z0-9_-]+`, optionally namespaced as
/// `modid:command`.
fn is_valid_command_name(name: &str) -> bool {
    let mut parts = name.splitn(2, ':');
    let valid_part = |part: &str| {
        !part.is_empty()
            && part
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    };
    let first = parts.next().is_some_and(valid_part);
    match parts.next() {
        Some(rest) => first && valid_part(rest),
        None => first,
    }
}

fn normalize_command(mod_id: &str, name: &str, description: Option<String>) -> Result<CommandSpec, ModError> {
    let candidate = name.trim().to_ascii_lowercase();
    if candidate.is_empty() {
        return Err(ModError::InvalidArgument("command name is required".into()));
    }
    if !is_valid_command_name(&candidate) {
        return Err(ModError::InvalidArgument(format!(
            "invalid command name '{name}': use [a-z0-9_-], optionally namespaced as modid:command"
        )));
    }
    // Un-namespaced commands get a namespaced alias so two mods can ship a
    // command with the same short name.
    let alias = if candidate.contains(':') {
        None
    } else {
        Some(format!("{mod_id}:{candidate}"))
    };
    Ok(CommandSpec {
        name: candidate,
        alias,
        description,
    })
}

fn register_commands(lua: &Lua, runtime: &ModRuntime) -> Result<(), ModError> {
    let commands = lua.create_table()?;
    let definition = Arc::clone(runtime.definition());
    let host = Arc::clone(runtime.host());
    let tracker = Arc::clone(runtime.tracker());
    let weak = runtime.weak_self();

    commands.set(
        "register",
        lua.create_function(
            move |lua, (name, handler, options): (String, Function, Option<Table>)| {
                require_permission(&definition, permissions::COMMANDS)?;

                let description = options
                    .as_ref()
                    .and_then(|o| o.get::<Option<String>>("description").ok().flatten());
                let spec = normalize_command(definition.id(), &name, description)?;

                let slot = store_handler(lua, handler)?;
                let callback = script_callback(weak.clone(), slot);
                let registration = host
                    .register_command(definition.id(), spec, callback)
                    .map_err(mlua::Error::from)?;
                tracker.track(registration);
                Ok(format!("{}-cmd-{slot}", definition.id()))
            },
        )?,
    )?;

    lua.globals().set("commands", commands)?;
    Ok(())
}

// ─── Events ─────────────────────────────────────────────────────────

fn register_events(lua: &Lua, runtime: &ModRuntime) -> Result<(), ModError> {
    let events = lua.create_table()?;
    let definition = Arc::clone(runtime.definition());
    let host = Arc::clone(runtime.host());
    let tracker = Arc::clone(runtime.tracker());
    let weak = runtime.weak_self();

    events.set(
        "on",
        lua.create_function(move |lua, (event, handler): (String, Function)| {
            require_permission(&definition, permissions::EVENTS)?;
            if event.trim().is_empty() {
                return Err(mlua::Error::from(ModError::InvalidArgument(
                    "events.on requires an event name".into(),
                )));
            }

            let slot = store_handler(lua, handler)?;
            let callback = script_callback(weak.clone(), slot);
            let registration = host
                .register_event_hook(definition.id(), &event, callback)
                .map_err(mlua::Error::from)?;
            tracker.track(registration);
            Ok(format!("{}-evt-{slot}", definition.id()))
        })?,
    )?;

    lua.globals().set("events", events)?;
    Ok(())
}

// ─── Tasks ──────────────────────────────────────────────────────────

fn register_tasks(lua: &Lua, runtime: &ModRuntime) -> Result<(), ModError> {
    let tasks = lua.create_table()?;

    {
        let definition = Arc::clone(runtime.definition());
        let host = Arc::clone(runtime.host());
        let tracker = Arc::clone(runtime.tracker());
        let weak = runtime.weak_self();
        tasks.set(
            "run_later",
            lua.create_function(move |lua, (delay_ms, handler): (i64, Function)| {
                require_permission(&definition, permissions::TASKS)?;
                if delay_ms < 0 {
                    return Err(mlua::Error::from(ModError::InvalidArgument(
                        "delay_ms must be zero or positive".into(),
                    )));
                }

                let slot = store_handler(lua, handler)?;
                let callback = script_callback(weak.clone(), slot);
                let registration = host
                    .run_later(definition.id(), delay_ms as u64, callback)
                    .map_err(mlua::Error::from)?;
                tracker.track(registration);
                Ok(format!("{}-task-{slot}", definition.id()))
            })?,
        )?;
    }

    {
        let definition = Arc::clone(runtime.definition());
        let host = Arc::clone(runtime.host());
        let tracker = Arc::clone(runtime.tracker());
        let weak = runtime.weak_self();
        tasks.set(
            "run_repeating",
            lua.create_function(
                move |lua, (initial_delay_ms, period_ms, handler): (i64, i64, Function)| {
                    require_permission(&definition, permissions::TASKS)?;
                    if initial_delay_ms < 0 || period_ms <= 0 {
                        return Err(mlua::Error::from(ModError::InvalidArgument(
                            "initial_delay_ms must be >= 0 and period_ms must be > 0".into(),
                        )));
                    }

                    let slot = store_handler(lua, handler)?;
                    let callback = script_callback(weak.clone(), slot);
                    let registration = host
                        .run_repeating(
                            definition.id(),
                            initial_delay_ms as u64,
                            period_ms as u64,
                            callback,
                        )
                        .map_err(mlua::Error::from)?;
                    tracker.track(registration);
                    Ok(format!("{}-task-{slot}", definition.id()))
                },
            )?,
        )?;
    }

    lua.globals().set("tasks", tasks)?;
    Ok(())
}

// ─── Assets ─────────────────────────────────────────────────────────

fn register_assets(lua: &Lua, runtime: &ModRuntime) -> Result<(), ModError> {
    let assets = lua.create_table()?;
    let definition = Arc::clone(runtime.definition());
    let host = Arc::clone(runtime.host());

    assets.set(
        "path",
        lua.create_function(move |lua, (pack, rel): (String, String)| {
            // Lookups are limited to the packs the manifest declares.
            if !definition
                .manifest()
                .required_asset_packs
                .iter()
                .any(|p| p == &pack)
            {
                return Err(mlua::Error::from(ModError::InvalidArgument(format!(
                    "asset pack '{pack}' is not declared in requiredAssetPacks"
                ))));
            }
            match host.resolve_asset(&pack, &rel) {
                Some(path) => Ok(Value::String(
                    lua.create_string(path.to_string_lossy().as_ref())?,
                )),
                None => Ok(Value::Nil),
            }
        })?,
    )?;

    lua.globals().set("assets", assets)?;
    Ok(())
}

// ─── Tests ──────────────────────────────────────────────────────────
