//! Per-mod runtime lifecycle.
//!
//! A `ModRuntime` owns one script execution context and drives it through
//! `load()`, `enable()`, `disable()`, and `reload()`. Lifecycle hooks
//! (`onEnable`, `onDisable`, `onReload`) defined by the mod are invoked
//! best-effort: a hook raising an error is logged and never aborts the
//! transition, because one mod's bug must not block the mods after it.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use mlua::{Function, Table, Value};

use crate::api;
use crate::config::ModHostConfig;
use crate::context::ScriptContext;
use crate::convert;
use crate::error::ModError;
use crate::host::HostServices;
use crate::imports::ModuleImports;
use crate::manifest::ModDefinition;
use crate::services::SharedServiceRegistry;
use crate::tracker::RegistrationTracker;

/// Registry key of the per-context table holding host-callback handlers.
///
/// Engine handles are never handed to the host; registrations store a slot
/// in this table instead and the host calls back by slot number.
pub(crate) const HANDLER_REGISTRY_KEY: &str = "farhold.handlers";

/// Everything that lives and dies with one execution context.
struct LoadedContext {
    context: ScriptContext,
    #[allow(dead_code)]
    imports: Arc<ModuleImports>,
    on_enable: Option<Function>,
    on_disable: Option<Function>,
    on_reload: Option<Function>,
}

struct Inner {
    ctx: Option<LoadedContext>,
}

/// Runtime for a single mod.
///
/// All context access goes through an internal mutex: any operation that
/// runs inside the context acquires it for the duration of the call and
/// releases it on every exit path. Lifecycle sequences on one runtime must
/// not be invoked concurrently (the manager's per-instance lock enforces
/// this for reloads).
pub struct ModRuntime {
    definition: Arc<ModDefinition>,
    config: ModHostConfig,
    host: Arc<dyn HostServices>,
    services: Arc<SharedServiceRegistry>,
    tracker: Arc<RegistrationTracker>,
    /// Handle to ourselves for the bindings injected into the context;
    /// they hold it weakly so the context never keeps its runtime alive.
    self_ref: Weak<ModRuntime>,
    inner: Mutex<Inner>,
}

impl ModRuntime {
    pub fn new(
        definition: Arc<ModDefinition>,
        config: ModHostConfig,
        host: Arc<dyn HostServices>,
        services: Arc<SharedServiceRegistry>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            definition,
            config,
            host,
            services,
            tracker: Arc::new(RegistrationTracker::new()),
            self_ref: self_ref.clone(),
            inner: Mutex::new(Inner { ctx: None }),
        })
    }

    pub(crate) fn weak_self(&self) -> Weak<ModRuntime> {
        self.self_ref.clone()
    }

    pub fn definition(&self) -> &Arc<ModDefinition> {
        &self.definition
    }

    pub(crate) fn host(&self) -> &Arc<dyn HostServices> {
        &self.host
    }

    pub(crate) fn services(&self) -> &Arc<SharedServiceRegistry> {
        &self.services
    }

    pub fn tracker(&self) -> &Arc<RegistrationTracker> {
        &self.tracker
    }

    pub fn is_loaded(&self) -> bool {
        self.lock_inner().ctx.is_some()
    }

    /// Create the execution context, inject globals, evaluate the
    /// entrypoint, and extract the lifecycle hooks. No-op when already
    /// loaded.
    pub fn load(&self) -> Result<(), ModError> {
        let mut inner = self.lock_inner();
        if inner.ctx.is_some() {
            return Ok(());
        }

        let mod_id = self.definition.id();
        let entrypoint = self.definition.entrypoint();
        let source = std::fs::read_to_string(entrypoint)?;

        let context = ScriptContext::new(&self.config, mod_id)?;
        let imports = Arc::new(ModuleImports::new(self.definition.root_dir().to_path_buf()));
        api::register_all(context.lua(), self, &imports)?;

        let chunk_name = entrypoint
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "entrypoint".to_string());

        if let Err(e) = context.eval_program(&chunk_name, &source) {
            // The entry program may have registered things before failing.
            self.tracker.clear_all(mod_id);
            tracing::error!(mod_id = %mod_id, "failed to evaluate entrypoint: {e}");
            return Err(e);
        }

        let on_enable = context.global_function("onEnable");
        let on_disable = context.global_function("onDisable");
        let on_reload = context.global_function("onReload");

        inner.ctx = Some(LoadedContext {
            context,
            imports,
            on_enable,
            on_disable,
            on_reload,
        });
        tracing::debug!(mod_id = %mod_id, "mod runtime loaded");
        Ok(())
    }

    /// Invoke `onEnable` if the mod defined one.
    ///
    /// Fails fast when `load()` has not run; hook errors themselves are
    /// logged and swallowed, so enabling still succeeds from the caller's
    /// perspective.
    pub fn enable(&self) -> Result<(), ModError> {
        let inner = self.lock_inner();
        let loaded = inner
            .ctx
            .as_ref()
            .ok_or_else(|| ModError::NotLoaded(self.definition.id().to_string()))?;
        if let Some(hook) = &loaded.on_enable {
            self.invoke_hook(hook, "onEnable");
        }
        Ok(())
    }

    /// Invoke `onDisable` best-effort, undo every tracked registration, and
    /// release the context. No-op when not loaded.
    pub fn disable(&self) {
        let mut inner = self.lock_inner();
        let Some(loaded) = inner.ctx.as_ref() else {
            return;
        };
        if let Some(hook) = &loaded.on_disable {
            self.invoke_hook(hook, "onDisable");
        }
        self.tracker.clear_all(self.definition.id());
        inner.ctx = None;
        tracing::debug!(mod_id = %self.definition.id(), "mod runtime unloaded");
    }

    /// Invoke `onReload` best-effort, then force a full teardown and a
    /// fresh `load()`.
    ///
    /// A throwing reload hook never leaves the runtime half-torn-down; the
    /// only way this ends unloaded is the re-evaluated entrypoint failing.
    pub fn reload(&self) -> Result<(), ModError> {
        {
            let mut inner = self.lock_inner();
            if let Some(loaded) = inner.ctx.as_ref() {
                if let Some(hook) = &loaded.on_reload {
                    self.invoke_hook(hook, "onReload");
                }
            }
            self.tracker.clear_all(self.definition.id());
            inner.ctx = None;
        }
        self.load()
    }

    /// Call a named method on a service table that lives in this runtime's
    /// context, on behalf of another mod.
    ///
    /// Arguments arrive and results leave as JSON; the call itself executes
    /// inside this runtime's context with its bindings intact.
    pub fn invoke_function(
        &self,
        target: &Table,
        method: &str,
        args: &[serde_json::Value],
    ) -> Result<serde_json::Value, ModError> {
        let inner = self.lock_inner();
        let loaded = inner
            .ctx
            .as_ref()
            .ok_or_else(|| ModError::NotLoaded(self.definition.id().to_string()))?;
        let lua = loaded.context.lua();

        let value: Value = target.get(method)?;
        let Value::Function(function) = value else {
            return Err(ModError::InvalidArgument(format!(
                "method '{method}' not found on service"
            )));
        };

        let mut lua_args = Vec::with_capacity(args.len());
        for arg in args {
            lua_args.push(convert::json_to_lua(lua, arg)?);
        }
        let call_args: mlua::MultiValue = lua_args.into_iter().collect();
        let result: Value = function.call(call_args)?;
        convert::lua_to_json(&result)
    }

    /// Invoke a handler previously stored in the context's handler table.
    ///
    /// This is the host-callback entry point: commands, event hooks, and
    /// scheduled tasks call back into the mod through a slot number.
    pub(crate) fn call_registered(
        &self,
        slot: i64,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, ModError> {
        let inner = self.lock_inner();
        let loaded = inner
            .ctx
            .as_ref()
            .ok_or_else(|| ModError::NotLoaded(self.definition.id().to_string()))?;
        let lua = loaded.context.lua();

        let handlers: Table = lua.named_registry_value(HANDLER_REGISTRY_KEY)?;
        let value: Value = handlers.raw_get(slot)?;
        let Value::Function(function) = value else {
            return Err(ModError::InvalidArgument(format!(
                "no registered handler in slot {slot}"
            )));
        };

        let arg = convert::json_to_lua(lua, &payload)?;
        let result: Value = function.call(arg)?;
        convert::lua_to_json(&result)
    }

    fn invoke_hook(&self, hook: &Function, hook_name: &str) {
        if let Err(e) = hook.call::<()>(()) {
            let e = ModError::from(e);
            tracing::error!(
                mod_id = %self.definition.id(),
                hook = hook_name,
                "lifecycle hook failed: {e}"
            );
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Test-only peek into the live context.
    #[cfg(test)]
    pub(crate) fn with_lua<R>(&self, f: impl FnOnce(&mlua::Lua) -> R) -> Option<R> {
        let inner = self.lock_inner();
        inner.ctx.as_ref().map(|loaded| f(loaded.context.lua()))
    }
}

impl std::fmt::Debug for ModRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModRuntime")
            .field("mod_id", &self.definition.id())
            .field("loaded", &self.is_loaded())
            .finish_non_exhaustive()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
