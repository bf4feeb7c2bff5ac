//! Script execution contexts.
//!
//! Each mod runtime owns exactly one `ScriptContext`: an isolated Lua
//! virtual machine. The rest of the crate only needs five operations from
//! the engine: create a context, evaluate program text in it, read a named
//! top-level binding, call a callable inside it, and release it (drop).

use mlua::{Function, Lua, LuaOptions, StdLib, Table, Value};

use crate::config::ModHostConfig;
use crate::error::ModError;

/// An isolated execution context belonging to one mod runtime.
///
/// Dropping the context releases the virtual machine; a released context is
/// never reused.
pub(crate) struct ScriptContext {
    lua: Lua,
}

impl std::fmt::Debug for ScriptContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptContext").finish_non_exhaustive()
    }
}

impl ScriptContext {
    /// Create a fresh context with the configured sandbox profile.
    ///
    /// By default only the table/string/math/coroutine standard libraries
    /// are loaded, so mod code cannot reach the filesystem or process
    /// environment.
    pub fn new(config: &ModHostConfig, mod_id: &str) -> Result<Self, ModError> {
        let libs = if config.unsafe_libs {
            tracing::warn!(
                mod_id = %mod_id,
                "unsafe Lua libraries enabled — mod code can access os/io. \
                 Avoid running untrusted mods with this setting."
            );
            StdLib::ALL_SAFE
        } else {
            StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::COROUTINE
        };

        let lua = Lua::new_with(libs, LuaOptions::default())?;
        if config.memory_limit > 0 {
            lua.set_memory_limit(config.memory_limit)?;
        }
        Ok(Self { lua })
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    /// Evaluate program text at the context's top level.
    pub fn eval_program(&self, chunk_name: &str, source: &str) -> Result<(), ModError> {
        self.lua
            .load(source)
            .set_name(chunk_name)
            .exec()
            .map_err(ModError::from)
    }

    /// Read a named top-level binding, keeping it only if it is callable.
    ///
    /// Absent and non-callable bindings are treated uniformly as `None`.
    pub fn global_function(&self, name: &str) -> Option<Function> {
        match self.lua.globals().get::<Value>(name) {
            Ok(Value::Function(function)) => Some(function),
            _ => None,
        }
    }
}

/// Evaluate a module chunk in a fresh scope nested under the context's
/// globals.
///
/// The scope carries a fresh `exports` table; whatever the chunk leaves in
/// `exports` is the module's value. Global reads fall through to the mod's
/// top-level scope, global writes stay in the module scope.
pub(crate) fn eval_module(lua: &Lua, chunk_name: &str, source: &str) -> Result<Value, ModError> {
    let scope = lua.create_table()?;
    let meta = lua.create_table()?;
    meta.set("__index", lua.globals())?;
    scope.set_metatable(Some(meta));

    let exports = lua.create_table()?;
    scope.set("exports", exports)?;

    lua.load(source)
        .set_name(chunk_name)
        .set_environment(scope.clone())
        .exec()?;

    let exported: Value = scope.get("exports")?;
    Ok(exported)
}

/// Wrap a table in a read-only view.
///
/// Reads pass through; any write raises a Lua error in the writing script.
pub(crate) fn readonly_view(lua: &Lua, table: Table) -> Result<Table, ModError> {
    let view = lua.create_table()?;
    let meta = lua.create_table()?;
    meta.set("__index", table)?;
    meta.set(
        "__newindex",
        lua.create_function(|_, ()| -> mlua::Result<()> {
            Err(mlua::Error::RuntimeError(
                "attempt to modify a read-only table".into(),
            ))
        })?,
    )?;
    meta.set("__metatable", false)?;
    view.set_metatable(Some(meta));
    Ok(view)
}
