//! Lua ⇄ JSON value conversion.
//!
//! All data crossing a context boundary (cross-mod service calls, host
//! callbacks) is marshalled through `serde_json::Value` so no engine handle
//! ever leaks from one mod's context into another.

use mlua::{Lua, Table, Value};

use crate::error::ModError;

/// Maximum nesting depth when converting Lua values to JSON. Guards against
/// self-referential tables.
const MAX_CONVERT_DEPTH: usize = 32;

/// Convert a JSON value into a Lua value owned by the given context.
pub(crate) fn json_to_lua(lua: &Lua, value: &serde_json::Value) -> Result<Value, ModError> {
    let converted = match value {
        serde_json::Value::Null => Value::Nil,
        serde_json::Value::Bool(b) => Value::Boolean(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Integer(i)
            } else if let Some(f) = n.as_f64() {
                Value::Number(f)
            } else {
                Value::Nil
            }
        }
        serde_json::Value::String(s) => Value::String(lua.create_string(s)?),
        serde_json::Value::Array(arr) => {
            let table = lua.create_table()?;
            for (i, v) in arr.iter().enumerate() {
                table.set(i + 1, json_to_lua(lua, v)?)?;
            }
            Value::Table(table)
        }
        serde_json::Value::Object(map) => {
            let table = lua.create_table()?;
            for (k, v) in map {
                table.set(k.as_str(), json_to_lua(lua, v)?)?;
            }
            Value::Table(table)
        }
    };
    Ok(converted)
}

/// Convert a Lua value to JSON.
///
/// Functions, userdata, and threads have no JSON form and become null.
pub(crate) fn lua_to_json(value: &Value) -> Result<serde_json::Value, ModError> {
    lua_to_json_at(value, 0)
}

fn lua_to_json_at(value: &Value, depth: usize) -> Result<serde_json::Value, ModError> {
    if depth > MAX_CONVERT_DEPTH {
        return Err(ModError::InvalidArgument(
            "value nesting exceeds the conversion depth limit".into(),
        ));
    }
    let converted = match value {
        Value::Nil => serde_json::Value::Null,
        Value::Boolean(b) => serde_json::Value::Bool(*b),
        Value::Integer(i) => serde_json::json!(i),
        Value::Number(f) => serde_json::json!(f),
        Value::String(s) => serde_json::Value::String(s.to_str()?.to_string()),
        Value::Table(t) => table_to_json(t, depth)?,
        _ => serde_json::Value::Null,
    };
    Ok(converted)
}

fn table_to_json(table: &Table, depth: usize) -> Result<serde_json::Value, ModError> {
    let len = table.raw_len();
    let is_array = len > 0 && {
        let mut is_seq = true;
        for i in 1..=len {
            if table.raw_get::<Value>(i)?.is_nil() {
                is_seq = false;
                break;
            }
        }
        is_seq
    };

    if is_array {
        let mut arr = Vec::with_capacity(len);
        for i in 1..=len {
            arr.push(lua_to_json_at(&table.raw_get::<Value>(i)?, depth + 1)?);
        }
        Ok(serde_json::Value::Array(arr))
    } else {
        let mut map = serde_json::Map::new();
        for pair in table.clone().pairs::<Value, Value>() {
            let (k, v) = pair?;
            let key = match k {
                Value::String(s) => s.to_str()?.to_string(),
                Value::Integer(i) => i.to_string(),
                _ => continue,
            };
            map.insert(key, lua_to_json_at(&v, depth + 1)?);
        }
        Ok(serde_json::Value::Object(map))
    }
}
