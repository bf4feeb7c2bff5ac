//! Host-side configuration for mod execution contexts.

/// Configuration applied to every mod's Lua context.
#[derive(Debug, Clone)]
pub struct ModHostConfig {
    /// Maximum memory per context in bytes (default: 64 MB). Zero disables
    /// the limit.
    pub memory_limit: usize,
    /// Whether to load the full (safe) Lua standard library including `os`
    /// and `io` (default: false). When false, contexts get only the
    /// table/string/math/coroutine libraries.
    pub unsafe_libs: bool,
}

impl Default for ModHostConfig {
    fn default() -> Self {
        Self {
            memory_limit: 64 * 1024 * 1024,
            unsafe_libs: false,
        }
    }
}

impl ModHostConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Self {
        Self {
            memory_limit: std::env::var("MOD_MEMORY_LIMIT_MB")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(64)
                * 1024
                * 1024,
            unsafe_libs: std::env::var("MOD_UNSAFE_LIBS")
                .unwrap_or_default()
                .eq_ignore_ascii_case("true"),
        }
    }
}
