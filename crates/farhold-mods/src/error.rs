//! Mod system error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModError {
    #[error("mod not found: {0}")]
    NotFound(String),

    #[error("duplicate mod id: {0}")]
    DuplicateId(String),

    #[error("mod '{0}' is not loaded")]
    NotLoaded(String),

    #[error("script error: {0}")]
    Script(String),

    #[error("module not found: {0}")]
    ModuleNotFound(String),

    #[error("circular import: {0}")]
    CircularImport(String),

    #[error("invalid import path: {0}")]
    InvalidImportPath(String),

    #[error("service not found: {0}")]
    ServiceNotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("registration error: {0}")]
    Registration(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<mlua::Error> for ModError {
    fn from(err: mlua::Error) -> Self {
        // Keep the innermost cause so errors raised by host bindings stay
        // readable after crossing the engine boundary and back.
        let mut message = err.to_string();
        let mut current: &dyn std::error::Error = &err;
        while let Some(source) = current.source() {
            message = source.to_string();
            current = source;
        }
        ModError::Script(message)
    }
}

impl From<ModError> for mlua::Error {
    fn from(err: ModError) -> Self {
        mlua::Error::external(err)
    }
}
