//! Cross-Platform Path Utilities
//!
//! Functions for resolving the engine's data directory (~/.plan-consensus/).

use std::path::{Path, PathBuf};

use crate::utils::error::{EngineError, EngineResult};

/// Get the user's home directory
pub fn home_dir() -> EngineResult<PathBuf> {
    dirs::home_dir().ok_or_else(|| EngineError::config("Could not determine home directory"))
}

/// Get the Plan Consensus directory (~/.plan-consensus/)
pub fn data_dir() -> EngineResult<PathBuf> {
    Ok(home_dir()?.join(".plan-consensus"))
}

/// Get the config file path (~/.plan-consensus/config.json)
pub fn config_path() -> EngineResult<PathBuf> {
    Ok(data_dir()?.join("config.json"))
}

/// Get the database file path (~/.plan-consensus/engine.db)
pub fn database_path() -> EngineResult<PathBuf> {
    Ok(data_dir()?.join("engine.db"))
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(path: &Path) -> EngineResult<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Get the data directory, creating if it doesn't exist
pub fn ensure_data_dir() -> EngineResult<PathBuf> {
    let path = data_dir()?;
    ensure_dir(&path)?;
    Ok(path)
}
