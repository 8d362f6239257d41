//! Data directory layout

use std::path::{Path, PathBuf};

/// Root data directory (~/.datacrew), falling back to ./.datacrew without a home
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".datacrew"))
        .unwrap_or_else(|| PathBuf::from(".datacrew"))
}

/// Configuration file location
pub fn config_path() -> PathBuf {
    data_dir().join("config.json")
}

/// Transcript memory storage
pub fn memory_dir() -> PathBuf {
    data_dir().join("memory")
}

/// Default transcript snapshot
pub fn transcript_path() -> PathBuf {
    memory_dir().join("shared.json")
}

/// Create `path` and any missing parents
pub async fn ensure_dir(path: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(path).await
}
