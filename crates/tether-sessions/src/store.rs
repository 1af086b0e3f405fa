use std::path::Path;

use crate::error::{RegistryError, Result};
use crate::types::RegistryFile;

/// Read the mapping file. `Ok(None)` when it does not exist.
pub fn read(path: &Path) -> Result<Option<RegistryFile>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_str(&raw)?))
}

/// Rewrite the whole mapping file via temp file + rename, so a crash
/// mid-write leaves the previous version intact.
pub fn write_atomic(path: &Path, file: &RegistryFile) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(RegistryError::InvalidPath("path is empty".to_string()));
    }
    if path.is_dir() {
        return Err(RegistryError::InvalidPath(format!(
            "{} is a directory",
            path.display()
        )));
    }

    let parent = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;

    let temp_name = format!(
        ".{}.tmp-{}",
        path.file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("sessions.json"),
        std::process::id()
    );
    let temp_path = parent.join(temp_name);
    let body = serde_json::to_string_pretty(file)?;
    std::fs::write(&temp_path, body)?;
    std::fs::rename(&temp_path, path)?;
    Ok(())
}
