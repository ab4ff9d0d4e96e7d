/// Project-local persisted state (`.weft/`)
///
/// Snapshots are written as pretty JSON through a temporary file in the same
/// directory and renamed into place, so a crash never leaves a torn document.
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Result, WeftError};

/// Name of the project-local state directory
pub const STATE_DIR_NAME: &str = ".weft";

pub const RESOURCES_FILE: &str = "resources.json";
pub const CACHE_FILE: &str = "cache.json";

/// `.weft/` under the project root
pub fn weft_dir(project_root: &Path) -> PathBuf {
    project_root.join(STATE_DIR_NAME)
}

/// `.weft/state/` under the project root
pub fn state_dir(project_root: &Path) -> PathBuf {
    weft_dir(project_root).join("state")
}

pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| WeftError::Request(format!("Invalid state path: {}", path.display())))?;
    fs::create_dir_all(dir)?;

    let json = serde_json::to_vec_pretty(value)?;
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(&json)?;
    temp.flush()?;
    temp.persist(path).map_err(|e| WeftError::Io(e.error))?;

    Ok(())
}

/// Read a JSON document; `Ok(None)` when the file doesn't exist
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(path)?;
    Ok(Some(serde_json::from_slice(&bytes)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_then_read() {
        let temp = TempDir::new().unwrap();
        let path = state_dir(temp.path()).join("numbers.json");

        write_json_atomic(&path, &vec![1, 2, 3]).unwrap();
        let read: Option<Vec<u32>> = read_json(&path).unwrap();
        assert_eq!(read, Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_missing_file_is_none() {
        let temp = TempDir::new().unwrap();
        let read: Option<Vec<u32>> = read_json(&temp.path().join("nope.json")).unwrap();
        assert!(read.is_none());
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bad.json");
        fs::write(&path, "{ not json").unwrap();
        let read: Result<Option<Vec<u32>>> = read_json(&path);
        assert!(matches!(read, Err(WeftError::Serialization(_))));
    }
}
