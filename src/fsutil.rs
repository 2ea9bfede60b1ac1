//! File helpers shared by the persisted stores.
//!
//! Every orchestrator-owned file is replaced atomically: serialize to a sibling
//! temp file, then rename over the target. Readers therefore see either the old
//! or the new document, never a torn write.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::types::{Error, Result};

/// Write `bytes` to `path` via temp file + rename.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("state");
    let tmp = path.with_file_name(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4().simple()));

    let written = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();

    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(Error::Io(e));
    }
    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    atomic_write(path, &bytes)
}

/// Read and parse a JSON document.
///
/// Missing files map to `FileNotFound`, malformed JSON to `Parse`.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::file_not_found(path),
        _ => Error::Io(e),
    })?;
    serde_json::from_slice(&raw).map_err(|e| Error::parse(path, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_atomic_write_replaces_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        atomic_write_json(&path, &json!({"v": 1})).unwrap();
        atomic_write_json(&path, &json!({"v": 2})).unwrap();

        let value: serde_json::Value = read_json(&path).unwrap();
        assert_eq!(value["v"], 2);

        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_read_json_error_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(matches!(
            read_json::<serde_json::Value>(&missing),
            Err(Error::FileNotFound(_))
        ));

        let broken = dir.path().join("broken.json");
        fs::write(&broken, "{not json").unwrap();
        assert!(matches!(
            read_json::<serde_json::Value>(&broken),
            Err(Error::Parse { .. })
        ));
    }
}
