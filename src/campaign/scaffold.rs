//! Project directory setup.

use std::fs;
use std::path::{Path, PathBuf};

use crate::types::{Error, Result};

/// Parent for relative project directories.
pub const GENERATIONS_DIR: &str = "generations";

/// Name of the test spec inside the project directory.
pub const TEST_SPEC_FILENAME: &str = "test_spec.txt";

/// Place relative project paths under `generations/`.
///
/// Absolute paths and paths already under `generations/` are returned unchanged.
pub fn resolve_project_dir(path: &Path) -> PathBuf {
    if path.is_absolute() || path.starts_with(GENERATIONS_DIR) {
        path.to_path_buf()
    } else {
        Path::new(GENERATIONS_DIR).join(path)
    }
}

/// Create the project directory and, if given, copy the test spec into it.
///
/// An existing `test_spec.txt` is left alone.
pub fn prepare_project(project_dir: &Path, test_spec: Option<&Path>) -> Result<()> {
    fs::create_dir_all(project_dir)?;

    let Some(source) = test_spec else {
        return Ok(());
    };
    let dest = project_dir.join(TEST_SPEC_FILENAME);
    if dest.exists() {
        tracing::debug!(path = %dest.display(), "test spec already present");
        return Ok(());
    }
    if !source.is_file() {
        return Err(Error::file_not_found(source));
    }
    fs::copy(source, &dest)?;
    tracing::info!(from = %source.display(), to = %dest.display(), "test spec copied into project");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_project_dir() {
        assert_eq!(
            resolve_project_dir(Path::new("my_project")),
            PathBuf::from("generations/my_project")
        );
        assert_eq!(
            resolve_project_dir(Path::new("generations/my_project")),
            PathBuf::from("generations/my_project")
        );
        assert_eq!(resolve_project_dir(Path::new("/tmp/p")), PathBuf::from("/tmp/p"));
    }

    #[test]
    fn test_spec_copied_once() {
        let root = tempfile::tempdir().unwrap();
        let spec = root.path().join("spec.txt");
        fs::write(&spec, "v1").unwrap();
        let project = root.path().join("project");

        prepare_project(&project, Some(&spec)).unwrap();
        fs::write(&spec, "v2").unwrap();
        prepare_project(&project, Some(&spec)).unwrap();

        let copied = fs::read_to_string(project.join(TEST_SPEC_FILENAME)).unwrap();
        assert_eq!(copied, "v1");
    }

    #[test]
    fn test_missing_spec_is_error() {
        let root = tempfile::tempdir().unwrap();
        let err = prepare_project(&root.path().join("p"), Some(&root.path().join("nope.txt")));
        assert!(matches!(err, Err(Error::FileNotFound(_))));
    }
}
