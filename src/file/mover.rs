use std::fs;
use std::io;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use thiserror::Error;

use super::naming::sanitize_filename;

#[derive(Error, Debug)]
pub enum MoveError {
    #[error("Failed to create directory {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to remove existing file {path:?}: {source}")]
    RemoveExisting {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Destination already exists: {0:?}")]
    DestinationExists(PathBuf),

    #[error("Failed to move {from:?} to {to:?}: {source}")]
    Move {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Places a downloaded temp file at its final location
pub trait FileMover: Send + Sync {
    /// Move `temp` into `destination` and return the final path.
    ///
    /// `destination` is either a directory (the file keeps `suggested_name`) or the
    /// full target path.
    fn move_into_place(
        &self,
        temp: &Path,
        destination: &Path,
        suggested_name: &str,
        overwrite: bool,
    ) -> Result<PathBuf, MoveError>;
}

/// [`FileMover`] backed by the local filesystem
#[derive(Debug, Default, Clone, Copy)]
pub struct FsMover;

impl FsMover {
    pub fn new() -> Self {
        Self
    }

    /// Resolve the final file path for `destination`, creating directories as needed
    fn resolve_target(destination: &Path, suggested_name: &str) -> Result<PathBuf, MoveError> {
        if is_directory_target(destination) {
            fs::create_dir_all(destination).map_err(|source| MoveError::CreateDir {
                path: destination.to_path_buf(),
                source,
            })?;
            return Ok(destination.join(sanitize_filename(suggested_name)));
        }

        if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| MoveError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        Ok(destination.to_path_buf())
    }
}

fn is_directory_target(destination: &Path) -> bool {
    destination.is_dir()
        || destination
            .as_os_str()
            .to_string_lossy()
            .ends_with(['/', MAIN_SEPARATOR])
}

impl FileMover for FsMover {
    fn move_into_place(
        &self,
        temp: &Path,
        destination: &Path,
        suggested_name: &str,
        overwrite: bool,
    ) -> Result<PathBuf, MoveError> {
        let target = Self::resolve_target(destination, suggested_name)?;

        if target.exists() {
            if !overwrite {
                return Err(MoveError::DestinationExists(target));
            }
            fs::remove_file(&target).map_err(|source| MoveError::RemoveExisting {
                path: target.clone(),
                source,
            })?;
        }

        let move_err = |source| MoveError::Move {
            from: temp.to_path_buf(),
            to: target.clone(),
            source,
        };

        if let Err(e) = fs::rename(temp, &target) {
            // Cross-device moves fail to rename; copy then remove instead
            tracing::debug!("Rename failed ({}), falling back to copy: {:?} -> {:?}", e, temp, target);
            fs::copy(temp, &target).map_err(move_err)?;
            if let Err(e) = fs::remove_file(temp) {
                tracing::warn!("Failed to remove temp file {:?}: {}", temp, e);
            }
        }

        tracing::trace!("Moved {:?} -> {:?}", temp, target);
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_file(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("incoming.part");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_move_into_existing_directory() {
        let dir = TempDir::new().unwrap();
        let temp = temp_file(&dir, "payload");
        let dest = dir.path().join("docs");
        fs::create_dir(&dest).unwrap();

        let final_path = FsMover.move_into_place(&temp, &dest, "file.bin", true).unwrap();
        assert_eq!(final_path, dest.join("file.bin"));
        assert_eq!(fs::read_to_string(&final_path).unwrap(), "payload");
        assert!(!temp.exists());
    }

    #[test]
    fn test_trailing_separator_creates_directory() {
        let dir = TempDir::new().unwrap();
        let temp = temp_file(&dir, "payload");
        let dest = PathBuf::from(format!("{}/new/dir/", dir.path().display()));

        let final_path = FsMover.move_into_place(&temp, &dest, "file.bin", true).unwrap();
        assert_eq!(final_path, dir.path().join("new").join("dir").join("file.bin"));
        assert!(final_path.exists());
    }

    #[test]
    fn test_file_destination_used_verbatim() {
        let dir = TempDir::new().unwrap();
        let temp = temp_file(&dir, "payload");
        let dest = dir.path().join("out").join("renamed.dat");

        let final_path = FsMover.move_into_place(&temp, &dest, "ignored.bin", true).unwrap();
        assert_eq!(final_path, dest);
    }

    #[test]
    fn test_overwrite_replaces_existing_file() {
        let dir = TempDir::new().unwrap();
        let temp = temp_file(&dir, "new");
        let dest = dir.path().join("file.bin");
        fs::write(&dest, "old").unwrap();

        FsMover.move_into_place(&temp, &dest, "file.bin", true).unwrap();
        assert_eq!(fs::read_to_string(&dest).unwrap(), "new");
    }

    #[test]
    fn test_existing_file_without_overwrite_fails() {
        let dir = TempDir::new().unwrap();
        let temp = temp_file(&dir, "new");
        let dest = dir.path().join("file.bin");
        fs::write(&dest, "old").unwrap();

        let err = FsMover.move_into_place(&temp, &dest, "file.bin", false).unwrap_err();
        assert!(matches!(err, MoveError::DestinationExists(_)));
        assert_eq!(fs::read_to_string(&dest).unwrap(), "old");
    }

    #[test]
    fn test_missing_temp_file_is_move_error() {
        let dir = TempDir::new().unwrap();
        let err = FsMover
            .move_into_place(&dir.path().join("gone.part"), dir.path(), "file.bin", true)
            .unwrap_err();
        assert!(matches!(err, MoveError::Move { .. }));
    }

    #[test]
    fn test_suggested_name_is_sanitized() {
        let dir = TempDir::new().unwrap();
        let temp = temp_file(&dir, "payload");
        let final_path = FsMover
            .move_into_place(&temp, dir.path(), "a:b?.txt", true)
            .unwrap();
        assert_eq!(final_path, dir.path().join("a_b_.txt"));
    }
}
