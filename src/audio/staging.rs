//! Temporary files for staging encoded audio
//!
//! Decoders read from a real file, so response bytes are written out first.
//! A `StagedFile` removes its file when dropped, whichever path dropped it.

use crate::error::VoiceError;
use std::path::{Path, PathBuf};

/// Directory where audio is staged
#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
}

impl Default for StagingArea {
    fn default() -> Self {
        Self::new(None)
    }
}

impl StagingArea {
    /// Stage under `dir`, or the system temp dir when `None`
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self {
            dir: dir.unwrap_or_else(std::env::temp_dir),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `bytes` to a uniquely named file with the given extension
    pub fn stage(&self, bytes: &[u8], extension: &str) -> Result<StagedFile, VoiceError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self
            .dir
            .join(format!("colloquy_{}.{}", uuid::Uuid::new_v4(), extension));
        std::fs::write(&path, bytes)?;
        tracing::debug!("Staged {} bytes at {}", bytes.len(), path.display());
        Ok(StagedFile { path })
    }
}

/// A staged file, deleted on drop
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!("Removed staged file {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                "Failed to remove staged file {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_stage_writes_and_drop_removes() {
        let temp = TempDir::new().unwrap();
        let area = StagingArea::new(Some(temp.path().to_path_buf()));

        let staged = area.stage(b"ID3abc", "mp3").unwrap();
        let path = staged.path().to_path_buf();
        assert!(path.exists());
        assert_eq!(path.extension().unwrap(), "mp3");
        assert_eq!(std::fs::read(&path).unwrap(), b"ID3abc");

        drop(staged);
        assert!(!path.exists());
    }

    #[test]
    fn test_staged_names_are_unique() {
        let temp = TempDir::new().unwrap();
        let area = StagingArea::new(Some(temp.path().to_path_buf()));
        let a = area.stage(b"a", "wav").unwrap();
        let b = area.stage(b"b", "wav").unwrap();
        assert_ne!(a.path(), b.path());
    }

    #[test]
    fn test_drop_tolerates_missing_file() {
        let temp = TempDir::new().unwrap();
        let area = StagingArea::new(Some(temp.path().to_path_buf()));
        let staged = area.stage(b"x", "ogg").unwrap();
        std::fs::remove_file(staged.path()).unwrap();
        drop(staged);
    }

    #[test]
    fn test_creates_missing_directory() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("audio").join("staging");
        let area = StagingArea::new(Some(nested.clone()));
        let staged = area.stage(b"x", "wav").unwrap();
        assert!(staged.path().starts_with(&nested));
    }
}
