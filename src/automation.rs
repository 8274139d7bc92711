//! Player and filesystem seams used by the reconciliation loop.
//!
//! [`Automation`] is implemented against MPD in [`crate::mpd_client`];
//! tests substitute scripted fakes.

use crate::error::AutomationError;
use crate::schema::FormatSpec;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Read-only view of the media player.
pub trait Automation {
    /// True while a track is loaded and playing or paused.
    fn is_playing(&self) -> Result<bool, AutomationError>;

    fn is_paused(&self) -> Result<bool, AutomationError>;

    /// One value per entry in `format`, in order. The count is *not*
    /// validated here; a short result means a malformed read.
    fn read_metadata(&self, format: &FormatSpec) -> Result<Vec<String>, AutomationError>;

    /// Number of tracks in the player's library.
    fn track_count(&self) -> Result<i64, AutomationError>;
}

/// Filesystem access for cover lookup and staging.
pub trait HostFs {
    fn file_exists(&self, path: &Path) -> bool;
    fn copy_file(&self, source: &Path, destination: &Path) -> Result<()>;
}

/// `std::fs` backed [`HostFs`].
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFs;

impl HostFs for LocalFs {
    fn file_exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn copy_file(&self, source: &Path, destination: &Path) -> Result<()> {
        fs::copy(source, destination).with_context(|| {
            format!(
                "Unable to copy art '{}' to '{}'",
                source.display(),
                destination.display()
            )
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_local_fs_copy_overwrites() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let source = temp_dir.path().join("Folder.jpg");
        let destination = temp_dir.path().join("staged.jpg");
        fs::write(&source, b"new")?;
        fs::write(&destination, b"old")?;

        let local = LocalFs;
        assert!(local.file_exists(&source));
        assert!(!local.file_exists(temp_dir.path()));

        local.copy_file(&source, &destination)?;
        assert_eq!(fs::read(&destination)?, b"new");
        Ok(())
    }

    #[test]
    fn test_local_fs_copy_missing_source() {
        let err = LocalFs
            .copy_file(Path::new("/nonexistent/cover.png"), Path::new("/tmp/cover.png"))
            .unwrap_err();
        assert!(err.to_string().contains("Unable to copy art"));
    }
}
