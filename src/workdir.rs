//! Scoped working storage.
//!
//! A `WorkDir` is removed when it drops, which covers normal return and `?`
//! error exits. Interrupt/termination signals bypass destructors, so every live
//! work directory and every in-flight temp file (store and artifact rewrites)
//! is also tracked in a registry that the signal handler empties before the
//! process exits.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, Once};
use tempfile::TempDir;

static LIVE_PATHS: Mutex<Vec<PathBuf>> = Mutex::new(Vec::new());
static HANDLER: Once = Once::new();

/// Exit status used after an interrupt, as a shell would report SIGINT.
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Keeps a path in the cleanup registry until dropped.
#[derive(Debug)]
pub struct CleanupGuard {
    path: PathBuf,
}

impl CleanupGuard {
    pub fn register(path: PathBuf) -> Self {
        if let Ok(mut live) = LIVE_PATHS.lock() {
            live.push(path.clone());
        }
        Self { path }
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if let Ok(mut live) = LIVE_PATHS.lock() {
            live.retain(|p| p != &self.path);
        }
    }
}

#[derive(Debug)]
pub struct WorkDir {
    _guard: CleanupGuard,
    dir: TempDir,
}

impl WorkDir {
    pub fn new() -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("function-classifier-")
            .tempdir()
            .context("Failed to create temporary work directory")?;
        tracing::debug!(path = %dir.path().display(), "created work directory");
        Ok(Self {
            _guard: CleanupGuard::register(dir.path().to_path_buf()),
            dir,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Removes every registered path. Returns how many were removed.
pub fn cleanup_live_paths() -> usize {
    let Ok(mut live) = LIVE_PATHS.lock() else {
        return 0;
    };
    live.drain(..).filter(|p| remove_path(p)).count()
}

fn remove_path(path: &Path) -> bool {
    if path.is_dir() {
        std::fs::remove_dir_all(path).is_ok()
    } else {
        std::fs::remove_file(path).is_ok()
    }
}

fn is_live(path: &Path) -> bool {
    LIVE_PATHS
        .lock()
        .map(|live| live.iter().any(|p| p == path))
        .unwrap_or(false)
}

/// Installs the SIGINT/SIGTERM/SIGHUP handler once per process.
pub fn install_signal_cleanup() -> Result<()> {
    let mut result = Ok(());
    HANDLER.call_once(|| {
        result = ctrlc::set_handler(|| {
            cleanup_live_paths();
            eprintln!("[function-classifier] interrupted, temporary files removed");
            std::process::exit(INTERRUPTED_EXIT_CODE);
        })
        .context("Failed to install signal handler");
    });
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_dir_is_removed_on_drop() -> Result<()> {
        let path = {
            let work = WorkDir::new()?;
            std::fs::write(work.path().join("scratch.txt"), "x")?;
            assert!(is_live(work.path()));
            work.path().to_path_buf()
        };
        assert!(!path.exists());
        assert!(!is_live(&path));
        Ok(())
    }

    #[test]
    fn temp_file_stays_registered_while_guarded() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let temp = tempfile::NamedTempFile::new_in(dir.path())?;
        let path = temp.path().to_path_buf();

        let guard = CleanupGuard::register(path.clone());
        assert!(is_live(&path));
        drop(guard);
        assert!(!is_live(&path));
        Ok(())
    }

    #[test]
    fn remove_path_handles_files_and_directories() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("store.tmp");
        let nested = dir.path().join("work");
        std::fs::write(&file, "partial")?;
        std::fs::create_dir_all(nested.join("inner"))?;

        assert!(remove_path(&file));
        assert!(remove_path(&nested));
        assert!(!file.exists());
        assert!(!nested.exists());
        assert!(!remove_path(&file));
        Ok(())
    }
}
