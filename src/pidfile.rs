//! Pid file handling for `-P`: decimal pid plus newline, removed on
//! exit.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Guard that removes the pid file when dropped.
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn create(path: &Path) -> io::Result<PidFile> {
        fs::write(path, format!("{}\n", std::process::id()))?;
        Ok(PidFile {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
