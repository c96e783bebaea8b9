//! Filesystem roots injected at construction so tests can point the whole
//! gateway at a temp directory instead of patching globals.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Paths {
    pub db_path: PathBuf,
    pub run_root: PathBuf,
}

impl Paths {
    pub fn new(db_path: impl Into<PathBuf>, run_root: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            run_root: run_root.into(),
        }
    }

    /// Default layout under a data directory: `<dir>/nyx_gateway.db` and
    /// `<dir>/runs/`. `NYX_GATEWAY_DB_PATH` overrides the database location.
    pub fn under(dir: &Path) -> Self {
        let db_path = match std::env::var("NYX_GATEWAY_DB_PATH") {
            Ok(path) if !path.trim().is_empty() => PathBuf::from(path.trim()),
            _ => dir.join("nyx_gateway.db"),
        };
        Self {
            db_path,
            run_root: dir.join("runs"),
        }
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        if let Some(parent) = self.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::create_dir_all(&self.run_root)
    }
}
