use crate::domain::ports::PreferenceStore;
use crate::utils::error::Result;
use std::fs;
use std::path::{Path, PathBuf};

/// Keeps each marker as an empty file under `base_path`.
#[derive(Debug, Clone)]
pub struct LocalStore {
    base_path: PathBuf,
}

impl LocalStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn marker_path(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.base_path.join(format!("{}.marker", file_name))
    }
}

impl PreferenceStore for LocalStore {
    async fn read_marker(&self, key: &str) -> Result<bool> {
        Ok(self.marker_path(key).is_file())
    }

    async fn write_marker(&self, key: &str) -> Result<()> {
        let path = self.marker_path(key);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(&path, b"")?;
        tracing::debug!("Wrote marker {}", path.display());
        Ok(())
    }
}
