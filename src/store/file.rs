// JSON file backend

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::{CredentialRecord, StoreBackend};
use crate::error::StoreError;

/// Stores the collection as a pretty-printed JSON array in one file.
///
/// Writes land in a sibling `.tmp` file that is renamed over the target, so a
/// reader sees either the previous collection or the new one.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }
}

impl StoreBackend for JsonFileBackend {
    fn initialize(&self) -> Result<(), StoreError> {
        if self.path.exists() {
            return Ok(());
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }

        tracing::info!("Creating credential store: {}", self.path.display());
        self.write_all(&[])
    }

    fn read_all(&self) -> Result<Vec<CredentialRecord>, StoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };

        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        Ok(serde_json::from_str(&content)?)
    }

    fn write_all(&self, records: &[CredentialRecord]) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(records)?;
        let tmp = self.temp_path();

        write_private(&tmp, json.as_bytes()).map_err(|e| StoreError::io(&tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| StoreError::io(&self.path, e))?;

        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Write a file readable only by its owner where the platform supports it
fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}
