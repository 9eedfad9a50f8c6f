//! Filesystem backed firmware store.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};

use super::{FirmwareBlob, FirmwareStore, StoreError, validate_name};
use crate::protocol::constants::DEFAULT_FIRMWARE_DIR;

/// Looks firmware up in an ordered list of directories; first hit wins.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    search_path: Vec<PathBuf>,
    max_image_size: Option<u64>,
}

impl DirectoryStore {
    pub fn new<I, P>(dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            search_path: dirs.into_iter().map(Into::into).collect(),
            max_image_size: None,
        }
    }

    /// Refuse images larger than `max` bytes.
    pub fn with_max_image_size(mut self, max: Option<u64>) -> Self {
        self.max_image_size = max;
        self
    }

    pub fn search_path(&self) -> &[PathBuf] {
        &self.search_path
    }

    /// Path the image would be loaded from, without reading it.
    pub fn locate(&self, name: &str) -> Result<PathBuf, StoreError> {
        validate_name(name)?;
        self.search_path
            .iter()
            .map(|dir| dir.join(name))
            .find(|path| path.is_file())
            .ok_or_else(|| StoreError::NotFound {
                name: name.to_string(),
                searched: self.search_path.clone(),
            })
    }

    fn read_candidate(&self, name: &str, path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
        let io_err = |source| StoreError::Io {
            name: name.to_string(),
            source,
        };

        let metadata = match fs::metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(e)),
        };
        if !metadata.is_file() {
            return Ok(None);
        }
        if let Some(max) = self.max_image_size
            && metadata.len() > max
        {
            return Err(StoreError::TooLarge {
                name: name.to_string(),
                size: metadata.len(),
                max,
            });
        }

        fs::read(path).map(Some).map_err(io_err)
    }
}

impl Default for DirectoryStore {
    fn default() -> Self {
        Self::new([DEFAULT_FIRMWARE_DIR])
    }
}

impl FirmwareStore for DirectoryStore {
    #[instrument(skip(self))]
    fn load(&self, name: &str) -> Result<FirmwareBlob, StoreError> {
        validate_name(name)?;

        for dir in &self.search_path {
            let path = dir.join(name);
            if let Some(data) = self.read_candidate(name, &path)? {
                info!(path = %path.display(), size = data.len(), "Loaded firmware");
                return Ok(FirmwareBlob::new(name, data));
            }
            debug!(path = %path.display(), "Not here");
        }

        Err(StoreError::NotFound {
            name: name.to_string(),
            searched: self.search_path.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_first_directory_wins() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        fs::write(a.path().join("fw.tftf"), [1, 2, 3]).unwrap();
        fs::write(b.path().join("fw.tftf"), [9]).unwrap();
        fs::write(b.path().join("only-b.tftf"), [7, 7]).unwrap();

        let store = DirectoryStore::new([a.path(), b.path()]);
        assert_eq!(store.load("fw.tftf").unwrap().data(), &[1, 2, 3]);
        assert_eq!(store.load("only-b.tftf").unwrap().len(), 2);
        assert_eq!(
            store.locate("only-b.tftf").unwrap(),
            b.path().join("only-b.tftf")
        );
    }

    #[test]
    fn test_missing_firmware() {
        let dir = tempdir().unwrap();
        let store = DirectoryStore::new([dir.path()]);
        assert_eq!(store.search_path(), &[dir.path().to_path_buf()]);
        match store.load("absent.tftf") {
            Err(StoreError::NotFound { name, searched }) => {
                assert_eq!(name, "absent.tftf");
                assert_eq!(searched, store.search_path());
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_size_limit() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("big.tftf"), vec![0u8; 64]).unwrap();
        let store = DirectoryStore::new([dir.path()]).with_max_image_size(Some(32));
        assert!(matches!(
            store.load("big.tftf"),
            Err(StoreError::TooLarge { size: 64, max: 32, .. })
        ));
    }

    #[test]
    fn test_rejects_path_escape() {
        let store = DirectoryStore::default();
        assert!(matches!(
            store.load("../../etc/shadow"),
            Err(StoreError::InvalidName(_))
        ));
    }
}
