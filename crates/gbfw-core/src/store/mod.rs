//! Firmware image store.
//!
//! Resolves a firmware file name to its contents. The handler owns every
//! blob it loads and hands it back through [`FirmwareStore::release`]
//! exactly once; since `release` takes the blob by value a second release
//! cannot be expressed.

pub mod directory;
pub mod memory;

pub use directory::DirectoryStore;
pub use memory::MemoryStore;

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::protocol::constants::{GB_OP_NONEXISTENT, GB_OP_UNKNOWN_ERROR};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Firmware '{name}' not found")]
    NotFound { name: String, searched: Vec<PathBuf> },

    #[error("Invalid firmware name '{0}'")]
    InvalidName(String),

    #[error("Firmware '{name}' is {size} bytes, limit is {max}")]
    TooLarge { name: String, size: u64, max: u64 },

    #[error("Failed to read firmware '{name}': {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    /// Greybus result reported to the bootrom for this failure.
    pub fn result_code(&self) -> u8 {
        match self {
            StoreError::NotFound { .. } => GB_OP_NONEXISTENT,
            _ => GB_OP_UNKNOWN_ERROR,
        }
    }
}

/// Loaded firmware image. Immutable once created.
pub struct FirmwareBlob {
    name: String,
    data: Vec<u8>,
}

impl FirmwareBlob {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Bytes `[offset, offset + size)`, or `None` if the range leaves the image.
    ///
    /// `offset` must point inside the image even for an empty read.
    pub fn chunk(&self, offset: u32, size: u32) -> Option<&[u8]> {
        let offset = offset as usize;
        let size = size as usize;
        if offset >= self.data.len() || size > self.data.len() - offset {
            return None;
        }
        Some(&self.data[offset..offset + size])
    }
}

impl fmt::Debug for FirmwareBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FirmwareBlob")
            .field("name", &self.name)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Source of firmware images.
pub trait FirmwareStore: Send + Sync {
    /// Load the image called `name`. May block.
    fn load(&self, name: &str) -> Result<FirmwareBlob, StoreError>;

    /// Give a previously loaded image back to the store.
    fn release(&self, blob: FirmwareBlob) {
        drop(blob);
    }
}

impl<T: FirmwareStore + ?Sized> FirmwareStore for &T {
    fn load(&self, name: &str) -> Result<FirmwareBlob, StoreError> {
        (**self).load(name)
    }

    fn release(&self, blob: FirmwareBlob) {
        (**self).release(blob)
    }
}

/// Reject names that could escape a search directory.
pub(crate) fn validate_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
        || name == "."
        || name.contains("..")
    {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(())
}
