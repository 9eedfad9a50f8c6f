//! In-memory firmware store.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{FirmwareBlob, FirmwareStore, StoreError, validate_name};

/// Firmware images kept in memory, with load/release accounting.
#[derive(Default)]
pub struct MemoryStore {
    images: Mutex<HashMap<String, Vec<u8>>>,
    requested: Mutex<Vec<String>>,
    loads: AtomicUsize,
    releases: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.images
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.into(), data.into());
    }

    pub fn remove(&self, name: &str) -> Option<Vec<u8>> {
        self.images
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name)
    }

    /// Every name passed to `load`, in order, including failed lookups.
    pub fn requested(&self) -> Vec<String> {
        self.requested
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    /// Blobs handed out and not yet released.
    pub fn live(&self) -> usize {
        self.loads().saturating_sub(self.releases())
    }
}

impl FirmwareStore for MemoryStore {
    fn load(&self, name: &str) -> Result<FirmwareBlob, StoreError> {
        self.requested
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(name.to_string());
        validate_name(name)?;

        let data = self
            .images
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                name: name.to_string(),
                searched: Vec::new(),
            })?;

        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(FirmwareBlob::new(name, data))
    }

    fn release(&self, blob: FirmwareBlob) {
        self.releases.fetch_add(1, Ordering::SeqCst);
        drop(blob);
    }
}
