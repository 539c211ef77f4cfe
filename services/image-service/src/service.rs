//! Image service: ingestion plus catalog.
//!
//! Ties the ingestion pipeline to the image catalog. A record reaches the
//! catalog only after a verified ingestion.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::image::{
    remove_image, resolve_source_path, verify_image, ImageKind, ImageRecord, IngestError, Ingestor,
};
use crate::state::{ImageStore, StateStoreError};

/// Errors from image service operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("ingest error: {0}")]
    Ingest(#[from] IngestError),

    #[error("catalog error: {0}")]
    Store(#[from] StateStoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Image service.
pub struct ImageService {
    ingestor: Ingestor,
    store: Mutex<ImageStore>,
    repository_root: PathBuf,
    /// Per-source locks so two ingests of the same ISO never race on the
    /// mount check. An entry lives only while some `add` holds it.
    source_locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl ImageService {
    pub fn new(ingestor: Ingestor, store: ImageStore, repository_root: PathBuf) -> Self {
        Self {
            ingestor,
            store: Mutex::new(store),
            repository_root,
            source_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn repository_root(&self) -> &Path {
        &self.repository_root
    }

    /// Ingest `source` as a new image and record it in the catalog.
    pub fn add(
        &self,
        kind: ImageKind,
        source: &Path,
        description: &str,
        uuid: Uuid,
    ) -> Result<ImageRecord, ServiceError> {
        let (key, lock) = self.source_lock(source)?;
        let result = {
            let _held = lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.add_locked(kind, source, description, uuid)
        };
        self.release_source_lock(key, lock);
        result
    }

    fn add_locked(
        &self,
        kind: ImageKind,
        source: &Path,
        description: &str,
        uuid: Uuid,
    ) -> Result<ImageRecord, ServiceError> {
        let mut record = ImageRecord::new(kind, uuid).with_description(description);
        self.ingestor.add(&mut record, source, &self.repository_root)?;

        record.size = match fs::metadata(source) {
            Ok(meta) => meta.len(),
            Err(e) => {
                warn!(source = %source.display(), error = %e, "could not stat source image");
                0
            }
        };

        if let Err(e) = self.store().put_image(&record) {
            error!(uuid = %record.uuid, error = %e, "could not record image, rolling back");
            remove_image(&record, &self.repository_root)?;
            return Err(e.into());
        }

        Ok(record)
    }

    /// Look up an image.
    pub fn get(&self, uuid: &Uuid) -> Result<ImageRecord, ServiceError> {
        self.store()
            .get_image(uuid)?
            .ok_or(StateStoreError::NotFound(*uuid).into())
    }

    /// Re-verify an image against its stored hash.
    pub fn verify(&self, uuid: &Uuid) -> Result<ImageRecord, ServiceError> {
        let record = self.get(uuid)?;
        verify_image(&record, &self.repository_root)?;
        Ok(record)
    }

    /// Remove an image from the repository and the catalog.
    pub fn remove(&self, uuid: &Uuid) -> Result<ImageRecord, ServiceError> {
        let record = self.get(uuid)?;
        remove_image(&record, &self.repository_root)?;
        self.store().delete_image(uuid)?;
        debug!(uuid = %uuid, "image deleted from catalog");
        Ok(record)
    }

    fn store(&self) -> MutexGuard<'_, ImageStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn source_locks(&self) -> MutexGuard<'_, HashMap<PathBuf, Arc<Mutex<()>>>> {
        self.source_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock for `source`, keyed by the same resolved path the pipeline
    /// mounts from.
    fn source_lock(&self, source: &Path) -> std::io::Result<(PathBuf, Arc<Mutex<()>>)> {
        let key = resolve_source_path(source)?;
        let lock = self
            .source_locks()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        Ok((key, lock))
    }

    fn release_source_lock(&self, key: PathBuf, lock: Arc<Mutex<()>>) {
        let mut locks = self.source_locks();
        // One reference in the map plus ours: nobody else is waiting
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&key);
        }
    }
}
