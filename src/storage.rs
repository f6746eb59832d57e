//! Optimized storage layer using RocksDB

use crate::errors::StorageError;
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use std::{path::Path, sync::Arc};

#[derive(Clone)]
pub struct OptimizedStorage {
    db: Arc<DB>,
}

impl OptimizedStorage {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_write_buffer_size(64 * 1024 * 1024);
        opts.set_max_write_buffer_number(4);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path)
            .map_err(|e| StorageError::DatabaseOpenFailed(e.to_string()))?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Remove any existing database at `path` before opening it
    pub fn new_cleared<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        if path.as_ref().exists() {
            DB::destroy(&Options::default(), path.as_ref())
                .map_err(|e| StorageError::DatabaseOpenFailed(e.to_string()))?;
        }
        Self::new(path)
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        self.db
            .get(key)
            .map_err(|e| StorageError::ReadFailed(e.to_string()))
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.db.put(key, value).map_err(StorageError::from)
    }

    pub fn delete(&self, key: &[u8]) -> Result<(), StorageError> {
        self.db.delete(key).map_err(StorageError::from)
    }

    /// Apply puts and deletes atomically
    pub fn write(&self, batch: StorageBatch) -> Result<(), StorageError> {
        self.db.write(batch.inner).map_err(StorageError::from)
    }

    /// Ordered scan of keys starting with `prefix`, resuming after `cursor` when given
    pub fn scan_prefix(
        &self,
        prefix: &[u8],
        cursor: Option<&[u8]>,
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let start = cursor.unwrap_or(prefix);
        let iter = self.db.iterator(IteratorMode::From(start, Direction::Forward));

        let mut rows = Vec::new();
        for item in iter {
            let (key, value) = item.map_err(|e| StorageError::ReadFailed(e.to_string()))?;
            if !key.starts_with(prefix) {
                break;
            }
            if cursor.is_some_and(|c| &*key == c) {
                continue;
            }
            rows.push((key.to_vec(), value.to_vec()));
            if rows.len() >= limit {
                break;
            }
        }
        Ok(rows)
    }
}

/// Batch of writes committed in one RocksDB write
#[derive(Default)]
pub struct StorageBatch {
    inner: WriteBatch,
}

impl StorageBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) {
        self.inner.put(key, value);
    }

    pub fn delete(&mut self, key: impl AsRef<[u8]>) {
        self.inner.delete(key);
    }
}
