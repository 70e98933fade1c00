use std::{fs, marker::PhantomData, path::PathBuf};

use parking_lot::Mutex;
use rocksdb::{DBWithThreadMode, IteratorMode, MultiThreaded, Options, WriteBatch};
use serde::{Serialize, de::DeserializeOwned};

use super::DocumentStore;
use crate::error::{Result, TrackError};

/// RocksDB-backed store holding one JSON document per key.
pub struct RocksStore<T> {
    db: DBWithThreadMode<MultiThreaded>,
    write_lock: Mutex<()>,
    _documents: PhantomData<fn() -> T>,
}

impl<T> RocksStore<T> {
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| {
                    TrackError::Storage(format!(
                        "failed to create store directory {}: {}",
                        parent.display(),
                        err
                    ))
                })?;
            }
        }

        let mut options = Options::default();
        options.create_if_missing(true);
        let db = DBWithThreadMode::<MultiThreaded>::open(&options, &path).map_err(|err| {
            TrackError::Storage(format!(
                "failed to open document store at {}: {}",
                path.display(),
                err
            ))
        })?;

        Ok(Self {
            db,
            write_lock: Mutex::new(()),
            _documents: PhantomData,
        })
    }
}

impl<T> DocumentStore<T> for RocksStore<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    fn insert(&self, key: &str, document: &T) -> Result<()> {
        let value = serde_json::to_vec(document)?;
        self.db.put(key.as_bytes(), value)?;
        Ok(())
    }

    fn find(&self, key: &str) -> Result<Option<T>> {
        match self.db.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn count(&self) -> Result<usize> {
        let mut count = 0usize;
        for item in self.db.iterator(IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let _guard = self.write_lock.lock();
        if self.db.get(key.as_bytes())?.is_none() {
            return Ok(false);
        }
        self.db.delete(key.as_bytes())?;
        Ok(true)
    }

    fn remove_all(&self) -> Result<usize> {
        let _guard = self.write_lock.lock();
        let mut batch = WriteBatch::default();
        let mut removed = 0usize;
        for item in self.db.iterator(IteratorMode::Start) {
            let (key, _) = item?;
            batch.delete(key);
            removed += 1;
        }
        if removed > 0 {
            self.db.write(batch)?;
        }
        Ok(removed)
    }

    fn documents(&self) -> Result<Vec<T>> {
        let mut documents = Vec::new();
        for item in self.db.iterator(IteratorMode::Start) {
            let (_, value) = item?;
            documents.push(serde_json::from_slice(&value)?);
        }
        Ok(documents)
    }
}
