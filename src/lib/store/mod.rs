//! Keyed document persistence used for tracks and webhook subscriptions.
//!
//! The service only relies on the small surface of [`DocumentStore`]: insert,
//! find-by-key, count, remove-by-key and remove-all. Two backends implement
//! it, an in-process map and a RocksDB database holding JSON documents.

mod memory;
mod rocks;

use std::sync::Arc;

use serde::{Serialize, de::DeserializeOwned};

use crate::{
    config::{Config, StorageBackend},
    error::Result,
    track::Track,
    webhook::Subscription,
};

pub use memory::MemoryStore;
pub use rocks::RocksStore;

pub trait DocumentStore<T>: Send + Sync
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    /// Stores `document` under `key`, replacing any previous document.
    fn insert(&self, key: &str, document: &T) -> Result<()>;
    fn find(&self, key: &str) -> Result<Option<T>>;
    fn count(&self) -> Result<usize>;
    /// Returns whether a document was removed.
    fn remove(&self, key: &str) -> Result<bool>;
    /// Removes every document and returns how many were removed.
    fn remove_all(&self) -> Result<usize>;
    fn documents(&self) -> Result<Vec<T>>;
}

pub type TrackStore = Arc<dyn DocumentStore<Track>>;
pub type SubscriptionStore = Arc<dyn DocumentStore<Subscription>>;

#[derive(Clone)]
pub struct Stores {
    pub tracks: TrackStore,
    pub subscriptions: SubscriptionStore,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            tracks: Arc::new(MemoryStore::<Track>::new()),
            subscriptions: Arc::new(MemoryStore::<Subscription>::new()),
        }
    }

    pub fn open(config: &Config) -> Result<Self> {
        match config.storage {
            StorageBackend::Memory => Ok(Self::in_memory()),
            StorageBackend::Rocksdb => Ok(Self {
                tracks: Arc::new(RocksStore::<Track>::open(config.track_store_path())?),
                subscriptions: Arc::new(RocksStore::<Subscription>::open(
                    config.webhook_store_path(),
                )?),
            }),
        }
    }
}
