use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::{Serialize, de::DeserializeOwned};

use super::DocumentStore;
use crate::error::Result;

/// Process-local store; contents vanish with the process.
#[derive(Debug)]
pub struct MemoryStore<T> {
    documents: RwLock<BTreeMap<String, T>>,
}

impl<T> MemoryStore<T> {
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DocumentStore<T> for MemoryStore<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    fn insert(&self, key: &str, document: &T) -> Result<()> {
        self.documents
            .write()
            .insert(key.to_string(), document.clone());
        Ok(())
    }

    fn find(&self, key: &str) -> Result<Option<T>> {
        Ok(self.documents.read().get(key).cloned())
    }

    fn count(&self) -> Result<usize> {
        Ok(self.documents.read().len())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.documents.write().remove(key).is_some())
    }

    fn remove_all(&self) -> Result<usize> {
        let mut guard = self.documents.write();
        let removed = guard.len();
        guard.clear();
        Ok(removed)
    }

    fn documents(&self) -> Result<Vec<T>> {
        Ok(self.documents.read().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_replaces_and_remove_reports_presence() -> Result<()> {
        let store = MemoryStore::<String>::new();
        store.insert("a", &"first".to_string())?;
        store.insert("a", &"second".to_string())?;
        store.insert("b", &"other".to_string())?;

        assert_eq!(store.count()?, 2);
        assert_eq!(store.find("a")?.as_deref(), Some("second"));
        assert!(store.remove("a")?);
        assert!(!store.remove("a")?);
        assert_eq!(store.find("a")?, None);
        assert_eq!(store.remove_all()?, 1);
        assert_eq!(store.count()?, 0);
        assert!(store.documents()?.is_empty());
        Ok(())
    }
}
