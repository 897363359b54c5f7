use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::KeyValueStore;
use crate::error::Error;

#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<HashMap<(String, String), String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, store: &str, key: &str) -> Result<Option<String>, Error> {
        let data = self.data.read().await;
        Ok(data.get(&(store.to_owned(), key.to_owned())).cloned())
    }

    async fn set(&self, store: &str, key: &str, value: String) -> Result<(), Error> {
        let mut data = self.data.write().await;
        data.insert((store.to_owned(), key.to_owned()), value);
        Ok(())
    }

    async fn remove(&self, store: &str, key: &str) -> Result<(), Error> {
        let mut data = self.data.write().await;
        data.remove(&(store.to_owned(), key.to_owned()));
        Ok(())
    }
}
