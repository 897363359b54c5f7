use std::{io::ErrorKind, path::PathBuf};

use async_trait::async_trait;
use tokio::fs;

use super::KeyValueStore;
use crate::error::Error;

/// One JSON document per store and key under `<dir>/<store>/<key>.json`.
/// Writes go to a temporary file first and are renamed into place.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileStore { dir: dir.into() }
    }

    fn path(&self, store: &str, key: &str) -> Result<PathBuf, Error> {
        for part in [store, key] {
            if part.is_empty() || !part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
                return Err(Error::invalid_input(
                    format!("invalid storage key {:?}", part),
                    "Invalid storage key.",
                ));
            }
        }

        let mut buf = self.dir.clone();
        buf.push(store);
        buf.push(format!("{}.json", key));
        Ok(buf)
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, store: &str, key: &str) -> Result<Option<String>, Error> {
        match fs::read_to_string(self.path(store, key)?).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, store: &str, key: &str, value: String) -> Result<(), Error> {
        let path = self.path(store, key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value).await?;
        fs::rename(&tmp, &path).await?;

        Ok(())
    }

    async fn remove(&self, store: &str, key: &str) -> Result<(), Error> {
        match fs::remove_file(self.path(store, key)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = std::env::temp_dir().join(format!("savings-{}", Uuid::new_v4()));
        let store = FileStore::new(&dir);

        assert_eq!(store.get("positions", "0xaa").await.unwrap(), None);
        store.set("positions", "0xaa", String::from(r#"[{"a":1}]"#)).await.unwrap();
        store.set("positions", "0xaa", String::from("[]")).await.unwrap();
        assert_eq!(store.get("positions", "0xaa").await.unwrap().as_deref(), Some("[]"));

        store.remove("positions", "0xaa").await.unwrap();
        store.remove("positions", "0xaa").await.unwrap();
        assert_eq!(store.get("positions", "0xaa").await.unwrap(), None);

        assert!(store.get("../etc", "passwd").await.is_err());

        fs::remove_dir_all(&dir).await.unwrap();
    }
}
