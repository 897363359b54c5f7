use async_trait::async_trait;

use crate::error::Error;

mod file;
mod ledger;
mod memory;
mod postgres;

pub use self::{file::FileStore, ledger::Ledger, memory::MemoryStore, postgres::PostgresStore};

/// Opaque string storage addressed by a store name and a key. The ledger
/// keeps one document per store and user.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, store: &str, key: &str) -> Result<Option<String>, Error>;

    async fn set(&self, store: &str, key: &str, value: String) -> Result<(), Error>;

    async fn remove(&self, store: &str, key: &str) -> Result<(), Error>;
}
