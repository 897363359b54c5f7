use std::{future::Future, sync::Arc, time::Duration};

use moka::future::Cache;

use crate::error::Error;

const MAX_CAPACITY: u64 = 1_000;

/// Time-boxed cache keyed by string. Entries older than the TTL are absent,
/// never served stale.
#[derive(Clone)]
pub struct TtlCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Cache<String, T>,
}

impl<T> TtlCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(ttl: Duration) -> Self {
        TtlCache {
            inner: Cache::builder()
                .time_to_live(ttl)
                .max_capacity(MAX_CAPACITY)
                .build(),
        }
    }

    /// Fetches a cached value or computes it with `fetch_fn`. Only one caller
    /// runs the fetch on a miss; concurrent callers for the same key wait for
    /// and share its result. Errors are returned to every waiter and are not
    /// cached.
    pub async fn cached_fetch<F, Fut>(&self, key: &str, fetch_fn: F) -> Result<T, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        self.inner
            .try_get_with_by_ref(key, fetch_fn())
            .await
            .map_err(shared_error)
    }

    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }
}

impl<T> std::fmt::Debug for TtlCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("entries", &self.inner.entry_count())
            .finish()
    }
}

fn shared_error(error: Arc<Error>) -> Error {
    match error.as_ref() {
        Error::Chain(e) => Error::Chain(e.clone()),
        Error::NotFound(message) => Error::NotFound(message.to_owned()),
        e => Error::TaskError(e.to_string()),
    }
}
