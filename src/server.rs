//! Serving side of the protocol: request handling and the value store.

use std::fmt::Debug;
use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};

use lru::LruCache;

use crate::common::{Id, RequestSpecific, ResponseSpecific};
use crate::{Error, Result};

/// Maximum number of values kept by [MemoryStore::default].
pub const MAX_VALUES: usize = 1000;

/// Answers incoming requests. Called from transport threads, possibly
/// concurrently.
pub trait RequestHandler: Debug + Send + Sync {
    /// Handle an incoming request.
    ///
    /// An `Err` is sent back to the requester as an error message. If
    /// [Error::is_fatal] the endpoint stops serving afterwards.
    fn handle_request(&self, request: RequestSpecific) -> Result<ResponseSpecific>;
}

/// Values answered to find-value requests.
pub trait ValueStore: Debug + Send + Sync {
    /// Returns the value stored under `key`, if any.
    ///
    /// An `Err` means the store itself is broken, and is fatal to the node.
    fn get(&self, key: &Id) -> Result<Option<String>>;
}

#[derive(Debug)]
/// Default implementation of [ValueStore], keeping the most recently used
/// values in memory.
pub struct MemoryStore {
    values: Mutex<LruCache<Id, String>>,
}

impl MemoryStore {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            values: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Store `value` under `key`, returning the previous value.
    pub fn insert(&self, key: Id, value: impl Into<String>) -> Option<String> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(key, value.into())
    }

    pub fn len(&self) -> usize {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(NonZeroUsize::new(MAX_VALUES).expect("MAX_VALUES is NonZeroUsize"))
    }
}

impl ValueStore for MemoryStore {
    fn get(&self, key: &Id) -> Result<Option<String>> {
        // A writer panicked mid update, nothing in there can be trusted.
        let mut values = self
            .values
            .lock()
            .map_err(|_| Error::ValueStoreFailure("value store lock poisoned".to_string()))?;

        Ok(values.get(key).cloned())
    }
}
