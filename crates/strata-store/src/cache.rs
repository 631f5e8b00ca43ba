//! Read-through cache keyed on change tags.
//!
//! The cache pairs each entry with the change tag the store assigned it. A
//! hit does not trust the entry blindly: it issues a conditional read and
//! only reuses the cached copy when the store reports "not modified", which
//! skips transferring and re-deserializing an unchanged body.
//!
//! Entries are process-local with a sliding TTL; no cross-process
//! invalidation is attempted. The staleness window is bounded by the TTL,
//! not by explicit signaling: writers always read through the store, so
//! read-after-own-write stays correct, while read-after-other-writer can lag
//! by up to one TTL.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use strata_core::{ChangeTag, PartitionKey};

use crate::error::{Error, Result};
use crate::metrics::{record_cache_hit, record_cache_miss, record_cache_revalidation};
use crate::model::DocumentModel;
use crate::store::{CachedRead, DocumentStore};

/// Tuning knobs for the conditional cache.
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    /// Sliding expiration; every touch pushes an entry's eviction out by this
    /// much.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
        }
    }
}

struct CacheEntry<D> {
    tag: ChangeTag,
    document: D,
    expires_at: Instant,
}

type CacheKey = (String, String);

/// Read-through, change-tag-validating cache over a [`DocumentStore`].
pub struct ConditionalCache<D> {
    store: DocumentStore<D>,
    entries: RwLock<HashMap<CacheKey, CacheEntry<D>>>,
    config: CacheConfig,
}

impl<D> std::fmt::Debug for ConditionalCache<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionalCache")
            .field("ttl", &self.config.ttl)
            .finish_non_exhaustive()
    }
}

impl<D: DocumentModel> ConditionalCache<D> {
    /// Creates a cache over the given store.
    #[must_use]
    pub fn new(store: DocumentStore<D>, config: CacheConfig) -> Self {
        Self {
            store,
            entries: RwLock::new(HashMap::new()),
            config,
        }
    }

    fn key(partition: &PartitionKey, id: &str) -> CacheKey {
        (partition.as_str().to_string(), id.to_string())
    }

    /// Reads a document through the cache.
    ///
    /// On a hit the store is asked whether the cached tag is still current;
    /// "not modified" serves the cached copy without deserializing a new
    /// body. On a miss (or an expired entry) the document is fetched and the
    /// entry replaced. Every touch slides the entry's expiration forward.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the document does not exist; a cached
    /// copy of a since-deleted document is evicted, never served.
    pub async fn get_or_fetch(&self, partition: &PartitionKey, id: &str) -> Result<D> {
        let key = Self::key(partition, id);

        let cached = {
            let entries = self.entries.read().map_err(|_| Error::storage("lock poisoned"))?;
            entries
                .get(&key)
                .filter(|entry| entry.expires_at > Instant::now())
                .map(|entry| (entry.tag.clone(), entry.document.clone()))
        };

        if let Some((tag, document)) = cached {
            record_cache_hit(D::KIND);
            return match self.store.read_if_changed(partition, id, &tag).await? {
                CachedRead::NotModified => {
                    record_cache_revalidation(D::KIND);
                    self.insert(key, tag, document.clone())?;
                    Ok(document)
                }
                CachedRead::Changed(versioned) => {
                    self.insert(key, versioned.change_tag, versioned.document.clone())?;
                    Ok(versioned.document)
                }
                CachedRead::Missing => {
                    self.remove(&key)?;
                    Err(Error::not_found(D::KIND, id))
                }
            };
        }

        record_cache_miss(D::KIND);
        let versioned = self.store.read(partition, id).await?;
        self.insert(key, versioned.change_tag, versioned.document.clone())?;
        Ok(versioned.document)
    }

    /// Drops the entry for a document, if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn invalidate(&self, partition: &PartitionKey, id: &str) -> Result<()> {
        self.remove(&Self::key(partition, id))
    }

    /// Evicts every expired entry, returning how many were dropped.
    ///
    /// Expired entries are also ignored (and replaced) by `get_or_fetch`;
    /// this exists so long-idle processes can release memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn purge_expired(&self) -> Result<usize> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| Error::storage("lock poisoned"))?;
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        Ok(before - entries.len())
    }

    /// Returns the number of live entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn len(&self) -> Result<usize> {
        let entries = self.entries.read().map_err(|_| Error::storage("lock poisoned"))?;
        Ok(entries.len())
    }

    /// Returns true if the cache holds no entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn insert(&self, key: CacheKey, tag: ChangeTag, document: D) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| Error::storage("lock poisoned"))?;
        entries.insert(
            key,
            CacheEntry {
                tag,
                document,
                expires_at: Instant::now() + self.config.ttl,
            },
        );
        Ok(())
    }

    fn remove(&self, key: &CacheKey) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| Error::storage("lock poisoned"))?;
        entries.remove(key);
        Ok(())
    }
}
