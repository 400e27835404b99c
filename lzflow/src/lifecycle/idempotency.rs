//! Response cache for redelivered lifecycle requests.
//!
//! A request is identified by (stack, logical id, request id). Its first
//! successful response is cached together with a hash of the properties, so
//! a redelivery returns the cached response without remote calls and a
//! reused request id with different properties is detected.

use super::event::{LifecycleRequest, LifecycleResponse};
use crate::utils::{now_utc, Timestamp};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::time::Duration;

/// A cached response with metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    /// The response first returned.
    pub response: LifecycleResponse,
    /// Hash of the request properties.
    pub properties_hash: String,
    /// Creation time.
    pub created_at: Timestamp,
    /// Expiry time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<Timestamp>,
}

impl CachedResponse {
    /// Caches `response` for `request`.
    #[must_use]
    pub fn new(request: &LifecycleRequest, response: LifecycleResponse) -> Self {
        Self {
            response,
            properties_hash: properties_hash(request),
            created_at: now_utc(),
            expires_at: None,
        }
    }

    /// Sets a time to live.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|d| self.created_at.checked_add_signed(d));
        self
    }

    /// Returns true once the entry has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| now_utc() >= at)
    }
}

/// Storage for cached lifecycle responses.
#[async_trait]
pub trait ResponseCache: Send + Sync {
    /// Returns a live entry.
    async fn get(&self, key: &str) -> Option<CachedResponse>;

    /// Stores an entry.
    async fn put(&self, key: &str, entry: CachedResponse);

    /// Removes an entry.
    async fn remove(&self, key: &str);
}

/// In-memory response cache.
#[derive(Debug, Default)]
pub struct InMemoryResponseCache {
    entries: DashMap<String, CachedResponse>,
}

impl InMemoryResponseCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of entries, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl ResponseCache for InMemoryResponseCache {
    async fn get(&self, key: &str) -> Option<CachedResponse> {
        let entry = self.entries.get(key).map(|e| e.value().clone())?;
        if entry.is_expired() {
            self.entries.remove(key);
            return None;
        }
        Some(entry)
    }

    async fn put(&self, key: &str, entry: CachedResponse) {
        self.entries.insert(key.to_string(), entry);
    }

    async fn remove(&self, key: &str) {
        self.entries.remove(key);
    }
}

fn sha256_prefix(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(&digest[..16])
}

/// Cache key of a request: (stack, logical id, request id).
#[must_use]
pub fn request_key(request: &LifecycleRequest) -> String {
    let combined = [
        request.stack_id.as_str(),
        request.logical_resource_id.as_str(),
        request.request_id.as_str(),
    ]
    .join(":");
    format!("lifecycle:{}", sha256_prefix(&combined))
}

/// Hash of everything that determines a request's effect.
#[must_use]
pub fn properties_hash(request: &LifecycleRequest) -> String {
    let material = json!({
        "type": request.request_type,
        "properties": request.resource_properties,
        "old": request.old_resource_properties,
        "physical": request.physical_resource_id,
    });
    sha256_prefix(&material.to_string())
}

/// Result of a cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    /// Not seen before; execute.
    Miss,
    /// Redelivery; return the cached response.
    Hit(LifecycleResponse),
    /// Same request id, different properties.
    Conflict {
        /// The cache key.
        key: String,
    },
}

/// Looks up `request` in `cache`.
pub async fn lookup(cache: &dyn ResponseCache, request: &LifecycleRequest) -> CacheLookup {
    let key = request_key(request);
    match cache.get(&key).await {
        None => CacheLookup::Miss,
        Some(entry) if entry.properties_hash == properties_hash(request) => {
            CacheLookup::Hit(entry.response)
        }
        Some(_) => CacheLookup::Conflict { key },
    }
}
