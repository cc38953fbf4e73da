// Recent uploads cache

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::platform::UploadSummary;

struct CacheEntry {
    uploads: Vec<UploadSummary>,
    fetched_at: Instant,
}

/// Thread-safe per-channel cache of recent uploads
pub struct UploadsCache {
    /// Upload lists indexed by channel id
    entries: Arc<DashMap<String, CacheEntry>>,

    /// Cache TTL
    ttl: Duration,
}

impl UploadsCache {
    /// Create a new uploads cache
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    /// Cached uploads for a channel, if still fresh
    pub fn get(&self, channel_id: &str) -> Option<Vec<UploadSummary>> {
        let entry = self.entries.get(channel_id)?;
        if entry.fetched_at.elapsed() > self.ttl {
            return None;
        }
        Some(entry.uploads.clone())
    }

    /// Store the uploads fetched for a channel
    pub fn insert(&self, channel_id: &str, uploads: Vec<UploadSummary>) {
        tracing::debug!(
            channel_id = %channel_id,
            count = uploads.len(),
            "Caching recent uploads"
        );
        self.entries.insert(
            channel_id.to_string(),
            CacheEntry {
                uploads,
                fetched_at: Instant::now(),
            },
        );
    }

    /// Drop the entry for a channel (re-authorization)
    pub fn invalidate(&self, channel_id: &str) {
        self.entries.remove(channel_id);
    }

    /// Number of cached channels, stale entries included
    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
