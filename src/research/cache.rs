//! Research report cache

use super::ResearchReport;
use crate::types::Timeframe;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Cache key: normalised subject plus timeframe
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    /// Subject, trimmed and upper-cased
    pub subject: String,
    /// Timeframe
    pub timeframe: Timeframe,
}

impl CacheKey {
    /// Build a normalised key
    pub fn new(subject: &str, timeframe: Timeframe) -> Self {
        Self {
            subject: subject.trim().to_uppercase(),
            timeframe,
        }
    }
}

/// Storage for finished reports.
///
/// Implementations must publish whole reports only; `get` never observes a
/// partially written entry.
#[async_trait]
pub trait ReportCache: Send + Sync {
    /// Live report for `key`, if any
    async fn get(&self, key: &CacheKey) -> Option<Arc<ResearchReport>>;

    /// Store `report` under `key` for `ttl`, superseding any previous entry
    async fn set(&self, key: CacheKey, report: Arc<ResearchReport>, ttl: Duration);
}

#[derive(Debug)]
struct Entry {
    report: Arc<ResearchReport>,
    expires_at: Instant,
}

/// Bounded in-process cache
#[derive(Debug)]
pub struct InMemoryReportCache {
    entries: DashMap<CacheKey, Entry>,
    capacity: usize,
}

impl InMemoryReportCache {
    /// Cache holding at most `capacity` reports
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Drop expired entries
    pub fn sweep(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is stored
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_soonest_expiring(&self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().expires_at)
            .map(|entry| entry.key().clone());
        if let Some(key) = victim {
            self.entries.remove(&key);
        }
    }
}

impl Default for InMemoryReportCache {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl ReportCache for InMemoryReportCache {
    async fn get(&self, key: &CacheKey) -> Option<Arc<ResearchReport>> {
        let entry = self.entries.get(key)?;
        if entry.expires_at > Instant::now() {
            Some(entry.report.clone())
        } else {
            drop(entry);
            self.entries.remove(key);
            None
        }
    }

    async fn set(&self, key: CacheKey, report: Arc<ResearchReport>, ttl: Duration) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.sweep();
            if self.entries.len() >= self.capacity {
                self.evict_soonest_expiring();
            }
        }
        self.entries.insert(
            key,
            Entry {
                report,
                expires_at: Instant::now() + ttl,
            },
        );
    }
}
