//! Ranked fallback table and bounded failure memory

use crate::catalog::{ModelChoice, CATALOG};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Candidates kept per model in the derived table
const CHAIN_LENGTH: usize = 3;

/// Static ranked substitutes per model
#[derive(Debug, Clone)]
pub struct FallbackTable {
    chains: HashMap<String, Vec<ModelChoice>>,
}

impl FallbackTable {
    /// Empty table: no model has a fallback
    pub fn empty() -> Self {
        Self {
            chains: HashMap::new(),
        }
    }

    /// Table derived from the catalog.
    ///
    /// Each model's chain holds the nearest-ranked models of other families
    /// (a family outage usually takes all its models down), then the
    /// nearest-ranked models of its own family.
    pub fn from_catalog() -> Self {
        let mut chains = HashMap::new();
        for model in CATALOG {
            let mut others: Vec<_> = CATALOG.iter().filter(|m| m.id != model.id).collect();
            others.sort_by_key(|m| {
                (
                    m.family == model.family,
                    m.benchmark_rank.abs_diff(model.benchmark_rank),
                    m.benchmark_rank,
                )
            });
            let chain = others
                .into_iter()
                .take(CHAIN_LENGTH)
                .map(|m| m.choice())
                .collect();
            chains.insert(model.id.to_string(), chain);
        }
        Self { chains }
    }

    /// Replace the chain for one model
    pub fn with_chain(mut self, model: impl Into<String>, chain: Vec<ModelChoice>) -> Self {
        self.chains.insert(model.into(), chain);
        self
    }

    /// Ranked substitutes for `model`
    pub fn candidates(&self, model: &str) -> &[ModelChoice] {
        self.chains.get(model).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl Default for FallbackTable {
    fn default() -> Self {
        Self::from_catalog()
    }
}

/// One remembered failure
#[derive(Debug, Clone)]
pub struct FailureRecord {
    /// Wall-clock time of the failure
    pub last_failure_at: DateTime<Utc>,
    /// Error message
    pub message: String,
    recorded: Instant,
}

/// Bounded, TTL-expiring memory of recently failing models.
///
/// Used only to deprioritise candidates; a remembered model is never
/// excluded outright.
#[derive(Debug)]
pub struct FallbackMemory {
    entries: DashMap<String, FailureRecord>,
    capacity: usize,
    ttl: Duration,
}

impl FallbackMemory {
    /// Create a memory holding at most `capacity` models for `ttl`
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            capacity: capacity.max(1),
            ttl,
        }
    }

    /// Remember a failure, evicting the oldest entry when full
    pub fn record_failure(&self, model: &str, message: impl Into<String>) {
        if !self.entries.contains_key(model) && self.entries.len() >= self.capacity {
            self.sweep();
            if self.entries.len() >= self.capacity {
                self.evict_oldest();
            }
        }
        self.entries.insert(
            model.to_string(),
            FailureRecord {
                last_failure_at: Utc::now(),
                message: message.into(),
                recorded: Instant::now(),
            },
        );
    }

    /// The live failure record for `model`, if any
    pub fn recent_failure(&self, model: &str) -> Option<FailureRecord> {
        let record = self.entries.get(model)?;
        if record.recorded.elapsed() < self.ttl {
            Some(record.clone())
        } else {
            None
        }
    }

    /// Whether `model` failed within the TTL
    pub fn failed_recently(&self, model: &str) -> bool {
        self.recent_failure(model).is_some()
    }

    /// Drop expired entries
    pub fn sweep(&self) {
        let ttl = self.ttl;
        self.entries.retain(|_, record| record.recorded.elapsed() < ttl);
    }

    /// Number of stored entries (expired ones included until swept)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is stored
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().recorded)
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}

impl Default for FallbackMemory {
    fn default() -> Self {
        Self::new(128, Duration::from_secs(600))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProviderFamily;

    #[test]
    fn test_catalog_chains_prefer_other_families() {
        let table = FallbackTable::from_catalog();
        let chain = table.candidates("claude-sonnet-4");
        assert_eq!(chain.len(), CHAIN_LENGTH);
        assert!(chain.iter().all(|c| c.provider != ProviderFamily::Anthropic));
        assert!(chain.iter().all(|c| c.model != "claude-sonnet-4"));
        assert!(table.candidates("unknown-model").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_expire_after_ttl() {
        let memory = FallbackMemory::new(8, Duration::from_secs(60));
        memory.record_failure("gpt-4o", "503");
        assert!(memory.failed_recently("gpt-4o"));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!memory.failed_recently("gpt-4o"));
        memory.sweep();
        assert!(memory.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_oldest() {
        let memory = FallbackMemory::new(2, Duration::from_secs(600));
        memory.record_failure("a", "x");
        tokio::time::advance(Duration::from_secs(1)).await;
        memory.record_failure("b", "x");
        tokio::time::advance(Duration::from_secs(1)).await;
        memory.record_failure("c", "x");

        assert_eq!(memory.len(), 2);
        assert!(!memory.failed_recently("a"));
        assert!(memory.failed_recently("b"));
        assert!(memory.failed_recently("c"));
    }

    #[test]
    fn test_rerecording_updates_message() {
        let memory = FallbackMemory::new(1, Duration::from_secs(600));
        memory.record_failure("a", "first");
        memory.record_failure("a", "second");
        assert_eq!(memory.len(), 1);
        assert_eq!(memory.recent_failure("a").unwrap().message, "second");
    }
}
