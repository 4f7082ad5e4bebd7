//! Source registry: per-source failure counters and dead-source markers

use crate::store::{StateStore, DEAD_SOURCES_FILE, SOURCE_FAILS_FILE};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, warn};

/// Consecutive failures after which a source is retired for good
pub const SOURCE_FAIL_THRESHOLD: u32 = 3;

/// Marker written when a source is declared dead
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadMarker {
    pub marked_dead_at: DateTime<Utc>,
}

/// Current standing of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStatus {
    Active,
    Failing(u32),
    Dead { since: DateTime<Utc> },
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceStatus::Active => write!(f, "active"),
            SourceStatus::Failing(n) => write!(f, "failing ({}/{})", n, SOURCE_FAIL_THRESHOLD),
            SourceStatus::Dead { since } => write!(f, "dead since {}", since.to_rfc3339()),
        }
    }
}

/// Registry of source health, persisted after every mutation
pub struct SourceRegistry {
    store: StateStore,
    dead: BTreeMap<String, DeadMarker>,
    failures: BTreeMap<String, u32>,
}

impl SourceRegistry {
    /// Load registry state from the store; missing documents mean a clean slate
    pub fn load(store: StateStore) -> Self {
        let dead: BTreeMap<String, DeadMarker> = store.load(DEAD_SOURCES_FILE);
        let mut failures: BTreeMap<String, u32> = store.load(SOURCE_FAILS_FILE);
        // a dead source never carries a counter
        failures.retain(|source, count| *count > 0 && !dead.contains_key(source));

        debug!(dead = dead.len(), failing = failures.len(), "source registry loaded");
        Self {
            store,
            dead,
            failures,
        }
    }

    pub fn is_active(&self, source: &str) -> bool {
        !self.dead.contains_key(source)
    }

    pub fn status(&self, source: &str) -> SourceStatus {
        if let Some(marker) = self.dead.get(source) {
            return SourceStatus::Dead {
                since: marker.marked_dead_at,
            };
        }
        match self.failures.get(source) {
            Some(&n) if n > 0 => SourceStatus::Failing(n),
            _ => SourceStatus::Active,
        }
    }

    pub fn failure_count(&self, source: &str) -> u32 {
        self.failures.get(source).copied().unwrap_or(0)
    }

    /// Forget any failures recorded for the source
    pub fn record_success(&mut self, source: &str) -> Result<()> {
        if self.failures.remove(source).is_some() {
            self.store.save(SOURCE_FAILS_FILE, &self.failures)?;
            debug!(source, "source failure counter reset");
        }
        Ok(())
    }

    /// Count a failure; the third consecutive one retires the source
    pub fn record_failure(&mut self, source: &str) -> Result<SourceStatus> {
        if let Some(marker) = self.dead.get(source) {
            return Ok(SourceStatus::Dead {
                since: marker.marked_dead_at,
            });
        }

        let count = self.failures.entry(source.to_string()).or_insert(0);
        *count += 1;
        let count = *count;
        warn!(source, failures = count, threshold = SOURCE_FAIL_THRESHOLD, "source failed");

        if count < SOURCE_FAIL_THRESHOLD {
            self.store.save(SOURCE_FAILS_FILE, &self.failures)?;
            return Ok(SourceStatus::Failing(count));
        }

        let since = Utc::now();
        self.failures.remove(source);
        self.dead.insert(
            source.to_string(),
            DeadMarker {
                marked_dead_at: since,
            },
        );
        let documents = [
            (DEAD_SOURCES_FILE, self.store.encode(DEAD_SOURCES_FILE, &self.dead)?),
            (SOURCE_FAILS_FILE, self.store.encode(SOURCE_FAILS_FILE, &self.failures)?),
        ];
        self.store.save_many(&documents)?;
        info!(source, "source marked dead");

        Ok(SourceStatus::Dead { since })
    }

    pub fn dead_sources(&self) -> impl Iterator<Item = (&str, &DeadMarker)> {
        self.dead.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "https://example.com/list";

    fn registry(dir: &tempfile::TempDir) -> SourceRegistry {
        SourceRegistry::load(StateStore::new(dir.path()))
    }

    #[test]
    fn test_unknown_source_is_active() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(&dir);
        assert!(reg.is_active(SOURCE));
        assert_eq!(reg.status(SOURCE), SourceStatus::Active);
    }

    #[test]
    fn test_three_failures_mark_dead() {
        let dir = tempfile::tempdir().unwrap();
        let mut reg = registry(&dir);
        assert_eq!(reg.record_failure(SOURCE).unwrap(), SourceStatus::Failing(1));
        assert_eq!(reg.record_failure(SOURCE).unwrap(), SourceStatus::Failing(2));
        assert!(matches!(reg.record_failure(SOURCE).unwrap(), SourceStatus::Dead { .. }));
        assert!(!reg.is_active(SOURCE));
        assert_eq!(reg.failure_count(SOURCE), 0);
    }

    #[test]
    fn test_success_resets_counter() {
        let dir = tempfile::tempdir().unwrap();
        let mut reg = registry(&dir);
        reg.record_failure(SOURCE).unwrap();
        reg.record_failure(SOURCE).unwrap();
        reg.record_success(SOURCE).unwrap();
        assert_eq!(reg.failure_count(SOURCE), 0);
        assert_eq!(reg.record_failure(SOURCE).unwrap(), SourceStatus::Failing(1));
        assert!(reg.is_active(SOURCE));
    }

    #[test]
    fn test_success_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut reg = registry(&dir);
        reg.record_success(SOURCE).unwrap();
        reg.record_success(SOURCE).unwrap();
        assert_eq!(reg.status(SOURCE), SourceStatus::Active);
    }

    #[test]
    fn test_dead_is_permanent() {
        let dir = tempfile::tempdir().unwrap();
        let mut reg = registry(&dir);
        for _ in 0..SOURCE_FAIL_THRESHOLD {
            reg.record_failure(SOURCE).unwrap();
        }
        reg.record_success(SOURCE).unwrap();
        assert!(!reg.is_active(SOURCE));
        assert!(matches!(reg.record_failure(SOURCE).unwrap(), SourceStatus::Dead { .. }));
        assert_eq!(reg.failure_count(SOURCE), 0);
    }

    #[test]
    fn test_state_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut reg = registry(&dir);
            reg.record_failure("a").unwrap();
            for _ in 0..SOURCE_FAIL_THRESHOLD {
                reg.record_failure("b").unwrap();
            }
        }
        let reg = registry(&dir);
        assert_eq!(reg.status("a"), SourceStatus::Failing(1));
        assert!(!reg.is_active("b"));
        assert_eq!(reg.dead_sources().count(), 1);
    }

    #[test]
    fn test_counter_for_dead_source_dropped_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let mut dead = BTreeMap::new();
        dead.insert(
            SOURCE.to_string(),
            DeadMarker {
                marked_dead_at: Utc::now(),
            },
        );
        let mut failures = BTreeMap::new();
        failures.insert(SOURCE.to_string(), 2u32);
        store.save(DEAD_SOURCES_FILE, &dead).unwrap();
        store.save(SOURCE_FAILS_FILE, &failures).unwrap();

        let reg = SourceRegistry::load(store);
        assert_eq!(reg.failure_count(SOURCE), 0);
        assert!(!reg.is_active(SOURCE));
    }
}
