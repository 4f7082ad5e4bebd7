//! Pool manager: turns prior state plus fresh candidates into the next snapshot

use crate::proxy::checker::{check_all, CheckerConfig, ProxyProbe};
use crate::proxy::models::{ProxyCheckResult, ProxySet};
use crate::store::{StateStore, BAD_PROXIES_FILE, GOOD_PROXIES_FILE};
use crate::Result;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{info, warn};

/// Default number of never-before-tested candidates per run
const DEFAULT_MAX_NEW_TO_TEST: usize = 30;

/// Default upper bound on the whole test batch
const DEFAULT_OVERALL_TEST_CAP: usize = 120;

/// How much to test in a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolPolicy {
    /// Re-probe every previously good proxy before anything else
    pub retest_prior_good: bool,
    /// How many records beyond the retest set may join the batch
    pub max_new_to_test: usize,
    /// Hard limit on the batch; `None` means unlimited
    pub overall_test_cap: Option<usize>,
}

impl Default for PoolPolicy {
    fn default() -> Self {
        Self {
            retest_prior_good: true,
            max_new_to_test: DEFAULT_MAX_NEW_TO_TEST,
            overall_test_cap: Some(DEFAULT_OVERALL_TEST_CAP),
        }
    }
}

impl PoolPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retest_prior_good(mut self, retest: bool) -> Self {
        self.retest_prior_good = retest;
        self
    }

    pub fn with_max_new_to_test(mut self, max: usize) -> Self {
        self.max_new_to_test = max;
        self
    }

    pub fn with_overall_test_cap(mut self, cap: Option<usize>) -> Self {
        self.overall_test_cap = cap;
        self
    }
}

/// Complete good/bad state; the two sets never share a key
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoolSnapshot {
    pub good: ProxySet,
    pub bad: ProxySet,
}

impl PoolSnapshot {
    /// Load the last persisted snapshot, empty if there is none
    pub fn load(store: &StateStore) -> Self {
        let good: ProxySet = store.load(GOOD_PROXIES_FILE);
        let mut bad: ProxySet = store.load(BAD_PROXIES_FILE);
        for key in good.keys() {
            bad.remove(&key);
        }
        Self { good, bad }
    }

    /// Replace both documents on disk
    pub fn save(&self, store: &StateStore) -> Result<()> {
        let documents = [
            (GOOD_PROXIES_FILE, store.encode(GOOD_PROXIES_FILE, &self.good)?),
            (BAD_PROXIES_FILE, store.encode(BAD_PROXIES_FILE, &self.bad)?),
        ];
        store.save_many(&documents)
    }

    pub fn is_disjoint(&self) -> bool {
        !self.good.keys().any(|key| self.bad.contains(&key))
    }
}

/// Choose what to probe this run.
///
/// Prior good records come first when retesting; then up to
/// `max_new_to_test` records from prior good followed by fresh candidates,
/// skipping keys already batched; finally the batch is cut to the cap.
pub fn plan_batch(prior_good: &ProxySet, fresh: &ProxySet, policy: &PoolPolicy) -> ProxySet {
    let mut batch = ProxySet::new();
    if policy.retest_prior_good {
        batch.extend_absent(prior_good.iter().cloned());
    }

    let mut combined = prior_good.clone();
    combined.extend_absent(fresh.iter().cloned());

    let mut added = 0;
    for record in combined {
        if added >= policy.max_new_to_test {
            break;
        }
        if batch.insert_if_absent(record) {
            added += 1;
        }
    }

    match policy.overall_test_cap {
        Some(cap) if batch.len() > cap => batch.into_iter().take(cap).collect(),
        _ => batch,
    }
}

/// Fold probe results into the next snapshot
pub fn merge(
    prior_good: &ProxySet,
    prior_bad: &ProxySet,
    results: Vec<ProxyCheckResult>,
    policy: &PoolPolicy,
    now: DateTime<Utc>,
) -> PoolSnapshot {
    let mut good = ProxySet::new();
    let mut newly_bad = ProxySet::new();
    for result in results {
        if result.is_working() {
            good.upsert(result.into_stamped(now));
        } else {
            newly_bad.upsert(result.into_stamped(now));
        }
    }
    let verified: Vec<_> = good.keys().collect();

    // keep the old pool around when this run found fewer working proxies
    if !policy.retest_prior_good || good.len() < prior_good.len() {
        good.extend_absent(prior_good.iter().cloned());
    }

    let mut bad = newly_bad;
    bad.extend_absent(prior_bad.iter().cloned());
    for key in good.keys() {
        if bad.remove(&key).is_some() && !verified.contains(&key) {
            warn!(proxy = %key, "kept from previous pool despite failing this run");
        }
    }

    PoolSnapshot { good, bad }
}

/// Drives a reconcile pass: plan, probe, merge
pub struct PoolManager<P> {
    probe: P,
    checker: CheckerConfig,
    policy: PoolPolicy,
}

impl<P: ProxyProbe> PoolManager<P> {
    pub fn new(probe: P, checker: CheckerConfig, policy: PoolPolicy) -> Self {
        Self {
            probe,
            checker,
            policy,
        }
    }

    pub fn policy(&self) -> &PoolPolicy {
        &self.policy
    }

    pub async fn reconcile(
        &self,
        prior_good: &ProxySet,
        prior_bad: &ProxySet,
        fresh: &ProxySet,
    ) -> PoolSnapshot {
        let batch = plan_batch(prior_good, fresh, &self.policy);
        info!(
            batch = batch.len(),
            prior_good = prior_good.len(),
            fresh = fresh.len(),
            "testing proxies"
        );

        let results = self.probe_batch(batch).await;
        let snapshot = merge(prior_good, prior_bad, results, &self.policy, Utc::now());
        debug_assert!(snapshot.is_disjoint());

        info!(
            good = snapshot.good.len(),
            bad = snapshot.bad.len(),
            "pool reconciled"
        );
        snapshot
    }

    async fn probe_batch(&self, batch: ProxySet) -> Vec<ProxyCheckResult> {
        let timeout: Duration = self.checker.timeout;
        check_all(&self.probe, batch.into_vec(), timeout, self.checker.concurrency).await
    }
}
