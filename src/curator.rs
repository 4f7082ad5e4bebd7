//! One complete curation run: harvest, check, reconcile, persist

use crate::proxy::{
    HarvestReport, HttpFetcher, PageFetcher, PoolManager, PoolSnapshot, ProxyChecker,
    ProxyCrawler, ProxyProbe, ProxySource, SourceRegistry,
};
use crate::store::StateStore;
use crate::{Config, Error, Result};
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

/// What a run produced
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub harvest: HarvestReport,
    pub snapshot: PoolSnapshot,
}

/// Owns the collaborators of a run
pub struct Curator<F = HttpFetcher, P = ProxyChecker> {
    store: StateStore,
    crawler: ProxyCrawler<F>,
    manager: PoolManager<P>,
}

impl Curator<HttpFetcher, ProxyChecker> {
    /// Wire up the network-backed fetcher and checker
    pub fn new(config: &Config) -> Result<Self> {
        config.validate()?;
        let crawler = ProxyCrawler::with_config(config.crawler.clone())?;
        let checker = ProxyChecker::with_config(config.checker.clone());
        Ok(Self::with_parts(config, crawler, checker))
    }
}

impl<F: PageFetcher, P: ProxyProbe> Curator<F, P> {
    pub fn with_parts(config: &Config, crawler: ProxyCrawler<F>, probe: P) -> Self {
        Self {
            store: StateStore::new(&config.state_dir),
            crawler,
            manager: PoolManager::new(probe, config.checker.clone(), config.policy.clone()),
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Harvest only. The registry is updated, the pool is left alone.
    pub async fn harvest(&self, sources: &[ProxySource]) -> Result<HarvestReport> {
        let mut registry = SourceRegistry::load(self.store.clone());
        self.crawler.harvest(&mut registry, sources).await
    }

    /// Full run. The snapshot is written only once everything else succeeded;
    /// dropping the future before that leaves the previous snapshot in place.
    pub async fn run(&self, sources: &[ProxySource]) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        let span = info_span!("run", %run_id);

        async move {
            let prior = PoolSnapshot::load(&self.store);
            info!(
                good = prior.good.len(),
                bad = prior.bad.len(),
                "loaded previous pool"
            );

            let harvest = self.harvest(sources).await?;
            info!(candidates = harvest.candidates.len(), "harvest complete");

            let snapshot = self
                .manager
                .reconcile(&prior.good, &prior.bad, &harvest.candidates)
                .await;
            let (store, staged) = (self.store.clone(), snapshot.clone());
            tokio::task::spawn_blocking(move || staged.save(&store)).await??;
            info!(
                good = snapshot.good.len(),
                bad = snapshot.bad.len(),
                dir = %self.store.dir().display(),
                "snapshot saved"
            );

            Ok::<_, Error>(RunSummary {
                run_id,
                harvest,
                snapshot,
            })
        }
        .instrument(span)
        .await
    }
}
