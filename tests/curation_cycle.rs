use async_trait::async_trait;
use proxy_curator::{
    CheckStatus, Config, CrawlerConfig, Curator, FetchError, PageFetcher, PoolSnapshot,
    ProxyCheckResult, ProxyCrawler, ProxyProbe, ProxyRecord, ProxySource, SourceRegistry,
    StateStore,
};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

struct StaticFetcher {
    pages: HashMap<String, String>,
}

#[async_trait]
impl PageFetcher for StaticFetcher {
    async fn fetch(&self, url: &str, _timeout: Duration) -> Result<String, FetchError> {
        self.pages.get(url).cloned().ok_or(FetchError::Status(503))
    }
}

struct ListProbe {
    working: HashSet<String>,
}

#[async_trait]
impl ProxyProbe for ListProbe {
    async fn probe(&self, record: &ProxyRecord, _timeout: Duration) -> ProxyCheckResult {
        if self.working.contains(&record.to_simple_string()) {
            ProxyCheckResult::working(record.clone(), 25, format!("{{\"origin\": \"{}\"}}", record.address))
        } else {
            ProxyCheckResult::failed(record.clone(), CheckStatus::Refused("os error 111".into()))
        }
    }
}

const LISTING: &str = r#"<table><tbody>
<tr><td>1.2.3.4</td><td>8080</td><td>US</td><td>United States</td><td>elite</td><td>no</td><td>yes</td></tr>
<tr><td>5.6.7.8</td><td>3128</td><td>DE</td><td>Germany</td><td>anonymous</td><td>no</td><td>no</td></tr>
</tbody></table>"#;

fn curator(config: &Config, pages: &[(&str, &str)], working: &[&str]) -> Curator<StaticFetcher, ListProbe> {
    let fetcher = StaticFetcher {
        pages: pages
            .iter()
            .map(|(url, body)| (url.to_string(), body.to_string()))
            .collect(),
    };
    let crawler = ProxyCrawler::with_fetcher(CrawlerConfig::new().with_pacing(Duration::ZERO), fetcher);
    let probe = ListProbe {
        working: working.iter().map(|s| s.to_string()).collect(),
    };
    Curator::with_parts(config, crawler, probe)
}

#[tokio::test]
async fn test_runs_converge_and_persist() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        state_dir: dir.path().to_path_buf(),
        ..Config::default()
    };
    let sources = vec![
        ProxySource::from_url("https://list.example/"),
        ProxySource::from_url("https://broken.example/"),
    ];

    let first = curator(&config, &[("https://list.example/", LISTING)], &["1.2.3.4:8080"])
        .run(&sources)
        .await
        .unwrap();
    assert_eq!(first.snapshot.good.len(), 1);
    assert_eq!(first.snapshot.bad.len(), 1);
    let good = first.snapshot.good.iter().next().unwrap();
    assert_eq!(good.country, "United States");
    assert!(good.last_verified_ok.is_some());

    let store = StateStore::new(dir.path());
    assert_eq!(PoolSnapshot::load(&store), first.snapshot);

    // two more failures retire the broken source
    for _ in 0..2 {
        curator(&config, &[("https://list.example/", LISTING)], &["1.2.3.4:8080"])
            .run(&sources)
            .await
            .unwrap();
    }
    let registry = SourceRegistry::load(store.clone());
    assert!(!registry.is_active("https://broken.example/"));
    assert!(registry.is_active("https://list.example/"));

    let last = PoolSnapshot::load(&store);
    assert_eq!(
        last.good.keys().map(|k| k.to_string()).collect::<Vec<_>>(),
        vec!["1.2.3.4:8080"]
    );
    assert_eq!(
        last.bad.keys().map(|k| k.to_string()).collect::<Vec<_>>(),
        vec!["5.6.7.8:3128"]
    );
}

#[tokio::test]
async fn test_pool_survives_when_every_source_is_dead() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        state_dir: dir.path().to_path_buf(),
        ..Config::default()
    };
    let sources = vec![ProxySource::from_url("https://list.example/")];

    curator(&config, &[("https://list.example/", LISTING)], &["1.2.3.4:8080", "5.6.7.8:3128"])
        .run(&sources)
        .await
        .unwrap();

    // the source disappears and the network turns bad
    for _ in 0..3 {
        let summary = curator(&config, &[], &[]).run(&sources).await.unwrap();
        assert!(summary.snapshot.is_disjoint());
        assert_eq!(summary.snapshot.good.len(), 2);
    }

    let registry = SourceRegistry::load(StateStore::new(dir.path()));
    assert!(!registry.is_active("https://list.example/"));
}

#[tokio::test]
async fn test_harvest_only_leaves_pool_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        state_dir: dir.path().to_path_buf(),
        ..Config::default()
    };
    let sources = vec![ProxySource::from_url("https://list.example/")];
    let report = curator(&config, &[("https://list.example/", LISTING)], &[])
        .harvest(&sources)
        .await
        .unwrap();

    assert_eq!(report.candidates.len(), 2);
    assert!(!dir.path().join("good_proxies.json").exists());
}
