use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use proxy_curator::{
    Config, Curator, HarvestReport, PoolSnapshot, ProxyCrawler, ProxySource, SourceRegistry,
    StateStore,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Number of good proxies printed after a run
const SAMPLE_SIZE: usize = 10;

/// Harvests public proxy lists and keeps a curated pool of working proxies
#[derive(Parser)]
#[command(name = "proxy-curator")]
#[command(about = "Harvests public proxy lists and keeps a curated pool of working proxies")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Directory holding the state documents
    #[arg(short, long, default_value = "state", global = true)]
    state_dir: PathBuf,
}

#[derive(Args, Clone, Default)]
struct SourceArgs {
    /// Source URLs to harvest (can specify multiple)
    #[arg(short, long)]
    url: Vec<String>,
    /// File containing source URLs (one URL per line)
    #[arg(short = 'f', long)]
    url_file: Option<PathBuf>,
}

#[derive(Args, Clone)]
struct HarvestArgs {
    #[command(flatten)]
    sources: SourceArgs,
    /// Timeout in seconds for fetching a source page
    #[arg(long, default_value = "12")]
    fetch_timeout: u64,
    /// Pause in milliseconds between two source fetches
    #[arg(long, default_value = "300")]
    pacing_ms: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Harvest, check and persist the pool (default)
    Run {
        #[command(flatten)]
        harvest: HarvestArgs,
        /// Number of concurrent checks
        #[arg(short = 'n', long, default_value = "10")]
        threads: usize,
        /// Timeout in seconds for each proxy check
        #[arg(long, default_value = "6")]
        timeout: u64,
        /// URL to test proxies against
        #[arg(long, default_value = "https://httpbin.org/ip")]
        test_url: String,
        /// Maximum number of new candidates to check
        #[arg(long, default_value = "30")]
        max_new: usize,
        /// Upper bound on the whole test batch, 0 for no limit
        #[arg(long, default_value = "120")]
        test_cap: usize,
        /// Do not re-check proxies that were good last time
        #[arg(long)]
        no_retest: bool,
    },
    /// Harvest candidates and print them without checking
    Harvest {
        #[command(flatten)]
        harvest: HarvestArgs,
        /// Output file for harvested proxies
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List sources with their registry status
    Sources {
        #[command(flatten)]
        sources: SourceArgs,
    },
    /// Print the persisted pool
    Show {
        /// Also list bad proxies
        #[arg(long)]
        bad: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("proxy_curator=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config {
        state_dir: cli.state_dir.clone(),
        ..Config::default()
    };

    match cli.command {
        None => {
            let curator = Curator::new(&config)?;
            let sources = ProxyCrawler::get_common_sources();
            run_until_interrupted(&curator, &sources).await?;
        }
        Some(Commands::Run {
            harvest,
            threads,
            timeout,
            test_url,
            max_new,
            test_cap,
            no_retest,
        }) => {
            apply_harvest_args(&mut config, &harvest);
            config.checker = config
                .checker
                .with_concurrency(threads)
                .with_timeout(Duration::from_secs(timeout))
                .with_test_url(test_url);
            config.policy = config
                .policy
                .with_retest_prior_good(!no_retest)
                .with_max_new_to_test(max_new)
                .with_overall_test_cap((test_cap > 0).then_some(test_cap));

            let sources = load_sources(&harvest.sources)?;
            let curator = Curator::new(&config)?;
            run_until_interrupted(&curator, &sources).await?;
        }
        Some(Commands::Harvest { harvest, output }) => {
            apply_harvest_args(&mut config, &harvest);
            let sources = load_sources(&harvest.sources)?;
            let curator = Curator::new(&config)?;
            let report = curator.harvest(&sources).await?;
            print_harvest(&report);

            let lines: Vec<String> = report
                .candidates
                .iter()
                .map(|p| p.to_simple_string())
                .collect();
            if let Some(output_path) = output {
                std::fs::write(&output_path, lines.join("\n"))
                    .with_context(|| format!("Failed to write {:?}", output_path))?;
                println!("Saved proxies to {:?}", output_path);
            } else {
                for line in &lines {
                    println!("{}", line);
                }
            }
        }
        Some(Commands::Sources { sources }) => {
            let sources = load_sources(&sources)?;
            let registry = SourceRegistry::load(StateStore::new(&config.state_dir));
            for source in &sources {
                println!("{:<24} {:<30} {}", source.name, registry.status(source.id()).to_string(), source.url);
            }
            for (url, marker) in registry.dead_sources() {
                if !sources.iter().any(|s| s.id() == url) {
                    println!("{:<24} dead since {} {}", "(unlisted)", marker.marked_dead_at.to_rfc3339(), url);
                }
            }
        }
        Some(Commands::Show { bad }) => {
            let snapshot = PoolSnapshot::load(&StateStore::new(&config.state_dir));
            print_pool(&snapshot, usize::MAX);
            if bad {
                println!("\nBad proxies:");
                for proxy in &snapshot.bad {
                    println!(
                        "  {}  error={}",
                        proxy.to_simple_string(),
                        proxy.last_verification_error.as_deref().unwrap_or("?")
                    );
                }
            }
        }
    }

    Ok(())
}

/// Run until done or Ctrl-C; an interrupted run writes no snapshot
async fn run_until_interrupted(curator: &Curator, sources: &[ProxySource]) -> Result<()> {
    tokio::select! {
        summary = curator.run(sources) => {
            let summary = summary.context("Run failed")?;
            print_harvest(&summary.harvest);
            print_pool(&summary.snapshot, SAMPLE_SIZE);
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, previous snapshot left untouched");
        }
    }
    Ok(())
}

fn apply_harvest_args(config: &mut Config, args: &HarvestArgs) {
    config.crawler = config
        .crawler
        .clone()
        .with_timeout(Duration::from_secs(args.fetch_timeout))
        .with_pacing(Duration::from_millis(args.pacing_ms));
}

/// Sources from flags and file, or the built-in list when none are given
fn load_sources(args: &SourceArgs) -> Result<Vec<ProxySource>> {
    let mut sources: Vec<ProxySource> = args.url.iter().map(|u| ProxySource::from_url(u)).collect();
    if let Some(file_path) = &args.url_file {
        let content = std::fs::read_to_string(file_path)
            .with_context(|| format!("Failed to read {:?}", file_path))?;
        sources.extend(ProxySource::parse_list(&content));
    }
    if sources.is_empty() {
        sources = ProxyCrawler::get_common_sources();
    }
    Ok(sources)
}

fn print_harvest(report: &HarvestReport) {
    for result in &report.results {
        println!("{}: {} [{}]", result.source, result.outcome, result.status);
    }
    println!("Total unique candidates: {}", report.candidates.len());
}

fn print_pool(snapshot: &PoolSnapshot, limit: usize) {
    println!("\nGood proxies: {}", snapshot.good.len());
    println!("Bad proxies: {}", snapshot.bad.len());

    if snapshot.good.is_empty() {
        println!("No working proxies found.");
        return;
    }

    println!("\nWorking proxies:");
    for proxy in snapshot.good.iter().take(limit) {
        let last_ok = proxy
            .last_verified_ok
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "?".to_string());
        let time = proxy
            .response_time_ms
            .map(|ms| format!(" ({}ms)", ms))
            .unwrap_or_default();
        println!(
            "  {}  country={} tls={} source={} last_ok={}{}",
            proxy.to_simple_string(),
            proxy.country,
            proxy.supports_tls,
            proxy.source,
            last_ok,
            time
        );
    }
}
