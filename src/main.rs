use anyhow::{Context, Result};
use futures_util::StreamExt;
use live_odds::config::SimulationConfig;
use live_odds::feed::fastest::FastestSource;
use live_odds::feed::simulated::SimulatedOddsSource;
use live_odds::resilience::FetchStatus;
use live_odds::{Config, DataManager, LiveOddsStream, LiveSource, OddsQuote};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const DEFAULT_CONFIG: &str = "config.toml";

fn load_config() -> Result<Config> {
    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    if !path.exists() && path == Path::new(DEFAULT_CONFIG) {
        tracing::warn!("{} not found, using built-in defaults", DEFAULT_CONFIG);
        return Ok(Config::default());
    }
    Config::load(&path)
}

fn print_quote(label: &str, quote: &OddsQuote) {
    println!(
        "  {:<10} {:<22} ML {:>5}/{:>5}  spread {:+} ({}/{})  total {} ({}/{})",
        label,
        quote.game_key,
        quote.moneyline.home,
        quote.moneyline.away,
        quote.spread.line,
        quote.spread.home,
        quote.spread.away,
        quote.total.points,
        quote.total.over,
        quote.total.under,
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("live_odds=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = load_config()?;
    let games = config.demo.games.clone();
    // Two simulated books raced per fetch; the primary also drives live streams
    let primary = Arc::new(SimulatedOddsSource::new(&config.simulation));
    let mirror = Arc::new(SimulatedOddsSource::new(&SimulationConfig {
        latency_ms: config.simulation.latency_ms * 2,
        seed: config.simulation.seed.map(|seed| seed.wrapping_add(1)),
        ..config.simulation.clone()
    }));
    let racer = Arc::new(FastestSource::new(vec![primary.clone(), mirror.clone()]));
    let manager = DataManager::new(config.clone(), racer, primary.clone());

    println!();
    println!("  Live Odds Access Layer v0.1.0");
    println!("  =============================");
    println!();

    // --- Phase 1: cached reads ---
    println!("  Cached reads:");
    let max_age = config.cache.max_age();
    for game in games.iter().take(2) {
        let started = Instant::now();
        let first = manager.get_game_data(game, max_age).await;
        let first_ms = started.elapsed().as_millis();
        let started = Instant::now();
        let second = manager.get_game_data(game, max_age).await;
        let second_ms = started.elapsed().as_millis();
        match (first, second) {
            (Ok(a), Ok(b)) => {
                print_quote("fetched", &a);
                println!(
                    "             fetch {}ms, cached read {}ms, same entry: {}",
                    first_ms,
                    second_ms,
                    Arc::ptr_eq(&a, &b)
                );
            }
            (Err(e), _) | (_, Err(e)) => println!("  {:<10} {:<22} {}", "error", game, e),
        }
    }
    println!();

    // --- Phase 2: batch fetch ---
    println!("  Batch fetch of {} games:", games.len());
    let started = Instant::now();
    let outcomes = manager.fetch_many(&games).await;
    for outcome in &outcomes {
        match &outcome.status {
            FetchStatus::Fetched(quote) => print_quote("ok", quote),
            FetchStatus::Failed(e) => println!("  {:<10} {:<22} {}", "failed", outcome.game_key, e),
        }
    }
    let breaker = manager.fetcher().breaker().snapshot();
    println!(
        "  {} of {} succeeded in {}ms, breaker {} ({} consecutive failures)",
        outcomes.iter().filter(|o| o.is_success()).count(),
        outcomes.len(),
        started.elapsed().as_millis(),
        breaker.state,
        breaker.consecutive_failures
    );
    println!();

    // --- Phase 3: live subscription ---
    let live_game = games.first().cloned().context("demo.games is empty")?;
    println!("  Live updates for {} ({}s):", live_game, config.demo.live_secs);
    let received = Arc::new(AtomicUsize::new(0));
    let counter = received.clone();
    let subscription = manager.subscribe_to_game(&live_game, move |quote| {
        counter.fetch_add(1, Ordering::Relaxed);
        print_quote("live", quote);
        Ok(())
    });
    tokio::time::sleep(Duration::from_secs(config.demo.live_secs)).await;
    subscription.unsubscribe();
    println!(
        "  {} updates received, stream running after unsubscribe: {}",
        received.load(Ordering::Relaxed),
        manager.is_streaming(&live_game)
    );
    println!();

    // --- Phase 4: pull-based stream ---
    println!("  Pull-based stream (3 updates):");
    let stream = LiveOddsStream::new(
        &live_game,
        config.stream.period(),
        primary.open(&live_game),
    );
    let mut updates = stream.updates().take(3);
    while let Some(quote) = updates.next().await {
        print_quote("pulled", &quote);
    }
    drop(updates);
    println!("  stream running after consumer dropped: {}", stream.is_running());
    println!();

    // --- Phase 5: value bets ---
    let scan = manager
        .detect_value_bets(&games, config.value_bets.min_edge)
        .await;
    println!(
        "  Value bets (min edge {:.1}%): {} found",
        config.value_bets.min_edge * 100.0,
        scan.opportunities.len()
    );
    println!(
        "{}",
        serde_json::to_string_pretty(&scan.opportunities).context("Failed to serialize value bets")?
    );
    for (game, error) in &scan.failures {
        println!("  skipped {}: {}", game, error);
    }
    println!();

    manager.shutdown();
    println!(
        "  Shut down. Raw fetches: {} primary, {} mirror.",
        primary.calls(),
        mirror.calls()
    );
    Ok(())
}
