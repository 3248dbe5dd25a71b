//! In-process stand-in for a sportsbook odds API.
//!
//! Fetches sleep for a configured latency and fail transiently at a configured
//! rate. Game keys containing `INVALID` always fail. Live quotes are a bounded
//! random walk around the fetched line.

use super::types::{Moneyline, OddsQuote, Spread, Total};
use super::{LiveSource, OddsSource, QuoteGenerator};
use crate::config::SimulationConfig;
use crate::engine::pricing::{implied_probability, probability_to_american};
use crate::error::AccessError;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

const BASE_MONEYLINE: Moneyline = Moneyline { home: -150, away: 130 };
const BASE_SPREAD: Spread = Spread { line: -3.5, home: -110, away: -110 };
const BASE_TOTAL: Total = Total { points: 215.5, over: -105, under: -115 };

/// Moneyline margin kept constant while the home probability moves.
const MONEYLINE_VIG: f64 = 0.035;

pub struct SimulatedOddsSource {
    rng: Mutex<StdRng>,
    failure_rate: f64,
    latency: Duration,
    calls: AtomicU64,
}

impl SimulatedOddsSource {
    pub fn new(config: &SimulationConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng: Mutex::new(rng),
            failure_rate: config.failure_rate.clamp(0.0, 1.0),
            latency: Duration::from_millis(config.latency_ms),
            calls: AtomicU64::new(0),
        }
    }

    /// Number of raw fetches attempted so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn seed_for_stream(&self) -> u64 {
        self.rng.lock().map(|mut r| r.gen()).unwrap_or_default()
    }
}

/// Base line for a game with a per-fetch perturbation.
fn perturbed_quote(game_key: &str, rng: &mut StdRng) -> OddsQuote {
    let home_prob = implied_probability(BASE_MONEYLINE.home) + rng.gen_range(-0.08..=0.08);
    let line = BASE_SPREAD.line + 0.5 * rng.gen_range(-2..=2) as f64;
    let points = BASE_TOTAL.points + 0.5 * rng.gen_range(-6..=6) as f64;
    OddsQuote::new(
        game_key,
        moneyline_from_home_prob(home_prob),
        Spread { line, ..BASE_SPREAD },
        Total { points, ..BASE_TOTAL },
    )
}

fn moneyline_from_home_prob(home_prob: f64) -> Moneyline {
    let home_prob = home_prob.clamp(0.05, 0.95);
    Moneyline {
        home: probability_to_american(home_prob),
        away: probability_to_american(1.0 + MONEYLINE_VIG - home_prob),
    }
}

#[async_trait]
impl OddsSource for SimulatedOddsSource {
    async fn fetch_odds(&self, game_key: &str) -> Result<OddsQuote, AccessError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if game_key.contains("INVALID") {
            return Err(AccessError::fetch_failed(game_key, "game not found"));
        }

        let mut rng = self
            .rng
            .lock()
            .map_err(|_| AccessError::fetch_failed(game_key, "simulator rng poisoned"))?;
        if rng.gen_bool(self.failure_rate) {
            tracing::debug!(game = game_key, "simulated transient failure");
            return Err(AccessError::fetch_failed(game_key, "simulated upstream error"));
        }
        Ok(perturbed_quote(game_key, &mut rng))
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

impl LiveSource for SimulatedOddsSource {
    fn open(&self, game_key: &str) -> Box<dyn QuoteGenerator> {
        Box::new(RandomWalk::new(game_key, self.seed_for_stream()))
    }
}

/// Live odds drifting in small steps around the base line.
pub struct RandomWalk {
    game_key: String,
    home_prob: f64,
    line: f64,
    points: f64,
    rng: StdRng,
}

impl RandomWalk {
    pub fn new(game_key: &str, seed: u64) -> Self {
        Self {
            game_key: game_key.to_string(),
            home_prob: implied_probability(BASE_MONEYLINE.home),
            line: BASE_SPREAD.line,
            points: BASE_TOTAL.points,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl QuoteGenerator for RandomWalk {
    fn next_quote(&mut self) -> OddsQuote {
        self.home_prob = (self.home_prob + self.rng.gen_range(-0.02..=0.02)).clamp(0.05, 0.95);
        // Lines move less often than prices
        if self.rng.gen_bool(0.2) {
            self.line += if self.rng.gen_bool(0.5) { 0.5 } else { -0.5 };
        }
        if self.rng.gen_bool(0.2) {
            self.points += if self.rng.gen_bool(0.5) { 0.5 } else { -0.5 };
        }
        OddsQuote::new(
            &self.game_key,
            moneyline_from_home_prob(self.home_prob),
            Spread { line: self.line, ..BASE_SPREAD },
            Total { points: self.points, ..BASE_TOTAL },
        )
    }
}
