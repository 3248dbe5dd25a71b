//! Value-bet detection: compare a quote's implied probabilities against a model.

use super::pricing::{devig, implied_probability, overround};
use crate::config::ValueBetConfig;
use crate::feed::types::{BetSide, OddsQuote};
use serde::Serialize;
use std::collections::HashMap;

/// A model's view of one outcome.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    pub probability: f64,
    /// 0..1
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValueBet {
    pub game_key: String,
    pub side: BetSide,
    pub bet: String,
    pub price: i32,
    pub implied_probability: f64,
    /// This side's share of the two-way market once the margin is removed.
    pub no_vig_probability: f64,
    pub market_margin: f64,
    pub estimated_probability: f64,
    pub edge: f64,
    pub confidence: f64,
}

/// Estimates the true probability of an outcome. `None` means no opinion,
/// and the outcome is skipped.
pub trait ProbabilityModel: Send + Sync {
    fn estimate(&self, quote: &OddsQuote, side: BetSide) -> Option<Estimate>;
}

/// Derives moneyline probabilities from the posted spread with a logistic curve:
/// `p_home = 1 / (1 + e^(slope * line))`. Spread and total outcomes are treated
/// as coin flips, so only their vig shows up as (negative) edge.
#[derive(Debug, Clone)]
pub struct SpreadModel {
    pub slope: f64,
    pub confidence: f64,
}

impl SpreadModel {
    pub fn from_config(config: &ValueBetConfig) -> Self {
        Self {
            slope: config.spread_slope,
            confidence: config.model_confidence,
        }
    }

    pub fn home_win_probability(&self, spread_line: f64) -> f64 {
        1.0 / (1.0 + (self.slope * spread_line).exp())
    }
}

impl ProbabilityModel for SpreadModel {
    fn estimate(&self, quote: &OddsQuote, side: BetSide) -> Option<Estimate> {
        let home = self.home_win_probability(quote.spread.line);
        let probability = match side {
            BetSide::HomeMoneyline => home,
            BetSide::AwayMoneyline => 1.0 - home,
            BetSide::HomeSpread | BetSide::AwaySpread | BetSide::Over | BetSide::Under => 0.5,
        };
        Some(Estimate {
            probability,
            confidence: self.confidence,
        })
    }
}

/// Caller-supplied estimates keyed by game and outcome.
#[derive(Debug, Clone, Default)]
pub struct FixedEstimates {
    estimates: HashMap<(String, BetSide), Estimate>,
}

impl FixedEstimates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, game_key: &str, side: BetSide, probability: f64, confidence: f64) -> Self {
        self.insert(game_key, side, probability, confidence);
        self
    }

    pub fn insert(&mut self, game_key: &str, side: BetSide, probability: f64, confidence: f64) {
        self.estimates.insert(
            (game_key.to_string(), side),
            Estimate {
                probability,
                confidence: confidence.clamp(0.0, 1.0),
            },
        );
    }
}

impl ProbabilityModel for FixedEstimates {
    fn estimate(&self, quote: &OddsQuote, side: BetSide) -> Option<Estimate> {
        self.estimates.get(&(quote.game_key.clone(), side)).copied()
    }
}

/// Every outcome of `quote` whose edge is at least `min_edge`.
pub fn scan_quote(quote: &OddsQuote, model: &dyn ProbabilityModel, min_edge: f64) -> Vec<ValueBet> {
    BetSide::ALL
        .iter()
        .filter_map(|&side| {
            let estimate = model.estimate(quote, side)?;
            let price = quote.price(side);
            let other = quote.price(side.opposite());
            let implied = implied_probability(price);
            let edge = estimate.probability - implied;
            if edge < min_edge {
                return None;
            }
            Some(ValueBet {
                game_key: quote.game_key.clone(),
                side,
                bet: quote.describe(side),
                price,
                implied_probability: implied,
                no_vig_probability: devig(price, other).0,
                market_margin: overround(price, other),
                estimated_probability: estimate.probability,
                edge,
                confidence: estimate.confidence,
            })
        })
        .collect()
}

/// Highest edge first.
pub fn rank(bets: &mut [ValueBet]) {
    bets.sort_by(|a, b| b.edge.total_cmp(&a.edge));
}
