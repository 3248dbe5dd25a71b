use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Normalized odds snapshot for one game (provider-agnostic).
/// Prices are American odds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OddsQuote {
    pub game_key: String,
    pub moneyline: Moneyline,
    pub spread: Spread,
    pub total: Total,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Moneyline {
    pub home: i32,
    pub away: i32,
}

/// `line` is the home handicap: -3.5 means home is favored by 3.5.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Spread {
    pub line: f64,
    pub home: i32,
    pub away: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Total {
    pub points: f64,
    pub over: i32,
    pub under: i32,
}

/// One bettable outcome of a quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetSide {
    HomeMoneyline,
    AwayMoneyline,
    HomeSpread,
    AwaySpread,
    Over,
    Under,
}

impl BetSide {
    pub const ALL: [BetSide; 6] = [
        BetSide::HomeMoneyline,
        BetSide::AwayMoneyline,
        BetSide::HomeSpread,
        BetSide::AwaySpread,
        BetSide::Over,
        BetSide::Under,
    ];

    /// The other outcome of the same two-way market.
    pub fn opposite(self) -> BetSide {
        match self {
            BetSide::HomeMoneyline => BetSide::AwayMoneyline,
            BetSide::AwayMoneyline => BetSide::HomeMoneyline,
            BetSide::HomeSpread => BetSide::AwaySpread,
            BetSide::AwaySpread => BetSide::HomeSpread,
            BetSide::Over => BetSide::Under,
            BetSide::Under => BetSide::Over,
        }
    }
}

impl OddsQuote {
    pub fn new(game_key: &str, moneyline: Moneyline, spread: Spread, total: Total) -> Self {
        Self {
            game_key: game_key.to_string(),
            moneyline,
            spread,
            total,
            timestamp: Utc::now(),
        }
    }

    /// American price offered for `side`.
    pub fn price(&self, side: BetSide) -> i32 {
        match side {
            BetSide::HomeMoneyline => self.moneyline.home,
            BetSide::AwayMoneyline => self.moneyline.away,
            BetSide::HomeSpread => self.spread.home,
            BetSide::AwaySpread => self.spread.away,
            BetSide::Over => self.total.over,
            BetSide::Under => self.total.under,
        }
    }

    /// Human-readable bet label, e.g. "home spread -3.5 (-110)".
    pub fn describe(&self, side: BetSide) -> String {
        let price = format_american(self.price(side));
        match side {
            BetSide::HomeMoneyline => format!("home moneyline ({})", price),
            BetSide::AwayMoneyline => format!("away moneyline ({})", price),
            BetSide::HomeSpread => format!("home spread {:+} ({})", self.spread.line, price),
            BetSide::AwaySpread => format!("away spread {:+} ({})", -self.spread.line, price),
            BetSide::Over => format!("over {} ({})", self.total.points, price),
            BetSide::Under => format!("under {} ({})", self.total.points, price),
        }
    }
}

fn format_american(price: i32) -> String {
    if price > 0 {
        format!("+{}", price)
    } else {
        price.to_string()
    }
}
