/// Convert American odds to implied probability.
/// Positive odds (e.g., +150): prob = 100 / (odds + 100)
/// Negative odds (e.g., -150): prob = |odds| / (|odds| + 100)
pub fn american_to_probability(odds: f64) -> f64 {
    if odds > 0.0 {
        100.0 / (odds + 100.0)
    } else {
        let abs = odds.abs();
        abs / (abs + 100.0)
    }
}

/// Implied probability of an integer American price.
pub fn implied_probability(price: i32) -> f64 {
    american_to_probability(price as f64)
}

/// Inverse of `american_to_probability`, rounded to the nearest whole price.
/// Probabilities are clamped to 1%..99% so the result is always a valid quote.
pub fn probability_to_american(prob: f64) -> i32 {
    let p = prob.clamp(0.01, 0.99);
    if p >= 0.5 {
        (-(p / (1.0 - p)) * 100.0).round() as i32
    } else {
        (((1.0 - p) / p) * 100.0).round() as i32
    }
}

/// Fair probabilities of a two-way market with the bookmaker margin
/// removed, in argument order.
pub fn devig(first: i32, second: i32) -> (f64, f64) {
    let first = implied_probability(first);
    let second = implied_probability(second);
    let total = first + second;
    if total <= 0.0 {
        return (0.5, 0.5);
    }
    (first / total, second / total)
}

/// Bookmaker margin of a two-way market: how far the implied probabilities
/// sum above 1.
pub fn overround(first: i32, second: i32) -> f64 {
    implied_probability(first) + implied_probability(second) - 1.0
}
