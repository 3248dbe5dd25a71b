use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub value_bets: ValueBetConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub demo: DemoConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,
}

fn default_requests_per_second() -> f64 { 10.0 }

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Random spread applied to each backoff delay (0.0 = deterministic).
    #[serde(default)]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 { 2 }
fn default_base_delay_ms() -> u64 { 500 }

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            jitter: 0.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,
    #[serde(default = "default_breaker_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_max_failures() -> u32 { 3 }
fn default_breaker_timeout_ms() -> u64 { 30_000 }

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: default_max_failures(),
            timeout_ms: default_breaker_timeout_ms(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StreamConfig {
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,
}

fn default_period_ms() -> u64 { 2000 }

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            period_ms: default_period_ms(),
        }
    }
}

impl StreamConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_max_age_ms")]
    pub max_age_ms: u64,
    /// Serve an expired entry when a refresh fails instead of the error.
    #[serde(default = "default_serve_stale")]
    pub serve_stale_on_error: bool,
}

fn default_max_age_ms() -> u64 { 300_000 }
fn default_serve_stale() -> bool { true }

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_age_ms: default_max_age_ms(),
            serve_stale_on_error: default_serve_stale(),
        }
    }
}

impl CacheConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_millis(self.max_age_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ValueBetConfig {
    #[serde(default = "default_min_edge")]
    pub min_edge: f64,
    /// Logistic slope mapping spread points to home win probability.
    #[serde(default = "default_spread_slope")]
    pub spread_slope: f64,
    #[serde(default = "default_model_confidence")]
    pub model_confidence: f64,
}

fn default_min_edge() -> f64 { 0.05 }
fn default_spread_slope() -> f64 { 0.14 }
fn default_model_confidence() -> f64 { 0.6 }

impl Default for ValueBetConfig {
    fn default() -> Self {
        Self {
            min_edge: default_min_edge(),
            spread_slope: default_spread_slope(),
            model_confidence: default_model_confidence(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SimulationConfig {
    #[serde(default = "default_failure_rate")]
    pub failure_rate: f64,
    #[serde(default = "default_latency_ms")]
    pub latency_ms: u64,
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_failure_rate() -> f64 { 0.3 }
fn default_latency_ms() -> u64 { 50 }

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            failure_rate: default_failure_rate(),
            latency_ms: default_latency_ms(),
            seed: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DemoConfig {
    #[serde(default = "default_games")]
    pub games: Vec<String>,
    #[serde(default = "default_live_secs")]
    pub live_secs: u64,
}

fn default_games() -> Vec<String> {
    vec![
        "Lakers vs Warriors".to_string(),
        "Celtics vs Heat".to_string(),
        "Bulls vs Knicks".to_string(),
    ]
}
fn default_live_secs() -> u64 { 5 }

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            games: default_games(),
            live_secs: default_live_secs(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| "Failed to parse config TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let rps = self.rate_limit.requests_per_second;
        if !rps.is_finite() || rps <= 0.0 {
            anyhow::bail!("rate_limit.requests_per_second must be > 0, got {}", rps);
        }
        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            anyhow::bail!("retry.jitter must be within 0.0..=1.0, got {}", self.retry.jitter);
        }
        if self.circuit_breaker.max_failures == 0 {
            anyhow::bail!("circuit_breaker.max_failures must be at least 1");
        }
        if self.stream.period_ms == 0 {
            anyhow::bail!("stream.period_ms must be > 0");
        }
        if !(0.0..=1.0).contains(&self.simulation.failure_rate) {
            anyhow::bail!(
                "simulation.failure_rate must be within 0.0..=1.0, got {}",
                self.simulation.failure_rate
            );
        }
        if !(0.0..=1.0).contains(&self.value_bets.model_confidence) {
            anyhow::bail!("value_bets.model_confidence must be within 0.0..=1.0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_parses() {
        let config = Config::load(Path::new("config.toml")).unwrap();
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.base_delay_ms, 500);
        assert_eq!(config.circuit_breaker.max_failures, 3);
        assert_eq!(config.stream.period_ms, 2000);
        assert!(config.cache.serve_stale_on_error);
        assert!(!config.demo.games.is_empty());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = toml::from_str("[retry]\nmax_attempts = 4\n").unwrap();
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.base_delay_ms, 500);
        assert!((config.rate_limit.requests_per_second - 10.0).abs() < f64::EPSILON);
        assert_eq!(config.circuit_breaker.timeout(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_rate() {
        let config: Config = toml::from_str("[rate_limit]\nrequests_per_second = 0.0\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let config: Config = toml::from_str("[retry]\nmax_attempts = 0\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_attempts"));
    }
}
