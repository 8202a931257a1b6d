//! Application configuration loading and validation.
//!
//! Configuration is loaded from a TOML file with environment variable
//! overrides for secrets (`ANTHROPIC_API_KEY`, Telegram credentials); secrets
//! never live in the file.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

use crate::domain::{ExitPolicy, StrategyKind};
use crate::error::{ConfigError, Result};

#[derive(Debug, Deserialize)]
pub struct Config {
    pub network: NetworkConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub reconnection: ReconnectionConfig,
    #[serde(default)]
    pub strategies: StrategiesConfig,
    #[serde(default)]
    pub estimator: EstimatorConfig,
    #[serde(default)]
    pub telegram: TelegramAppConfig,
    /// Dry-run mode: evaluate and decide, route closes to the paper gateway.
    #[serde(default = "default_true")]
    pub dry_run: bool,
    /// Path to the positions journal file.
    #[serde(default = "default_journal_path")]
    pub journal_path: PathBuf,
}

fn default_journal_path() -> PathBuf {
    PathBuf::from("positions.json")
}

const fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    /// Polymarket CLOB market websocket.
    pub ws_url: String,
    /// CLOB REST endpoint for fallback quote fetches.
    pub api_url: String,
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

/// Risk sizing configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    /// Total bankroll the category cap is measured against.
    #[serde(default = "default_bankroll")]
    pub bankroll: Decimal,
    /// Fractional Kelly multiplier applied to the raw Kelly stake.
    #[serde(default = "default_kelly_fraction")]
    pub kelly_fraction: Decimal,
    /// Hard per-trade stake ceiling in dollars.
    #[serde(default = "default_max_per_trade")]
    pub max_per_trade: Decimal,
    /// Smallest stake worth submitting.
    #[serde(default = "default_min_stake")]
    pub min_stake: Decimal,
    /// Max fraction of bankroll held in one strategy category.
    #[serde(default = "default_category_cap")]
    pub category_cap: Decimal,
}

fn default_bankroll() -> Decimal {
    Decimal::from(100)
}

fn default_kelly_fraction() -> Decimal {
    dec!(0.15)
}

fn default_max_per_trade() -> Decimal {
    Decimal::TWO
}

fn default_min_stake() -> Decimal {
    dec!(0.50)
}

fn default_category_cap() -> Decimal {
    dec!(0.30)
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            bankroll: default_bankroll(),
            kelly_fraction: default_kelly_fraction(),
            max_per_trade: default_max_per_trade(),
            min_stake: default_min_stake(),
            category_cap: default_category_cap(),
        }
    }
}

/// Monitoring loop configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Coordinator subscription refresh interval.
    #[serde(default = "default_refresh_secs")]
    pub refresh_interval_secs: u64,
    /// Fallback reconciler sweep interval.
    #[serde(default = "default_sweep_secs")]
    pub sweep_interval_secs: u64,
    /// Level-2 estimation timeout.
    #[serde(default = "default_estimation_timeout_secs")]
    pub estimation_timeout_secs: u64,
    /// Per-attempt close submission timeout.
    #[serde(default = "default_execution_timeout_secs")]
    pub execution_timeout_secs: u64,
    /// Close submission attempts before the position is marked failed.
    #[serde(default = "default_close_retries")]
    pub close_retries: u32,
}

const fn default_refresh_secs() -> u64 {
    60
}

const fn default_sweep_secs() -> u64 {
    1800
}

const fn default_estimation_timeout_secs() -> u64 {
    30
}

const fn default_execution_timeout_secs() -> u64 {
    30
}

const fn default_close_retries() -> u32 {
    3
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_secs(),
            sweep_interval_secs: default_sweep_secs(),
            estimation_timeout_secs: default_estimation_timeout_secs(),
            execution_timeout_secs: default_execution_timeout_secs(),
            close_retries: default_close_retries(),
        }
    }
}

impl MonitorConfig {
    #[must_use]
    pub fn estimation_timeout(&self) -> Duration {
        Duration::from_secs(self.estimation_timeout_secs)
    }

    #[must_use]
    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }
}

/// Stream reconnection policy.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectionConfig {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Consecutive failures before the circuit breaker opens.
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
    /// How long the circuit stays open before reconnects resume.
    #[serde(default = "default_circuit_breaker_cooldown_ms")]
    pub circuit_breaker_cooldown_ms: u64,
}

const fn default_initial_delay_ms() -> u64 {
    1000
}

const fn default_max_delay_ms() -> u64 {
    60_000
}

const fn default_backoff_multiplier() -> f64 {
    2.0
}

const fn default_max_consecutive_failures() -> u32 {
    10
}

const fn default_circuit_breaker_cooldown_ms() -> u64 {
    300_000
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_consecutive_failures: default_max_consecutive_failures(),
            circuit_breaker_cooldown_ms: default_circuit_breaker_cooldown_ms(),
        }
    }
}

/// Per-strategy monitoring policy: when a tick is worth a Level-2 look,
/// how often estimation may run, and the default exit thresholds for
/// positions opened under the strategy.
#[derive(Debug, Clone, Deserialize)]
pub struct StrategyPolicy {
    /// Minimum edge required to open a position.
    pub min_edge: Decimal,
    /// Level-1 price drift (fraction of reference) that triggers escalation.
    pub reeval_trigger_pct: Decimal,
    /// Minimum seconds between Level-2 estimations per position.
    pub cooldown_secs: u64,
    /// Fresh-estimate edge below which the position is closed.
    pub edge_floor: Option<Decimal>,
    /// Fresh-estimate edge below which an alert is raised but held.
    pub alert_edge: Option<Decimal>,
    pub stop_loss_pct: Option<Decimal>,
    pub take_profit_pct: Option<Decimal>,
    /// Spread convergence close threshold, percent units.
    pub spread_close_pct: Option<Decimal>,
    /// Spread profit-take threshold, percent units.
    pub spread_profit_pct: Option<Decimal>,
    pub max_age_secs: Option<u64>,
}

impl StrategyPolicy {
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    /// Default exit policy for a position opened under this strategy.
    #[must_use]
    pub fn exit_policy(&self) -> ExitPolicy {
        ExitPolicy {
            edge_floor: self.edge_floor,
            alert_edge: self.alert_edge,
            stop_loss_pct: self.stop_loss_pct,
            take_profit_pct: self.take_profit_pct,
            spread_close_pct: self.spread_close_pct,
            spread_profit_pct: self.spread_profit_pct,
            max_age_secs: self.max_age_secs,
        }
    }
}

fn default_prediction_policy() -> StrategyPolicy {
    StrategyPolicy {
        min_edge: dec!(0.03),
        reeval_trigger_pct: dec!(0.05),
        cooldown_secs: 300,
        edge_floor: Some(dec!(0.01)),
        alert_edge: Some(dec!(0.02)),
        stop_loss_pct: None,
        take_profit_pct: None,
        spread_close_pct: None,
        spread_profit_pct: None,
        max_age_secs: None,
    }
}

fn default_micro_arb_policy() -> StrategyPolicy {
    StrategyPolicy {
        min_edge: dec!(0.05),
        reeval_trigger_pct: dec!(0.05),
        cooldown_secs: 300,
        edge_floor: Some(dec!(0.01)),
        alert_edge: Some(dec!(0.02)),
        stop_loss_pct: None,
        take_profit_pct: None,
        spread_close_pct: None,
        spread_profit_pct: None,
        max_age_secs: Some(6 * 3600),
    }
}

fn default_funding_arb_policy() -> StrategyPolicy {
    StrategyPolicy {
        min_edge: dec!(0.01),
        reeval_trigger_pct: dec!(0.05),
        cooldown_secs: 600,
        edge_floor: None,
        alert_edge: None,
        stop_loss_pct: Some(dec!(0.05)),
        take_profit_pct: Some(dec!(0.03)),
        spread_close_pct: None,
        spread_profit_pct: None,
        max_age_secs: Some(24 * 3600),
    }
}

fn default_spread_policy() -> StrategyPolicy {
    StrategyPolicy {
        min_edge: dec!(0.002),
        reeval_trigger_pct: dec!(0.02),
        cooldown_secs: 600,
        edge_floor: None,
        alert_edge: None,
        stop_loss_pct: None,
        take_profit_pct: None,
        spread_close_pct: Some(dec!(0.03)),
        spread_profit_pct: Some(dec!(0.5)),
        max_age_secs: Some(3600),
    }
}

/// Policies for all strategy families.
#[derive(Debug, Clone, Deserialize)]
pub struct StrategiesConfig {
    #[serde(default = "default_prediction_policy")]
    pub prediction: StrategyPolicy,
    #[serde(default = "default_micro_arb_policy")]
    pub micro_arb: StrategyPolicy,
    #[serde(default = "default_funding_arb_policy")]
    pub funding_arb: StrategyPolicy,
    #[serde(default = "default_spread_policy")]
    pub spread: StrategyPolicy,
}

impl Default for StrategiesConfig {
    fn default() -> Self {
        Self {
            prediction: default_prediction_policy(),
            micro_arb: default_micro_arb_policy(),
            funding_arb: default_funding_arb_policy(),
            spread: default_spread_policy(),
        }
    }
}

impl StrategiesConfig {
    #[must_use]
    pub fn policy(&self, kind: StrategyKind) -> &StrategyPolicy {
        match kind {
            StrategyKind::Prediction => &self.prediction,
            StrategyKind::MicroArb => &self.micro_arb,
            StrategyKind::FundingArb => &self.funding_arb,
            StrategyKind::Spread => &self.spread,
        }
    }
}

/// Estimation client configuration. The API key comes from
/// `ANTHROPIC_API_KEY` at runtime, never from the file.
#[derive(Debug, Clone, Deserialize)]
pub struct EstimatorConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// API key loaded from `ANTHROPIC_API_KEY` env var at runtime
    #[serde(skip)]
    pub api_key: Option<String>,
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

const fn default_max_tokens() -> u32 {
    1024
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_tokens: default_max_tokens(),
            api_key: None,
        }
    }
}

/// Telegram notification configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelegramAppConfig {
    /// Enable telegram notifications.
    #[serde(default)]
    pub enabled: bool,
    /// Send edge-thin / estimation-failed alerts.
    #[serde(default = "default_true")]
    pub notify_alerts: bool,
    /// Send close and failure notices.
    #[serde(default = "default_true")]
    pub notify_closes: bool,
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;

        let mut config: Self = toml::from_str(&content).map_err(ConfigError::Parse)?;

        // Secrets come from the environment only
        config.estimator.api_key = std::env::var("ANTHROPIC_API_KEY").ok();

        config.validate()?;

        Ok(config)
    }

    #[allow(clippy::result_large_err)]
    fn validate(&self) -> Result<()> {
        if self.network.ws_url.is_empty() {
            return Err(ConfigError::MissingField { field: "ws_url" }.into());
        }
        if self.network.api_url.is_empty() {
            return Err(ConfigError::MissingField { field: "api_url" }.into());
        }
        if self.risk.bankroll <= Decimal::ZERO {
            return Err(ConfigError::InvalidValue {
                field: "risk.bankroll",
                reason: "must be positive".to_string(),
            }
            .into());
        }
        if self.risk.category_cap <= Decimal::ZERO || self.risk.category_cap > Decimal::ONE {
            return Err(ConfigError::InvalidValue {
                field: "risk.category_cap",
                reason: "must be in (0, 1]".to_string(),
            }
            .into());
        }
        if self.monitor.close_retries == 0 {
            return Err(ConfigError::InvalidValue {
                field: "monitor.close_retries",
                reason: "must be at least 1".to_string(),
            }
            .into());
        }
        Ok(())
    }

    pub fn init_logging(&self) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.logging.level));

        match self.logging.format.as_str() {
            "json" => {
                fmt().json().with_env_filter(filter).init();
            }
            _ => {
                fmt().with_env_filter(filter).init();
            }
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: NetworkConfig {
                ws_url: "wss://ws-subscriptions-clob.polymarket.com/ws/market".into(),
                api_url: "https://clob.polymarket.com".into(),
            },
            logging: LoggingConfig {
                level: "info".into(),
                format: "pretty".into(),
            },
            risk: RiskConfig::default(),
            monitor: MonitorConfig::default(),
            reconnection: ReconnectionConfig::default(),
            strategies: StrategiesConfig::default(),
            estimator: EstimatorConfig::default(),
            telegram: TelegramAppConfig::default(),
            dry_run: true,
            journal_path: default_journal_path(),
        }
    }
}
