// Copyright (c) 2024 The Botho Foundation

//! Lottery configuration types.
//!
//! Loaded once at startup and immutable for the lifetime of the process.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::{LotteryError, LotteryResult},
    money::{Amount, BPS_DENOMINATOR},
    pool::RevenueSplit,
};

/// Main lottery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LotteryConfig {
    /// Ticket price and revenue split
    pub pricing: PricingConfig,

    /// Daily draw schedule
    #[serde(default)]
    pub draw: DrawConfig,

    /// Ledger storage
    #[serde(default)]
    pub storage: StorageConfig,

    /// Payout sender
    #[serde(default)]
    pub payout: PayoutConfig,

    /// Event notifications
    #[serde(default)]
    pub notifier: NotifierConfig,
}

/// Ticket pricing and how each ticket's revenue is split.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Price of one ticket
    pub ticket_price: Amount,

    /// Currency label used in messages
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Referral commission in basis points of the paid amount
    #[serde(default = "default_referral_bps")]
    pub referral_bps: u32,

    /// Tax / admin fee in basis points
    #[serde(default = "default_tax_bps")]
    pub tax_bps: u32,

    /// Prize pool share in basis points
    #[serde(default = "default_pool_bps")]
    pub pool_bps: u32,
}

fn default_currency() -> String {
    "USDT".to_string()
}

fn default_ticket_price() -> Amount {
    Amount::from_micros(4_000_000) // 4 USDT
}

fn default_referral_bps() -> u32 {
    2_500 // 1 USDT of a 4 USDT ticket
}

fn default_tax_bps() -> u32 {
    2_500
}

fn default_pool_bps() -> u32 {
    5_000
}

/// Which calendar date a draw fired at the scheduled instant settles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrawDay {
    /// The local date the draw fires on
    Today,
    /// The local date that just ended
    #[default]
    Previous,
}

/// Daily draw schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrawConfig {
    /// Local time of day, `HH:MM` or `HH:MM:SS`
    #[serde(default = "default_draw_time")]
    pub draw_time: String,

    /// Offset of the lottery's local time from UTC, in minutes
    #[serde(default = "default_utc_offset")]
    pub utc_offset_minutes: i32,

    #[serde(default)]
    pub draw_day: DrawDay,

    /// A draw still in progress after this long is taken to have died and
    /// its date is released for a re-run
    #[serde(default = "default_stale_draw")]
    pub stale_after_secs: u64,
}

fn default_draw_time() -> String {
    "00:01".to_string()
}

fn default_utc_offset() -> i32 {
    330 // IST
}

fn default_stale_draw() -> u64 {
    600
}

impl Default for DrawConfig {
    fn default() -> Self {
        Self {
            draw_time: default_draw_time(),
            utc_offset_minutes: default_utc_offset(),
            draw_day: DrawDay::default(),
            stale_after_secs: default_stale_draw(),
        }
    }
}

/// Ledger storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String {
    "trustwin.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

/// How payouts are handed to the external sender.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayoutMode {
    /// Log the request and report it accepted (dry run)
    #[default]
    Log,
    /// POST the request to a payout service
    Webhook,
}

/// Payout sender settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutConfig {
    #[serde(default)]
    pub mode: PayoutMode,

    /// Payout service URL (required if mode = webhook)
    pub webhook_url: Option<String>,

    /// Per-dispatch timeout; a timed out dispatch counts as failed
    #[serde(default = "default_payout_timeout")]
    pub timeout_secs: u64,

    /// Retries inside a single dispatch
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay between retries, multiplied by the attempt number
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    /// How often the engine re-dispatches pending payouts
    #[serde(default = "default_recovery_interval")]
    pub recovery_interval_secs: u64,
}

fn default_payout_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    1_000
}

fn default_recovery_interval() -> u64 {
    300
}

impl Default for PayoutConfig {
    fn default() -> Self {
        Self {
            mode: PayoutMode::default(),
            webhook_url: None,
            timeout_secs: default_payout_timeout(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay(),
            recovery_interval_secs: default_recovery_interval(),
        }
    }
}

/// Event notification settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// POST every ledger event here, if set
    pub webhook_url: Option<String>,
}

impl LotteryConfig {
    /// Load and validate configuration from a TOML file.
    pub fn from_file(path: &str) -> LotteryResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| LotteryError::Config(format!("Failed to read config: {}", e)))?;
        let config: LotteryConfig = toml::from_str(&content)
            .map_err(|e| LotteryError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> LotteryResult<()> {
        self.pricing.validate()?;
        self.draw.draw_time()?;
        self.draw.offset()?;

        if self.payout.mode == PayoutMode::Webhook && self.payout.webhook_url.is_none() {
            return Err(LotteryError::Config(
                "payout.webhook_url required for webhook payout mode".to_string(),
            ));
        }
        if self.draw.stale_after_secs == 0 {
            return Err(LotteryError::Config(
                "draw.stale_after_secs must be positive".to_string(),
            ));
        }
        if self.payout.timeout_secs == 0 {
            return Err(LotteryError::Config(
                "payout.timeout_secs must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

impl PricingConfig {
    /// Validate the price and that the shares fit in 100%.
    pub fn validate(&self) -> LotteryResult<()> {
        if self.ticket_price.is_zero() {
            return Err(LotteryError::Config(
                "pricing.ticket_price must be positive".to_string(),
            ));
        }
        let denominator = BPS_DENOMINATOR as u64;
        let referral_and_tax = self.referral_bps as u64 + self.tax_bps as u64;
        let total = referral_and_tax + self.pool_bps as u64;

        if referral_and_tax > denominator {
            return Err(LotteryError::Config(format!(
                "referral ({} bps) + tax ({} bps) exceeds 100%",
                self.referral_bps, self.tax_bps
            )));
        }
        if total > denominator {
            return Err(LotteryError::Config(format!(
                "referral + tax + pool ({} bps) exceeds 100%",
                total
            )));
        }
        Ok(())
    }

    /// The exact amount `quantity` tickets cost.
    pub fn expected_amount(&self, quantity: u32) -> LotteryResult<Amount> {
        self.ticket_price
            .checked_mul(quantity as u64)
            .ok_or(LotteryError::Overflow)
    }

    /// Split a paid amount into referral, tax, pool and margin.
    pub fn split(&self, gross: Amount) -> RevenueSplit {
        RevenueSplit::new(gross, self.referral_bps, self.tax_bps, self.pool_bps)
    }
}

impl DrawConfig {
    /// Parse the configured draw time.
    pub fn draw_time(&self) -> LotteryResult<NaiveTime> {
        NaiveTime::parse_from_str(&self.draw_time, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(&self.draw_time, "%H:%M:%S"))
            .map_err(|_| {
                LotteryError::Config(format!("Invalid draw.draw_time: {}", self.draw_time))
            })
    }

    /// The lottery's local offset from UTC.
    pub fn offset(&self) -> LotteryResult<FixedOffset> {
        if self.utc_offset_minutes.abs() > 14 * 60 {
            return Err(LotteryError::Config(format!(
                "draw.utc_offset_minutes out of range: {}",
                self.utc_offset_minutes
            )));
        }
        FixedOffset::east_opt(self.utc_offset_minutes * 60).ok_or_else(|| {
            LotteryError::Config(format!(
                "draw.utc_offset_minutes out of range: {}",
                self.utc_offset_minutes
            ))
        })
    }

    /// The lottery's local calendar date at `now`.
    pub fn today(&self, now: DateTime<Utc>) -> LotteryResult<NaiveDate> {
        Ok(now.with_timezone(&self.offset()?).date_naive())
    }

    /// The first scheduled draw instant strictly after `now`.
    pub fn next_draw_at(&self, now: DateTime<Utc>) -> LotteryResult<DateTime<Utc>> {
        let offset = self.offset()?;
        let draw_time = self.draw_time()?;
        let local_now = now.with_timezone(&offset);

        let mut date = local_now.date_naive();
        loop {
            let candidate = offset
                .from_local_datetime(&date.and_time(draw_time))
                .single()
                .ok_or_else(|| LotteryError::Config("Ambiguous draw time".to_string()))?;
            if candidate > local_now {
                return Ok(candidate.with_timezone(&Utc));
            }
            date = date + Duration::days(1);
        }
    }

    /// The date settled by a draw that fires at `fired_at`.
    pub fn draw_date_for(&self, fired_at: DateTime<Utc>) -> LotteryResult<NaiveDate> {
        let today = self.today(fired_at)?;
        Ok(match self.draw_day {
            DrawDay::Today => today,
            DrawDay::Previous => today - Duration::days(1),
        })
    }
}

impl Default for LotteryConfig {
    fn default() -> Self {
        Self {
            pricing: PricingConfig {
                ticket_price: default_ticket_price(),
                currency: default_currency(),
                referral_bps: default_referral_bps(),
                tax_bps: default_tax_bps(),
                pool_bps: default_pool_bps(),
            },
            draw: DrawConfig::default(),
            storage: StorageConfig::default(),
            payout: PayoutConfig::default(),
            notifier: NotifierConfig::default(),
        }
    }
}
