use chrono::FixedOffset;
use revisit_core::VisitSettings;
use revisit_coupon::{EvaluatorConfig, VisitCrossing};
use serde::Deserialize;
use std::env;
use std::num::NonZeroU64;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub loyalty: LoyaltyRules,
    #[serde(default)]
    pub ocr: OcrConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 { 5 }

/// Coupon thresholds and store-wide defaults. Any field can also be
/// overridden at runtime from the `loyalty_rules` table.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoyaltyRules {
    #[serde(default = "default_visit_step")]
    pub visit_step: NonZeroU64,
    #[serde(default = "default_spend_unit")]
    pub spend_unit: NonZeroU64,
    #[serde(default = "default_birthday_cooldown_days")]
    pub birthday_cooldown_days: u32,
    #[serde(default)]
    pub visit_crossing: VisitCrossing,
    #[serde(default)]
    pub leap_day_fallback: bool,
    #[serde(default = "default_branch")]
    pub default_branch: String,
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,
    #[serde(default = "default_max_visit_spend")]
    pub max_visit_spend: u64,
}

fn default_visit_step() -> NonZeroU64 { EvaluatorConfig::default().visit_step }
fn default_spend_unit() -> NonZeroU64 { EvaluatorConfig::default().spend_unit }
fn default_birthday_cooldown_days() -> u32 { EvaluatorConfig::default().birthday_cooldown_days }
fn default_branch() -> String { "dongdaemun".to_string() }
fn default_utc_offset_hours() -> i32 { 9 }
fn default_max_visit_spend() -> u64 { 100_000_000 }

impl Default for LoyaltyRules {
    fn default() -> Self {
        Self {
            visit_step: default_visit_step(),
            spend_unit: default_spend_unit(),
            birthday_cooldown_days: default_birthday_cooldown_days(),
            visit_crossing: VisitCrossing::default(),
            leap_day_fallback: false,
            default_branch: default_branch(),
            utc_offset_hours: default_utc_offset_hours(),
            max_visit_spend: default_max_visit_spend(),
        }
    }
}

impl LoyaltyRules {
    pub fn evaluator_config(&self) -> EvaluatorConfig {
        EvaluatorConfig {
            visit_step: self.visit_step,
            spend_unit: self.spend_unit,
            birthday_cooldown_days: self.birthday_cooldown_days,
            visit_crossing: self.visit_crossing,
            leap_day_fallback: self.leap_day_fallback,
        }
    }

    pub fn utc_offset(&self) -> Result<FixedOffset, config::ConfigError> {
        self.utc_offset_hours
            .checked_mul(3600)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                config::ConfigError::Message(format!(
                    "loyalty.utc_offset_hours out of range: {}",
                    self.utc_offset_hours
                ))
            })
    }

    pub fn visit_settings(&self) -> Result<VisitSettings, config::ConfigError> {
        Ok(VisitSettings {
            default_branch: self.default_branch.clone(),
            utc_offset: self.utc_offset()?,
            max_visit_spend: self.max_visit_spend,
        })
    }
}

/// External OCR program for receipt photos; receipt visits are refused when unset
#[derive(Debug, Deserialize, Clone, Default)]
pub struct OcrConfig {
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl OcrConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.unwrap_or(15))
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Machine-local overrides, not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. `REVISIT__LOYALTY__VISIT_STEP=5`
            .add_source(config::Environment::with_prefix("REVISIT").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    pub fn from_toml(source: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}
