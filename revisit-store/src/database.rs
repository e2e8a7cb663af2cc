use revisit_coupon::VisitCrossing;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::num::NonZeroU64;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::app_config::LoyaltyRules;

#[derive(Clone)]
pub struct DbClient {
    pub pool: SqlitePool,
}

impl DbClient {
    pub async fn new(connection_string: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(connection_string)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(3))
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Private in-memory database. Held on a single connection that never
    /// recycles, since the data dies with it.
    pub async fn in_memory() -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("../migrations")
            .run(&self.pool)
            .await?;
        info!("Migrations completed successfully.");
        Ok(())
    }

    /// Apply overrides from the `loyalty_rules` table on top of `defaults`.
    /// Each row holds `{"value": ...}`; rows that do not fit their key are skipped.
    pub async fn fetch_loyalty_rules(
        &self,
        defaults: LoyaltyRules,
    ) -> Result<LoyaltyRules, sqlx::Error> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT rule_key, rule_value FROM loyalty_rules")
                .fetch_all(&self.pool)
                .await?;

        let mut rules = defaults;

        for (key, raw) in rows {
            let value = match serde_json::from_str::<Value>(&raw) {
                Ok(json) => json.get("value").cloned(),
                Err(e) => {
                    warn!("Ignoring loyalty rule {}: {}", key, e);
                    continue;
                }
            };
            let Some(v) = value else {
                warn!("Ignoring loyalty rule {}: no value", key);
                continue;
            };

            let applied = match key.as_str() {
                "visit_step" => v.as_u64().and_then(NonZeroU64::new).map(|n| rules.visit_step = n),
                "spend_unit" => v.as_u64().and_then(NonZeroU64::new).map(|n| rules.spend_unit = n),
                "birthday_cooldown_days" => v
                    .as_u64()
                    .and_then(|d| u32::try_from(d).ok())
                    .map(|d| rules.birthday_cooldown_days = d),
                "visit_crossing" => serde_json::from_value::<VisitCrossing>(v)
                    .ok()
                    .map(|c| rules.visit_crossing = c),
                "leap_day_fallback" => v.as_bool().map(|f| rules.leap_day_fallback = f),
                "default_branch" => v.as_str().map(|b| rules.default_branch = b.to_string()),
                "utc_offset_hours" => v
                    .as_i64()
                    .and_then(|h| i32::try_from(h).ok())
                    .map(|h| rules.utc_offset_hours = h),
                "max_visit_spend" => v.as_u64().map(|m| rules.max_visit_spend = m),
                _ => None,
            };

            match applied {
                Some(()) => info!("Loyalty rule {} overridden from database", key),
                None => warn!("Ignoring loyalty rule {}: unknown key or bad value", key),
            }
        }

        Ok(rules)
    }
}
