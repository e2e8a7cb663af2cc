pub mod app_config;
pub mod coupon_repo;
pub mod database;
pub mod member_repo;

pub use app_config::{Config, LoyaltyRules, OcrConfig};
pub use coupon_repo::StoreCouponRepository;
pub use database::DbClient;
pub use member_repo::StoreMemberRepository;

use revisit_core::CoreError;

pub(crate) fn storage_error(err: sqlx::Error) -> CoreError {
    tracing::error!("Database error: {}", err);
    CoreError::StorageError(err.to_string())
}

/// Unique-constraint failures become `Conflict` with the given message
pub(crate) fn conflict_or_storage(err: sqlx::Error, conflict: &str) -> CoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return CoreError::Conflict(conflict.to_string());
        }
    }
    storage_error(err)
}

pub(crate) fn corrupt_row(what: &str, detail: impl std::fmt::Display) -> CoreError {
    CoreError::StorageError(format!("corrupt {} row: {}", what, detail))
}
