pub mod birthday;
pub mod evaluator;
pub mod models;
pub mod snapshot;

pub use birthday::BirthDate;
pub use evaluator::{CouponEvaluator, EvaluatorConfig, VisitCrossing};
pub use models::{CouponAward, CouponCategory, CouponKind, IssuedCoupon};
pub use snapshot::{CouponHistory, MemberSnapshot, PriorAward, VisitDelta};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CouponError {
    #[error("{field} went backwards: {before} -> {after}")]
    NonMonotoneDelta {
        field: &'static str,
        before: u64,
        after: u64,
    },
    #[error("Unknown coupon kind: {0}")]
    UnknownCategory(String),
    #[error("Invalid birth date: {0}")]
    InvalidBirthDate(String),
}
