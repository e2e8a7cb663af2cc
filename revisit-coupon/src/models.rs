use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, NaiveDate, Utc};
use std::fmt;
use std::str::FromStr;

use crate::CouponError;

/// Coupon kind without its milestone payload. This is what gets stored and filtered on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CouponCategory {
    Welcome,
    VisitMilestone,
    SpendMilestone,
    Birthday,
}

impl CouponCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            CouponCategory::Welcome => "WELCOME",
            CouponCategory::VisitMilestone => "VISIT_MILESTONE",
            CouponCategory::SpendMilestone => "SPEND_MILESTONE",
            CouponCategory::Birthday => "BIRTHDAY",
        }
    }
}

impl fmt::Display for CouponCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CouponCategory {
    type Err = CouponError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "WELCOME" => Ok(CouponCategory::Welcome),
            "VISIT_MILESTONE" => Ok(CouponCategory::VisitMilestone),
            "SPEND_MILESTONE" => Ok(CouponCategory::SpendMilestone),
            "BIRTHDAY" => Ok(CouponCategory::Birthday),
            other => Err(CouponError::UnknownCategory(other.to_string())),
        }
    }
}

/// What triggered a coupon
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CouponKind {
    /// First-ever visit
    Welcome,
    /// Visit count crossed `step * visit_step`
    VisitMilestone { step: u64, visit_count: u64 },
    /// Cumulative spend crossed `threshold`
    SpendMilestone { threshold: u64 },
    Birthday,
}

impl CouponKind {
    pub fn category(&self) -> CouponCategory {
        match self {
            CouponKind::Welcome => CouponCategory::Welcome,
            CouponKind::VisitMilestone { .. } => CouponCategory::VisitMilestone,
            CouponKind::SpendMilestone { .. } => CouponCategory::SpendMilestone,
            CouponKind::Birthday => CouponCategory::Birthday,
        }
    }

    /// Value that identifies the triggering event within its category.
    ///
    /// Birthdays have none: they repeat yearly and are rate-limited by the
    /// cooldown instead.
    pub fn milestone(&self) -> Option<u64> {
        match self {
            CouponKind::Welcome => Some(1),
            CouponKind::VisitMilestone { visit_count, .. } => Some(*visit_count),
            CouponKind::SpendMilestone { threshold } => Some(*threshold),
            CouponKind::Birthday => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            CouponKind::Welcome => "Welcome coupon for your first visit".to_string(),
            CouponKind::VisitMilestone { visit_count, .. } => {
                format!("Visit milestone: {} visits", visit_count)
            }
            CouponKind::SpendMilestone { threshold } => {
                format!("Spend milestone: {} reached", group_thousands(*threshold))
            }
            CouponKind::Birthday => "Happy birthday coupon".to_string(),
        }
    }
}

fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// A coupon-issuance decision produced by the evaluator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CouponAward {
    pub member_id: Uuid,
    pub kind: CouponKind,
    pub description: String,
}

impl CouponAward {
    pub fn new(member_id: Uuid, kind: CouponKind) -> Self {
        let description = kind.describe();
        Self {
            member_id,
            kind,
            description,
        }
    }
}

/// A persisted award, as listed back to members and administrators
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IssuedCoupon {
    pub id: Uuid,
    pub member_id: Uuid,
    pub kind: CouponCategory,
    pub milestone: Option<i64>,
    pub description: String,
    pub issued_at: DateTime<Utc>,
    /// Local calendar date of issuance, used for birthday cooldowns
    pub issued_on: NaiveDate,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
}

impl IssuedCoupon {
    pub fn is_redeemable(&self) -> bool {
        !self.used
    }
}
