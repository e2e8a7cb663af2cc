use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::birthday::BirthDate;
use crate::models::CouponCategory;
use crate::CouponError;

/// Immutable view of a member, taken right after their counters were updated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberSnapshot {
    pub member_id: Uuid,
    pub branch: String,
    pub visit_count: u64,
    pub total_spend: u64,
    pub birth_date: Option<BirthDate>,
    pub joined_on: NaiveDate,
    /// Local calendar date the snapshot was taken; birthdays are matched against it
    pub as_of: NaiveDate,
}

/// Visit count and cumulative spend before and after one update.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct VisitDelta {
    visits_before: u64,
    visits_after: u64,
    spend_before: u64,
    spend_after: u64,
}

impl VisitDelta {
    /// Both counters only ever grow; anything else is a caller bug.
    pub fn new(
        visits_before: u64,
        visits_after: u64,
        spend_before: u64,
        spend_after: u64,
    ) -> Result<Self, CouponError> {
        if visits_after < visits_before {
            return Err(CouponError::NonMonotoneDelta {
                field: "visit_count",
                before: visits_before,
                after: visits_after,
            });
        }
        if spend_after < spend_before {
            return Err(CouponError::NonMonotoneDelta {
                field: "total_spend",
                before: spend_before,
                after: spend_after,
            });
        }
        Ok(Self {
            visits_before,
            visits_after,
            spend_before,
            spend_after,
        })
    }

    /// Rebuild the delta of a single visit from the post-update counters.
    pub fn from_after(
        visits_after: u64,
        spend_after: u64,
        spend: u64,
    ) -> Result<Self, CouponError> {
        let visits_before = visits_after.checked_sub(1).ok_or(CouponError::NonMonotoneDelta {
            field: "visit_count",
            before: 1,
            after: visits_after,
        })?;
        let spend_before = spend_after.checked_sub(spend).ok_or(CouponError::NonMonotoneDelta {
            field: "total_spend",
            before: spend,
            after: spend_after,
        })?;
        Self::new(visits_before, visits_after, spend_before, spend_after)
    }

    pub fn visits_before(&self) -> u64 {
        self.visits_before
    }

    pub fn visits_after(&self) -> u64 {
        self.visits_after
    }

    pub fn spend_before(&self) -> u64 {
        self.spend_before
    }

    pub fn spend_after(&self) -> u64 {
        self.spend_after
    }

    pub fn is_first_visit(&self) -> bool {
        self.visits_before == 0 && self.visits_after == 1
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PriorAward {
    pub category: CouponCategory,
    pub issued_on: NaiveDate,
}

/// Coupons already issued to one member.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CouponHistory {
    entries: Vec<PriorAward>,
}

impl CouponHistory {
    pub fn new(entries: Vec<PriorAward>) -> Self {
        Self { entries }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn issued_on(&self, category: CouponCategory) -> impl Iterator<Item = NaiveDate> + '_ {
        self.entries
            .iter()
            .filter(move |e| e.category == category)
            .map(|e| e.issued_on)
    }

    pub fn contains(&self, category: CouponCategory) -> bool {
        self.entries.iter().any(|e| e.category == category)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
