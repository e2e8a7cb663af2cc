use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use revisit_coupon::{CouponCategory, CouponEvaluator, IssuedCoupon};
use serde::Deserialize;
use uuid::Uuid;

use crate::member::{Member, NewMember, NewVisit, VisitOutcome, VisitRecord};
use crate::CoreResult;

/// Repository trait for members and their visits.
///
/// `register` and `record_visit` must update the member's counters, run the
/// evaluator and persist its awards as one atomic unit per member, so two
/// concurrent visits can never both cross the same milestone.
#[async_trait]
pub trait MemberRepository: Send + Sync {
    /// Insert a member and record the joining visit
    async fn register(
        &self,
        member: &NewMember,
        visit: &NewVisit,
        evaluator: &CouponEvaluator,
    ) -> CoreResult<VisitOutcome>;

    async fn find_by_phone(&self, phone: &str) -> CoreResult<Option<Member>>;

    async fn list_members(&self, branch: Option<&str>) -> CoreResult<Vec<Member>>;

    async fn record_visit(
        &self,
        member_id: Uuid,
        visit: &NewVisit,
        evaluator: &CouponEvaluator,
    ) -> CoreResult<VisitOutcome>;

    /// Most recent first
    async fn list_visits(&self, member_id: Uuid) -> CoreResult<Vec<VisitRecord>>;
}

/// Admin coupon listing filter; every field narrows the result
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CouponFilter {
    pub member_id: Option<Uuid>,
    pub phone: Option<String>,
    pub kind: Option<CouponCategory>,
    pub issued_from: Option<NaiveDate>,
    pub issued_to: Option<NaiveDate>,
    pub used: Option<bool>,
}

/// Repository trait for issued coupons
#[async_trait]
pub trait CouponRepository: Send + Sync {
    /// Newest visit first, award order within a visit
    async fn list_coupons(&self, filter: &CouponFilter) -> CoreResult<Vec<IssuedCoupon>>;

    /// Mark a coupon used; fails with `Conflict` if it already was
    async fn redeem_coupon(&self, id: Uuid, at: DateTime<Utc>) -> CoreResult<IssuedCoupon>;
}
