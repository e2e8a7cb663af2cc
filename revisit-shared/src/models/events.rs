use uuid::Uuid;

/// Published once per persisted coupon, after the visit transaction commits.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq, Eq)]
pub struct CouponIssuedEvent {
    pub coupon_id: Uuid,
    pub member_id: Uuid,
    pub branch: String,
    pub kind: String,
    pub milestone: Option<i64>,
    pub description: String,
    pub issued_at: i64,
}
