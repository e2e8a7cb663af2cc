use revisit_core::{CouponRepository, ReceiptReader, VisitOutcome, VisitService};
use revisit_coupon::CouponEvaluator;
use revisit_shared::CouponIssuedEvent;
use revisit_store::{DbClient, LoyaltyRules, StoreCouponRepository, StoreMemberRepository};
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Clone)]
pub struct AppState {
    pub visits: Arc<VisitService>,
    pub coupons: Arc<dyn CouponRepository>,
    pub sse_tx: broadcast::Sender<CouponIssuedEvent>,
}

impl AppState {
    pub fn new(
        db: &DbClient,
        receipts: Arc<dyn ReceiptReader>,
        rules: &LoyaltyRules,
    ) -> anyhow::Result<Self> {
        let members = Arc::new(StoreMemberRepository::new(db.pool.clone()));
        let visits = VisitService::new(
            members,
            receipts,
            CouponEvaluator::new(rules.evaluator_config()),
            rules.visit_settings()?,
        );
        let (sse_tx, _) = broadcast::channel(100);

        Ok(Self {
            visits: Arc::new(visits),
            coupons: Arc::new(StoreCouponRepository::new(db.pool.clone())),
            sse_tx,
        })
    }

    /// Fan the visit's coupons out to stream subscribers
    pub fn publish(&self, outcome: &VisitOutcome) {
        for coupon in &outcome.coupons {
            let event = CouponIssuedEvent {
                coupon_id: coupon.id,
                member_id: coupon.member_id,
                branch: outcome.visit.branch.clone(),
                kind: coupon.kind.to_string(),
                milestone: coupon.milestone,
                description: coupon.description.clone(),
                issued_at: coupon.issued_at.timestamp(),
            };
            // No subscribers is fine
            let _ = self.sse_tx.send(event);
        }
    }
}
