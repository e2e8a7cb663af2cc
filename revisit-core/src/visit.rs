use chrono::{DateTime, FixedOffset, Utc};
use revisit_coupon::CouponEvaluator;
use revisit_shared::Masked;
use std::sync::Arc;
use tracing::info;

use crate::member::{
    normalize_branch, normalize_phone, JoinForm, Member, NewVisit, PhoneCheck, VisitOutcome,
    VisitRecord, VisitSource,
};
use crate::receipt::ReceiptReader;
use crate::repository::MemberRepository;
use crate::{CoreError, CoreResult};

#[derive(Debug, Clone)]
pub struct VisitSettings {
    pub default_branch: String,
    /// Offset of the stores' local time; birthdays and issuance dates use it
    pub utc_offset: FixedOffset,
    /// Largest spend accepted for a single visit
    pub max_visit_spend: u64,
}

/// Registration and visit flow in front of the member store.
pub struct VisitService {
    members: Arc<dyn MemberRepository>,
    receipts: Arc<dyn ReceiptReader>,
    evaluator: CouponEvaluator,
    settings: VisitSettings,
}

impl VisitService {
    pub fn new(
        members: Arc<dyn MemberRepository>,
        receipts: Arc<dyn ReceiptReader>,
        evaluator: CouponEvaluator,
        settings: VisitSettings,
    ) -> Self {
        Self {
            members,
            receipts,
            evaluator,
            settings,
        }
    }

    pub fn evaluator(&self) -> &CouponEvaluator {
        &self.evaluator
    }

    pub fn settings(&self) -> &VisitSettings {
        &self.settings
    }

    /// Is this phone number already a member?
    pub async fn check(&self, raw_phone: &str) -> CoreResult<PhoneCheck> {
        let phone = normalize_phone(raw_phone)?;
        Ok(match self.members.find_by_phone(&phone).await? {
            Some(member) => PhoneCheck::Existing(member),
            None => PhoneCheck::New,
        })
    }

    pub async fn member(&self, raw_phone: &str) -> CoreResult<Member> {
        let phone = normalize_phone(raw_phone)?;
        self.members
            .find_by_phone(&phone)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("member {}", Masked(&phone))))
    }

    pub async fn list_members(&self, branch: Option<&str>) -> CoreResult<Vec<Member>> {
        self.members.list_members(branch).await
    }

    pub async fn visits(&self, raw_phone: &str) -> CoreResult<Vec<VisitRecord>> {
        let member = self.member(raw_phone).await?;
        self.members.list_visits(member.id).await
    }

    /// Register a member. Signing up at the counter is their first visit.
    pub async fn join(&self, form: JoinForm, now: DateTime<Utc>) -> CoreResult<VisitOutcome> {
        let new_member = form.into_new_member(&self.settings.default_branch)?;
        let visit = NewVisit {
            branch: new_member.branch.clone(),
            spend: 0,
            approval_no: None,
            source: VisitSource::Join,
            visited_at: now.with_timezone(&self.settings.utc_offset),
        };

        let outcome = self.members.register(&new_member, &visit, &self.evaluator).await?;
        info!(
            "Member {} joined at {} with {} coupon(s)",
            Masked(&outcome.member.phone),
            outcome.member.branch,
            outcome.coupons.len()
        );
        Ok(outcome)
    }

    /// Log a visit with an amount keyed in by staff.
    pub async fn record_visit(
        &self,
        raw_phone: &str,
        branch: Option<&str>,
        spend: u64,
        approval_no: Option<String>,
        now: DateTime<Utc>,
    ) -> CoreResult<VisitOutcome> {
        self.apply(raw_phone, branch, spend, approval_no, VisitSource::Manual, now)
            .await
    }

    /// Log a visit from a receipt photo. The same approval number can only be used once.
    pub async fn record_receipt_visit(
        &self,
        raw_phone: &str,
        branch: Option<&str>,
        image: &[u8],
        now: DateTime<Utc>,
    ) -> CoreResult<VisitOutcome> {
        if image.is_empty() {
            return Err(CoreError::ValidationError("receipt image is empty".to_string()));
        }
        // Resolve the member before paying for OCR
        let member = self.member(raw_phone).await?;
        let scan = self.receipts.scan(image).await?;
        info!(
            "Receipt for {} read: amount {} approval {:?}",
            Masked(&member.phone),
            scan.amount,
            scan.approval_no
        );

        self.apply(&member.phone, branch, scan.amount, scan.approval_no, VisitSource::Receipt, now)
            .await
    }

    async fn apply(
        &self,
        raw_phone: &str,
        branch: Option<&str>,
        spend: u64,
        approval_no: Option<String>,
        source: VisitSource,
        now: DateTime<Utc>,
    ) -> CoreResult<VisitOutcome> {
        if spend > self.settings.max_visit_spend {
            return Err(CoreError::ValidationError(format!(
                "spend {} exceeds the per-visit limit of {}",
                spend, self.settings.max_visit_spend
            )));
        }
        let approval_no = approval_no
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty());

        let member = self.member(raw_phone).await?;
        let visit = NewVisit {
            branch: normalize_branch(branch, &member.branch),
            spend,
            approval_no,
            source,
            visited_at: now.with_timezone(&self.settings.utc_offset),
        };

        let outcome = self.members.record_visit(member.id, &visit, &self.evaluator).await?;
        info!(
            "Visit #{} for {} at {} (spend {}), {} coupon(s) issued",
            outcome.member.visit_count,
            Masked(&outcome.member.phone),
            outcome.visit.branch,
            spend,
            outcome.coupons.len()
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::member::NewMember;
    use crate::receipt::{DisabledReceiptReader, MockReceiptReader, OcrError};
    use async_trait::async_trait;
    use revisit_coupon::{CouponCategory, CouponHistory, IssuedCoupon, PriorAward, VisitDelta};
    use std::sync::Mutex;
    use uuid::Uuid;

    /// Keeps everything in memory behind one lock, which is enough to give
    /// the same all-or-nothing behaviour as the SQL store.
    #[derive(Default)]
    struct InMemoryMembers {
        state: Mutex<(Vec<Member>, Vec<VisitRecord>, Vec<IssuedCoupon>)>,
    }

    impl InMemoryMembers {
        fn apply(
            state: &mut (Vec<Member>, Vec<VisitRecord>, Vec<IssuedCoupon>),
            member_id: Uuid,
            visit: &NewVisit,
            evaluator: &CouponEvaluator,
        ) -> CoreResult<VisitOutcome> {
            let (members, visits, coupons) = state;
            if let Some(approval) = &visit.approval_no {
                if visits.iter().any(|v| v.approval_no.as_ref() == Some(approval)) {
                    return Err(CoreError::Conflict("receipt already used".to_string()));
                }
            }
            let member = members
                .iter_mut()
                .find(|m| m.id == member_id)
                .ok_or_else(|| CoreError::NotFound("member".to_string()))?;
            member.visit_count += 1;
            member.total_spend += visit.spend;
            member.last_visit_at = Some(visit.visited_at.with_timezone(&Utc));

            let delta =
                VisitDelta::from_after(member.visit_count, member.total_spend, visit.spend)?;
            let history = CouponHistory::new(
                coupons
                    .iter()
                    .filter(|c| c.member_id == member_id)
                    .map(|c| PriorAward { category: c.kind, issued_on: c.issued_on })
                    .collect(),
            );
            let snapshot = member.snapshot(visit.visited_on(), *visit.visited_at.offset());
            let awards = evaluator.evaluate(&snapshot, &delta, &history);

            let record = VisitRecord {
                id: Uuid::new_v4(),
                member_id,
                branch: visit.branch.clone(),
                spend: visit.spend,
                approval_no: visit.approval_no.clone(),
                source: visit.source,
                visited_at: visit.visited_at.with_timezone(&Utc),
            };
            visits.push(record.clone());

            let issued: Vec<IssuedCoupon> = awards
                .into_iter()
                .map(|a| IssuedCoupon {
                    id: Uuid::new_v4(),
                    member_id,
                    kind: a.kind.category(),
                    milestone: a.kind.milestone().map(|m| m as i64),
                    description: a.description,
                    issued_at: visit.visited_at.with_timezone(&Utc),
                    issued_on: visit.visited_on(),
                    used: false,
                    used_at: None,
                })
                .collect();
            coupons.extend(issued.iter().cloned());

            Ok(VisitOutcome { member: member.clone(), visit: record, coupons: issued })
        }
    }

    #[async_trait]
    impl MemberRepository for InMemoryMembers {
        async fn register(
            &self,
            member: &NewMember,
            visit: &NewVisit,
            evaluator: &CouponEvaluator,
        ) -> CoreResult<VisitOutcome> {
            let mut state = self.state.lock().unwrap();
            if state.0.iter().any(|m| m.phone == member.phone) {
                return Err(CoreError::Conflict("phone already registered".to_string()));
            }
            let id = Uuid::new_v4();
            state.0.push(Member {
                id,
                name: member.name.clone(),
                phone: member.phone.clone(),
                branch: member.branch.clone(),
                birth_date: member.birth_date,
                marketing_consent: member.marketing_consent,
                privacy_consent: member.privacy_consent,
                visit_count: 0,
                total_spend: 0,
                joined_at: visit.visited_at.with_timezone(&Utc),
                last_visit_at: None,
            });
            Self::apply(&mut state, id, visit, evaluator)
        }

        async fn find_by_phone(&self, phone: &str) -> CoreResult<Option<Member>> {
            Ok(self.state.lock().unwrap().0.iter().find(|m| m.phone == phone).cloned())
        }

        async fn list_members(&self, branch: Option<&str>) -> CoreResult<Vec<Member>> {
            Ok(self
                .state
                .lock()
                .unwrap()
                .0
                .iter()
                .filter(|m| branch.map_or(true, |b| m.branch == b))
                .cloned()
                .collect())
        }

        async fn record_visit(
            &self,
            member_id: Uuid,
            visit: &NewVisit,
            evaluator: &CouponEvaluator,
        ) -> CoreResult<VisitOutcome> {
            let mut state = self.state.lock().unwrap();
            Self::apply(&mut state, member_id, visit, evaluator)
        }

        async fn list_visits(&self, member_id: Uuid) -> CoreResult<Vec<VisitRecord>> {
            let state = self.state.lock().unwrap();
            Ok(state.1.iter().rev().filter(|v| v.member_id == member_id).cloned().collect())
        }
    }

    fn service(receipts: Arc<dyn ReceiptReader>) -> VisitService {
        VisitService::new(
            Arc::new(InMemoryMembers::default()),
            receipts,
            CouponEvaluator::default(),
            VisitSettings {
                default_branch: "dongdaemun".to_string(),
                utc_offset: FixedOffset::east_opt(9 * 3600).unwrap(),
                max_visit_spend: 10_000_000,
            },
        )
    }

    fn join_form(phone: &str) -> JoinForm {
        JoinForm {
            name: "Park".to_string(),
            phone: phone.to_string(),
            branch: None,
            birth: Some("1990-03-15".to_string()),
            marketing_consent: false,
            privacy_consent: true,
        }
    }

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_join_then_check() {
        let svc = service(Arc::new(DisabledReceiptReader));
        assert!(matches!(svc.check("010-5555-0000").await.unwrap(), PhoneCheck::New));

        let outcome = svc
            .join(join_form("010-5555-0000"), at("2026-10-19T03:00:00Z"))
            .await
            .unwrap();
        assert_eq!(outcome.member.visit_count, 1);
        assert_eq!(outcome.member.branch, "dongdaemun");
        assert_eq!(outcome.visit.source, VisitSource::Join);
        assert_eq!(outcome.coupons.len(), 1);
        assert_eq!(outcome.coupons[0].kind, CouponCategory::Welcome);

        match svc.check("01055550000").await.unwrap() {
            PhoneCheck::Existing(member) => assert_eq!(member.id, outcome.member.id),
            PhoneCheck::New => panic!("member should exist"),
        }
    }

    #[tokio::test]
    async fn test_visits_cross_milestones() {
        let svc = service(Arc::new(DisabledReceiptReader));
        let now = at("2026-10-19T03:00:00Z");
        svc.join(join_form("01055550001"), now).await.unwrap();

        let second = svc.record_visit("01055550001", None, 80_000, None, now).await.unwrap();
        assert!(second.coupons.is_empty());

        let third = svc
            .record_visit("01055550001", Some("gangnam"), 130_000, None, now)
            .await
            .unwrap();
        let kinds: Vec<CouponCategory> = third.coupons.iter().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            vec![
                CouponCategory::VisitMilestone,
                CouponCategory::SpendMilestone,
                CouponCategory::SpendMilestone,
            ]
        );
        assert_eq!(third.visit.branch, "gangnam");
        assert_eq!(third.member.total_spend, 210_000);

        let visits = svc.visits("010-5555-0001").await.unwrap();
        assert_eq!(visits.len(), 3);
        assert_eq!(visits[0].spend, 130_000);
    }

    #[tokio::test]
    async fn test_birthday_uses_local_date() {
        let svc = service(Arc::new(DisabledReceiptReader));
        svc.join(join_form("01055550002"), at("2026-03-10T03:00:00Z")).await.unwrap();

        // 2026-03-14 16:00 UTC is already March 15 in UTC+9
        let outcome = svc
            .record_visit("01055550002", None, 0, None, at("2026-03-14T16:00:00Z"))
            .await
            .unwrap();
        assert_eq!(outcome.coupons.len(), 1);
        assert_eq!(outcome.coupons[0].kind, CouponCategory::Birthday);

        let again = svc
            .record_visit("01055550002", None, 0, None, at("2026-03-15T05:00:00Z"))
            .await
            .unwrap();
        assert!(again.coupons.iter().all(|c| c.kind != CouponCategory::Birthday));
    }

    #[tokio::test]
    async fn test_visit_validation() {
        let svc = service(Arc::new(DisabledReceiptReader));
        let now = at("2026-10-19T03:00:00Z");

        assert!(matches!(
            svc.record_visit("01099999999", None, 1_000, None, now).await,
            Err(CoreError::NotFound(_))
        ));

        svc.join(join_form("01055550003"), now).await.unwrap();
        assert!(matches!(
            svc.record_visit("01055550003", None, 10_000_001, None, now).await,
            Err(CoreError::ValidationError(_))
        ));
        assert!(matches!(
            svc.record_visit("not-a-phone", None, 1, None, now).await,
            Err(CoreError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_receipt_visit() {
        let reader = MockReceiptReader::new("승인금액: 120,000\n승인번호: 777");
        let svc = service(Arc::new(reader));
        let now = at("2026-10-19T03:00:00Z");
        svc.join(join_form("01055550004"), now).await.unwrap();

        let outcome = svc.record_receipt_visit("01055550004", None, b"img", now).await.unwrap();
        assert_eq!(outcome.visit.source, VisitSource::Receipt);
        assert_eq!(outcome.visit.spend, 120_000);
        assert_eq!(outcome.visit.approval_no.as_deref(), Some("777"));

        // Same receipt again
        assert!(matches!(
            svc.record_receipt_visit("01055550004", None, b"img", now).await,
            Err(CoreError::Conflict(_))
        ));
        assert!(matches!(
            svc.record_receipt_visit("01055550004", None, b"", now).await,
            Err(CoreError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_receipt_visit_without_ocr() {
        let svc = service(Arc::new(DisabledReceiptReader));
        let now = at("2026-10-19T03:00:00Z");
        svc.join(join_form("01055550005"), now).await.unwrap();

        assert!(matches!(
            svc.record_receipt_visit("01055550005", None, b"img", now).await,
            Err(CoreError::Receipt(OcrError::Unavailable))
        ));
    }
}
