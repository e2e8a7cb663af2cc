use serde::{Deserialize, Serialize};
use std::num::NonZeroU64;

use crate::models::{CouponAward, CouponCategory, CouponKind};
use crate::snapshot::{CouponHistory, MemberSnapshot, VisitDelta};

/// How many VISIT_MILESTONE coupons one update may mint when it jumps over
/// several boundaries at once.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VisitCrossing {
    /// One coupon per crossed boundary, same as spend milestones
    #[default]
    PerBoundary,
    /// A single coupon for the highest crossed boundary
    Single,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EvaluatorConfig {
    /// Every `visit_step`-th visit is a milestone
    pub visit_step: NonZeroU64,
    /// Every multiple of `spend_unit` (minor currency units) is a milestone
    pub spend_unit: NonZeroU64,
    pub birthday_cooldown_days: u32,
    #[serde(default)]
    pub visit_crossing: VisitCrossing,
    /// Observe Feb 29 birthdays on Feb 28 in common years
    #[serde(default)]
    pub leap_day_fallback: bool,
}

const DEFAULT_VISIT_STEP: NonZeroU64 = match NonZeroU64::new(3) {
    Some(step) => step,
    None => panic!("visit step must be nonzero"),
};

const DEFAULT_SPEND_UNIT: NonZeroU64 = match NonZeroU64::new(100_000) {
    Some(unit) => unit,
    None => panic!("spend unit must be nonzero"),
};

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            visit_step: DEFAULT_VISIT_STEP,
            spend_unit: DEFAULT_SPEND_UNIT,
            birthday_cooldown_days: 365,
            visit_crossing: VisitCrossing::PerBoundary,
            leap_day_fallback: false,
        }
    }
}

/// Decides which coupons a visit earns. Pure: no I/O, no clock, no state
/// beyond its configuration, so it can be shared freely between handlers.
#[derive(Debug, Clone, Default)]
pub struct CouponEvaluator {
    config: EvaluatorConfig,
}

impl CouponEvaluator {
    pub fn new(config: EvaluatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    /// Awards come back as WELCOME, visit milestones ascending, spend
    /// milestones ascending, then BIRTHDAY.
    pub fn evaluate(
        &self,
        member: &MemberSnapshot,
        delta: &VisitDelta,
        history: &CouponHistory,
    ) -> Vec<CouponAward> {
        let mut awards = Vec::new();

        if delta.is_first_visit() && !history.contains(CouponCategory::Welcome) {
            awards.push(CouponAward::new(member.member_id, CouponKind::Welcome));
        }

        for kind in self.visit_milestones(delta) {
            awards.push(CouponAward::new(member.member_id, kind));
        }

        for kind in self.spend_milestones(delta) {
            awards.push(CouponAward::new(member.member_id, kind));
        }

        if self.birthday_due(member, history) {
            awards.push(CouponAward::new(member.member_id, CouponKind::Birthday));
        }

        awards
    }

    fn visit_milestones(&self, delta: &VisitDelta) -> Vec<CouponKind> {
        let size = self.config.visit_step.get();
        let old_step = delta.visits_before() / size;
        let new_step = delta.visits_after() / size;
        if new_step <= old_step {
            return Vec::new();
        }

        let steps = match self.config.visit_crossing {
            VisitCrossing::PerBoundary => old_step + 1..=new_step,
            VisitCrossing::Single => new_step..=new_step,
        };
        steps
            .map(|step| CouponKind::VisitMilestone {
                step,
                visit_count: step * size,
            })
            .collect()
    }

    fn spend_milestones(&self, delta: &VisitDelta) -> Vec<CouponKind> {
        let unit = self.config.spend_unit.get();
        let old_step = delta.spend_before() / unit;
        let new_step = delta.spend_after() / unit;

        (old_step + 1..=new_step)
            .map(|step| CouponKind::SpendMilestone { threshold: step * unit })
            .collect()
    }

    fn birthday_due(&self, member: &MemberSnapshot, history: &CouponHistory) -> bool {
        let Some(birth_date) = member.birth_date else {
            return false;
        };
        let is_birthday = if self.config.leap_day_fallback {
            birth_date.observed_on(member.as_of)
        } else {
            birth_date.falls_on(member.as_of)
        };
        if !is_birthday {
            return false;
        }

        // An award exactly `cooldown` days back no longer blocks.
        let cooldown = i64::from(self.config.birthday_cooldown_days);
        !history
            .issued_on(CouponCategory::Birthday)
            .any(|issued_on| (member.as_of - issued_on).num_days() < cooldown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::birthday::BirthDate;
    use crate::snapshot::PriorAward;
    use chrono::NaiveDate;
    use uuid::Uuid;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn member(
        visit_count: u64,
        total_spend: u64,
        birth: Option<&str>,
        as_of: NaiveDate,
    ) -> MemberSnapshot {
        MemberSnapshot {
            member_id: Uuid::from_u128(7),
            branch: "dongdaemun".to_string(),
            visit_count,
            total_spend,
            birth_date: birth.map(|b| b.parse::<BirthDate>().unwrap()),
            joined_on: date(2025, 1, 2),
            as_of,
        }
    }

    /// Evaluate with no prior coupons
    fn evaluate_fresh(
        evaluator: &CouponEvaluator,
        snapshot: &MemberSnapshot,
        delta: &VisitDelta,
    ) -> Vec<CouponAward> {
        evaluator.evaluate(snapshot, delta, &CouponHistory::empty())
    }

    fn kinds(awards: &[CouponAward]) -> Vec<CouponKind> {
        awards.iter().map(|a| a.kind.clone()).collect()
    }

    fn birthday_history(days: &[NaiveDate]) -> CouponHistory {
        CouponHistory::new(
            days.iter()
                .map(|d| PriorAward { category: CouponCategory::Birthday, issued_on: *d })
                .collect(),
        )
    }

    #[test]
    fn test_visit_and_spend_crossings() {
        let evaluator = CouponEvaluator::default();
        let delta = VisitDelta::new(2, 4, 80_000, 210_000).unwrap();
        let snapshot = member(4, 210_000, Some("1990-05-17"), date(2026, 10, 19));

        let awards = evaluator.evaluate(&snapshot, &delta, &CouponHistory::empty());

        assert_eq!(
            kinds(&awards),
            vec![
                CouponKind::VisitMilestone { step: 1, visit_count: 3 },
                CouponKind::SpendMilestone { threshold: 100_000 },
                CouponKind::SpendMilestone { threshold: 200_000 },
            ]
        );
        assert!(awards.iter().all(|a| a.member_id == snapshot.member_id));
        assert_eq!(awards[2].description, "Spend milestone: 200,000 reached");
    }

    #[test]
    fn test_first_visit_gets_welcome() {
        let evaluator = CouponEvaluator::default();
        let delta = VisitDelta::new(0, 1, 0, 0).unwrap();
        let awards = evaluate_fresh(&evaluator, &member(1, 0, None, date(2026, 10, 19)), &delta);

        assert_eq!(kinds(&awards), vec![CouponKind::Welcome]);
    }

    #[test]
    fn test_welcome_not_repeated_when_history_has_one() {
        let evaluator = CouponEvaluator::default();
        let delta = VisitDelta::new(0, 1, 0, 0).unwrap();
        let history = CouponHistory::new(vec![PriorAward {
            category: CouponCategory::Welcome,
            issued_on: date(2026, 1, 1),
        }]);

        let awards = evaluator.evaluate(&member(1, 0, None, date(2026, 10, 19)), &delta, &history);
        assert!(awards.is_empty());
    }

    #[test]
    fn test_no_change_no_awards() {
        let evaluator = CouponEvaluator::default();
        let delta = VisitDelta::new(5, 5, 0, 0).unwrap();
        let awards = evaluate_fresh(&evaluator, &member(5, 0, None, date(2026, 10, 19)), &delta);

        assert!(awards.is_empty());
    }

    #[test]
    fn test_welcome_only_for_zero_to_one() {
        let evaluator = CouponEvaluator::default();
        let as_of = date(2026, 10, 19);
        for (before, after) in [(0, 0), (0, 2), (1, 2), (1, 1), (4, 5)] {
            let delta = VisitDelta::new(before, after, 0, 0).unwrap();
            let awards = evaluate_fresh(&evaluator, &member(after, 0, None, as_of), &delta);
            assert!(
                !awards.iter().any(|a| a.kind == CouponKind::Welcome),
                "unexpected welcome for {} -> {}",
                before,
                after
            );
        }
    }

    #[test]
    fn test_visit_milestone_count_matches_boundaries() {
        let evaluator = CouponEvaluator::default();
        let as_of = date(2026, 10, 19);
        for before in 0..12u64 {
            for after in before..20u64 {
                let delta = VisitDelta::new(before, after, 0, 0).unwrap();
                let awards = evaluate_fresh(&evaluator, &member(after, 0, None, as_of), &delta);
                let milestones: Vec<u64> = awards
                    .iter()
                    .filter_map(|a| match a.kind {
                        CouponKind::VisitMilestone { visit_count, .. } => Some(visit_count),
                        _ => None,
                    })
                    .collect();

                assert_eq!(milestones.len() as u64, after / 3 - before / 3);
                assert!(milestones.windows(2).all(|w| w[1] == w[0] + 3));
                assert!(milestones.iter().all(|c| c % 3 == 0 && *c > before && *c <= after));
            }
        }
    }

    #[test]
    fn test_multi_boundary_visit_jump_per_boundary() {
        let evaluator = CouponEvaluator::default();
        let delta = VisitDelta::new(2, 7, 0, 0).unwrap();
        let awards = evaluate_fresh(&evaluator, &member(7, 0, None, date(2026, 10, 19)), &delta);

        assert_eq!(
            kinds(&awards),
            vec![
                CouponKind::VisitMilestone { step: 1, visit_count: 3 },
                CouponKind::VisitMilestone { step: 2, visit_count: 6 },
            ]
        );
    }

    #[test]
    fn test_multi_boundary_visit_jump_single() {
        let evaluator = CouponEvaluator::new(EvaluatorConfig {
            visit_crossing: VisitCrossing::Single,
            ..EvaluatorConfig::default()
        });
        let delta = VisitDelta::new(2, 7, 0, 0).unwrap();
        let awards = evaluate_fresh(&evaluator, &member(7, 0, None, date(2026, 10, 19)), &delta);

        assert_eq!(kinds(&awards), vec![CouponKind::VisitMilestone { step: 2, visit_count: 6 }]);

        // A single-boundary crossing looks the same under both policies
        let delta = VisitDelta::new(5, 6, 0, 0).unwrap();
        let awards = evaluate_fresh(&evaluator, &member(6, 0, None, date(2026, 10, 19)), &delta);
        assert_eq!(kinds(&awards), vec![CouponKind::VisitMilestone { step: 2, visit_count: 6 }]);
    }

    #[test]
    fn test_spend_milestones_are_consecutive_thresholds() {
        let evaluator = CouponEvaluator::default();
        let as_of = date(2026, 10, 19);
        let cases = [
            (0, 99_999),
            (0, 100_000),
            (99_999, 100_000),
            (100_000, 199_999),
            (150_000, 720_000),
            (0, 1_000_000),
        ];
        for (before, after) in cases {
            let delta = VisitDelta::new(3, 4, before, after).unwrap();
            let awards = evaluate_fresh(&evaluator, &member(4, after, None, as_of), &delta);
            let thresholds: Vec<u64> = awards
                .iter()
                .filter_map(|a| match a.kind {
                    CouponKind::SpendMilestone { threshold } => Some(threshold),
                    _ => None,
                })
                .collect();

            assert_eq!(thresholds.len() as u64, after / 100_000 - before / 100_000);
            let expected: Vec<u64> =
                (before / 100_000 + 1..=after / 100_000).map(|s| s * 100_000).collect();
            assert_eq!(thresholds, expected);
        }
    }

    #[test]
    fn test_birthday_match() {
        let evaluator = CouponEvaluator::default();
        let delta = VisitDelta::new(1, 2, 0, 0).unwrap();

        let on_birthday = member(2, 0, Some("1990-10-19"), date(2026, 10, 19));
        assert_eq!(
            kinds(&evaluator.evaluate(&on_birthday, &delta, &CouponHistory::empty())),
            vec![CouponKind::Birthday]
        );

        let day_after = member(2, 0, Some("1990-10-18"), date(2026, 10, 19));
        assert!(evaluator.evaluate(&day_after, &delta, &CouponHistory::empty()).is_empty());

        let no_birth_date = member(2, 0, None, date(2026, 10, 19));
        assert!(evaluator.evaluate(&no_birth_date, &delta, &CouponHistory::empty()).is_empty());
    }

    #[test]
    fn test_birthday_cooldown_boundary() {
        let evaluator = CouponEvaluator::default();
        let delta = VisitDelta::new(1, 2, 0, 0).unwrap();
        let as_of = date(2026, 10, 19);
        let snapshot = member(2, 0, Some("10-19"), as_of);

        // Same day: a second visit on the birthday gets nothing
        let history = birthday_history(&[as_of]);
        assert!(evaluator.evaluate(&snapshot, &delta, &history).is_empty());

        // 364 days ago still blocks
        let history = birthday_history(&[as_of - chrono::Duration::days(364)]);
        assert!(evaluator.evaluate(&snapshot, &delta, &history).is_empty());

        // Exactly 365 days ago no longer does
        let history = birthday_history(&[as_of - chrono::Duration::days(365)]);
        assert_eq!(
            kinds(&evaluator.evaluate(&snapshot, &delta, &history)),
            vec![CouponKind::Birthday]
        );

        // Last year's birthday across a leap day is 366 days back
        let leap = member(2, 0, Some("03-01"), date(2028, 3, 1));
        let history = birthday_history(&[date(2027, 3, 1)]);
        assert_eq!(kinds(&evaluator.evaluate(&leap, &delta, &history)), vec![CouponKind::Birthday]);
    }

    #[test]
    fn test_leap_day_birthday_in_common_year() {
        let delta = VisitDelta::new(1, 2, 0, 0).unwrap();
        let feb_28 = member(2, 0, Some("2000-02-29"), date(2026, 2, 28));

        // Exact month/day only by default
        let exact = CouponEvaluator::default();
        assert!(exact.evaluate(&feb_28, &delta, &CouponHistory::empty()).is_empty());

        let fallback = CouponEvaluator::new(EvaluatorConfig {
            leap_day_fallback: true,
            ..EvaluatorConfig::default()
        });
        assert_eq!(
            kinds(&fallback.evaluate(&feb_28, &delta, &CouponHistory::empty())),
            vec![CouponKind::Birthday]
        );

        // Leap years still only match Feb 29, under either setting
        let leap_feb_28 = member(2, 0, Some("2000-02-29"), date(2028, 2, 28));
        assert!(fallback.evaluate(&leap_feb_28, &delta, &CouponHistory::empty()).is_empty());
        let leap_feb_29 = member(2, 0, Some("2000-02-29"), date(2028, 2, 29));
        assert_eq!(
            kinds(&exact.evaluate(&leap_feb_29, &delta, &CouponHistory::empty())),
            vec![CouponKind::Birthday]
        );
    }

    #[test]
    fn test_birthday_blocked_by_future_dated_award() {
        let evaluator = CouponEvaluator::default();
        let delta = VisitDelta::new(1, 2, 0, 0).unwrap();
        let as_of = date(2026, 10, 19);
        let history = birthday_history(&[date(2026, 10, 20)]);

        assert!(evaluator
            .evaluate(&member(2, 0, Some("10-19"), as_of), &delta, &history)
            .is_empty());
    }

    #[test]
    fn test_full_ordering() {
        let evaluator = CouponEvaluator::new(EvaluatorConfig {
            visit_step: NonZeroU64::new(1).unwrap(),
            ..EvaluatorConfig::default()
        });
        let as_of = date(2026, 10, 19);
        let delta = VisitDelta::new(0, 1, 0, 250_000).unwrap();
        let snapshot = member(1, 250_000, Some("19851019"), as_of);

        let awards = evaluator.evaluate(&snapshot, &delta, &CouponHistory::empty());
        assert_eq!(
            kinds(&awards),
            vec![
                CouponKind::Welcome,
                CouponKind::VisitMilestone { step: 1, visit_count: 1 },
                CouponKind::SpendMilestone { threshold: 100_000 },
                CouponKind::SpendMilestone { threshold: 200_000 },
                CouponKind::Birthday,
            ]
        );

        // Same input, same output
        assert_eq!(awards, evaluator.evaluate(&snapshot, &delta, &CouponHistory::empty()));
    }

    #[test]
    fn test_config_deserialization() {
        let config: EvaluatorConfig = serde_json::from_str(
            r#"{"visit_step": 5, "spend_unit": 50000, "birthday_cooldown_days": 300}"#,
        )
        .unwrap();
        assert_eq!(config.visit_step.get(), 5);
        assert_eq!(config.visit_crossing, VisitCrossing::PerBoundary);

        let zero = serde_json::from_str::<EvaluatorConfig>(
            r#"{"visit_step": 0, "spend_unit": 50000, "birthday_cooldown_days": 300}"#,
        );
        assert!(zero.is_err());
    }
}
