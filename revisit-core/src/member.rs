use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use revisit_coupon::{BirthDate, IssuedCoupon, MemberSnapshot};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::{CoreError, CoreResult};

const MAX_NAME_CHARS: usize = 50;

/// Registered loyalty member
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Member {
    pub id: Uuid,
    pub name: String,
    pub phone: String,
    pub branch: String,
    pub birth_date: Option<BirthDate>,
    pub marketing_consent: bool,
    pub privacy_consent: bool,
    pub visit_count: u64,
    pub total_spend: u64,
    pub joined_at: DateTime<Utc>,
    pub last_visit_at: Option<DateTime<Utc>>,
}

impl Member {
    /// Evaluator input as of the local date `as_of`.
    pub fn snapshot(&self, as_of: NaiveDate, offset: FixedOffset) -> MemberSnapshot {
        MemberSnapshot {
            member_id: self.id,
            branch: self.branch.clone(),
            visit_count: self.visit_count,
            total_spend: self.total_spend,
            birth_date: self.birth_date,
            joined_on: self.joined_at.with_timezone(&offset).date_naive(),
            as_of,
        }
    }
}

/// Registration form as submitted at the counter
#[derive(Debug, Clone, Deserialize)]
pub struct JoinForm {
    pub name: String,
    pub phone: String,
    pub branch: Option<String>,
    pub birth: Option<String>,
    #[serde(default)]
    pub marketing_consent: bool,
    #[serde(default)]
    pub privacy_consent: bool,
}

impl JoinForm {
    pub fn into_new_member(self, default_branch: &str) -> CoreResult<NewMember> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(CoreError::ValidationError("name is required".to_string()));
        }
        if name.chars().count() > MAX_NAME_CHARS {
            return Err(CoreError::ValidationError(format!(
                "name must be at most {} characters",
                MAX_NAME_CHARS
            )));
        }

        let birth_date = match self.birth.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(raw.parse::<BirthDate>()?),
        };

        Ok(NewMember {
            name,
            phone: normalize_phone(&self.phone)?,
            branch: normalize_branch(self.branch.as_deref(), default_branch),
            birth_date,
            marketing_consent: self.marketing_consent,
            privacy_consent: self.privacy_consent,
        })
    }
}

/// Validated registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMember {
    pub name: String,
    pub phone: String,
    pub branch: String,
    pub birth_date: Option<BirthDate>,
    pub marketing_consent: bool,
    pub privacy_consent: bool,
}

/// Strip punctuation from a phone number and check what is left.
///
/// Domestic numbers only: 9 to 11 digits with a leading 0.
pub fn normalize_phone(raw: &str) -> CoreResult<String> {
    let digits: String = raw
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
        .collect();

    let valid = (9..=11).contains(&digits.len())
        && digits.starts_with('0')
        && digits.chars().all(|c| c.is_ascii_digit());
    if !valid {
        return Err(CoreError::ValidationError(format!("invalid phone number: {}", raw.trim())));
    }
    Ok(digits)
}

pub fn normalize_branch(raw: Option<&str>, default_branch: &str) -> String {
    match raw.map(str::trim) {
        Some(branch) if !branch.is_empty() => branch.to_string(),
        _ => default_branch.to_string(),
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VisitSource {
    /// The registration visit
    Join,
    Manual,
    Receipt,
}

impl VisitSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            VisitSource::Join => "JOIN",
            VisitSource::Manual => "MANUAL",
            VisitSource::Receipt => "RECEIPT",
        }
    }
}

impl fmt::Display for VisitSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VisitSource {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "JOIN" => Ok(VisitSource::Join),
            "MANUAL" => Ok(VisitSource::Manual),
            "RECEIPT" => Ok(VisitSource::Receipt),
            other => Err(CoreError::ValidationError(format!("unknown visit source: {}", other))),
        }
    }
}

/// A visit about to be recorded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewVisit {
    pub branch: String,
    pub spend: u64,
    pub approval_no: Option<String>,
    pub source: VisitSource,
    /// Store-local time of the visit
    pub visited_at: DateTime<FixedOffset>,
}

impl NewVisit {
    /// Local calendar date of the visit
    pub fn visited_on(&self) -> NaiveDate {
        self.visited_at.date_naive()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VisitRecord {
    pub id: Uuid,
    pub member_id: Uuid,
    pub branch: String,
    pub spend: u64,
    pub approval_no: Option<String>,
    pub source: VisitSource,
    pub visited_at: DateTime<Utc>,
}

/// Result of one committed visit: updated member, the visit row and the coupons it earned
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitOutcome {
    pub member: Member,
    pub visit: VisitRecord,
    pub coupons: Vec<IssuedCoupon>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", content = "member", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhoneCheck {
    New,
    Existing(Member),
}
