use async_trait::async_trait;
use chrono::{DateTime, Utc};
use revisit_core::{
    CoreError, CoreResult, Member, MemberRepository, NewMember, NewVisit, VisitOutcome, VisitRecord,
    VisitSource,
};
use revisit_coupon::{
    BirthDate, CouponCategory, CouponEvaluator, CouponHistory, IssuedCoupon, PriorAward, VisitDelta,
};
use revisit_shared::Masked;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::coupon_repo::{CouponRow, COUPON_COLUMNS};
use crate::{conflict_or_storage, corrupt_row, storage_error};

const MEMBER_COLUMNS: &str = "id, name, phone, branch, birth_date, marketing_consent, \
     privacy_consent, visit_count, total_spend, joined_at, last_visit_at";

const VISIT_COLUMNS: &str = "id, member_id, branch, spend, approval_no, source, visited_at";

#[derive(sqlx::FromRow)]
struct MemberRow {
    id: Uuid,
    name: String,
    phone: String,
    branch: String,
    birth_date: Option<String>,
    marketing_consent: bool,
    privacy_consent: bool,
    visit_count: i64,
    total_spend: i64,
    joined_at: DateTime<Utc>,
    last_visit_at: Option<DateTime<Utc>>,
}

impl TryFrom<MemberRow> for Member {
    type Error = CoreError;

    fn try_from(row: MemberRow) -> Result<Self, Self::Error> {
        let birth_date = row
            .birth_date
            .as_deref()
            .map(str::parse::<BirthDate>)
            .transpose()
            .map_err(|e| corrupt_row("member", e))?;

        Ok(Member {
            id: row.id,
            name: row.name,
            phone: row.phone,
            branch: row.branch,
            birth_date,
            marketing_consent: row.marketing_consent,
            privacy_consent: row.privacy_consent,
            visit_count: u64::try_from(row.visit_count).map_err(|e| corrupt_row("member", e))?,
            total_spend: u64::try_from(row.total_spend).map_err(|e| corrupt_row("member", e))?,
            joined_at: row.joined_at,
            last_visit_at: row.last_visit_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct VisitRow {
    id: Uuid,
    member_id: Uuid,
    branch: String,
    spend: i64,
    approval_no: Option<String>,
    source: String,
    visited_at: DateTime<Utc>,
}

impl TryFrom<VisitRow> for VisitRecord {
    type Error = CoreError;

    fn try_from(row: VisitRow) -> Result<Self, Self::Error> {
        Ok(VisitRecord {
            id: row.id,
            member_id: row.member_id,
            branch: row.branch,
            spend: u64::try_from(row.spend).map_err(|e| corrupt_row("visit", e))?,
            approval_no: row.approval_no,
            source: row.source.parse::<VisitSource>()?,
            visited_at: row.visited_at,
        })
    }
}

fn to_sql_amount(value: u64) -> CoreResult<i64> {
    i64::try_from(value)
        .map_err(|_| CoreError::ValidationError(format!("amount {} is too large", value)))
}

pub struct StoreMemberRepository {
    pool: SqlitePool,
}

impl StoreMemberRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Counter update, evaluation and coupon inserts for one visit. Runs inside
/// the caller's transaction; the first statement takes SQLite's write lock,
/// so visits for the same member are evaluated one at a time.
async fn apply_visit(
    conn: &mut SqliteConnection,
    member_id: Uuid,
    visit: &NewVisit,
    evaluator: &CouponEvaluator,
) -> CoreResult<VisitOutcome> {
    let visited_at = visit.visited_at.with_timezone(&Utc);

    let row: Option<MemberRow> = sqlx::query_as(&format!(
        "UPDATE members \
         SET visit_count = visit_count + 1, total_spend = total_spend + ?, last_visit_at = ? \
         WHERE id = ? RETURNING {}",
        MEMBER_COLUMNS
    ))
    .bind(to_sql_amount(visit.spend)?)
    .bind(visited_at)
    .bind(member_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(storage_error)?;
    let row = row.ok_or_else(|| CoreError::NotFound(format!("member {}", member_id)))?;
    let member = Member::try_from(row)?;

    let delta = VisitDelta::from_after(member.visit_count, member.total_spend, visit.spend)?;

    let prior: Vec<(String, chrono::NaiveDate)> =
        sqlx::query_as("SELECT kind, issued_on FROM coupons WHERE member_id = ?")
            .bind(member_id)
            .fetch_all(&mut *conn)
            .await
            .map_err(storage_error)?;
    let history = CouponHistory::new(
        prior
            .into_iter()
            .map(|(kind, issued_on)| {
                let category = kind
                    .parse::<CouponCategory>()
                    .map_err(|e| corrupt_row("coupon", e))?;
                Ok(PriorAward { category, issued_on })
            })
            .collect::<CoreResult<Vec<_>>>()?,
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
        visited_at,
    };
    sqlx::query(&format!("INSERT INTO visits ({}) VALUES (?, ?, ?, ?, ?, ?, ?)", VISIT_COLUMNS))
        .bind(record.id)
        .bind(record.member_id)
        .bind(&record.branch)
        .bind(to_sql_amount(record.spend)?)
        .bind(&record.approval_no)
        .bind(record.source.as_str())
        .bind(record.visited_at)
        .execute(&mut *conn)
        .await
        .map_err(|e| conflict_or_storage(e, "this receipt has already been used"))?;

    let mut coupons: Vec<IssuedCoupon> = Vec::with_capacity(awards.len());
    for award in awards {
        let category = award.kind.category();
        let milestone = award.kind.milestone().map(to_sql_amount).transpose()?;

        // The unique (member, kind, milestone) index is the last line of
        // defence against paying the same milestone twice.
        let inserted: Option<CouponRow> = sqlx::query_as(&format!(
            "INSERT INTO coupons \
             (id, member_id, visit_id, kind, milestone, description, issued_at, issued_on) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (member_id, kind, milestone) DO NOTHING RETURNING {}",
            COUPON_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(member_id)
        .bind(record.id)
        .bind(category.as_str())
        .bind(milestone)
        .bind(&award.description)
        .bind(visited_at)
        .bind(visit.visited_on())
        .fetch_optional(&mut *conn)
        .await
        .map_err(storage_error)?;

        match inserted {
            Some(row) => coupons.push(IssuedCoupon::try_from(row)?),
            None => warn!("Skipping {} coupon already issued to member {}", category, member_id),
        }
    }

    Ok(VisitOutcome {
        member,
        visit: record,
        coupons,
    })
}

#[async_trait]
impl MemberRepository for StoreMemberRepository {
    async fn register(
        &self,
        member: &NewMember,
        visit: &NewVisit,
        evaluator: &CouponEvaluator,
    ) -> CoreResult<VisitOutcome> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;
        let id = Uuid::new_v4();

        sqlx::query(
            "INSERT INTO members \
             (id, name, phone, branch, birth_date, marketing_consent, privacy_consent, joined_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(&member.name)
        .bind(&member.phone)
        .bind(&member.branch)
        .bind(member.birth_date.map(|b| b.to_string()))
        .bind(member.marketing_consent)
        .bind(member.privacy_consent)
        .bind(visit.visited_at.with_timezone(&Utc))
        .execute(&mut *tx)
        .await
        .map_err(|e| conflict_or_storage(e, "phone number is already registered"))?;

        let outcome = apply_visit(&mut tx, id, visit, evaluator).await?;
        tx.commit().await.map_err(storage_error)?;

        debug!("Registered member {} as {}", id, Masked(&member.phone));
        Ok(outcome)
    }

    async fn find_by_phone(&self, phone: &str) -> CoreResult<Option<Member>> {
        let row: Option<MemberRow> =
            sqlx::query_as(&format!("SELECT {} FROM members WHERE phone = ?", MEMBER_COLUMNS))
                .bind(phone)
                .fetch_optional(&self.pool)
                .await
                .map_err(storage_error)?;

        row.map(Member::try_from).transpose()
    }

    async fn list_members(&self, branch: Option<&str>) -> CoreResult<Vec<Member>> {
        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM members", MEMBER_COLUMNS));
        if let Some(branch) = branch {
            query.push(" WHERE branch = ").push_bind(branch.to_string());
        }
        query.push(" ORDER BY joined_at DESC, rowid DESC");

        let rows = query
            .build_query_as::<MemberRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;

        rows.into_iter().map(Member::try_from).collect()
    }

    async fn record_visit(
        &self,
        member_id: Uuid,
        visit: &NewVisit,
        evaluator: &CouponEvaluator,
    ) -> CoreResult<VisitOutcome> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;
        let outcome = apply_visit(&mut tx, member_id, visit, evaluator).await?;
        tx.commit().await.map_err(storage_error)?;
        Ok(outcome)
    }

    async fn list_visits(&self, member_id: Uuid) -> CoreResult<Vec<VisitRecord>> {
        let rows: Vec<VisitRow> = sqlx::query_as(&format!(
            "SELECT {} FROM visits WHERE member_id = ? ORDER BY visited_at DESC, rowid DESC",
            VISIT_COLUMNS
        ))
        .bind(member_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        rows.into_iter().map(VisitRecord::try_from).collect()
    }
}
