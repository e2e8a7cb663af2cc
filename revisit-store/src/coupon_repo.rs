use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use revisit_core::{CoreError, CoreResult, CouponFilter, CouponRepository};
use revisit_coupon::{CouponCategory, IssuedCoupon};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::info;
use uuid::Uuid;

use crate::{corrupt_row, storage_error};

pub(crate) const COUPON_COLUMNS: &str =
    "id, member_id, kind, milestone, description, issued_at, issued_on, used, used_at";

#[derive(sqlx::FromRow)]
pub(crate) struct CouponRow {
    id: Uuid,
    member_id: Uuid,
    kind: String,
    milestone: Option<i64>,
    description: String,
    issued_at: DateTime<Utc>,
    issued_on: NaiveDate,
    used: bool,
    used_at: Option<DateTime<Utc>>,
}

impl TryFrom<CouponRow> for IssuedCoupon {
    type Error = CoreError;

    fn try_from(row: CouponRow) -> Result<Self, Self::Error> {
        let kind = row
            .kind
            .parse::<CouponCategory>()
            .map_err(|e| corrupt_row("coupon", e))?;

        Ok(IssuedCoupon {
            id: row.id,
            member_id: row.member_id,
            kind,
            milestone: row.milestone,
            description: row.description,
            issued_at: row.issued_at,
            issued_on: row.issued_on,
            used: row.used,
            used_at: row.used_at,
        })
    }
}

pub struct StoreCouponRepository {
    pool: SqlitePool,
}

impl StoreCouponRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CouponRepository for StoreCouponRepository {
    async fn list_coupons(&self, filter: &CouponFilter) -> CoreResult<Vec<IssuedCoupon>> {
        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM coupons WHERE 1 = 1", COUPON_COLUMNS));

        if let Some(member_id) = filter.member_id {
            query.push(" AND member_id = ").push_bind(member_id);
        }
        if let Some(phone) = &filter.phone {
            query
                .push(" AND member_id IN (SELECT id FROM members WHERE phone = ")
                .push_bind(phone.clone())
                .push(")");
        }
        if let Some(kind) = filter.kind {
            query.push(" AND kind = ").push_bind(kind.as_str());
        }
        if let Some(from) = filter.issued_from {
            query.push(" AND issued_on >= ").push_bind(from);
        }
        if let Some(to) = filter.issued_to {
            query.push(" AND issued_on <= ").push_bind(to);
        }
        if let Some(used) = filter.used {
            query.push(" AND used = ").push_bind(used);
        }
        // rowid keeps the award order of coupons minted by the same visit
        query.push(" ORDER BY issued_at DESC, rowid ASC");

        let rows = query
            .build_query_as::<CouponRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;

        rows.into_iter().map(IssuedCoupon::try_from).collect()
    }

    async fn redeem_coupon(&self, id: Uuid, at: DateTime<Utc>) -> CoreResult<IssuedCoupon> {
        let redeemed: Option<CouponRow> = sqlx::query_as(&format!(
            "UPDATE coupons SET used = 1, used_at = ? WHERE id = ? AND used = 0 RETURNING {}",
            COUPON_COLUMNS
        ))
        .bind(at)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        if let Some(row) = redeemed {
            let coupon = IssuedCoupon::try_from(row)?;
            info!("Coupon {} ({}) redeemed", coupon.id, coupon.kind);
            return Ok(coupon);
        }

        let exists: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM coupons WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;

        match exists {
            Some(_) => Err(CoreError::Conflict(format!("coupon {} was already used", id))),
            None => Err(CoreError::NotFound(format!("coupon {}", id))),
        }
    }
}
