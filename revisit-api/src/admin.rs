use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use futures_util::{Stream, StreamExt};
use revisit_core::member::normalize_phone;
use revisit_core::{CouponFilter, Member};
use revisit_coupon::IssuedCoupon;
use serde::Deserialize;
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::error::{AppError, AppQuery};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListMembersQuery {
    pub branch: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/admin/members", get(list_members))
        .route("/v1/admin/coupons", get(list_coupons))
        .route("/v1/admin/coupons/stream", get(coupon_stream))
        .route("/v1/admin/coupons/{id}/redeem", post(redeem_coupon))
}

/// GET /v1/admin/members?branch=
async fn list_members(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<ListMembersQuery>,
) -> Result<Json<Vec<Member>>, AppError> {
    let branch = query.branch.as_deref().map(str::trim).filter(|b| !b.is_empty());
    Ok(Json(state.visits.list_members(branch).await?))
}

/// GET /v1/admin/coupons?member_id&phone&kind&issued_from&issued_to&used
async fn list_coupons(
    State(state): State<AppState>,
    AppQuery(mut filter): AppQuery<CouponFilter>,
) -> Result<Json<Vec<IssuedCoupon>>, AppError> {
    if let Some(phone) = filter.phone.take() {
        filter.phone = Some(normalize_phone(&phone)?);
    }
    Ok(Json(state.coupons.list_coupons(&filter).await?))
}

/// POST /v1/admin/coupons/{id}/redeem
async fn redeem_coupon(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<IssuedCoupon>, AppError> {
    Ok(Json(state.coupons.redeem_coupon(id, Utc::now()).await?))
}

/// GET /v1/admin/coupons/stream
async fn coupon_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.sse_tx.subscribe()).filter_map(|result| async move {
        match result {
            Ok(event) => Event::default().event("coupon_issued").json_data(&event).ok().map(Ok),
            Err(e) => {
                tracing::warn!("Coupon stream subscriber fell behind: {}", e);
                None
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
