use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use revisit_core::{CouponFilter, JoinForm, PhoneCheck, VisitOutcome, VisitRecord};
use revisit_coupon::IssuedCoupon;
use serde::Deserialize;

use crate::error::{AppError, AppJson};
use crate::state::AppState;

/// Receipt photos from phone cameras run well past axum's 2 MB default
const RECEIPT_BODY_LIMIT: usize = 10 * 1024 * 1024;

#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    pub phone: String,
}

#[derive(Debug, Deserialize)]
pub struct VisitRequest {
    #[serde(alias = "amount")]
    pub spend: u64,
    pub branch: Option<String>,
    pub approval_no: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/members", post(join))
        .route("/v1/members/check", post(check))
        .route("/v1/members/{phone}/visits", post(record_visit).get(list_visits))
        .route(
            "/v1/members/{phone}/visits/receipt",
            post(record_receipt_visit).layer(DefaultBodyLimit::max(RECEIPT_BODY_LIMIT)),
        )
        .route("/v1/members/{phone}/coupons", get(member_coupons))
}

async fn check(
    State(state): State<AppState>,
    AppJson(req): AppJson<CheckRequest>,
) -> Result<Json<PhoneCheck>, AppError> {
    Ok(Json(state.visits.check(&req.phone).await?))
}

async fn join(
    State(state): State<AppState>,
    AppJson(form): AppJson<JoinForm>,
) -> Result<(StatusCode, Json<VisitOutcome>), AppError> {
    let outcome = state.visits.join(form, Utc::now()).await?;
    state.publish(&outcome);
    Ok((StatusCode::CREATED, Json(outcome)))
}

async fn record_visit(
    State(state): State<AppState>,
    Path(phone): Path<String>,
    AppJson(req): AppJson<VisitRequest>,
) -> Result<Json<VisitOutcome>, AppError> {
    let outcome = state
        .visits
        .record_visit(&phone, req.branch.as_deref(), req.spend, req.approval_no, Utc::now())
        .await?;
    state.publish(&outcome);
    Ok(Json(outcome))
}

/// Multipart fields: `receipt` (the image) and optional `branch`
async fn record_receipt_visit(
    State(state): State<AppState>,
    Path(phone): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<VisitOutcome>, AppError> {
    let mut branch: Option<String> = None;
    let mut image = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::ValidationError(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "branch" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::ValidationError(e.to_string()))?;
                branch = Some(text);
            }
            "receipt" => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::ValidationError(e.to_string()))?;
                image = Some(bytes);
            }
            other => tracing::debug!("Ignoring multipart field {}", other),
        }
    }

    let image =
        image.ok_or_else(|| AppError::ValidationError("missing receipt field".to_string()))?;
    let outcome = state
        .visits
        .record_receipt_visit(&phone, branch.as_deref(), &image, Utc::now())
        .await?;
    state.publish(&outcome);
    Ok(Json(outcome))
}

async fn list_visits(
    State(state): State<AppState>,
    Path(phone): Path<String>,
) -> Result<Json<Vec<VisitRecord>>, AppError> {
    Ok(Json(state.visits.visits(&phone).await?))
}

async fn member_coupons(
    State(state): State<AppState>,
    Path(phone): Path<String>,
) -> Result<Json<Vec<IssuedCoupon>>, AppError> {
    let member = state.visits.member(&phone).await?;
    let filter = CouponFilter {
        member_id: Some(member.id),
        ..CouponFilter::default()
    };
    Ok(Json(state.coupons.list_coupons(&filter).await?))
}
