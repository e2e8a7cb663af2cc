pub mod member;
pub mod receipt;
pub mod repository;
pub mod visit;

pub use member::{
    JoinForm, Member, NewMember, NewVisit, PhoneCheck, VisitOutcome, VisitRecord, VisitSource,
};
pub use receipt::{OcrError, ReceiptReader, ReceiptScan};
pub use repository::{CouponFilter, CouponRepository, MemberRepository};
pub use visit::{VisitService, VisitSettings};

use revisit_coupon::CouponError;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    ValidationError(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Receipt could not be read: {0}")]
    Receipt(#[from] OcrError),
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl From<CouponError> for CoreError {
    fn from(err: CouponError) -> Self {
        match err {
            CouponError::NonMonotoneDelta { .. } => CoreError::InternalError(err.to_string()),
            CouponError::UnknownCategory(_) | CouponError::InvalidBirthDate(_) => {
                CoreError::ValidationError(err.to_string())
            }
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
