pub mod events;

pub use events::CouponIssuedEvent;
