pub mod liveness;
pub mod readiness;
pub mod sync;
pub mod uploads;
