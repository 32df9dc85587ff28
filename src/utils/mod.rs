pub mod error;
pub mod slow_warn;
