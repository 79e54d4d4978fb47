//! Judge API access: envelope types, global throttle and the resilient client.

mod client;
mod throttle;
pub mod types;

pub use client::{ApiClient, RetryPolicy};
pub use throttle::Throttle;
