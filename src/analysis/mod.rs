//! Aggregation engine and its boundary cache.
//!
//! The engine functions are pure; [`AggregationCache`] memoizes their
//! outputs per dataset for callers that issue repeated requests.

pub mod cache;
pub mod engine;
pub mod request;
pub mod stats;

pub use cache::AggregationCache;
pub use engine::{
    apply_category_order, bucket_by_time, count_by, describe_by, describe_by_time, execute,
};
pub use request::{AggregationRequest, CategoryOrders, CountRequest, DescribeRequest, TimeRequest};
