//! Services layer - orchestration logic
//!
//! Coordinates domain logic and infrastructure adapters: raising pull
//! requests, waiting on them, and driving a whole promotion.

pub mod promote;
pub mod pull_request;
pub mod reconcile;

// Re-export commonly used types
pub use promote::PromoteService;
