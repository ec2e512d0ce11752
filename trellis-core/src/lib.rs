//! Trellis Core Library
//!
//! This library provides the shared building blocks for the Trellis
//! resilience toolkit including:
//! - Instance model and status state machine
//! - Location and metadata helpers
//! - Error taxonomy with stable error codes
//! - Options for health checking, load balancing and warm-up shaping

pub mod config;
pub mod error;
pub mod instance;
pub mod location;
pub mod metadata;

// Re-export commonly used types
pub use config::model::{
    BalanceOptions, BalanceStrategy, HashRingOptions, HealthOptions, LimitResource, LimitType,
    RateAmount, RateLimitRule, ResilienceSettings, WarmUpOptions,
};
pub use error::{CoreError, ErrorCode, Result};
pub use instance::{Instance, InstanceId, InstanceStatus};
pub use location::Location;
pub use metadata::{metadata_intersection, Metadata};
