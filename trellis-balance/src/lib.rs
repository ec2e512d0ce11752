//! Trellis Balance Library
//!
//! This library provides the client side resilience core for the Trellis
//! toolkit including:
//! - Instance selection strategies (weighted random, weighted round robin,
//!   smooth weighted round robin, earliest deadline first, consistent hash ring)
//! - Fused instance detection and recovery
//! - Status changelog reporting
//! - Warm-up traffic shaping

pub mod balance;
pub mod health;
pub mod shaping;

// Re-export commonly used types
pub use balance::{
    create_balancer, effective_weight, EdfBalancer, HashRingBalancer, LoadBalancer,
    SmoothWeightedBalancer, WeightMode, WeightedRandomBalancer, WeightedRoundRobinBalancer,
};
pub use health::{
    ChangeHistory, DetectOutcome, Detector, HealthMonitor, RecoveryRecord, Registry,
    RegistryCategory, RegistrySnapshot, Reporter, ServiceChangelog, ServiceData,
    StatusChangeRecord, StatusIntersection,
};
pub use shaping::WarmUpTrafficShaping;
