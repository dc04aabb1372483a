//! Shared types for autocrypt crates.

pub mod ids;

pub use ids::{CertificateId, CycleId, LoadBalancerId, ProjectId, ServiceId};
