//! Rancher Cattle API client
//!
//! Covers only the resources certificate automation touches: services,
//! load balancer services, certificates, and projects.
//!
//! The [`PlatformApi`] trait is the seam the reconciler depends on;
//! [`RancherClient`] implements it over HTTP.

mod client;
mod error;
mod models;

pub use client::{PlatformApi, RancherClient};
pub use error::RancherError;
pub use models::{
    Certificate, Collection, LaunchConfig, LbConfig, LoadBalancer, PortRule, Project, Service,
    ServiceLbConfig,
};
