//! Service registry, discovery client, and registry maintenance

pub mod client;
pub mod maintenance;
pub mod registry;

pub use client::DiscoveryClient;
pub use maintenance::RegistryMaintenance;
pub use registry::{ServiceRecord, ServiceRegistry};
