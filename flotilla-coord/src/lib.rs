pub mod config_client;
pub mod discovery;
pub mod error;
pub mod runtime;
pub mod service_client;

pub use config_client::ConfigClient;
pub use discovery::{DiscoveryClient, RegistryMaintenance, ServiceRecord, ServiceRegistry};
pub use error::{Error, Result};
pub use runtime::Coordinator;
pub use service_client::ServiceClient;
