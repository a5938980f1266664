pub mod bootstrap;
pub mod discovery;
pub mod error;
pub mod orchestrator;
pub mod relay;
pub mod server;
pub mod soap;
pub mod templates;
pub mod types;

pub use discovery::DiscoveryResponder;
pub use error::DeviceError;
pub use orchestrator::{Orchestrator, OrchestratorOptions};
pub use relay::Relay;
pub use server::DeviceServer;
pub use soap::{SoapAction, SoapResponder};
pub use types::*;
