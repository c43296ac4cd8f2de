//! Client-side dispatch core for a service-mesh RPC system.
//!
//! A [`client::ServiceClient`] watches a [`store::CoordinationStore`] for a
//! live set of service instances, pools handshake-completed connections to
//! each one, and dispatches calls with hedged retries across instances.

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod hedge;
pub mod instance;
pub mod metrics;
pub mod mux;
pub mod pool;
pub mod receptacle;
pub mod registry;
pub mod store;
pub mod transport;
pub mod wire;

pub use client::ServiceClient;
pub use config::{ClientConfig, Query};
pub use error::DispatchError;
pub use instance::{ServiceInstance, TimeoutConfig};
pub use receptacle::Receptacle;
