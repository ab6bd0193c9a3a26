//! hubdeployd — the hub deploy daemon.
//!
//! Wires the state store, the remote builder and runner clients, the
//! [`Deployer`](hubdeploy_deployer::Deployer) and one task driver (FIFO
//! scheduler or workflow engine) together, and serves them over HTTP.

pub mod api;
pub mod app;

pub use api::build_router;
pub use app::{AppContext, Driver};
