//! hubdeploy-remote — clients for the remote image builder and runner.
//!
//! The scheduler and workflow crates only see the [`ImageBuilder`] and
//! [`ImageRunner`] traits; the HTTP implementations here speak JSON over
//! HTTP/1 to the services configured under `[remote]`; the memory
//! implementations replay scripted responses in-process.

pub mod builder;
pub mod error;
pub mod http;
pub mod memory;
pub mod runner;

pub use builder::{
    BuildResponse, BuildStatusCode, HttpImageBuilder, ImageBuildStatusRequest,
    ImageBuildStatusResponse, ImageBuildStopRequest, ImageBuilder, ImageBuilderRequest,
};
pub use error::{RemoteError, RemoteResult};
pub use http::JsonClient;
pub use memory::{MemoryImageBuilder, MemoryImageRunner};
pub use runner::{
    HttpImageRunner, ImageRunner, Instance, ReplicaResponse, RunRequest, RunResponse,
    RunStatusCode, ServiceRequest, StatusResponse,
};
