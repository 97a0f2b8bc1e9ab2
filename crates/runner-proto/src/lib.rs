//! # Runner Protocol
//!
//! Wire types and the gRPC client for the `runner.Runner` service exposed by
//! tf-runner pods. Messages are plain prost structs so the controller can be
//! built without `protoc`.

mod client;
mod messages;

pub use client::RunnerClient;
pub use messages::*;

/// Fully qualified gRPC service name
pub const SERVICE_NAME: &str = "runner.Runner";
