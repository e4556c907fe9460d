//! Matrix runner library
//!
//! Runs integration tests for many repositories concurrently against a
//! container runtime. Each repository gets an isolated task:
//! - Network: a fresh, uniquely named network
//! - Resources: dependency containers the endpoint talks to
//! - Endpoint: the container under test, wired to its resources
//! - Tests: a client container run against the ready endpoint
//! - Teardown: everything above removed, failures reported together

pub mod cleanup;
pub mod config;
pub mod endpoint;
pub mod network;
pub mod podman;
pub mod readiness;
pub mod repo;
pub mod resource;
pub mod scheduler;
pub mod suite;
pub mod task;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use podman::PodmanRuntime;
pub use scheduler::Scheduler;
pub use task::{TaskRunner, TaskSettings};
