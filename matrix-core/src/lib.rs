//! Matrix Core
//!
//! Core types and abstractions for the Matrix test orchestrator.
//!
//! This crate contains:
//! - Domain types: jobs, results, resource specs, container and network handles
//! - Errors: the runtime and task error taxonomy
//! - Runtime: the `RuntimeClient` trait every container engine adapter implements

pub mod domain;
pub mod error;
pub mod runtime;

pub use domain::container::{ContainerHandle, ContainerOptions, Link};
pub use domain::job::{RepoJob, TaskResult};
pub use domain::network::{DEFAULT_NETWORK_DRIVER, NetworkHandle};
pub use domain::resource::ResourceSpec;
pub use error::{CleanupError, CleanupFailure, CleanupStep, RuntimeError, TaskError};
pub use runtime::RuntimeClient;
