//! Core domain types
//!
//! Handles and inputs shared between the runtime client and the lifecycle
//! components. None of these are persisted; they live for one task at most.

pub mod container;
pub mod job;
pub mod network;
pub mod resource;
