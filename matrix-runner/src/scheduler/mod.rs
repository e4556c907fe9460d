//! Scheduler layer for the runner
//!
//! Fans repo jobs out to a bounded pool of workers, each running complete
//! task cycles, and streams results back as tasks finish.

pub mod pool;

pub use pool::{Scheduler, job_channel};
