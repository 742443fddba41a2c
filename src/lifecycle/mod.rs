// src/lifecycle/mod.rs
mod deadline;
mod shutdown;

pub use deadline::{Deadline, DeadlineExceeded};
pub use shutdown::{ShutdownCoordinator, ShutdownError, DEFAULT_SHUTDOWN_TIMEOUT};
