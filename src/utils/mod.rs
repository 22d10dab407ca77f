//! Utility functions shared across the crate
//!
//! Formatting, cache paths, URL helpers and throughput tracking.

mod format;
mod path;
mod progress;
mod system;

pub use format::*;
pub use path::*;
pub use progress::*;
pub use system::*;
