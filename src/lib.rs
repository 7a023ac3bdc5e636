//! Container resource dashboard engine
//!
//! Streams Docker stats for every running container, derives CPU, memory,
//! network and block I/O metrics, and dispatches lifecycle actions.

pub mod core;
pub mod utils;
