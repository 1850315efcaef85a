//! # System Interaction Layer
//!
//! The boundary between the caches and the operating system.
//!
//! ## Modules
//!
//! - **`executor`**: Runs external programs (clang, cmake, the compiler
//!   built-in queries) and captures their output.
//! - **`job_pool`**: Debounces requests by name and runs them on a worker
//!   pool.

pub mod executor;
pub mod job_pool;
