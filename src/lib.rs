//! # clang-assist
//!
//! Compile-flag resolution and completion caching for clang-based C, C++ and
//! Objective-C tooling. The crate finds the flags a source file should be
//! compiled with (compilation databases, CMake projects, flags files), keeps
//! parsed compilation state per open buffer, and answers completion and
//! diagnostics requests through either libclang or a clang subprocess.

pub mod cli;
pub mod constants;
pub mod core;
pub mod dev_utils;
pub mod models;
pub mod state;
pub mod system;
