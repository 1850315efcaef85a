// src/cli/handlers/mod.rs

pub mod check;
pub mod cmake_cache;
pub mod commons;
pub mod complete;
pub mod flags;
pub mod headers;
