// src/core/mod.rs

pub mod assistant;
pub mod buffer_config;
pub mod cache;
pub mod compiler_builtins;
pub mod completion;
pub mod flag;
pub mod flags_cache;
pub mod flags_source;
pub mod include_headers;
pub mod paths;
pub mod search_scope;
pub mod settings;
