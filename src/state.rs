// src/state.rs

//! The process-wide assistant used by the command line.

use crate::core::assistant::Assistant;
use crate::core::completion::libclang::LibclangBinding;
use crate::core::completion::library::{ClangLibrary, LibraryRegistry};
use crate::core::settings;
use crate::models::Settings;
use anyhow::{Context, Result};
use std::sync::{Arc, OnceLock};

static ASSISTANT: OnceLock<Arc<Assistant>> = OnceLock::new();

/// The system libclang, keyed by its major version. Empty if libclang is
/// disabled or cannot be loaded.
fn library_registry(settings: &Settings) -> LibraryRegistry {
    let mut registry = LibraryRegistry::new();
    if !settings.use_libclang {
        return registry;
    }
    match LibclangBinding::start() {
        Ok(binding) => match binding.version_prefix() {
            Some(prefix) => registry.register(prefix, Arc::new(binding)),
            None => log::warn!("Unrecognized libclang version '{}'", binding.name()),
        },
        Err(e) => log::info!("{}", e),
    }
    registry
}

/// The shared assistant, built from the user's settings on first use.
pub fn get_assistant() -> Result<Arc<Assistant>> {
    if let Some(assistant) = ASSISTANT.get() {
        return Ok(Arc::clone(assistant));
    }
    let settings = settings::load_settings().context("Could not load settings")?;
    let registry = library_registry(&settings);
    let assistant =
        Arc::new(Assistant::new(settings, &registry).context("Could not start the assistant")?);
    // Another thread may have won the race; either instance is equivalent.
    let _ = ASSISTANT.set(Arc::clone(&assistant));
    Ok(ASSISTANT.get().map(Arc::clone).unwrap_or(assistant))
}
