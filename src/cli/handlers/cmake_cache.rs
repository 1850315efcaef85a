// src/cli/handlers/cmake_cache.rs

use crate::cli::args::{CmakeAction, CmakeArgs};
use crate::cli::handlers::commons;
use crate::core::flags_source::{CmakeSource, FlagsSource};
use crate::core::{paths, settings};
use anyhow::{Result, anyhow};
use clap::Parser;
use colored::*;

/// The handler for the `cmake` command.
pub fn handle(args: Vec<String>) -> Result<()> {
    let args = CmakeArgs::try_parse_from(&args)?;
    let file = commons::resolve_file(&args.file)?;
    let settings = settings::load_settings()?;

    let source = CmakeSource::new(
        settings.cmake_binary.clone(),
        settings.cmake_prefix_paths.clone(),
        paths::get_temp_root(),
        settings.include_prefixes.clone(),
    );
    let marker = source
        .locate(&settings.search_scope_for(&file))
        .ok_or_else(|| anyhow!("No CMake project found for '{}'", file.display()))?;

    match args.action {
        CmakeAction::Inspect => {
            let info = source.inspect(&marker.path);
            println!("\n--- CMake project '{}' ---", info.cmake_lists.display().to_string().yellow());
            println!("  {:<12} {}", "build dir".blue(), info.build_dir.display());
            match &info.database {
                Some(db) => println!("  {:<12} {}", "database".blue(), db.display()),
                None => println!("  {:<12} {}", "database".blue(), "not generated".dimmed()),
            }
            let state = if info.needs_generation {
                "stale".red()
            } else {
                "up to date".green()
            };
            println!("  {:<12} {}", "state".blue(), state);
            if let Some(manifest) = &info.manifest {
                println!("  {}", "dependencies:".blue());
                for dependency in &manifest.dependencies {
                    let note = if dependency.mtime.is_some() { "" } else { " (missing)" };
                    println!("    {}{}", dependency.path.display(), note.red());
                }
            }
        }
        CmakeAction::Clear => {
            if source.clear(&marker.path)? {
                println!("{}", "Build directory removed.".green());
            } else {
                println!("{}", "Nothing to clear.".dimmed());
            }
        }
    }
    Ok(())
}
