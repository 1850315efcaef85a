// src/cli/handlers/flags.rs

use crate::cli::args::FlagsArgs;
use crate::cli::handlers::commons;
use crate::state;
use anyhow::Result;
use clap::Parser;
use colored::*;

/// The handler for the `flags` command.
pub fn handle(args: Vec<String>) -> Result<()> {
    let args = FlagsArgs::try_parse_from(&args)?;
    let file = commons::resolve_file(&args.file)?;
    let assistant = state::get_assistant()?;

    let config = assistant.config_for(&file);
    println!("\n--- Flags for '{}' ---", file.display().to_string().yellow());
    match (config.source, &config.marker) {
        (Some(source), Some(marker)) => {
            println!("  {:<8} {} ({})", "source".blue(), source, marker.display());
        }
        _ => println!("  {:<8} {}", "source".blue(), "none".dimmed()),
    }

    let flags = if args.full {
        config.flags
    } else {
        assistant.flags_for_file(&file)
    };
    if flags.is_empty() {
        println!("  {}", "No flags.".dimmed());
    }
    for flag in flags {
        println!("  {}", flag);
    }
    Ok(())
}
