// src/cli/handlers/complete.rs

use crate::cli::args::CompleteArgs;
use crate::cli::handlers::commons;
use crate::models::Position;
use crate::state;
use anyhow::{Context, Result};
use clap::Parser;
use colored::*;

/// The handler for the `complete` command.
pub fn handle(args: Vec<String>) -> Result<()> {
    let args = CompleteArgs::try_parse_from(&args)?;
    let file = commons::resolve_file(&args.file)?;
    let snapshot = commons::read_snapshot(&file)?;
    let assistant = state::get_assistant()?;

    assistant.open(snapshot.id);
    let items = assistant
        .complete(&snapshot, Position::new(args.row, args.col))
        .with_context(|| format!("Completion failed at {}:{}", args.row, args.col))?;
    assistant.on_close(snapshot.id);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }
    for item in &items {
        let hint = item.label.split_once('\t').map(|(_, hint)| hint).unwrap_or_default();
        println!("{:<30} {}", item.trigger().cyan(), hint.dimmed());
    }
    log::debug!("{} completions via {}", items.len(), assistant.engine_kind());
    Ok(())
}
