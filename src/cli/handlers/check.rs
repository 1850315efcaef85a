// src/cli/handlers/check.rs

use crate::cli::args::CheckArgs;
use crate::cli::handlers::commons;
use crate::models::{Diagnostic, Severity};
use crate::state;
use anyhow::Result;
use clap::Parser;
use colored::*;

/// The handler for the `check` command.
pub fn handle(args: Vec<String>) -> Result<()> {
    let args = CheckArgs::try_parse_from(&args)?;
    let file = commons::resolve_file(&args.file)?;
    let snapshot = commons::read_snapshot(&file)?;
    let assistant = state::get_assistant()?;

    assistant.open(snapshot.id);
    let diagnostics = assistant.diagnostics(&snapshot)?;
    assistant.on_close(snapshot.id);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&diagnostics)?);
        return Ok(());
    }
    for diagnostic in &diagnostics {
        println!("{}", render(diagnostic));
    }
    let errors = diagnostics
        .iter()
        .filter(|d| d.severity >= Severity::Error)
        .count();
    let summary = format!("{} diagnostic(s), {} error(s)", diagnostics.len(), errors);
    if errors > 0 {
        println!("\n{}", summary.red());
    } else {
        println!("\n{}", summary.green());
    }
    Ok(())
}

fn render(diagnostic: &Diagnostic) -> String {
    let severity = diagnostic.severity.to_string();
    let severity = match diagnostic.severity {
        Severity::Error | Severity::Fatal => severity.red().bold(),
        Severity::Warning => severity.yellow().bold(),
        Severity::Note => severity.blue(),
    };
    format!(
        "{}:{}:{}: {}: {}",
        diagnostic.file.display(),
        diagnostic.row,
        diagnostic.col,
        severity,
        diagnostic.message
    )
}
