// src/cli/handlers/headers.rs

use crate::cli::args::HeadersArgs;
use crate::cli::handlers::commons;
use crate::state;
use anyhow::Result;
use clap::Parser;
use colored::*;

/// The handler for the `headers` command.
pub fn handle(args: Vec<String>) -> Result<()> {
    let args = HeadersArgs::try_parse_from(&args)?;
    let file = commons::resolve_file(&args.file)?;
    let assistant = state::get_assistant()?;

    let headers = assistant.headers(&file, &args.prefix);
    if headers.is_empty() {
        println!("{}", format!("No headers start with '{}'.", args.prefix).dimmed());
    }
    for header in &headers {
        let folder = header.label.split_once('\t').map(|(_, f)| f).unwrap_or_default();
        println!("{:<40} {}", header.path.cyan(), folder.dimmed());
    }
    Ok(())
}
