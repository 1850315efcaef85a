// src/bin/clang-assist.rs

use anyhow::{Result, anyhow};
use clang_assist::cli::{Cli, handlers};
use clap::Parser;
use colored::*;

// --- Command Definition and Registry ---

/// A command, its aliases and its handler.
struct CommandDefinition {
    name: &'static str,
    aliases: &'static [&'static str],
    handler: fn(Vec<String>) -> Result<()>,
}

/// Every command of the binary. Adding a command means adding an entry here.
static COMMAND_REGISTRY: &[CommandDefinition] = &[
    CommandDefinition {
        name: "check",
        aliases: &["diag"],
        handler: handlers::check::handle,
    },
    CommandDefinition {
        name: "cmake",
        aliases: &[],
        handler: handlers::cmake_cache::handle,
    },
    CommandDefinition {
        name: "complete",
        aliases: &["comp"],
        handler: handlers::complete::handle,
    },
    CommandDefinition {
        name: "flags",
        aliases: &[],
        handler: handlers::flags::handle,
    },
    CommandDefinition {
        name: "headers",
        aliases: &["inc"],
        handler: handlers::headers::handle,
    },
];

fn find_command(name: &str) -> Option<&'static CommandDefinition> {
    COMMAND_REGISTRY
        .iter()
        .find(|cmd| cmd.name == name || cmd.aliases.contains(&name))
}

fn main() {
    env_logger::init();

    if let Err(e) = run_cli(Cli::parse()) {
        eprintln!("\n{}: {:#}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

fn run_cli(cli: Cli) -> Result<()> {
    log::debug!("CLI args parsed: {:?}", cli);

    let Some(name) = cli.command else {
        let names: Vec<_> = COMMAND_REGISTRY.iter().map(|cmd| cmd.name).collect();
        println!("Commands: {}", names.join(", ").cyan());
        return Ok(());
    };
    let command = find_command(&name).ok_or_else(|| anyhow!("Unknown command '{}'", name))?;
    (command.handler)(cli.args)
}
