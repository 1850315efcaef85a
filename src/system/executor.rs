// src/system/executor.rs

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::process::{Command as StdCommand, ExitStatus, Stdio};
use std::thread;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Command '{0}' could not be executed: {1}")]
    CommandFailed(String, std::io::Error),
}

/// What a finished subprocess left behind.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Stdout followed by stderr, the way a terminal would interleave them
    /// for tools that write everything at exit.
    pub fn combined(&self) -> String {
        let mut text = String::with_capacity(self.stdout.len() + self.stderr.len());
        text.push_str(&self.stdout);
        text.push_str(&self.stderr);
        text
    }
}

/// Runs `program` with an already split argument list. `stdin_data`, when
/// given, is written to the child's stdin; otherwise stdin is closed.
pub fn execute_args(
    program: &str,
    args: &[String],
    cwd: &Path,
    env_vars: &HashMap<String, String>,
    stdin_data: Option<&str>,
) -> Result<CommandOutput, ExecutionError> {
    let display_line = render_command_line(program, args);
    let clean_cwd = dunce::simplified(cwd);
    log::debug!("Running '{}' in '{}'", display_line, clean_cwd.display());

    let mut command = StdCommand::new(program);
    command
        .args(args)
        .current_dir(clean_cwd)
        .envs(env_vars)
        .stdin(if stdin_data.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command
        .spawn()
        .map_err(|e| ExecutionError::CommandFailed(display_line.clone(), e))?;

    // Stdin is fed from its own thread so a child filling its output pipes
    // never waits on us while we wait on it.
    let writer = match (stdin_data, child.stdin.take()) {
        (Some(data), Some(mut stdin)) => {
            let data = data.to_owned();
            let line = display_line.clone();
            Some(thread::spawn(move || {
                // The child may exit before reading everything.
                if let Err(e) = stdin.write_all(data.as_bytes()) {
                    log::debug!("Could not write stdin of '{}': {}", line, e);
                }
            }))
        }
        _ => None,
    };

    let output = child
        .wait_with_output()
        .map_err(|e| ExecutionError::CommandFailed(display_line.clone(), e))?;
    if let Some(writer) = writer {
        if writer.join().is_err() {
            log::warn!("Stdin writer of '{}' panicked", display_line);
        }
    }

    log::trace!(
        "'{}' finished with {} ({} bytes stdout, {} bytes stderr)",
        display_line,
        output.status,
        output.stdout.len(),
        output.stderr.len()
    );

    Ok(CommandOutput {
        status: output.status,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Joins a program and its arguments back into a quoted, loggable line.
pub fn render_command_line(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .map(|part| shlex::try_quote(part).map_or_else(|_| part.to_string(), |q| q.into_owned()))
        .collect::<Vec<_>>()
        .join(" ")
}
