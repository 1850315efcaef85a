// src/core/completion/process.rs

use super::{CompletionEngine, EngineError, ExclusionPolicy};
use crate::dev_utils::BlockTimer;
use crate::models::{CompletionItem, Diagnostic, EngineKind, Language, Position, Severity};
use crate::system::executor::{self, CommandOutput};
use lazy_static::lazy_static;
use log::{debug, trace};
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

lazy_static! {
    static ref COMPLETION_RE: Regex =
        Regex::new(r"^COMPLETION:\s(?P<name>.*?)\s:\s(?P<content>.*)$").expect("Invalid completion regex");
    static ref CONTENT_RE: Regex = Regex::new(
        r"<#(?P<param>[^#]+)#>|\[#(?P<type>[^#]+)#\]"
    )
    .expect("Invalid content regex");
    static ref OPTIONAL_RE: Regex = Regex::new(r"\{#|#\}").expect("Invalid optional regex");
    static ref DIAGNOSTIC_RE: Regex = Regex::new(
        r"^(?P<file>.*?):(?P<row>\d+):(?P<col>\d+): (?P<severity>fatal error|error|warning|note): (?P<message>.*)$"
    )
    .expect("Invalid diagnostic regex");
}

/// Parses `-code-completion-at` output into items.
///
/// `[#type#]` markers only appear in the hint, `<#param#>` markers become
/// numbered snippet fields, optional-group braces are dropped.
pub fn parse_completions(output: &str) -> Vec<CompletionItem> {
    output
        .lines()
        .filter_map(|line| {
            let caps = COMPLETION_RE.captures(line);
            if caps.is_none() {
                trace!("Skipping output line '{}'", line);
            }
            caps
        })
        .filter_map(|caps| {
            let name = caps.name("name")?.as_str();
            let content = OPTIONAL_RE.replace_all(caps.name("content")?.as_str(), "");

            let mut field = 0;
            let snippet = CONTENT_RE.replace_all(&content, |c: &Captures<'_>| match c.name("param") {
                Some(param) => {
                    field += 1;
                    format!("${{{}:{}}}", field, param.as_str())
                }
                None => String::new(),
            });
            let hint = CONTENT_RE.replace_all(&content, |c: &Captures<'_>| {
                match (c.name("param"), c.name("type")) {
                    (Some(param), _) => param.as_str().to_string(),
                    (None, Some(ty)) => format!("{} ", ty.as_str()),
                    (None, None) => String::new(),
                }
            });

            Some(CompletionItem {
                label: format!("{}\t{}", name, hint),
                snippet: snippet.into_owned(),
            })
        })
        .collect()
}

/// Parses `file:row:col: severity: message` lines. Locations in
/// `temp_file` are reported against `file`.
pub fn parse_diagnostics(output: &str, temp_file: &Path, file: &Path) -> Vec<Diagnostic> {
    output
        .lines()
        .filter_map(|line| DIAGNOSTIC_RE.captures(line))
        .filter_map(|caps| {
            let reported = PathBuf::from(caps.name("file")?.as_str());
            Some(Diagnostic {
                file: if reported == temp_file {
                    file.to_path_buf()
                } else {
                    reported
                },
                row: caps.name("row")?.as_str().parse().ok()?,
                col: caps.name("col")?.as_str().parse().ok()?,
                severity: Severity::from_clang(caps.name("severity")?.as_str())?,
                message: caps.name("message")?.as_str().to_string(),
            })
        })
        .collect()
}

/// Completion through a compiler subprocess per request.
#[derive(Debug)]
pub struct ProcessEngine {
    clang_binary: String,
    flags: Vec<String>,
}

impl ProcessEngine {
    pub fn new(clang_binary: String, flags: Vec<String>) -> Self {
        Self { clang_binary, flags }
    }

    /// Writes `text` to a fresh temporary copy of `file` and runs clang on it
    /// with `extra_args` in front of the file. The copy is removed when
    /// this returns.
    fn run_on_copy(
        &self,
        file: &Path,
        text: &str,
        extra_args: impl FnOnce(&Path) -> Vec<String>,
    ) -> Result<(CommandOutput, PathBuf), EngineError> {
        let temp_dir = tempfile::tempdir()?;
        let file_name = file.file_name().unwrap_or_else(|| "buffer.cpp".as_ref());
        let temp_file = temp_dir.path().join(file_name);
        fs::write(&temp_file, text)?;

        let mut args = vec![
            "-fsyntax-only".to_string(),
            "-x".to_string(),
            Language::from_path(file).clang_name().to_string(),
        ];
        args.extend(extra_args(&temp_file));
        args.push(temp_file.to_string_lossy().into_owned());
        args.extend(self.flags.iter().cloned());

        let cwd = file.parent().filter(|p| p.is_dir()).unwrap_or(temp_dir.path());
        let output = executor::execute_args(&self.clang_binary, &args, cwd, &HashMap::new(), None)?;
        Ok((output, temp_file))
    }
}

impl CompletionEngine for ProcessEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Process
    }

    fn flags(&self) -> &[String] {
        &self.flags
    }

    fn complete(
        &mut self,
        file: &Path,
        text: &str,
        position: Position,
        _policy: &ExclusionPolicy,
    ) -> Result<Vec<CompletionItem>, EngineError> {
        let _timer = BlockTimer::new(format!("complete {}", file.display()));
        let (output, _) = self.run_on_copy(file, text, |temp_file| {
            vec![
                "-Xclang".to_string(),
                format!(
                    "-code-completion-at={}:{}:{}",
                    temp_file.display(),
                    position.row,
                    position.col
                ),
            ]
        })?;
        let items = parse_completions(&output.stdout);
        debug!("{} completions from '{}'", items.len(), self.clang_binary);
        Ok(items)
    }

    fn update(&mut self, file: &Path, text: &str) -> Result<Vec<Diagnostic>, EngineError> {
        let _timer = BlockTimer::new(format!("check {}", file.display()));
        let (output, temp_file) = self.run_on_copy(file, text, |_| Vec::new())?;
        Ok(parse_diagnostics(&output.stderr, &temp_file, file))
    }
}
