// src/core/compiler_builtins.rs

//! Predefined macros and default include folders of a compiler, queried
//! once per (compiler, standard, language) and memoized.

use crate::models::Language;
use crate::system::executor;
use lazy_static::lazy_static;
use log::{debug, warn};
use regex::Regex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

lazy_static! {
    static ref DEFINE_WITH_VALUE_RE: Regex =
        Regex::new(r"^#define ([\w()]+) (.+)$").expect("Invalid define regex");
    static ref DEFINE_RE: Regex = Regex::new(r"^#define (\w+)").expect("Invalid define regex");
}

/// Macros clang sets by itself; passing them again is an error.
const DEFINES_BLACKLIST: [&str; 4] = [
    "__USER_LABEL_PREFIX__",
    "__STDC_HOSTED__",
    "__REGISTER_PREFIX__",
    "__STDC__",
];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BuiltinsKey {
    compiler: String,
    std: Option<String>,
    language: Language,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompilerBuiltins {
    /// `-DNAME` or `-DNAME=VALUE`.
    pub defines: Vec<String>,
    /// `-I<folder>`, in search order.
    pub include_flags: Vec<String>,
}

impl CompilerBuiltins {
    pub fn flags(&self) -> Vec<String> {
        self.defines
            .iter()
            .chain(&self.include_flags)
            .cloned()
            .collect()
    }
}

/// The value of the last `-std=` flag, if any.
pub fn guess_std(flags: &[String]) -> Option<String> {
    flags
        .iter()
        .rev()
        .find_map(|flag| flag.strip_prefix("-std="))
        .map(str::to_string)
}

/// Parses `-dM -E` output.
pub fn parse_defines(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            if let Some(caps) = DEFINE_WITH_VALUE_RE.captures(line) {
                return Some((caps.get(1)?.as_str(), Some(caps.get(2)?.as_str())));
            }
            DEFINE_RE
                .captures(line)
                .and_then(|caps| caps.get(1))
                .map(|name| (name.as_str(), None))
        })
        .filter(|(name, _)| !DEFINES_BLACKLIST.contains(name))
        .map(|(name, value)| match value {
            Some(value) => format!("-D{}={}", name, value),
            None => format!("-D{}", name),
        })
        .collect()
}

/// Parses the search list printed by `-E -v`.
pub fn parse_include_paths(output: &str) -> Vec<String> {
    let mut picking = false;
    let mut flags = Vec::new();
    for line in output.lines() {
        if line.contains("search starts here:") {
            picking = true;
            continue;
        }
        if line.contains("End of search list.") {
            break;
        }
        if picking {
            // macOS marks framework folders; they are not include folders.
            let folder = line.trim().trim_end_matches(" (framework directory)");
            if !folder.is_empty() {
                flags.push(format!("-I{}", folder));
            }
        }
    }
    flags
}

#[derive(Debug, Default)]
pub struct BuiltinsCache {
    entries: Mutex<HashMap<BuiltinsKey, CompilerBuiltins>>,
    queries: AtomicUsize,
}

impl BuiltinsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times a compiler was asked.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// The built-ins of `compiler` for `language` and the standard selected
    /// by `flags`.
    pub fn get(&self, compiler: &str, language: Language, flags: &[String]) -> CompilerBuiltins {
        let key = BuiltinsKey {
            compiler: compiler.to_string(),
            std: guess_std(flags),
            language,
        };
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(builtins) = entries.get(&key) {
            return builtins.clone();
        }

        let builtins = query(&key);
        self.queries.fetch_add(1, Ordering::SeqCst);
        debug!(
            "{:?}: {} defines, {} include folders",
            key,
            builtins.defines.len(),
            builtins.include_flags.len()
        );
        entries.insert(key, builtins.clone());
        builtins
    }
}

fn query(key: &BuiltinsKey) -> CompilerBuiltins {
    let mut base = vec!["-x".to_string(), key.language.clang_name().to_string()];
    if let Some(std) = &key.std {
        base.push(format!("-std={}", std));
    }
    let run = |extra: &[&str]| -> Option<String> {
        let mut args = base.clone();
        args.extend(extra.iter().map(|s| s.to_string()));
        match executor::execute_args(&key.compiler, &args, &std::env::temp_dir(), &HashMap::new(), Some("")) {
            Ok(output) => Some(output.combined()),
            Err(e) => {
                warn!("Cannot query built-ins of '{}': {}", key.compiler, e);
                None
            }
        }
    };

    CompilerBuiltins {
        defines: run(&["-dM", "-E", "-"]).map(|o| parse_defines(&o)).unwrap_or_default(),
        include_flags: run(&["-Wp,-v", "-E", "-"])
            .map(|o| parse_include_paths(&o))
            .unwrap_or_default(),
    }
}
