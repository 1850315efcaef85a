// src/core/flag.rs

//! # Flags
//!
//! A [`Flag`] is one compiler argument, optionally split into a prefix
//! (`-I`, `-isystem`) and a body (usually a path). A [`FlagSet`] is an
//! insertion-ordered collection of unique flags: the order matters to the
//! compiler (include search order, later `-D`/`-U` overriding earlier ones),
//! uniqueness keeps the argument list short when several sources are merged.

use crate::core::paths;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::Path;

/// A single compiler argument.
///
/// Equality and hashing only look at `prefix` and `body`: `-I/a` and
/// `-I /a` are the same flag. `separated` only remembers how the flag was
/// written so that [`Flag::as_args`] reproduces it.
#[derive(Debug, Clone, Eq)]
pub struct Flag {
    prefix: String,
    body: String,
    separated: bool,
}

impl Flag {
    /// A flag that cannot be split, e.g. `-std=c++11`.
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            prefix: String::new(),
            body: body.into(),
            separated: false,
        }
    }

    /// A flag written as two tokens, e.g. `-I /path`.
    pub fn separated(prefix: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            body: body.into(),
            separated: true,
        }
    }

    /// A flag written as one token whose leading `prefix` is meaningful,
    /// e.g. `-I/path`.
    pub fn attached(prefix: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            body: body.into(),
            separated: false,
        }
    }

    /// Prefix of the flag. Empty if not separable.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Body of the flag. The full flag if not separable.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// The tokens a compiler invocation expects for this flag.
    pub fn as_args(&self) -> Vec<String> {
        if self.prefix.is_empty() {
            vec![self.body.clone()]
        } else if self.separated {
            vec![self.prefix.clone(), self.body.clone()]
        } else {
            vec![format!("{}{}", self.prefix, self.body)]
        }
    }

    fn with_body(&self, body: String) -> Self {
        Self {
            prefix: self.prefix.clone(),
            body,
            separated: self.separated,
        }
    }

    /// Splits a list of tokens into flags, pairing every separable prefix
    /// with the token that follows it and recognizing prefixes written
    /// attached to their body.
    pub fn tokenize_list<S: AsRef<str>>(tokens: &[S], separable_prefixes: &[String]) -> Vec<Self> {
        // Longest first, so that e.g. `-isystem` wins over a shorter `-i`.
        let mut prefixes: Vec<&str> = separable_prefixes.iter().map(String::as_str).collect();
        prefixes.sort_by_key(|p| std::cmp::Reverse(p.len()));

        let mut flags = Vec::with_capacity(tokens.len());
        let mut iter = tokens.iter().map(AsRef::as_ref).peekable();
        while let Some(token) = iter.next() {
            if prefixes.contains(&token) {
                match iter.next() {
                    Some(body) => flags.push(Self::separated(token, body)),
                    // A dangling prefix at the end of the list.
                    None => flags.push(Self::new(token)),
                }
                continue;
            }
            let attached = prefixes.iter().find_map(|p| {
                token
                    .strip_prefix(*p)
                    .filter(|body| !body.is_empty())
                    .map(|body| (*p, body))
            });
            match attached {
                Some((prefix, body)) => flags.push(Self::attached(prefix, body)),
                None => flags.push(Self::new(token)),
            }
        }
        flags
    }
}

impl PartialEq for Flag {
    fn eq(&self, other: &Self) -> bool {
        self.prefix == other.prefix && self.body == other.body
    }
}

impl Hash for Flag {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.prefix.hash(state);
        self.body.hash(state);
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.prefix.is_empty(), self.separated) {
            (true, _) => f.write_str(&self.body),
            (false, true) => write!(f, "{} {}", self.prefix, self.body),
            (false, false) => write!(f, "{}{}", self.prefix, self.body),
        }
    }
}

/// An ordered set of unique flags.
#[derive(Debug, Clone, Default)]
pub struct FlagSet {
    flags: Vec<Flag>,
    seen: HashSet<Flag>,
}

impl FlagSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses raw lines (a flags file, a settings list). Blank lines and
    /// lines starting with `#` are skipped, every other line is split like a
    /// shell would split it. Relative bodies of `include_prefixes` flags are
    /// anchored at `folder`.
    pub fn parse<I, S>(folder: &Path, raw_lines: I, include_prefixes: &[String]) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut tokens = Vec::new();
        for line in raw_lines {
            let line = line.as_ref().trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match shlex::split(line) {
                Some(parts) => tokens.extend(parts),
                None => {
                    log::debug!("Unbalanced quotes in flag line '{}', splitting on spaces", line);
                    tokens.extend(line.split_whitespace().map(str::to_string));
                }
            }
        }
        Self::parse_tokens(folder, &tokens, include_prefixes)
    }

    /// Parses already split tokens, e.g. the arguments of a database entry.
    pub fn parse_tokens<S: AsRef<str>>(folder: &Path, tokens: &[S], include_prefixes: &[String]) -> Self {
        Flag::tokenize_list(tokens, include_prefixes)
            .into_iter()
            .map(|flag| to_absolute_include(folder, flag, include_prefixes))
            .collect()
    }

    /// Union of both sets: all of `self` followed by the flags of `other`
    /// that are not already present.
    pub fn merge(&self, other: &Self) -> Self {
        let mut merged = self.clone();
        for flag in &other.flags {
            merged.push(flag.clone());
        }
        merged
    }

    fn push(&mut self, flag: Flag) -> bool {
        if self.seen.contains(&flag) {
            return false;
        }
        self.seen.insert(flag.clone());
        self.flags.push(flag);
        true
    }

    pub fn contains(&self, flag: &Flag) -> bool {
        self.seen.contains(flag)
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Flag> {
        self.flags.iter()
    }

    /// The flat token sequence a compiler invocation expects.
    pub fn as_argument_list(&self) -> Vec<String> {
        self.flags.iter().flat_map(Flag::as_args).collect()
    }

    /// Bodies of the flags using one of `prefixes`, in order. Used to find
    /// include folders.
    pub fn bodies_with_prefix<'a>(&'a self, prefixes: &'a [String]) -> impl Iterator<Item = &'a str> + 'a {
        self.flags
            .iter()
            .filter(move |flag| prefixes.iter().any(|p| p == flag.prefix()))
            .map(Flag::body)
    }
}

impl PartialEq for FlagSet {
    fn eq(&self, other: &Self) -> bool {
        self.flags == other.flags
    }
}

impl Eq for FlagSet {}

impl FromIterator<Flag> for FlagSet {
    fn from_iter<T: IntoIterator<Item = Flag>>(iter: T) -> Self {
        let mut set = Self::new();
        for flag in iter {
            set.push(flag);
        }
        set
    }
}

impl<'a> IntoIterator for &'a FlagSet {
    type Item = &'a Flag;
    type IntoIter = std::slice::Iter<'a, Flag>;

    fn into_iter(self) -> Self::IntoIter {
        self.flags.iter()
    }
}

fn to_absolute_include(folder: &Path, flag: Flag, include_prefixes: &[String]) -> Flag {
    if flag.prefix().is_empty() || !include_prefixes.iter().any(|p| p == flag.prefix()) {
        return flag;
    }
    let absolute = paths::absolutize(folder, Path::new(flag.body().trim()));
    flag.with_body(absolute.to_string_lossy().into_owned())
}
