// src/core/buffer_config.rs

//! # Buffer configuration
//!
//! The final argument list of a buffer is assembled from, in order:
//! 1. the language flags (`c_flags`, `cpp_flags`, `objc_flags`),
//! 2. the common flags, with wildcards substituted and relative include
//!    folders anchored at the home folder,
//! 3. `-I` for the folder of the file and its parent, if enabled,
//! 4. the compiler built-ins, if enabled,
//! 5. the flags of the winning flags source.
//!
//! Every part is merged into one ordered set, so a flag appears once, where
//! it was first seen.

use crate::core::compiler_builtins::CompilerBuiltins;
use crate::core::flag::{Flag, FlagSet};
use crate::core::flags_cache::FlagResolutionEntry;
use crate::models::{FlagsSourceKind, Language, Settings};
use std::path::{Path, PathBuf};

pub const PROJECT_PATH_WILDCARD: &str = "$project_base_path";
pub const PROJECT_NAME_WILDCARD: &str = "$project_name";
pub const CLANG_VERSION_WILDCARD: &str = "$clang_version";

/// Values substituted into the common flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Wildcards {
    pub project_base_path: Option<String>,
    pub project_name: Option<String>,
    pub clang_version: Option<String>,
}

impl Wildcards {
    pub fn new(project_folder: Option<&Path>, clang_version: Option<String>) -> Self {
        Self {
            project_base_path: project_folder.map(|p| p.to_string_lossy().into_owned()),
            project_name: project_folder
                .and_then(Path::file_name)
                .map(|n| n.to_string_lossy().into_owned()),
            clang_version,
        }
    }

    /// Replaces every known wildcard that has a value. Unknown or empty
    /// wildcards are left as they are.
    pub fn apply(&self, flag: &str) -> String {
        let mut result = flag.to_string();
        let pairs = [
            (PROJECT_PATH_WILDCARD, &self.project_base_path),
            (PROJECT_NAME_WILDCARD, &self.project_name),
            (CLANG_VERSION_WILDCARD, &self.clang_version),
        ];
        for (wildcard, value) in pairs {
            if let Some(value) = value {
                if result.contains(wildcard) {
                    result = result.replace(wildcard, value);
                    log::trace!("Populated '{}' in '{}'", wildcard, flag);
                }
            }
        }
        result
    }
}

/// Everything an engine needs to know about a buffer's compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferConfig {
    pub file: PathBuf,
    pub language: Language,
    pub flags: Vec<String>,
    /// The flags source that contributed, if any.
    pub source: Option<FlagsSourceKind>,
    pub marker: Option<PathBuf>,
}

impl BufferConfig {
    /// Folders that include completion should search, in flag order.
    pub fn include_folders(&self, include_prefixes: &[String]) -> Vec<PathBuf> {
        let set = FlagSet::parse_tokens(Path::new("/"), &self.flags, include_prefixes);
        set.bodies_with_prefix(include_prefixes)
            .map(PathBuf::from)
            .collect()
    }
}

/// Folder used as `$project_base_path`: the configured project folder, else
/// the folder of the marker that produced the flags, else the file's folder.
pub fn project_folder(settings: &Settings, file: &Path, entry: &FlagResolutionEntry) -> PathBuf {
    settings
        .resolved_project_folder()
        .or_else(|| entry.marker.as_deref().and_then(Path::parent).map(Path::to_path_buf))
        .or_else(|| file.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Assembles the configuration of `file`.
pub fn build_config(
    settings: &Settings,
    file: &Path,
    entry: &FlagResolutionEntry,
    wildcards: &Wildcards,
    builtins: Option<&CompilerBuiltins>,
    home: &Path,
) -> BufferConfig {
    let prefixes = &settings.include_prefixes;
    let language = Language::from_path(file);

    let lang_flags = FlagSet::parse(home, settings.lang_flags(language), prefixes);
    let common_flags = FlagSet::parse(
        home,
        settings.common_flags.iter().map(|flag| wildcards.apply(flag)),
        prefixes,
    );

    let mut folder_flags = Vec::new();
    let folder = file.parent();
    if settings.include_file_folder {
        if let Some(folder) = folder {
            folder_flags.push(Flag::attached("-I", folder.to_string_lossy()));
        }
    }
    if settings.include_file_parent_folder {
        if let Some(parent) = folder.and_then(Path::parent) {
            folder_flags.push(Flag::attached("-I", parent.to_string_lossy()));
        }
    }
    let folder_flags: FlagSet = folder_flags.into_iter().collect();

    let builtin_flags = builtins
        .map(|b| FlagSet::parse_tokens(home, &b.flags(), prefixes))
        .unwrap_or_default();
    let source_flags = entry.flags.clone().unwrap_or_default();

    let merged = lang_flags
        .merge(&common_flags)
        .merge(&folder_flags)
        .merge(&builtin_flags)
        .merge(&source_flags);

    BufferConfig {
        file: file.to_path_buf(),
        language,
        flags: merged.as_argument_list(),
        source: entry.source,
        marker: entry.marker.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::flags_cache::FlagResolutionCache;
    use crate::core::flags_source::CompilationDatabaseSource;
    use crate::core::search_scope::SearchScope;
    use std::fs;
    use std::sync::Arc;

    #[test]
    fn test_wildcards() {
        let wildcards = Wildcards::new(Some(Path::new("/work/demo")), Some("14.0.0".to_string()));

        assert_eq!(wildcards.apply("-I$project_base_path/include"), "-I/work/demo/include");
        assert_eq!(wildcards.apply("-DNAME=$project_name"), "-DNAME=demo");
        assert_eq!(
            wildcards.apply("-isystem/usr/lib/clang/$clang_version/include"),
            "-isystem/usr/lib/clang/14.0.0/include"
        );
        assert_eq!(Wildcards::default().apply("-I$project_base_path"), "-I$project_base_path");
    }

    #[test]
    fn test_build_config_merges_in_order() {
        // --- Setup ---
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        let file = src.join("main.cpp");
        let db = format!(
            r#"[{{"directory": "{0}", "file": "{1}", "command": "c++ -std=c++14 -DFROM_DB -I{0}/src -o m.o -c {1}"}}]"#,
            dir.path().display(),
            file.display()
        );
        fs::write(dir.path().join("compile_commands.json"), db).unwrap();

        let cache = FlagResolutionCache::new(vec![Arc::new(CompilationDatabaseSource::new(vec![
            "-I".to_string(),
        ]))]);
        let settings = Settings {
            common_flags: vec!["-I$project_base_path/common".to_string(), "-Irelative".to_string()],
            include_prefixes: vec!["-I".to_string()],
            ..Settings::default()
        };
        let entry = cache.resolve(
            &file,
            &settings.flags_sources,
            &SearchScope::for_file(&file, Some(dir.path().to_path_buf())),
        );
        let project = project_folder(&settings, &file, &entry);
        let builtins = CompilerBuiltins {
            defines: vec!["-D__clang__=1".to_string()],
            include_flags: Vec::new(),
        };

        // --- Execute ---
        let config = build_config(
            &settings,
            &file,
            &entry,
            &Wildcards::new(Some(&project), None),
            Some(&builtins),
            Path::new("/home/u"),
        );

        // --- Assert ---
        let root = dir.path().display();
        assert_eq!(
            config.flags,
            vec![
                "-std=c++14".to_string(),
                format!("-I{}/common", root),
                "-I/home/u/relative".to_string(),
                format!("-I{}/src", root),
                format!("-I{}", root),
                "-D__clang__=1".to_string(),
                "-DFROM_DB".to_string(),
            ]
        );
        assert_eq!(config.language, Language::Cpp);
        assert_eq!(config.source, Some(FlagsSourceKind::CompilationDb));
        assert_eq!(
            config.include_folders(&settings.include_prefixes),
            vec![
                dir.path().join("common"),
                PathBuf::from("/home/u/relative"),
                src.clone(),
                dir.path().to_path_buf(),
            ]
        );
    }
}
