// src/constants.rs

use std::time::Duration;

/// The name of a JSON compilation database.
pub const COMPILATION_DB_FILENAME: &str = "compile_commands.json";

/// The name of the root build file of a CMake project.
pub const CMAKE_LISTS_FILENAME: &str = "CMakeLists.txt";

/// Substring a `CMakeLists.txt` must contain to count as a project root.
pub const CMAKE_PROJECT_MARKER: &str = "project";

/// The default name of a plain flags file.
pub const FLAGS_FILENAME: &str = ".clang_complete";

/// The name of the directory (inside the temp dir) holding CMake build trees.
pub const CMAKE_BUILDS_DIR: &str = "cmake_builds";

/// The dependency manifest written next to a generated compilation database.
pub const CMAKE_DEPS_CACHE_FILENAME: &str = "deps.cache.bin";

/// CMake's own record of the files a configure step depended on.
pub const CMAKE_MAKEFILE_MANIFEST: &str = "CMakeFiles/Makefile.cmake";

/// The name of the directory containing the settings file (inside the config dir).
pub const CONFIG_DIR_NAME: &str = "clang-assist";

/// The name of the settings file.
pub const SETTINGS_FILENAME: &str = "settings.toml";

/// How often stale completion sessions are swept.
pub const DEFAULT_SWEEP_PERIOD: Duration = Duration::from_secs(60);

/// Sessions untouched for longer than this are evicted (30 minutes).
pub const DEFAULT_MAX_CACHE_AGE: Duration = Duration::from_secs(30 * 60);

/// Jobs arriving within this window are coalesced.
pub const DEFAULT_JOB_DELAY: Duration = Duration::from_millis(50);

/// Number of leading tokens (the compiler) dropped from a database command.
pub const DB_COMMAND_LEADING_TOKENS: usize = 1;

/// Number of trailing tokens (`-o <obj> -c <src>`) dropped from a database command.
pub const DB_COMMAND_TRAILING_TOKENS: usize = 4;
