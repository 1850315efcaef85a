// src/cli/args.rs
use clap::{Parser, ValueEnum};

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true, about = "Shows the compile flags of a source file.")]
pub struct FlagsArgs {
    /// The source file.
    pub file: String,

    /// Print the complete buffer configuration instead of the flags the
    /// project sources produce.
    #[arg(long)]
    pub full: bool,
}

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true, about = "Completes at a position of a source file.")]
pub struct CompleteArgs {
    pub file: String,
    /// 1-based line.
    pub row: u32,
    /// 1-based column, in bytes.
    pub col: u32,

    /// Print the results as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true, about = "Prints the diagnostics of a source file.")]
pub struct CheckArgs {
    pub file: String,

    /// Print the results as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true, about = "Lists headers that can complete an #include.")]
pub struct HeadersArgs {
    pub file: String,
    /// The part of the include path typed so far.
    #[arg(default_value = "")]
    pub prefix: String,
}

#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CmakeAction {
    /// Show the build directory and dependency manifest.
    #[default]
    Inspect,
    /// Remove the build directory.
    Clear,
}

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true, about = "Inspects the CMake build a source file uses.")]
pub struct CmakeArgs {
    #[arg(value_enum)]
    pub action: CmakeAction,
    pub file: String,
}
