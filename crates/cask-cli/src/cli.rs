use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "cask",
    about = "Cask - content-addressable blob storage orchestration",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Check a configuration file and instantiate its providers
    Validate(ValidateArgs),
    /// Show which provider a blob would be written to
    Dispatch(DispatchArgs),
    /// Store files in an in-memory deployment and run a collection cycle
    Gc(GcArgs),
}

#[derive(Args)]
pub struct ValidateArgs {
    /// Configuration file (TOML)
    pub config: PathBuf,
}

#[derive(Args)]
pub struct DispatchArgs {
    /// Configuration file (TOML)
    pub config: PathBuf,
    #[arg(long, default_value = "default")]
    pub repository: String,
    #[arg(long)]
    pub mime_type: Option<String>,
    #[arg(long)]
    pub filename: Option<String>,
    #[arg(long, default_value = cask_types::MAIN_BLOB_XPATH)]
    pub xpath: String,
    /// Document path
    #[arg(long)]
    pub path: Option<String>,
    /// Mark the document as a record
    #[arg(long)]
    pub record: bool,
    /// Document property as `name=value` (repeatable)
    #[arg(long = "property", value_name = "NAME=VALUE")]
    pub properties: Vec<String>,
}

#[derive(Args)]
pub struct GcArgs {
    /// Configuration file (TOML)
    pub config: PathBuf,
    /// Files stored and referenced by a document
    pub files: Vec<PathBuf>,
    /// Files stored but referenced by nothing
    #[arg(long = "orphan", value_name = "FILE")]
    pub orphans: Vec<PathBuf>,
    #[arg(long, default_value = "default")]
    pub repository: String,
    /// Remove garbage instead of only reporting it
    #[arg(long)]
    pub delete: bool,
}
