use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "larder",
    about = "Larder: inspect and seed local record caches",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Configuration file; missing files fall back to defaults
    #[arg(short, long, global = true, default_value = "larder.toml")]
    pub config: PathBuf,

    /// Overrides `data_dir` from the configuration file
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Overrides `schema_version` from the configuration file
    #[arg(long, global = true)]
    pub schema_version: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Cache one record, or every record of a JSON array
    Put(PutArgs),
    /// Show one cached record
    Get(GetArgs),
    /// Show every record of a keyed cache in key order
    List(CollectionArgs),
    /// Replace a bulk cache with a JSON array
    BulkPut(BulkPutArgs),
    /// Show the contents of a bulk cache
    BulkList(BulkArgs),
    /// Remove every record of a keyed cache
    Clear(CollectionArgs),
    /// Delete a cache database and its journal
    Drop(DropArgs),
    /// Show stored caches and effective settings
    Status,
    /// Print the effective configuration
    Config,
}

#[derive(Args)]
pub struct CollectionArgs {
    pub collection: String,
    /// Record field holding the primary key
    #[arg(short, long, default_value = "id")]
    pub key_field: String,
}

#[derive(Args)]
pub struct PutArgs {
    #[command(flatten)]
    pub target: CollectionArgs,
    /// A JSON object or array of objects
    pub json: String,
    /// Overwrite records whose key is already cached
    #[arg(long)]
    pub replace: bool,
}

#[derive(Args)]
pub struct GetArgs {
    #[command(flatten)]
    pub target: CollectionArgs,
    pub key: String,
    /// Treat the key as an integer
    #[arg(long)]
    pub int: bool,
}

#[derive(Args)]
pub struct BulkArgs {
    pub collection: String,
}

#[derive(Args)]
pub struct BulkPutArgs {
    pub collection: String,
    /// A JSON array
    pub json: String,
}

#[derive(Args)]
pub struct DropArgs {
    pub collection: String,
}
