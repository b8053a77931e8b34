use std::path::PathBuf;

use anyhow::{bail, Context};
use colored::Colorize;
use larder_cache::{
    Cache, CacheConfig, CacheRoot, Key, KeyedCache, Readiness, StoreEngine, WriteOutcome,
};
use serde_json::Value;
use tracing::debug;

use crate::cli::*;

const DEFAULT_DATA_DIR: &str = ".larder";

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = effective_config(&cli)?;
    let format = cli.format;

    match cli.command {
        Command::Put(args) => cmd_put(&config, args).await,
        Command::Get(args) => cmd_get(&config, format, args).await,
        Command::List(args) => cmd_list(&config, format, args).await,
        Command::BulkPut(args) => cmd_bulk_put(&config, args).await,
        Command::BulkList(args) => cmd_bulk_list(&config, format, args).await,
        Command::Clear(args) => cmd_clear(&config, args).await,
        Command::Drop(args) => cmd_drop(&config, args),
        Command::Status => cmd_status(&config, format),
        Command::Config => cmd_config(&config, format),
    }
}

/// The configuration file (if present) with command-line overrides applied.
fn effective_config(cli: &Cli) -> anyhow::Result<CacheConfig> {
    let mut config = if cli.config.exists() {
        CacheConfig::load(&cli.config)?
    } else {
        debug!(path = %cli.config.display(), "no configuration file, using defaults");
        CacheConfig::default()
    };
    apply_overrides(&mut config, cli.data_dir.clone(), cli.schema_version);
    Ok(config)
}

fn apply_overrides(config: &mut CacheConfig, data_dir: Option<PathBuf>, schema_version: Option<u64>) {
    if let Some(dir) = data_dir {
        config.data_dir = Some(dir);
    }
    if config.data_dir.is_none() {
        config.data_dir = Some(PathBuf::from(DEFAULT_DATA_DIR));
    }
    if schema_version.is_some() {
        config.schema_version = schema_version;
    }
}

fn open_root(config: &CacheConfig) -> anyhow::Result<CacheRoot> {
    if config.schema_version.is_none() {
        bail!("no schema version configured; set `schema_version` or pass --schema-version");
    }
    Ok(CacheRoot::from_config(config))
}

fn settle(name: &str, readiness: Readiness) -> anyhow::Result<()> {
    match readiness {
        Readiness::Ready(_) => Ok(()),
        Readiness::Failed(reason) => bail!("cache '{name}' failed to open: {reason}"),
        Readiness::Pending => bail!("cache '{name}' is still opening"),
    }
}

async fn open_keyed(config: &CacheConfig, target: &CollectionArgs) -> anyhow::Result<KeyedCache<Value>> {
    let root = open_root(config)?;
    let cache = root.keyed::<Value>(&target.collection, &target.key_field);
    settle(cache.name(), cache.handle().ready().await)?;
    Ok(cache)
}

fn written(outcome: WriteOutcome) -> anyhow::Result<usize> {
    match outcome {
        WriteOutcome::Written(count) => Ok(count),
        WriteOutcome::Skipped => bail!("cache store is not available"),
        WriteOutcome::Failed(e) => Err(e.into()),
    }
}

fn parse_key(raw: &str, int: bool) -> anyhow::Result<Key> {
    if int {
        let value = raw
            .parse::<i64>()
            .with_context(|| format!("'{raw}' is not an integer key"))?;
        Ok(Key::Int(value))
    } else {
        Ok(Key::Text(raw.to_string()))
    }
}

fn parse_records(json: &str) -> anyhow::Result<Vec<Value>> {
    let value: Value = serde_json::from_str(json).context("invalid JSON")?;
    Ok(match value {
        Value::Array(items) => items,
        other => vec![other],
    })
}

fn print_record(format: OutputFormat, record: &Value) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(record)?),
        OutputFormat::Text => println!("{}", serde_json::to_string(record)?),
    }
    Ok(())
}

fn print_records(format: OutputFormat, name: &str, records: &[Value]) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(records)?),
        OutputFormat::Text => {
            println!("{} ({} records)", name.bold(), records.len());
            for record in records {
                println!("  {}", serde_json::to_string(record)?);
            }
        }
    }
    Ok(())
}

async fn cmd_put(config: &CacheConfig, args: PutArgs) -> anyhow::Result<()> {
    let records = parse_records(&args.json)?;
    let cache = open_keyed(config, &args.target).await?;

    let pending = if args.replace {
        cache.replace_multiple(&records)
    } else {
        cache.set_multiple(&records)
    };
    let count = written(pending.await)?;
    println!("{} Cached {} record(s) in {}", "✓".green().bold(), count, cache.name().bold());
    Ok(())
}

async fn cmd_get(config: &CacheConfig, format: OutputFormat, args: GetArgs) -> anyhow::Result<()> {
    let key = parse_key(&args.key, args.int)?;
    let cache = open_keyed(config, &args.target).await?;
    match cache.try_get(&key).await? {
        Some(record) => print_record(format, &record),
        None => bail!("{} is not cached in '{}'", key, cache.name()),
    }
}

async fn cmd_list(config: &CacheConfig, format: OutputFormat, args: CollectionArgs) -> anyhow::Result<()> {
    let cache = open_keyed(config, &args).await?;
    let records = cache.try_get_all().await?;
    print_records(format, cache.name(), &records)
}

async fn cmd_bulk_put(config: &CacheConfig, args: BulkPutArgs) -> anyhow::Result<()> {
    let value: Value = serde_json::from_str(&args.json).context("invalid JSON")?;
    let Value::Array(records) = value else {
        bail!("bulk caches take a JSON array");
    };

    let root = open_root(config)?;
    let cache = root.bulk::<Value>(&args.collection);
    settle(cache.name(), cache.inner().handle().ready().await)?;
    let count = written(cache.set_multiple(&records).await)?;
    println!("{} Replaced {} with {} record(s)", "✓".green().bold(), cache.name().bold(), count);
    Ok(())
}

async fn cmd_bulk_list(config: &CacheConfig, format: OutputFormat, args: BulkArgs) -> anyhow::Result<()> {
    let root = open_root(config)?;
    let cache = root.bulk::<Value>(&args.collection);
    settle(cache.name(), cache.inner().handle().ready().await)?;
    match cache.get_all().await {
        Some(records) => print_records(format, cache.name(), &records),
        None => {
            println!("{} has nothing cached", cache.name().bold());
            Ok(())
        }
    }
}

async fn cmd_clear(config: &CacheConfig, args: CollectionArgs) -> anyhow::Result<()> {
    let cache = open_keyed(config, &args).await?;
    written(cache.clear().await)?;
    println!("{} Cleared {}", "✓".green().bold(), cache.name().bold());
    Ok(())
}

fn cmd_drop(config: &CacheConfig, args: DropArgs) -> anyhow::Result<()> {
    let engine = StoreEngine::new(config.store_config());
    if engine.delete_database(&args.collection)? {
        println!("{} Dropped {}", "✓".green().bold(), args.collection.bold());
    } else {
        println!("Nothing stored for {}", args.collection.bold());
    }
    Ok(())
}

fn cmd_status(config: &CacheConfig, format: OutputFormat) -> anyhow::Result<()> {
    let engine = StoreEngine::new(config.store_config());
    let names = engine.stored_database_names()?;

    match format {
        OutputFormat::Json => {
            let status = serde_json::json!({
                "data_dir": config.data_dir,
                "schema_version": config.schema_version,
                "caches": names,
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        OutputFormat::Text => {
            let dir = config
                .data_dir
                .as_ref()
                .map(|d| d.display().to_string())
                .unwrap_or_else(|| "(in memory)".into());
            println!("Data directory: {}", dir.cyan());
            match config.schema_version {
                Some(v) => println!("Schema version: {}", v.to_string().yellow()),
                None => println!("Schema version: {}", "not set".dimmed()),
            }
            if names.is_empty() {
                println!("\nNo caches stored.");
            } else {
                println!("\nStored caches:");
                for name in &names {
                    println!("  {}", name.bold());
                }
            }
        }
    }
    Ok(())
}

fn cmd_config(config: &CacheConfig, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
        OutputFormat::Text => print!("{}", config.to_toml_string()?),
    }
    Ok(())
}
