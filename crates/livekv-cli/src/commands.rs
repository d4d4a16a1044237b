use std::sync::Arc;

use anyhow::Context;
use colored::Colorize;
use livekv_engine::MemoryEngine;
use livekv_store::{ObjectEvent, RangeEvent, RangeSpec, Record, Registry, StoreConfig};

use crate::cli::*;
use crate::shell;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let registry = open_registry(&cli)?;
    let format = cli.format;
    match cli.command {
        Command::Put(args) => cmd_put(&registry, &args.json, format),
        Command::Get(args) => cmd_get(&registry, &args.id, format),
        Command::Delete(args) => cmd_delete(&registry, &args.id, format),
        Command::Range(args) => cmd_range(&registry, &args.spec(), format),
        Command::Shell => shell::run(registry, format).await,
    }
}

fn open_registry(cli: &Cli) -> anyhow::Result<Registry> {
    let config = match &cli.config {
        Some(path) => StoreConfig::load(path)?,
        None => StoreConfig::default(),
    };
    let engine = match &cli.data {
        Some(path) => MemoryEngine::open(path)
            .with_context(|| format!("opening data file {}", path.display()))?,
        None => MemoryEngine::new(),
    };
    Ok(Registry::open(Arc::new(engine), config)?)
}

pub fn parse_record(json: &str) -> anyhow::Result<Record> {
    let value: serde_json::Value = serde_json::from_str(json).context("record is not valid JSON")?;
    Ok(Record::try_from(value)?)
}

pub fn cmd_put(registry: &Registry, json: &str, format: OutputFormat) -> anyhow::Result<()> {
    let record = parse_record(json)?;
    let id = record.require_id()?.to_string();
    let old = registry.put(record)?;
    match format {
        OutputFormat::Json => println!("{}", json_or_null(old)),
        OutputFormat::Text => {
            let verb = if old.is_some() { "Replaced" } else { "Stored" };
            println!("{} {} {}", "✓".green().bold(), verb, id.yellow());
        }
    }
    Ok(())
}

pub fn cmd_get(registry: &Registry, id: &str, format: OutputFormat) -> anyhow::Result<()> {
    let record = registry.get(id)?;
    match (format, record) {
        (OutputFormat::Json, record) => println!("{}", json_or_null(record)),
        (OutputFormat::Text, Some(record)) => print_record(&record),
        (OutputFormat::Text, None) => println!("{} not found", id.yellow()),
    }
    Ok(())
}

pub fn cmd_delete(registry: &Registry, id: &str, format: OutputFormat) -> anyhow::Result<()> {
    let old = registry.delete(id)?;
    match format {
        OutputFormat::Json => println!("{}", json_or_null(old)),
        OutputFormat::Text if old.is_some() => {
            println!("{} Deleted {}", "✓".green().bold(), id.yellow());
        }
        OutputFormat::Text => println!("{} not found", id.yellow()),
    }
    Ok(())
}

pub fn cmd_range(
    registry: &Registry,
    spec: &RangeSpec,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let records = registry.range_get(spec)?;
    match format {
        OutputFormat::Json => {
            let values: Vec<serde_json::Value> =
                records.into_iter().map(Record::into_value).collect();
            println!("{}", serde_json::Value::Array(values));
        }
        OutputFormat::Text => {
            for record in &records {
                print_record(record);
            }
            println!("{}", format!("({} records)", records.len()).dimmed());
        }
    }
    Ok(())
}

fn json_or_null(record: Option<Record>) -> String {
    record.map_or_else(|| "null".into(), |r| r.to_string())
}

pub fn print_record(record: &Record) {
    let id = record.id().unwrap_or_default();
    println!("{}  {}", id.yellow().bold(), record);
}

pub fn describe_object_event(key: &str, event: &ObjectEvent) -> String {
    let key = key.cyan();
    match event {
        ObjectEvent::Set(Some(record)) => format!("[{key}] {} {record}", "set".green()),
        ObjectEvent::Set(None) => format!("[{key}] {}", "absent".dimmed()),
        ObjectEvent::Error(message) => format!("[{key}] {} {message}", "error".red()),
    }
}

pub fn describe_range_event(label: &str, event: &RangeEvent) -> String {
    let label = label.cyan();
    match event {
        RangeEvent::Set(records) => {
            format!("[{label}] {} {} records", "loaded".green(), records.len())
        }
        RangeEvent::Insert { value, .. } => format!("[{label}] {} {value}", "+".green().bold()),
        RangeEvent::Update { value, .. } => format!("[{label}] {} {value}", "~".yellow().bold()),
        RangeEvent::Remove { key, .. } => format!("[{label}] {} {key}", "-".red().bold()),
        RangeEvent::Error(message) => format!("[{label}] {} {message}", "error".red()),
    }
}
