//! Line-oriented shell over one registry. Watches print live events as they
//! arrive, interleaved with command output.

use colored::Colorize;
use livekv_store::{Observable, RangeSpec, Registry};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::cli::OutputFormat;
use crate::commands::{
    cmd_delete, cmd_get, cmd_put, cmd_range, describe_object_event, describe_range_event,
    print_record,
};

const HELP: &str = "\
commands:
  put <json>              store a record
  get <id>                read a record
  del <id>                delete a record
  range [<json spec>]     list a range, e.g. {\"lower\":{\"inclusive\":\"a\"},\"limit\":2}
  watch <id>              print changes to one record
  watch-range <json spec> print changes to a range window
  unwatch                 stop every watch and release what it held
  release                 dispose observables nobody watches
  help                    show this text
  quit                    leave the shell";

#[derive(Debug, PartialEq)]
pub enum ShellCommand {
    Put(String),
    Get(String),
    Delete(String),
    Range(RangeSpec),
    Watch(String),
    WatchRange(RangeSpec),
    Unwatch,
    Release,
    Help,
    Quit,
    Empty,
}

impl ShellCommand {
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };
        let required = |what: &str| {
            if rest.is_empty() {
                Err(format!("{word}: missing {what}"))
            } else {
                Ok(rest.to_string())
            }
        };

        match word {
            "" => Ok(ShellCommand::Empty),
            "put" => required("record").map(ShellCommand::Put),
            "get" => required("id").map(ShellCommand::Get),
            "del" | "delete" => required("id").map(ShellCommand::Delete),
            "range" if rest.is_empty() => Ok(ShellCommand::Range(RangeSpec::all())),
            "range" => parse_spec(rest).map(ShellCommand::Range),
            "watch" => required("id").map(ShellCommand::Watch),
            "watch-range" if rest.is_empty() => Ok(ShellCommand::WatchRange(RangeSpec::all())),
            "watch-range" => parse_spec(rest).map(ShellCommand::WatchRange),
            "unwatch" => Ok(ShellCommand::Unwatch),
            "release" => Ok(ShellCommand::Release),
            "help" | "?" => Ok(ShellCommand::Help),
            "quit" | "exit" => Ok(ShellCommand::Quit),
            other => Err(format!("unknown command {other:?}; try `help`")),
        }
    }
}

fn parse_spec(text: &str) -> Result<RangeSpec, String> {
    serde_json::from_str(text).map_err(|e| format!("invalid range spec: {e}"))
}

pub async fn run(registry: Registry, format: OutputFormat) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut watches: Vec<JoinHandle<()>> = Vec::new();

    while let Some(line) = lines.next_line().await? {
        let command = match ShellCommand::parse(&line) {
            Ok(ShellCommand::Quit) => break,
            Ok(command) => command,
            Err(message) => {
                eprintln!("{} {message}", "error:".red().bold());
                continue;
            }
        };
        if let Err(e) = execute(&registry, command, format, &mut watches).await {
            eprintln!("{} {e:#}", "error:".red().bold());
        }
    }

    for watch in watches {
        watch.abort();
    }
    Ok(())
}

async fn execute(
    registry: &Registry,
    command: ShellCommand,
    format: OutputFormat,
    watches: &mut Vec<JoinHandle<()>>,
) -> anyhow::Result<()> {
    match command {
        ShellCommand::Put(json) => cmd_put(registry, &json, format)?,
        ShellCommand::Get(id) => cmd_get(registry, &id, format)?,
        ShellCommand::Delete(id) => cmd_delete(registry, &id, format)?,
        ShellCommand::Range(spec) => cmd_range(registry, &spec, format)?,
        ShellCommand::Watch(id) => watches.push(watch_object(registry, id).await?),
        ShellCommand::WatchRange(spec) => watches.push(watch_range(registry, spec).await?),
        ShellCommand::Unwatch => {
            let stopped = watches.len();
            for watch in watches.drain(..) {
                watch.abort();
                // Resolves once the task and its subscription are dropped.
                let _ = watch.await;
            }
            let released = registry.release_idle();
            println!(
                "{} stopped {stopped} watches, released {released} observables",
                "✓".green().bold()
            );
        }
        ShellCommand::Release => {
            let released = registry.release_idle();
            println!(
                "{} released {released} idle observables",
                "✓".green().bold()
            );
        }
        ShellCommand::Help => println!("{HELP}"),
        ShellCommand::Quit | ShellCommand::Empty => {}
    }
    Ok(())
}

async fn watch_object(registry: &Registry, id: String) -> anyhow::Result<JoinHandle<()>> {
    let live = registry.object_observable(&id)?;
    live.ready().await;
    let mut events = live.subscribe();
    match live.value() {
        Some(record) => print_record(&record),
        None => println!("{} not found (watching)", id.yellow()),
    }

    Ok(tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => println!("{}", describe_object_event(live.key(), &event)),
                Err(RecvError::Lagged(skipped)) => warn!(key = %id, skipped, "watch fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    }))
}

async fn watch_range(registry: &Registry, spec: RangeSpec) -> anyhow::Result<JoinHandle<()>> {
    let live = registry.range_observable(&spec)?;
    live.ready().await;
    let mut events = live.subscribe();
    let label = spec.canonical_key();
    for record in live.list() {
        print_record(&record);
    }
    println!("{}", format!("(watching {label})").dimmed());

    Ok(tokio::spawn(async move {
        // Holding `live` keeps the observable alive for the watch.
        let _live = live;
        loop {
            match events.recv().await {
                Ok(event) => println!("{}", describe_range_event(&label, &event)),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(range = %label, skipped, "watch fell behind")
                }
                Err(RecvError::Closed) => break,
            }
        }
    }))
}
