use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use livekv_store::RangeSpec;

#[derive(Parser)]
#[command(
    name = "livekv",
    about = "livekv: an embedded record store with live queries",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Snapshot file backing the store; in-memory only when absent
    #[arg(long, global = true)]
    pub data: Option<PathBuf>,

    /// TOML file with store settings
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Store a JSON record under its `id`
    Put(PutArgs),
    /// Read one record
    Get(KeyArgs),
    /// Remove one record
    Delete(KeyArgs),
    /// List the records of a key range
    Range(RangeArgs),
    /// Interactive shell with live watches
    Shell,
}

#[derive(Args)]
pub struct PutArgs {
    /// Record as a JSON object, e.g. '{"id":"a","n":1}'
    pub json: String,
}

#[derive(Args)]
pub struct KeyArgs {
    pub id: String,
}

#[derive(Args)]
pub struct RangeArgs {
    #[arg(long, conflicts_with = "gte")]
    pub gt: Option<String>,
    #[arg(long)]
    pub gte: Option<String>,
    #[arg(long, conflicts_with = "lte")]
    pub lt: Option<String>,
    #[arg(long)]
    pub lte: Option<String>,
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
    #[arg(long)]
    pub reverse: bool,
}

impl RangeArgs {
    pub fn spec(&self) -> RangeSpec {
        let mut spec = RangeSpec::all();
        if let Some(key) = &self.gt {
            spec = spec.gt(key.as_str());
        }
        if let Some(key) = &self.gte {
            spec = spec.gte(key.as_str());
        }
        if let Some(key) = &self.lt {
            spec = spec.lt(key.as_str());
        }
        if let Some(key) = &self.lte {
            spec = spec.lte(key.as_str());
        }
        spec.limit = self.limit;
        spec.reverse = self.reverse;
        spec
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livekv_store::Bound;

    #[test]
    fn parse_put() {
        let cli = Cli::try_parse_from(["livekv", "put", r#"{"id":"a"}"#]).unwrap();
        if let Command::Put(args) = cli.command {
            assert_eq!(args.json, r#"{"id":"a"}"#);
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_get_and_delete() {
        let cli = Cli::try_parse_from(["livekv", "get", "a"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Get(ref args) if args.id == "a"
        ));
        let cli = Cli::try_parse_from(["livekv", "delete", "a"]).unwrap();
        assert!(matches!(cli.command, Command::Delete(_)));
    }

    #[test]
    fn parse_range() {
        let cli = Cli::try_parse_from([
            "livekv", "range", "--gt", "a", "--lte", "m", "-n", "3", "--reverse",
        ])
        .unwrap();
        if let Command::Range(args) = cli.command {
            let spec = args.spec();
            assert_eq!(spec.lower, Some(Bound::Exclusive("a".into())));
            assert_eq!(spec.upper, Some(Bound::Inclusive("m".into())));
            assert_eq!(spec.limit, Some(3));
            assert!(spec.reverse);
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn conflicting_bounds_rejected() {
        let parsed = Cli::try_parse_from(["livekv", "range", "--gt", "a", "--gte", "b"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn parse_global_flags() {
        let cli = Cli::try_parse_from([
            "livekv", "--data", "db.lkv", "--config", "livekv.toml", "-v", "shell",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.data, Some(PathBuf::from("db.lkv")));
        assert_eq!(cli.config, Some(PathBuf::from("livekv.toml")));
        assert!(matches!(cli.command, Command::Shell));
    }

    #[test]
    fn parse_json_format() {
        let cli = Cli::try_parse_from(["livekv", "--format", "json", "get", "a"]).unwrap();
        assert!(matches!(cli.format, OutputFormat::Json));
    }
}
