mod output;

use std::path::PathBuf;

use anyhow::{Context, Result};
use cbc_sdk::{CbcApi, Credentials, Device, EnrichedEvent, Policy, Query, SortDirection};
use clap::{Args, Parser, Subcommand};
use futures_util::TryStreamExt;
use tracing_subscriber::EnvFilter;

use output::JsonLines;

/// Query Carbon Black Cloud from the command line
///
/// Results are written to stdout as one JSON object per line.
#[derive(Parser)]
#[command(name = "cbc")]
#[command(version)]
struct Cli {
    /// Credentials file (YAML, `profiles.<name>` sections)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Profile to read from the credentials file
    #[arg(short, long)]
    profile: Option<String>,

    /// Log verbosity level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit logs as JSON on stderr
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Endpoint Standard devices
    #[command(subcommand)]
    Devices(DeviceCommands),
    /// Endpoint Standard policies
    #[command(subcommand)]
    Policies(PolicyCommands),
    /// Investigate enriched events
    #[command(subcommand)]
    Events(EventCommands),
    /// Threat intelligence feeds
    #[command(subcommand)]
    Feeds(FeedCommands),
    /// Threat intelligence watchlists
    #[command(subcommand)]
    Watchlists(WatchlistCommands),
    /// Raw rows of any searchable object type (device, event, policy, enriched_event)
    Search {
        object_type: String,
        #[command(flatten)]
        list: ListArgs,
    },
}

#[derive(Subcommand)]
enum DeviceCommands {
    List {
        #[command(flatten)]
        list: ListArgs,
    },
    Get {
        device_id: i64,
    },
}

#[derive(Subcommand)]
enum PolicyCommands {
    List,
    Get { policy_id: i64 },
}

#[derive(Subcommand)]
enum EventCommands {
    /// Run a search job and print its results
    Search(EventSearchArgs),
}

#[derive(Subcommand)]
enum FeedCommands {
    List {
        /// Include public feeds
        #[arg(long)]
        include_public: bool,
    },
    /// Reports of one feed
    Reports { feed_id: String },
}

#[derive(Subcommand)]
enum WatchlistCommands {
    List,
}

#[derive(Args)]
struct ListArgs {
    /// `key=value` criteria, AND-joined
    #[arg(short = 'w', long = "where", value_parser = parse_pair)]
    filters: Vec<(String, String)>,
    /// Page size
    #[arg(long)]
    rows: Option<usize>,
    /// Stop after this many results
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Args)]
struct EventSearchArgs {
    /// Query string, e.g. `process_name:cmd.exe`
    query: String,
    /// Relative time window such as `-2h`
    #[arg(long, allow_hyphen_values = true)]
    window: Option<String>,
    /// ISO 8601 start of the time range
    #[arg(long)]
    start: Option<String>,
    /// ISO 8601 end of the time range
    #[arg(long)]
    end: Option<String>,
    /// Sort key as `field[:ASC|DESC]`; repeatable
    #[arg(long)]
    sort: Vec<String>,
    /// Give up polling after this many milliseconds
    #[arg(long)]
    timeout: Option<u64>,
    /// Stop after this many results
    #[arg(long)]
    limit: Option<usize>,
}

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))
}

fn parse_sort(raw: &str) -> Result<(&str, SortDirection)> {
    match raw.split_once(':') {
        Some((field, direction)) => Ok((field, direction.parse()?)),
        None => Ok((raw, SortDirection::Asc)),
    }
}

fn init_logging(verbose: u8, json: bool) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(err) = installed {
        eprintln!("logging not initialized: {err}");
    }
}

/// Applies list options and prints the results.
async fn list<M: cbc_sdk::Model>(mut query: Query<M>, args: ListArgs) -> Result<()> {
    if !args.filters.is_empty() {
        query = query.where_all(args.filters)?;
    }
    if let Some(rows) = args.rows {
        query = query.set_rows(rows)?;
    }
    drain(query, args.limit).await
}

async fn drain<M>(mut query: Query<M>, limit: Option<usize>) -> Result<()>
where
    M: cbc_sdk::Model,
{
    let mut out = JsonLines::stdout();
    let mut rows = query.search(0, limit.unwrap_or(0));
    while let Some(row) = rows.try_next().await? {
        out.write(&row)?;
    }
    out.flush()
}

async fn run(api: &CbcApi, command: Commands) -> Result<()> {
    match command {
        Commands::Devices(DeviceCommands::List { list: args }) => {
            list(api.select::<Device>(), args).await
        }
        Commands::Devices(DeviceCommands::Get { device_id }) => {
            let device = api.get_device(device_id).await?;
            JsonLines::stdout().write_one(&device)
        }
        Commands::Policies(PolicyCommands::List) => drain(api.select::<Policy>(), None).await,
        Commands::Policies(PolicyCommands::Get { policy_id }) => {
            let policy = api.get_policy(policy_id).await?;
            JsonLines::stdout().write_one(&policy)
        }
        Commands::Events(EventCommands::Search(args)) => search_events(api, args).await,
        Commands::Feeds(FeedCommands::List { include_public }) => {
            let feeds = api.feeds().include_public(include_public).all().await?;
            JsonLines::stdout().write_all(&feeds)
        }
        Commands::Feeds(FeedCommands::Reports { feed_id }) => {
            let reports = api.reports().feed_id(feed_id).all().await?;
            JsonLines::stdout().write_all(&reports)
        }
        Commands::Watchlists(WatchlistCommands::List) => {
            let lists = api.watchlists().all().await?;
            JsonLines::stdout().write_all(&lists)
        }
        Commands::Search {
            object_type,
            list: args,
        } => list(api.select_named(&object_type)?, args).await,
    }
}

async fn search_events(api: &CbcApi, args: EventSearchArgs) -> Result<()> {
    let mut query = api.select::<EnrichedEvent>().where_raw(args.query)?;
    if args.window.is_some() || args.start.is_some() || args.end.is_some() {
        query = query.set_time_range(
            args.start.as_deref(),
            args.end.as_deref(),
            args.window.as_deref(),
        )?;
    }
    for raw in &args.sort {
        let (field, direction) = parse_sort(raw)?;
        query = query.sort_by(field, direction)?;
    }
    if let Some(timeout) = args.timeout {
        query = query.timeout(timeout)?;
    }

    query.submit().await.context("submitting search job")?;
    tracing::info!(job_id = ?query.job_id(), "search job submitted");
    drain(query, args.limit).await
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    let credentials = Credentials::load(cli.config.as_deref(), cli.profile.as_deref())
        .context("loading credentials")?;
    let api = CbcApi::from_credentials(credentials)?;
    tracing::debug!(url = %api.base_url(), org_key = api.org_key(), "connected");

    run(&api, cli.command).await
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pair() {
        assert_eq!(
            parse_pair("hostName=WIN-7").unwrap(),
            ("hostName".to_owned(), "WIN-7".to_owned())
        );
        assert_eq!(
            parse_pair("q=a=b").unwrap(),
            ("q".to_owned(), "a=b".to_owned())
        );
        assert!(parse_pair("hostName").is_err());
    }

    #[test]
    fn test_parse_sort() {
        let (field, direction) = parse_sort("device_timestamp:desc").unwrap();
        assert_eq!(field, "device_timestamp");
        assert_eq!(direction, SortDirection::Desc);
        assert_eq!(parse_sort("process_name").unwrap().1, SortDirection::Asc);
        assert!(parse_sort("x:sideways").is_err());
    }

    #[test]
    fn test_cli_parses_event_search() {
        let cli = Cli::try_parse_from([
            "cbc",
            "-vv",
            "--profile",
            "lab",
            "events",
            "search",
            "process_name:cmd.exe",
            "--window",
            "-2h",
            "--sort",
            "device_timestamp:DESC",
            "--limit",
            "10",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.profile.as_deref(), Some("lab"));
        let Commands::Events(EventCommands::Search(args)) = cli.command else {
            panic!("expected events search");
        };
        assert_eq!(args.window.as_deref(), Some("-2h"));
        assert_eq!(args.limit, Some(10));
    }

    #[test]
    fn test_cli_parses_filters() {
        let cli = Cli::try_parse_from([
            "cbc",
            "devices",
            "list",
            "-w",
            "hostName=WIN-7",
            "--where",
            "status=REGISTERED",
            "--rows",
            "50",
        ])
        .unwrap();
        let Commands::Devices(DeviceCommands::List { list }) = cli.command else {
            panic!("expected devices list");
        };
        assert_eq!(list.filters.len(), 2);
        assert_eq!(list.rows, Some(50));
    }
}
