use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::agenda::{SortMode, Tab};

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "tempo",
    version,
    about = "Tempo: due dates and recurring tasks in the terminal",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append,
        global = true
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "rc-file", global = true)]
    pub rc_file: Option<PathBuf>,

    #[arg(long = "data", global = true)]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Show the agenda for one tab.
    List {
        #[arg(long, value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<Tab>()))]
        tab: Option<Tab>,

        #[arg(long, value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<SortMode>()))]
        sort: Option<SortMode>,

        /// Reference instant instead of the current time.
        #[arg(long)]
        at: Option<String>,
    },

    /// Create a task with an optional flat deadline.
    Add {
        #[arg(required = true, num_args = 1..)]
        title: Vec<String>,

        #[arg(long)]
        deadline: Option<String>,

        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        priority: i64,

        #[arg(long)]
        folder: Option<String>,

        #[arg(long)]
        memo: Option<String>,

        #[arg(long = "order")]
        custom_order: Option<i64>,

        #[command(flatten)]
        schedule: ScheduleArgs,
    },

    /// Print the next outstanding occurrence of a repeating task.
    Next {
        id: String,

        #[arg(long)]
        from: Option<String>,
    },

    /// Toggle completion of a task or of one occurrence.
    Done {
        id: String,

        /// Occurrence date (YYYY-MM-DD) for repeating tasks.
        #[arg(long)]
        date: Option<String>,
    },

    Info {
        id: String,
    },

    Delete {
        id: String,
    },

    /// Dump every task as a JSON array.
    Export,
}

/// Repetition offered by `add --repeat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repeat {
    Daily,
    Weekly,
    Monthly,
    Yearly,
    Hourly,
}

impl std::str::FromStr for Repeat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" | "day" => Ok(Self::Daily),
            "weekly" | "week" => Ok(Self::Weekly),
            "monthly" | "month" => Ok(Self::Monthly),
            "yearly" | "year" | "annually" => Ok(Self::Yearly),
            "hourly" | "hour" => Ok(Self::Hourly),
            other => Err(anyhow!("unknown repeat: {other} (expected daily, weekly, monthly, yearly or hourly)")),
        }
    }
}

/// Schedule options for `add`.
#[derive(Args, Debug, Clone, Default)]
pub struct ScheduleArgs {
    /// Repeat the task, anchored at --deadline (or today).
    #[arg(long, value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<Repeat>()))]
    pub repeat: Option<Repeat>,

    /// Repeat every N days, weeks or hours.
    #[arg(long, requires = "repeat")]
    pub every: Option<u32>,

    /// Weekdays of a weekly repeat, e.g. mon,wed,fri.
    #[arg(long, requires = "repeat", value_delimiter = ',')]
    pub on: Vec<String>,

    /// Last day an occurrence may fall on.
    #[arg(long, requires = "repeat", conflicts_with = "times")]
    pub until: Option<String>,

    /// Stop after this many completed occurrences.
    #[arg(long, requires = "repeat")]
    pub times: Option<u32>,

    /// Keep the task hidden until this instant.
    #[arg(long)]
    pub starts: Option<String>,

    #[arg(long, requires = "repeat")]
    pub skip_holidays: bool,
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}
