//! CLI for availscope: how long was it really down?

mod adapters;
mod commands;
mod plan;

use std::path::PathBuf;

use availscope_core::{EngineConfig, InitialState, TerminateHandling};
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};

use commands::fail;

#[derive(Parser)]
#[command(name = "availscope")]
#[command(about = "availscope: reconstruct downtime from gappy metrics and lifecycle logs")]
#[command(version = availscope_core::VERSION)]
struct Cli {
    /// Log pipeline events (chunk fetches, skips, fallbacks) to stderr.
    /// RUST_LOG overrides this.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Reporting window. Defaults to the 30 days ending now.
#[derive(Args)]
struct WindowArgs {
    /// Window length in days, ending at --end (or now)
    #[arg(long)]
    days: Option<i64>,

    /// Window start (RFC 3339), instead of --days
    #[arg(long)]
    start: Option<String>,

    /// Window end (RFC 3339), defaults to now
    #[arg(long)]
    end: Option<String>,
}

impl WindowArgs {
    fn resolve(&self) -> availscope_core::TimeWindow {
        commands::resolve_window(
            self.days,
            self.start.as_deref(),
            self.end.as_deref(),
            Utc::now(),
        )
        .unwrap_or_else(|e| fail(e))
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum InitialArg {
    Running,
    Stopped,
}

#[derive(Clone, Copy, ValueEnum)]
enum TerminateArg {
    /// Terminate on a running instance changes nothing
    Ignore,
    /// Terminate counts as stop
    Stop,
    /// Terminating a running instance ends its accounting
    Retire,
}

#[derive(Subcommand)]
enum Commands {
    /// List the built-in metric profiles
    Profiles,

    /// Downtime for one resource from an exported metric series
    Metric {
        /// Resource name (instance id, service, target group)
        resource: String,

        /// Statistics export (JSON, optionally gzipped) for the resource
        #[arg(long)]
        data: PathBuf,

        /// Metric profile (see `availscope profiles`)
        #[arg(long, default_value = "ec2-status-check")]
        profile: String,

        /// Extra dimension as Name=Value (repeatable)
        #[arg(long = "dimension")]
        dimensions: Vec<String>,

        #[command(flatten)]
        window: WindowArgs,

        /// Longest span per query, e.g. 5d or 12h (capped by the profile)
        #[arg(long, default_value = "5d", value_parser = commands::parse_duration)]
        chunk: std::time::Duration,

        /// Chunk queries in flight at once
        #[arg(long, default_value = "1")]
        concurrency: usize,

        /// Per-query timeout, 0 to wait indefinitely
        #[arg(long, default_value = "30s", value_parser = commands::parse_duration)]
        timeout: std::time::Duration,

        /// Count only observed down samples; do not charge missing buckets
        #[arg(long)]
        no_gap_charge: bool,

        /// Write the normalized samples as CSV
        #[arg(long)]
        csv: Option<String>,

        /// Write the report as JSON
        #[arg(long)]
        output: Option<String>,
    },

    /// Downtime for one EC2 instance from CloudTrail logs
    Events {
        /// Instance id
        instance: String,

        /// CloudTrail log files or directories (repeatable)
        #[arg(long = "logs", required = true)]
        logs: Vec<PathBuf>,

        #[command(flatten)]
        window: WindowArgs,

        /// State assumed before the first event
        #[arg(long, value_enum, default_value = "running")]
        initial: InitialArg,

        /// How TerminateInstances on a running instance is counted
        #[arg(long, value_enum, default_value = "ignore")]
        terminate: TerminateArg,

        /// Metric profile to use when the logs hold no events
        #[arg(long, requires = "fallback_data")]
        fallback_profile: Option<String>,

        /// Statistics export for the fallback profile
        #[arg(long, requires = "fallback_profile")]
        fallback_data: Option<PathBuf>,

        /// Per-query timeout, 0 to wait indefinitely
        #[arg(long, default_value = "30s", value_parser = commands::parse_duration)]
        timeout: std::time::Duration,

        /// Write the report as JSON
        #[arg(long)]
        output: Option<String>,
    },

    /// Downtime and fleet reliability for every resource in a plan file
    Batch {
        /// Plan file (JSON)
        plan: String,

        /// Resources computed at once (overrides the plan)
        #[arg(long)]
        concurrency: Option<usize>,

        /// Write the fleet report as JSON
        #[arg(long)]
        output: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    match cli.command {
        Commands::Profiles => commands::profiles::run(),
        Commands::Metric {
            resource,
            data,
            profile,
            dimensions,
            window,
            chunk,
            concurrency,
            timeout,
            no_gap_charge,
            csv,
            output,
        } => {
            let mut engine = EngineConfig {
                max_chunk_span_secs: commands::chunk_secs(chunk).unwrap_or_else(|e| fail(e)),
                chunk_concurrency: concurrency.max(1),
                query_timeout_ms: commands::timeout_ms(timeout),
                ..EngineConfig::default()
            };
            engine.policy.charge_gaps = !no_gap_charge;
            commands::metric::run(commands::metric::MetricCommandConfig {
                resource: &resource,
                dimensions: &dimensions,
                data: &data,
                profile: commands::resolve_profile(&profile).unwrap_or_else(|e| fail(e)),
                window: window.resolve(),
                engine,
                csv_path: csv.as_deref(),
                output_path: output.as_deref(),
            })
        }
        Commands::Events {
            instance,
            logs,
            window,
            initial,
            terminate,
            fallback_profile,
            fallback_data,
            timeout,
            output,
        } => {
            let engine = EngineConfig {
                query_timeout_ms: commands::timeout_ms(timeout),
                initial_state: match initial {
                    InitialArg::Running => InitialState::Running,
                    InitialArg::Stopped => InitialState::Stopped,
                },
                terminate: match terminate {
                    TerminateArg::Ignore => TerminateHandling::Ignore,
                    TerminateArg::Stop => TerminateHandling::Stop,
                    TerminateArg::Retire => TerminateHandling::Retire,
                },
                ..EngineConfig::default()
            };
            let fallback = fallback_profile.zip(fallback_data).map(|(name, data)| {
                (commands::resolve_profile(&name).unwrap_or_else(|e| fail(e)), data)
            });
            commands::events::run(commands::events::EventsCommandConfig {
                instance: &instance,
                logs,
                window: window.resolve(),
                engine,
                fallback,
                output_path: output.as_deref(),
            })
        }
        Commands::Batch {
            plan,
            concurrency,
            output,
        } => commands::batch::run(commands::batch::BatchCommandConfig {
            plan_path: &plan,
            concurrency,
            output_path: output.as_deref(),
        }),
    }
}
