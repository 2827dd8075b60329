//! Command-line front end: run measurement rounds or compare saved reports.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio::time::Instant;
use tracing::{error, info, warn};

use wsprobe::report::{self, log_summary};
use wsprobe::{
    Error, Framing, HarnessConfig, LatencyHarness, MatchMode, RoundStatus, SummaryReport,
    Timeouts, UpdatePayload, observability,
};

#[derive(Parser, Debug)]
#[command(name = "wsprobe", version)]
#[command(about = "Measure API-to-WebSocket broadcast latency across many clients")]
struct Cli {
    /// Log per-client connect and receipt events
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect clients, trigger updates and write one report per round
    Run(RunArgs),
    /// Tabulate saved reports by client count
    Compare(CompareArgs),
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum FramingArg {
    Raw,
    Socketio,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum MatchArg {
    Marker,
    Any,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Server base URL
    #[arg(long, default_value = "http://localhost:3010")]
    server_url: String,

    /// Path the update is posted to
    #[arg(long, default_value = "/api/add")]
    api_endpoint: String,

    /// Number of subscriber connections
    #[arg(long, short = 'n', default_value = "100")]
    clients: usize,

    /// Explicit WebSocket URL (derived from the server URL otherwise)
    #[arg(long)]
    ws_url: Option<String>,

    /// WebSocket path used when deriving the URL
    #[arg(long)]
    ws_path: Option<String>,

    /// Notification framing
    #[arg(long, value_enum, default_value = "socketio")]
    framing: FramingArg,

    /// Socket.IO event carrying notifications
    #[arg(long, default_value = wsprobe::config::DEFAULT_EVENT)]
    event: String,

    /// Which notifications count for a round
    #[arg(long = "match", value_enum, default_value = "marker")]
    match_mode: MatchArg,

    /// Delay between connect attempts in milliseconds
    #[arg(long, default_value = "50")]
    stagger_ms: u64,

    /// Pause after connecting, in seconds
    #[arg(long, default_value = "2", value_parser = parse_secs)]
    settle: Duration,

    /// Per-client connect timeout in seconds
    #[arg(long, default_value = "10", value_parser = parse_secs)]
    connect_timeout: Duration,

    /// Connect phase timeout in seconds, counted from the last launch
    #[arg(long, default_value = "10", value_parser = parse_secs)]
    connect_phase_timeout: Duration,

    /// Trigger request timeout in seconds
    #[arg(long, default_value = "5", value_parser = parse_secs)]
    trigger_timeout: Duration,

    /// Propagation wait in seconds
    #[arg(long, default_value = "10", value_parser = parse_secs)]
    propagation_timeout: Duration,

    /// Number of rounds on the same client set [default: 1, or until
    /// --max-duration runs out when that is given]
    #[arg(long)]
    rounds: Option<u32>,

    /// Pause between rounds in seconds
    #[arg(long, default_value = "5", value_parser = parse_secs)]
    interval: Duration,

    /// Upper bound for the whole run in seconds
    #[arg(long, value_parser = parse_secs)]
    max_duration: Option<Duration>,

    /// Directory reports are written to
    #[arg(long, default_value = "results")]
    output_dir: PathBuf,

    /// Extra PEM CA certificates for wss://
    #[arg(long)]
    ca_file: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct CompareArgs {
    /// Directory holding report files
    #[arg(default_value = "results")]
    dir: PathBuf,
}

fn parse_secs(s: &str) -> Result<Duration, String> {
    let secs: f64 = s.parse().map_err(|e| format!("{s}: {e}"))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("{s}: {e}"))
}

impl RunArgs {
    /// Rounds to run. `None` repeats until the max duration runs out.
    fn round_limit(&self) -> Option<u32> {
        match (self.rounds, self.max_duration) {
            (Some(rounds), _) => Some(rounds),
            (None, Some(_)) => None,
            (None, None) => Some(1),
        }
    }

    fn to_config(&self, verbose: bool) -> HarnessConfig {
        let framing = match self.framing {
            FramingArg::Raw => Framing::Raw,
            FramingArg::Socketio => Framing::SocketIo {
                event: self.event.clone(),
            },
        };
        let match_mode = match self.match_mode {
            MatchArg::Marker => MatchMode::Marker,
            MatchArg::Any => MatchMode::Any,
        };
        let timeouts = Timeouts {
            connect: self.connect_timeout,
            connect_phase: self.connect_phase_timeout,
            trigger: self.trigger_timeout,
            propagation: self.propagation_timeout,
            ..Timeouts::default()
        };

        let mut config = HarnessConfig::new(&self.server_url, self.clients)
            .with_api_endpoint(&self.api_endpoint)
            .with_framing(framing)
            .with_match_mode(match_mode)
            .with_stagger(Duration::from_millis(self.stagger_ms))
            .with_settle(self.settle)
            .with_timeouts(timeouts)
            .with_verbose(verbose);
        if let Some(url) = &self.ws_url {
            config = config.with_ws_url(url);
        }
        if let Some(path) = &self.ws_path {
            config = config.with_ws_path(path);
        }
        if let Some(max) = self.max_duration {
            config = config.with_max_duration(max);
        }
        if let Some(ca) = &self.ca_file {
            config = config.with_ca_file(ca);
        }
        config
    }
}

/// Outcome of a run, from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Outcome {
    Complete,
    Partial,
    Failed,
}

impl Outcome {
    fn of(status: &RoundStatus) -> Self {
        match status {
            RoundStatus::Complete => Outcome::Complete,
            RoundStatus::Partial { .. } => Outcome::Partial,
            RoundStatus::TriggerFailed { .. } => Outcome::Failed,
        }
    }

    fn exit_code(self) -> ExitCode {
        match self {
            Outcome::Complete => ExitCode::SUCCESS,
            Outcome::Partial => ExitCode::from(2),
            Outcome::Failed => ExitCode::FAILURE,
        }
    }
}

async fn run(args: &RunArgs, config: HarnessConfig) -> Result<Outcome, Error> {
    let started = Instant::now();
    let budget = config.max_duration.map(|max| started + max);
    info!(
        server = %config.server_url,
        api = %config.api_endpoint,
        clients = config.client_count,
        rounds = ?args.round_limit(),
        max_duration = ?config.max_duration,
        "starting run"
    );

    let mut harness = LatencyHarness::from_config(config.clone())?;
    let connected = harness.connect().await?;
    if connected == 0 {
        error!(requested = config.client_count, "no clients connected");
        harness.disconnect_all().await;
        return Ok(Outcome::Failed);
    }

    let mut worst = Outcome::Complete;
    let rounds = args.round_limit().unwrap_or(u32::MAX);
    for n in 0..rounds {
        if n > 0 {
            tokio::time::sleep(args.interval).await;
        }
        if budget.is_some_and(|end| Instant::now() >= end) {
            warn!(completed = n, "max duration reached");
            break;
        }

        let round = match harness.run_round(UpdatePayload::fresh()).await {
            Ok(round) => round,
            Err(Error::NoClientsConnected) => {
                error!("every client disconnected");
                worst = Outcome::Failed;
                break;
            }
            Err(e) => {
                harness.disconnect_all().await;
                return Err(e);
            }
        };

        worst = worst.max(Outcome::of(&round.status));
        if let RoundStatus::TriggerFailed { cause } = &round.status {
            error!(round = round.id, %cause, "trigger failed");
            continue;
        }

        log_summary(&round);
        let summary = SummaryReport::from_round(&config, &round);
        if let Err(e) = summary.write_to_dir(&args.output_dir) {
            error!(error = %e, "could not write report");
        }
    }

    harness.disconnect_all().await;
    Ok(worst)
}

fn compare(args: &CompareArgs) -> Result<(), Error> {
    let reports = report::load_reports(&args.dir)?;
    let rows = report::scalability_table(&reports);
    if rows.is_empty() {
        warn!(dir = %args.dir.display(), "no reports found");
        return Ok(());
    }

    let cell = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{v:.2}"));
    println!(
        "{:>8} {:>10} {:>10} {:>10} {:>10} {:>10} {:>9}",
        "clients", "avg_ms", "median_ms", "p95_ms", "p99_ms", "max_ms", "delivery"
    );
    for row in rows {
        println!(
            "{:>8} {:>10} {:>10} {:>10} {:>10} {:>10} {:>8.1}%",
            row.connected_clients,
            cell(row.avg_latency_ms),
            cell(row.median_latency_ms),
            cell(row.p95_latency_ms),
            cell(row.p99_latency_ms),
            cell(row.max_latency_ms),
            row.delivery_ratio * 100.0
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match &cli.command {
        Command::Run(args) => {
            let config = args.to_config(cli.verbose);
            observability::init_tracing(config.verbose);
            match run(args, config).await {
                Ok(outcome) => outcome.exit_code(),
                Err(e) => {
                    error!(error = %e, "run failed");
                    ExitCode::FAILURE
                }
            }
        }
        Command::Compare(args) => {
            observability::init_tracing(cli.verbose);
            match compare(args) {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    error!(error = %e, "compare failed");
                    ExitCode::FAILURE
                }
            }
        }
    }
}
