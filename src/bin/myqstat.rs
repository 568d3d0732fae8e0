//! myqstat - dumps MySQL status output as typed snapshots.
//!
//! Replays a captured `mysqladmin extended-status` / `mysql -B` dump or reads
//! a live status command, printing one line per snapshot.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Parser;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use myqstat::loader::{CloseReason, Loader, Next, Source};
use myqstat::sample::Snapshot;

/// How often the consume loop checks for Ctrl-C while waiting.
const POLL_TICK: Duration = Duration::from_millis(200);

/// Typed snapshot dump of MySQL status output.
#[derive(Parser)]
#[command(name = "myqstat", about = "Typed snapshot dump of MySQL status output", version)]
struct Args {
    /// Captured status output to replay.
    #[arg(
        short,
        long,
        value_name = "PATH",
        conflicts_with = "command",
        required_unless_present = "command"
    )]
    file: Option<PathBuf>,

    /// Status command to run live (e.g. mysqladmin).
    #[arg(short, long, value_name = "PROGRAM")]
    command: Option<String>,

    /// Extra argument for the live command; `{interval}` is replaced by the interval in seconds.
    #[arg(short, long, value_name = "ARG", allow_hyphen_values = true)]
    arg: Option<String>,

    /// Sampling interval in seconds.
    #[arg(short, long, default_value = "1")]
    interval: u64,

    /// Snapshots buffered between parser and output.
    #[arg(long, default_value_t = myqstat::loader::DEFAULT_QUEUE_CAPACITY)]
    capacity: usize,

    /// Accept dumps without an integer Uptime (e.g. SHOW VARIABLES output).
    #[arg(long)]
    allow_missing_uptime: bool,

    /// Print each snapshot as a JSON object instead of a summary line.
    #[arg(long)]
    json: bool,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

/// Initializes the tracing subscriber on stderr.
/// Default level is INFO. Use -q for quiet mode (errors only).
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = format!("myqstat={}", level).parse() {
        filter = filter.add_directive(directive);
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

/// One-line description of a snapshot.
fn describe(index: usize, snapshot: &Snapshot, previous: Option<&Snapshot>) -> String {
    let uptime = snapshot
        .uptime()
        .map(|u| u.to_string())
        .unwrap_or_else(|_| "?".to_string());
    let mut line = format!(
        "#{} uptime={} metrics={}",
        index,
        uptime,
        snapshot.len()
    );
    if let Some(prev) = previous {
        let lost = prev.missing_from(snapshot).len();
        if lost > 0 {
            line.push_str(&format!(" lost={}", lost));
        }
    }
    line
}

fn print_snapshot(
    out: &mut impl Write,
    json: bool,
    index: usize,
    snapshot: &Snapshot,
    previous: Option<&Snapshot>,
) -> io::Result<()> {
    if json {
        let encoded = serde_json::to_string(snapshot).map_err(io::Error::other)?;
        writeln!(out, "{}", encoded)
    } else {
        writeln!(out, "{}", describe(index, snapshot, previous))
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let source = match (&args.file, &args.command) {
        (Some(path), _) => Source::File(path.clone()),
        (None, Some(program)) => Source::Command(program.clone()),
        (None, None) => {
            error!("Either --file or --command is required");
            return ExitCode::FAILURE;
        }
    };

    let loader = Loader::new(Duration::from_secs(args.interval), source, args.arg.clone())
        .with_queue_capacity(args.capacity)
        .with_uptime_required(!args.allow_missing_uptime);

    let mut stream = match loader.fetch_status() {
        Ok(stream) => stream,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    // Setup graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut previous: Option<Snapshot> = None;
    let mut index = 0;

    loop {
        if !running.load(Ordering::SeqCst) {
            info!("Received shutdown signal");
            stream.cancel();
            break;
        }

        match stream.next_timeout(POLL_TICK) {
            Next::Snapshot(snapshot) => {
                index += 1;
                let printed =
                    print_snapshot(&mut out, args.json, index, &snapshot, previous.as_ref());
                if let Err(e) = printed {
                    // Closed pipe (e.g. `| head`): stop reading the source.
                    warn!("Output failed: {}", e);
                    stream.cancel();
                    break;
                }
                previous = Some(snapshot);
            }
            Next::Pending => continue,
            Next::Closed => break,
        }
    }

    let Some(summary) = stream.summary() else {
        return ExitCode::SUCCESS;
    };
    info!(
        "{} snapshots, {} malformed, {} duplicates ({})",
        summary.produced, summary.malformed, summary.duplicates, summary.reason
    );
    match &summary.reason {
        CloseReason::Fault(_) => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use myqstat::parser::RawGroup;

    fn snapshot(pairs: &[(&str, &str)]) -> Snapshot {
        let mut group = RawGroup::new(1);
        for (name, raw) in pairs {
            group.push(name, raw);
        }
        Snapshot::from_raw(group)
    }

    #[test]
    fn test_args_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_args_require_a_source() {
        assert!(Args::try_parse_from(["myqstat"]).is_err());
        assert!(Args::try_parse_from(["myqstat", "--file", "a", "--command", "b"]).is_err());

        let args = Args::try_parse_from([
            "myqstat",
            "--command",
            "mysqladmin",
            "--arg",
            "-i{interval} extended-status",
            "-i",
            "5",
        ])
        .unwrap();
        assert_eq!(args.command.as_deref(), Some("mysqladmin"));
        assert_eq!(args.arg.as_deref(), Some("-i{interval} extended-status"));
        assert_eq!(args.interval, 5);
        assert!(!args.allow_missing_uptime);

        let args =
            Args::try_parse_from(["myqstat", "-f", "variables.txt", "--allow-missing-uptime"])
                .unwrap();
        assert!(args.allow_missing_uptime);
    }

    #[test]
    fn test_describe() {
        let first = snapshot(&[("uptime", "10"), ("a", "1"), ("b", "2")]);
        let second = snapshot(&[("uptime", "11"), ("a", "1")]);

        assert_eq!(describe(1, &first, None), "#1 uptime=10 metrics=3");
        assert_eq!(describe(2, &second, Some(&first)), "#2 uptime=11 metrics=2 lost=1");
    }

    #[test]
    fn test_print_snapshot_json() {
        let s = snapshot(&[("uptime", "10"), ("compression", "OFF")]);
        let mut out = Vec::new();
        print_snapshot(&mut out, true, 1, &s, None).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "{\"compression\":\"OFF\",\"uptime\":10}\n"
        );
    }
}
