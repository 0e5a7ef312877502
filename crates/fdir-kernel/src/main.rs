use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use fdir_kernel::config::FdirConfig;
use fdir_kernel::observability::{init_logging, LogFormat};
use fdir_kernel::phase::{Phase, PhaseStateMachine};
use fdir_kernel::review::{ReviewOutcome, ReviewSession};
use fdir_kernel::test_harness::{run_stress, StressConfig};
use fdir_kernel::{EventLog, FeedbackLabel, LogError};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

fn cli() -> Command {
    Command::new("fdir-kernel")
        .version(fdir_kernel::VERSION)
        .about("FDIR safety core: phase control, outcome log, bounded recovery")
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .global(true)
                .help("Increase diagnostics (-v info, -vv debug, -vvv trace)"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_parser(["human", "json"])
                .global(true)
                .help("Diagnostics format on stderr"),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("review")
                .about("Review pending recovery outcomes")
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("TOML config naming the pending and processed logs"),
                ),
        )
        .subcommand(
            Command::new("stress")
                .about("Hammer all components concurrently and check invariants")
                .arg(
                    Arg::new("writers")
                        .long("writers")
                        .default_value("5")
                        .value_parser(value_parser!(usize))
                        .help("Concurrent log writers"),
                )
                .arg(
                    Arg::new("records")
                        .long("records")
                        .default_value("10")
                        .value_parser(value_parser!(usize))
                        .help("Records per writer"),
                )
                .arg(
                    Arg::new("guards")
                        .long("guards")
                        .default_value("50")
                        .value_parser(value_parser!(usize))
                        .help("Guarded units of work, half of them overrunning"),
                ),
        )
        .subcommand(
            Command::new("validate-log")
                .about("Check that an outcome log is a well-formed record sequence")
                .arg(
                    Arg::new("path")
                        .long("path")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Path to the log file"),
                ),
        )
        .subcommand(Command::new("phase-demo").about("Walk the phase state machine through a forced override"))
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let matches = cli().get_matches();

    let config = match matches.subcommand() {
        Some(("review", args)) => match args.get_one::<PathBuf>("config") {
            Some(path) => FdirConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
            None => FdirConfig::default(),
        },
        _ => FdirConfig::default(),
    };
    let format = match matches.get_one::<String>("log-format").map(String::as_str) {
        Some("json") => LogFormat::Json,
        Some(_) => LogFormat::Human,
        None => config.logging.format,
    };
    let verbosity = matches.get_count("verbose").max(config.logging.verbosity);
    init_logging(format, verbosity);

    match matches.subcommand() {
        Some(("review", _)) => review(&config),
        Some(("stress", args)) => stress(args).await,
        Some(("validate-log", args)) => validate_log(args),
        Some(("phase-demo", _)) => Ok(phase_demo()),
        _ => unreachable!("subcommand_required"),
    }
}

fn review(config: &FdirConfig) -> anyhow::Result<ExitCode> {
    let pending = EventLog::open(&config.log.pending_path);
    let processed = EventLog::open(&config.log.processed_path);
    let outcome = ReviewSession::new(pending, processed)
        .run()
        .context("review failed")?;
    Ok(match outcome {
        ReviewOutcome::Quit => ExitCode::from(2),
        ReviewOutcome::NothingPending | ReviewOutcome::Completed { .. } => ExitCode::SUCCESS,
    })
}

async fn stress(args: &ArgMatches) -> anyhow::Result<ExitCode> {
    let scratch = std::env::temp_dir().join(format!("fdir-stress-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&scratch).with_context(|| format!("creating {}", scratch.display()))?;

    let mut config = StressConfig::new(&scratch);
    if let Some(&writers) = args.get_one::<usize>("writers") {
        config.writers = writers;
    }
    if let Some(&records) = args.get_one::<usize>("records") {
        config.records_per_writer = records;
    }
    if let Some(&guards) = args.get_one::<usize>("guards") {
        config.guards = guards;
    }

    println!("Running stress test...");
    println!("  Writers: {} x {} records", config.writers, config.records_per_writer);
    println!("  Phase racers: {}", config.phase_racers);
    println!("  Guarded units: {}", config.guards);
    println!();

    let report = run_stress(config).await;
    let _ = std::fs::remove_dir_all(&scratch);

    println!("Stress Test Report:");
    println!("  Records logged: {}/{}", report.logged_records, report.expected_records);
    println!("  Transitions committed: {}", report.committed_transitions);
    println!("  Transitions contended: {}", report.contended_transitions);
    println!("  Guard timeouts: {}", report.guard_timeouts);
    println!("  Violations: {}", report.violations);
    for detail in &report.details {
        println!("    - {detail}");
    }
    println!("  Success: {}", report.success);

    Ok(if report.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn validate_log(args: &ArgMatches) -> anyhow::Result<ExitCode> {
    let path = args
        .get_one::<PathBuf>("path")
        .context("--path is required")?;
    println!("Validating log at: {}", path.display());

    match EventLog::open(path).read_strict() {
        Ok(records) => {
            let mut by_label: BTreeMap<&str, usize> = FeedbackLabel::ALL.iter().map(|l| (l.as_str(), 0)).collect();
            for r in &records {
                *by_label.entry(r.label.as_str()).or_default() += 1;
            }
            println!("Log integrity: VALID");
            println!("Records: {}", records.len());
            for (label, count) in by_label {
                println!("  {label}: {count}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e @ LogError::Corrupt { .. }) => {
            println!("Log integrity: INVALID ({e})");
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e).context("reading log"),
    }
}

fn phase_demo() -> ExitCode {
    let machine = Arc::new(PhaseStateMachine::new(Default::default()));
    println!("Initial phase: {}", machine.get_current_phase());

    for target in [Phase::PayloadOps, Phase::NominalOps] {
        match machine.set_phase(target) {
            Ok(res) => println!("{} -> {}: success={}", res.previous_phase, target, res.success),
            Err(e) => println!("-> {target}: {e}"),
        }
    }

    match machine.set_phase_by_name("INVALID_PHASE") {
        Ok(res) => println!("unexpected: {res:?}"),
        Err(e) => println!("Rejected: {e}"),
    }

    let forced = machine.force_safe_mode();
    println!(
        "Forced override: {} -> {} (transitioning afterwards: {})",
        forced.previous_phase,
        forced.new_phase,
        machine.is_transitioning()
    );

    let ok = machine.get_current_phase() == Phase::SafeMode && machine.set_phase(Phase::NominalOps).is_ok();
    println!("Recovered to: {}", machine.get_current_phase());
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
