use clap::{Parser, Subcommand};
use std::error::Error;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use repro_explorer::checkpoint::{AvdCheckpoints, Baseline, CheckpointPolicy, CheckpointStore};
use repro_explorer::config::{self, ExploreSettings};
use repro_explorer::device::{AdbDevice, Device, DeviceResult};
use repro_explorer::events::{self, Event, EventLog};
use repro_explorer::oracle::client::{ChatClient, check_health};
use repro_explorer::scene::FingerprintMode;
use repro_explorer::session::Session;
use repro_explorer::{Goal, IssueReport, Outcome, SearchSession};

/// Settle time after launching the app under test
const LAUNCH_SETTLE: Duration = Duration::from_secs(3);

/// Repro Explorer - reproduce Android app bugs by guided UI exploration
#[derive(Parser, Debug)]
#[command(
    name = "repro-explorer",
    about = "Reproduce Android app bugs by checkpointed UI-state search with vision model guidance",
    after_help = "ENVIRONMENT VARIABLES:\n\
        REPRO_ORACLE_ENDPOINT      Chat-completions endpoint URL\n\
        REPRO_ORACLE_API_KEY       Bearer token for the endpoint\n\
        REPRO_ORACLE_MODEL         Model for text-only prompts\n\
        REPRO_ORACLE_IMAGE_MODEL   Model for prompts with screenshots\n\
        REPRO_ORACLE_FORMAT_MODEL  Model for structured extraction\n\
        REPRO_RESULT_DIR           Base directory for run results\n\
        REPRO_ADB                  adb binary\n\
        RUST_LOG                   Log filter (default: info)"
)]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Explore an app until the described bug is reproduced
    Explore {
        /// Package name of the app under test
        #[arg(short, long)]
        package: String,

        /// Steps to reproduce, in natural language
        #[arg(short, long, required_unless_present = "issue")]
        goal: Option<String>,

        /// Issue report JSON ({"repo", "title", "body", "comments"}) to summarize into the goal
        #[arg(short, long, conflicts_with = "goal")]
        issue: Option<PathBuf>,

        /// APK to install before exploring
        #[arg(long)]
        apk: Option<PathBuf>,

        /// Device serial (adb -s)
        #[arg(long)]
        serial: Option<String>,

        /// Label prefixed to the run directory name
        #[arg(short, long)]
        label: Option<String>,

        /// Base directory for results
        #[arg(long, env = "REPRO_RESULT_DIR")]
        result_dir: Option<PathBuf>,

        /// Maximum number of search levels
        #[arg(long, env = "REPRO_MAX_STEP")]
        max_step: Option<u32>,

        /// Wall-clock budget in minutes
        #[arg(long, env = "REPRO_MAX_MINUTES")]
        max_minutes: Option<u64>,

        /// Maximum number of recorded transitions
        #[arg(long, env = "REPRO_MAX_TRANSITIONS")]
        max_transitions: Option<u64>,

        /// Widgets and operations kept per refinement batch
        #[arg(long, env = "REPRO_FIRST_BRANCH_LIMIT")]
        first_branch_limit: Option<usize>,

        /// Frontier nodes kept per pruning round
        #[arg(long, env = "REPRO_SECOND_BRANCH_LIMIT")]
        second_branch_limit: Option<usize>,

        /// Widgets drawn on one annotated screenshot
        #[arg(long, env = "REPRO_WIDGET_BATCH_SIZE")]
        widget_batch_size: Option<usize>,

        /// Scene fingerprint mode: structural or salted
        #[arg(long, env = "REPRO_FINGERPRINT")]
        fingerprint: Option<FingerprintMode>,

        /// Do not probe the oracle endpoint before starting
        #[arg(long)]
        skip_health_check: bool,
    },

    /// Print event log records of a run directory as JSON lines
    Events {
        /// Run directory containing `data` and `state`
        #[arg(short, long)]
        dir: PathBuf,

        /// First record id (inclusive)
        #[arg(long, default_value = "0")]
        start: u64,

        /// Last record id (exclusive)
        #[arg(long)]
        end: Option<u64>,

        /// Merge scene and transition documents into their records
        #[arg(long)]
        join: bool,
    },

    /// Inspect or clean up emulator checkpoints
    Checkpoints {
        /// Device serial (adb -s)
        #[arg(long)]
        serial: Option<String>,

        #[command(subcommand)]
        action: CheckpointCommand,
    },
}

#[derive(Subcommand, Debug)]
enum CheckpointCommand {
    /// List saved checkpoints
    List,
    /// Delete every checkpoint except the baselines and the given keys
    Clean {
        /// Checkpoints to keep
        #[arg(short, long, value_delimiter = ',')]
        keep: Vec<String>,
    },
    /// Show the emulator snapshot status
    Status,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    match args.command {
        Some(Commands::Explore {
            package,
            goal,
            issue,
            apk,
            serial,
            label,
            result_dir,
            max_step,
            max_minutes,
            max_transitions,
            first_branch_limit,
            second_branch_limit,
            widget_batch_size,
            fingerprint,
            skip_health_check,
        }) => {
            let cfg = config::get();

            let mut settings = cfg.explore.clone();
            if let Some(max_step) = max_step {
                settings = settings.max_step(max_step);
            }
            if let Some(minutes) = max_minutes {
                settings = settings.max_duration(Duration::from_secs(minutes * 60));
            }
            if let Some(max_transitions) = max_transitions {
                settings = settings.max_transitions(max_transitions);
            }
            let first = first_branch_limit.unwrap_or(settings.first_branch_limit);
            let second = second_branch_limit.unwrap_or(settings.second_branch_limit);
            settings = settings.branch_limits(first, second);
            if let Some(size) = widget_batch_size {
                settings = settings.widget_batch_size(size);
            }
            if let Some(mode) = fingerprint {
                settings = settings.fingerprint(mode);
            }
            settings.validate()?;

            let issue = match issue {
                Some(path) => Some(read_issue(&path)?),
                None => None,
            };

            let base = result_dir.unwrap_or_else(|| PathBuf::from(&cfg.session.base_dir));
            let session = Session::new(&base, &package, label.as_deref());
            session.init(&package)?;
            init_tracing(Some(session.log_path().as_path()))?;
            info!(dir = %session.dir.display(), "result directory");

            let mut events = EventLog::open(&session.dir)?;

            let mut device = AdbDevice::new(&cfg.device, settings.fingerprint);
            let mut store = AvdCheckpoints::new(cfg.device.adb.clone());
            if let Some(serial) = serial {
                device = device.serial(serial.clone());
                store = store.serial(serial);
            }

            let oracle = ChatClient::new(cfg.oracle.clone());
            if !skip_health_check && !check_health(&cfg.oracle.endpoint, 5).unwrap_or(false) {
                warn!(endpoint = %cfg.oracle.endpoint, "oracle endpoint not responding");
            }

            let policy = CheckpointPolicy::default();
            if let Err(e) = start_app(&policy, &mut device, &mut store, &package, apk.as_deref()) {
                error!(error = %e, "could not start the app under test");
                events.append(Event::ExploreError {
                    reason: e.to_string(),
                })?;
                return Err(e.into());
            }
            thread::sleep(LAUNCH_SETTLE);

            let dir = session.dir.clone();
            let token_usage_path = session.token_usage_path();
            let goal = Goal::new(&package, goal.unwrap_or_default());

            let result = run_search(&mut device, &mut store, &oracle, session, events, goal, settings, issue);

            if let Err(e) = oracle.write_usage(&token_usage_path) {
                warn!(error = %e, "could not write token usage");
            }
            if let Err(e) = policy.collect_garbage(&mut store, &[]) {
                warn!(error = %e, "final checkpoint cleanup failed");
            }

            match result? {
                Outcome::Success { kind, artifacts } => {
                    println!("Bug reproduced ({:?})", kind);
                    for artifact in &artifacts {
                        println!("  {}", artifact.display());
                    }
                }
                Outcome::Failure { reason } => {
                    println!("Bug not reproduced: {}", reason);
                }
            }
            println!("\nSession: {}", dir.display());
        }

        Some(Commands::Events {
            dir,
            start,
            end,
            join,
        }) => {
            let (ts, state) = events::read_state(&dir)?;
            eprintln!("state: {} (at {})", state, ts);
            for record in events::read_range(&dir, start, end, join)? {
                println!("{}", serde_json::to_string(&record)?);
            }
        }

        Some(Commands::Checkpoints { serial, action }) => {
            init_tracing(None)?;
            let mut store = AvdCheckpoints::new(config::get().device.adb.clone());
            if let Some(serial) = serial {
                store = store.serial(serial);
            }
            match action {
                CheckpointCommand::List => {
                    for key in store.list()? {
                        println!("{}", key);
                    }
                }
                CheckpointCommand::Clean { keep } => {
                    let keep: Vec<&str> = keep.iter().map(String::as_str).collect();
                    let deleted = CheckpointPolicy::default().collect_garbage(&mut store, &keep)?;
                    println!("Deleted {} checkpoints", deleted);
                }
                CheckpointCommand::Status => {
                    println!("{}", store.status()?);
                }
            }
        }

        None => {
            println!("Repro Explorer - reproduce Android app bugs by guided UI exploration");
            println!();
            println!("Usage: repro-explorer <COMMAND>");
            println!();
            println!("Commands:");
            println!("  explore      Explore an app until the described bug is reproduced");
            println!("  events       Print event log records of a run directory");
            println!("  checkpoints  Inspect or clean up emulator checkpoints");
            println!();
            println!("Run with --help for more information.");
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_search(
    device: &mut dyn Device,
    store: &mut dyn CheckpointStore,
    oracle: &ChatClient,
    session: Session,
    events: EventLog,
    goal: Goal,
    settings: ExploreSettings,
    issue: Option<IssueReport>,
) -> Result<Outcome, Box<dyn Error>> {
    let mut search = SearchSession::new(device, store, oracle, session, events, goal, settings)?;
    if let Some(issue) = issue {
        search = search.issue(issue);
    }
    Ok(search.run()?)
}

/// Bring the device to the `empty` baseline, creating it on first use, then
/// launch the app under test
fn start_app(
    policy: &CheckpointPolicy,
    device: &mut AdbDevice,
    store: &mut AvdCheckpoints,
    package: &str,
    apk: Option<&Path>,
) -> Result<(), Box<dyn Error>> {
    let baseline = policy.ensure_baseline(store, || prepare_app(device, package, apk))?;
    if baseline == Baseline::Loaded {
        prepare_app(device, package, apk)?;
    }
    device.launch_app(package)?;
    Ok(())
}

/// Install (optionally) and wipe the app under test
fn prepare_app(device: &mut AdbDevice, package: &str, apk: Option<&Path>) -> DeviceResult<()> {
    if let Some(apk) = apk {
        device.install(apk)?;
    }
    device.clear_app(package)
}

fn read_issue(path: &Path) -> Result<IssueReport, Box<dyn Error>> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Log to stderr, and to `log_file` without colors when given
fn init_tracing(log_file: Option<&Path>) -> Result<(), Box<dyn Error>> {
    let file_layer = match log_file {
        Some(path) => Some(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(File::create(path)?)),
        ),
        None => None,
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()?;
    Ok(())
}
