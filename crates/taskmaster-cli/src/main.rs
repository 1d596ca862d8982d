mod cmd;
mod output;
mod root;
mod shell;

use clap::{Parser, Subcommand};
use cmd::{autoloop::LoopSubcommand, config::ConfigSubcommand, GateArg, StrategyArg};
use std::path::PathBuf;
use taskmaster_core::task::QualityGate;
use taskmaster_core::TaskError;

#[derive(Parser)]
#[command(
    name = "taskmaster",
    about = "Task dependency graph and phase-gated scheduler",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .taskmaster/ or .git/)
    #[arg(long, global = true, env = "TASKMASTER_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Task set slug (default: the only set, when exactly one exists)
    #[arg(long, global = true, short = 's')]
    set: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize .taskmaster/ in the current project
    Init,

    /// Add tasks from a JSON file, validate the graph and run the complexity gate
    CreateTasks {
        /// JSON list of tasks, or {"title", "description", "tasks": [...]}
        #[arg(long, short = 'f')]
        file: PathBuf,
        /// Title for a new set; its slug is derived from the title
        #[arg(long)]
        title: Option<String>,
    },

    /// Show the next task the scheduler would pick
    NextTask {
        #[arg(long, value_enum)]
        strategy: Option<StrategyArg>,
    },

    /// Move a task from pending to in-progress
    StartTask { id: String },

    /// Record quality checks and complete a task
    CompleteTask {
        id: String,
        #[arg(long, value_enum)]
        lint: Option<GateArg>,
        #[arg(long, value_enum)]
        typecheck: Option<GateArg>,
        #[arg(long, value_enum)]
        tests: Option<GateArg>,
    },

    /// Mark a task as blocked on something outside the graph
    HoldTask {
        id: String,
        #[arg(required = true)]
        reason: Vec<String>,
    },

    /// Return a blocked task to pending
    ReleaseTask { id: String },

    /// Cancel a pending or blocked task
    CancelTask { id: String },

    /// Tick a checklist item, numbered as show-task lists them
    CheckSubtask {
        id: String,
        #[arg(value_parser = clap::value_parser!(u32).range(1..))]
        item: u32,
        /// Clear the item instead
        #[arg(long)]
        undo: bool,
    },

    /// Move past a completed phase
    ConfirmPhase,

    /// Show dependency levels, the critical path and parallel tracks
    ShowGraph,

    /// Check the graph and persist inverse-edge repairs
    ValidateGraph {
        /// Drop back-edges until the graph is acyclic
        #[arg(long)]
        fix_cycles: bool,
    },

    /// Split a pending task into two children
    SplitTask { id: String },

    /// Rescore a task, or set its complexity by hand
    ScoreTask {
        id: String,
        #[arg(value_parser = clap::value_parser!(u8).range(1..=10))]
        complexity: Option<u8>,
    },

    /// Run the configured quality-gate commands for an in-progress task
    RunGates { id: String },

    /// List tasks in a set
    ListTasks,

    /// Show one task in full
    ShowTask { id: String },

    /// List task sets
    Sets {
        /// Rebuild index.json from the state files first
        #[arg(long)]
        rebuild: bool,
    },

    /// Manage the auto-loop
    Loop {
        #[command(subcommand)]
        subcommand: LoopSubcommand,
    },

    /// Cancel the active auto-loop; task state is left untouched
    CancelLoop,

    /// Inspect and validate .taskmaster/config.yaml
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Loop {
            subcommand: LoopSubcommand::Run,
        } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());
    let set = cli.set.as_deref();
    let json = cli.json;

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root),
        Commands::CreateTasks { file, title } => {
            cmd::tasks::create(&root, set, &file, title.as_deref(), json)
        }
        Commands::NextTask { strategy } => {
            cmd::next::run(&root, set, strategy.map(Into::into), json)
        }
        Commands::StartTask { id } => cmd::tasks::start(&root, set, &id, json),
        Commands::CompleteTask {
            id,
            lint,
            typecheck,
            tests,
        } => {
            let gate = QualityGate {
                lint: lint.map(Into::into),
                typecheck: typecheck.map(Into::into),
                tests: tests.map(Into::into),
            };
            cmd::tasks::complete(&root, set, &id, gate, json)
        }
        Commands::HoldTask { id, reason } => {
            cmd::tasks::hold(&root, set, &id, &reason.join(" "), json)
        }
        Commands::ReleaseTask { id } => cmd::tasks::release(&root, set, &id, json),
        Commands::CancelTask { id } => cmd::tasks::cancel(&root, set, &id, json),
        Commands::CheckSubtask { id, item, undo } => {
            cmd::tasks::check_subtask(&root, set, &id, item, !undo, json)
        }
        Commands::ConfirmPhase => cmd::tasks::confirm_phase(&root, set, json),
        Commands::ShowGraph => cmd::graph::show(&root, set, json),
        Commands::ValidateGraph { fix_cycles } => {
            cmd::graph::validate(&root, set, fix_cycles, json)
        }
        Commands::SplitTask { id } => cmd::tasks::split(&root, set, &id, json),
        Commands::ScoreTask { id, complexity } => {
            cmd::tasks::score(&root, set, &id, complexity, json)
        }
        Commands::RunGates { id } => cmd::gates::run(&root, set, &id, json),
        Commands::ListTasks => cmd::tasks::list(&root, set, json),
        Commands::ShowTask { id } => cmd::tasks::show(&root, set, &id, json),
        Commands::Sets { rebuild } => cmd::sets::run(&root, rebuild, json),
        Commands::Loop { subcommand } => cmd::autoloop::run(&root, set, subcommand, json),
        Commands::CancelLoop => cmd::autoloop::cancel(&root, set, json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(exit_code(&e));
    }
}

/// Exit code of the first `TaskError` in the chain, else 1.
fn exit_code(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<TaskError>())
        .map(|e| e.kind().exit_code())
        .unwrap_or(1)
}
