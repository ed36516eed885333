//! Antfarm CLI — the command surface over the coordination kernel.
//!
//! Every verb maps one-to-one onto a core operation; the CLI does no state
//! management of its own. Exit code 0 on success, non-zero on any failure,
//! with the error message on stderr.

mod commands;

use clap::{Parser, Subcommand};

/// Antfarm — multi-agent workflow orchestration
#[derive(Parser)]
#[command(name = "antfarm", version, about = "Antfarm — multi-agent workflow orchestration")]
pub struct Cli {
    /// Path to the SQLite database file (defaults to <root>/antfarm.db)
    #[arg(long, env = "ANTFARM_DB_PATH")]
    db: Option<String>,

    /// State root holding the database and agent workspaces
    #[arg(long, env = "ANTFARM_ROOT")]
    root: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install and launch workflows
    Workflow {
        #[command(subcommand)]
        action: WorkflowAction,
    },

    /// The agent-facing claim / complete / fail surface
    Step {
        #[command(subcommand)]
        action: StepAction,
    },

    /// Inspect and manage runs
    Run {
        #[command(subcommand)]
        action: RunAction,
    },

    /// Query the cron gateway
    Cron {
        #[command(subcommand)]
        action: CronAction,
    },
}

#[derive(Subcommand)]
enum WorkflowAction {
    /// Install a workflow from a manifest file
    Install {
        /// Path to the workflow manifest (YAML)
        manifest: String,
    },
    /// Replace an installed workflow's spec
    Update {
        /// Path to the workflow manifest (YAML)
        manifest: String,
    },
    /// Remove an installed workflow
    Uninstall {
        /// Workflow id
        id: String,
    },
    /// List installed workflows
    List,
    /// Show the runs of a workflow
    Status {
        /// Workflow id
        id: String,
    },
    /// Start a run of an installed workflow
    Run {
        /// Workflow id
        id: String,
        /// Task title for the run
        #[arg(long)]
        task: String,
    },
}

#[derive(Subcommand)]
enum StepAction {
    /// Claim the next ready step for an agent
    Claim {
        /// Agent id
        #[arg(long)]
        agent: String,
    },
    /// Report a step's output (reads stdin when --output is absent)
    Complete {
        /// Step instance id (from claim)
        #[arg(long)]
        step: String,
        /// The agent's output text
        #[arg(long)]
        output: Option<String>,
    },
    /// Report a step failure
    Fail {
        /// Step instance id (from claim)
        #[arg(long)]
        step: String,
        /// The error text
        #[arg(long)]
        error: String,
    },
    /// List the stories of a run
    Stories {
        /// Run id
        #[arg(long)]
        run: String,
    },
}

#[derive(Subcommand)]
enum RunAction {
    /// List runs across all workflows
    List,
    /// Show one run with its steps and stories
    Get {
        /// Run id
        id: String,
    },
    /// Cancel a run
    Cancel {
        /// Run id
        id: String,
    },
    /// Pause a running run
    Pause {
        /// Run id
        id: String,
    },
    /// Resume a paused or blocked run
    Resume {
        /// Run id
        id: String,
    },
}

#[derive(Subcommand)]
enum CronAction {
    /// List jobs registered at the cron gateway
    List,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "antfarm_core=warn,antfarm_cli=info".into()),
        )
        .init();

    let state = commands::init_state(cli.db.as_deref(), cli.root.as_deref());

    let result = match cli.command {
        Commands::Workflow { action } => match action {
            WorkflowAction::Install { manifest } => {
                commands::workflow::install(&state, &manifest).await
            }
            WorkflowAction::Update { manifest } => {
                commands::workflow::update(&state, &manifest).await
            }
            WorkflowAction::Uninstall { id } => commands::workflow::uninstall(&state, &id).await,
            WorkflowAction::List => commands::workflow::list(&state).await,
            WorkflowAction::Status { id } => commands::workflow::status(&state, &id).await,
            WorkflowAction::Run { id, task } => commands::workflow::run(&state, &id, &task).await,
        },

        Commands::Step { action } => match action {
            StepAction::Claim { agent } => commands::step::claim(&state, &agent).await,
            StepAction::Complete { step, output } => {
                commands::step::complete(&state, &step, output.as_deref()).await
            }
            StepAction::Fail { step, error } => commands::step::fail(&state, &step, &error).await,
            StepAction::Stories { run } => commands::step::stories(&state, &run).await,
        },

        Commands::Run { action } => match action {
            RunAction::List => commands::run::list(&state).await,
            RunAction::Get { id } => commands::run::get(&state, &id).await,
            RunAction::Cancel { id } => commands::run::cancel(&state, &id).await,
            RunAction::Pause { id } => commands::run::pause(&state, &id).await,
            RunAction::Resume { id } => commands::run::resume(&state, &id).await,
        },

        Commands::Cron { action } => match action {
            CronAction::List => commands::cron::list(&state).await,
        },
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
