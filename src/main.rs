use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use stagehand::config::{self, DEFAULT_DEFINITION_FILE};
use stagehand::{
    ConsoleSink, Engine, FsmService, ShellExecutor, WorkflowInstance, WorkflowStore,
    DEFAULT_STORE_DIR, ORIGIN_STATE,
};

#[derive(Parser)]
#[command(name = "stagehand")]
#[command(about = "State-machine driven workflow automation for your shell")]
#[command(long_about = "Stagehand runs workflows declared in a YAML definition file. Each workflow \
                       is governed by a state machine of stages; each stage runs shell conditions \
                       and actions with variable substitution. Running instances are persisted so \
                       a failed stage can be resumed from its checkpoint.")]
struct Cli {
    /// Workflow definition file
    #[arg(long, global = true, default_value = DEFAULT_DEFINITION_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Advance a workflow instance by one stage
    Run {
        /// Workflow name, as declared in the definition file
        workflow: String,
        /// Target stage id
        stage: String,
        /// Positional values for the stage's declared arguments
        args: Vec<String>,
        /// Resume an existing instance by id prefix instead of starting a new one
        #[arg(long, help = "Id prefix of the instance to resume")]
        instance: Option<String>,
    },
    /// Cancel a workflow instance without running any stage
    Cancel {
        /// Workflow name the instance belongs to
        workflow: String,
        /// Exact instance id
        id: String,
    },
    /// List persisted workflow instances
    List {
        /// Restrict to one workflow name
        workflow: Option<String>,
        /// Only show active instances
        #[arg(long)]
        active: bool,
        /// Maximum number of instances to return (0 = unlimited)
        #[arg(long, default_value_t = 0)]
        limit: usize,
    },
    /// Show one workflow instance and its execution history
    Show {
        /// Workflow name the instance belongs to
        workflow: String,
        /// Id prefix of the instance
        prefix: String,
    },
    /// Load and validate the workflow definition file
    Validate,
    /// Erase every persisted workflow instance
    Drop,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    stagehand::init_telemetry()?;

    tokio::runtime::Runtime::new()?.block_on(async {
        match cli.command {
            Commands::Run {
                workflow,
                stage,
                args,
                instance,
            } => run_command(&cli.config, instance.as_deref(), &args, &workflow, &stage).await,
            Commands::Cancel { workflow, id } => cancel_command(&workflow, &id),
            Commands::List {
                workflow,
                active,
                limit,
            } => list_command(workflow.as_deref(), limit, active),
            Commands::Show { workflow, prefix } => show_command(&cli.config, &workflow, &prefix),
            Commands::Validate => validate_command(&cli.config),
            Commands::Drop => drop_command(),
        }
    })
}

async fn run_command(
    config_path: &Path,
    instance: Option<&str>,
    args: &[String],
    workflow: &str,
    stage: &str,
) -> Result<()> {
    let definition = config::load(config_path)?;
    let store = open_store()?;
    let engine = Engine::new(&store);
    let mut executor = ShellExecutor::new();
    let mut sink = ConsoleSink;
    engine
        .run(instance, args, workflow, stage, &definition, &mut executor, &mut sink)
        .await?;
    Ok(())
}

fn cancel_command(workflow: &str, id: &str) -> Result<()> {
    let store = open_store()?;
    let engine = Engine::new(&store);
    let mut sink = ConsoleSink;
    engine.cancel(id, workflow, &mut sink)?;
    Ok(())
}

fn list_command(workflow: Option<&str>, limit: usize, active_only: bool) -> Result<()> {
    let store = open_store()?;
    let instances = match workflow {
        Some(name) => store.list(name, limit, active_only)?,
        None => {
            if limit > 0 {
                bail!("--limit requires a workflow name");
            }
            store.list_all(active_only)?
        }
    };
    if instances.is_empty() {
        println!("No workflow instances found");
        return Ok(());
    }
    for instance in instances {
        print_summary(&instance);
    }
    Ok(())
}

fn show_command(config_path: &Path, workflow: &str, prefix: &str) -> Result<()> {
    let definition = config::load(config_path)?;
    let store = open_store()?;
    let instance = store
        .get_by_prefix(workflow, prefix)?
        .with_context(|| format!("no instance of workflow '{workflow}' matches '{prefix}'"))?;
    print_summary(&instance);
    if let Some(spec) = definition.workflow(workflow) {
        let fsm = FsmService::new(&definition.state_machines)?;
        let position = instance
            .latest_execution()
            .map(|execution| execution.target_stage.clone())
            .unwrap_or_else(|| ORIGIN_STATE.to_string());
        let next = fsm.available_states(&spec.state_machine, &position)?;
        if !next.is_empty() {
            println!("  next stages: {}", next.join(", "));
        }
    }
    for execution in &instance.executions {
        let status = if execution.failed {
            format!("failed at action {}", execution.checkpoint)
        } else if execution.metadata.finished_at.is_some() {
            "finished".to_string()
        } else {
            "in flight".to_string()
        };
        println!(
            "  {} -> {}  [{}]  args: {:?}",
            execution.from_stage, execution.target_stage, status, execution.args
        );
    }
    Ok(())
}

fn validate_command(config_path: &Path) -> Result<()> {
    let definition = config::load(config_path)?;
    println!(
        "Definition OK: {} workflow(s), {} state machine(s)",
        definition.workflows.len(),
        definition.state_machines.len()
    );
    Ok(())
}

fn drop_command() -> Result<()> {
    let store = open_store()?;
    store.drop_all()?;
    println!("All workflow instances erased");
    Ok(())
}

fn open_store() -> Result<WorkflowStore> {
    WorkflowStore::open(DEFAULT_STORE_DIR).context("could not open the workflow store")
}

fn print_summary(instance: &WorkflowInstance) {
    let status = if instance.is_active { "active" } else { "inactive" };
    let position = instance
        .latest_execution()
        .map(|execution| execution.target_stage.as_str())
        .unwrap_or("-");
    println!(
        "{}  {}  {}  stage: {}  [{}]",
        instance.short_prefix, instance.id, instance.workflow_name, position, status
    );
}
