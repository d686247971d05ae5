mod config;
mod simulated;

use clap::{Parser, Subcommand};
use cohort_consensus::{DecisionType, DemocraticVoting, Proposal, Voter};
use cohort_core::{AgentType, Task, TaskPriority, TaskStatus};
use cohort_crew::Crew;
use cohort_orchestrator::{HierarchicalDecomposer, Orchestrator};
use config::CohortConfig;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cohort", about = "Cohort: task scheduling and collective decisions for agent teams")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "cohort.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an autonomous crew on a goal and print the result as JSON
    Run {
        /// Goal title
        goal: String,
        /// Longer goal description
        #[arg(short, long, default_value = "")]
        description: String,
        #[arg(short, long, default_value = "medium")]
        priority: TaskPriority,
    },
    /// Show how a goal would be decomposed
    Decompose {
        goal: String,
        #[arg(short, long, default_value = "")]
        description: String,
        #[arg(short, long, default_value = "medium")]
        priority: TaskPriority,
    },
    /// Hold a democratic vote among the configured agents
    Vote {
        #[arg(short, long)]
        question: String,
        /// An option, optionally aimed at an agent type: `name` or `name:type`
        #[arg(short, long = "option", required = true)]
        options: Vec<String>,
    },
    /// Run the orchestrator loops over demo tasks until they finish
    Serve {
        /// Number of demo tasks to submit
        #[arg(short, long, default_value_t = 10)]
        tasks: usize,
        /// Give up waiting after this many seconds
        #[arg(long, default_value_t = 60)]
        timeout_secs: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = CohortConfig::load(&cli.config).await?;

    match cli.command {
        Commands::Run {
            goal,
            description,
            priority,
        } => {
            let goal = Task::new(goal, description).with_priority(priority);
            let decomposer = HierarchicalDecomposer::new(config.decomposer.clone())?;
            let mut crew = Crew::new(config.crew.clone(), decomposer);
            for agent in simulated::build_agents(&config.roster()) {
                crew.summon_agent(agent);
            }
            let result = crew.run(goal).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Decompose {
            goal,
            description,
            priority,
        } => {
            let goal = Task::new(goal, description).with_priority(priority);
            let decomposer = HierarchicalDecomposer::new(config.decomposer.clone())?;
            let decomposition = decomposer.decompose(&goal);
            let stages: Vec<Vec<&str>> = (0..decomposition.plan.len())
                .map(|i| {
                    decomposition
                        .stage_tasks(i)
                        .into_iter()
                        .map(|t| t.title.as_str())
                        .collect()
                })
                .collect();
            let subtasks: Vec<serde_json::Value> = decomposition
                .subtasks
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "id": t.id,
                        "title": t.title,
                        "required_type": t.required_type,
                        "dependencies": t.dependencies(),
                    })
                })
                .collect();
            let report = serde_json::json!({
                "goal": goal.title,
                "complexity": decomposition.complexity,
                "decomposition": decomposition.label(),
                "cycle_broken": decomposition.plan.cycle_broken,
                "stages": stages,
                "subtasks": subtasks,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Vote { question, options } => {
            let proposals: Vec<Proposal> = options.iter().map(|o| parse_option(o)).collect();
            let agents = simulated::build_agents(&config.roster());
            let voters: Vec<Voter> = agents.iter().map(|a| Voter::from(a.as_ref())).collect();
            let voting = DemocraticVoting::new(config.consensus.clone());
            let decision = voting.conduct(DecisionType::General, question, &proposals, &voters);
            println!("{}", serde_json::to_string_pretty(&decision)?);
        }
        Commands::Serve {
            tasks,
            timeout_secs,
        } => {
            let orchestrator = Orchestrator::new(config.orchestrator.clone());
            for agent in simulated::build_agents(&config.roster()) {
                orchestrator.register_agent(agent).await;
            }

            let runner = orchestrator.clone();
            let loops = tokio::spawn(async move { runner.run().await });

            for task in demo_tasks(tasks) {
                orchestrator.submit_task(task).await?;
            }
            info!(tasks, "Demo tasks submitted");

            let deadline = Instant::now() + Duration::from_secs(timeout_secs);
            let poll = config.orchestrator.distribution_interval();
            loop {
                let status = orchestrator.get_status().await;
                let settled =
                    status.tasks.completed + status.tasks.failed + status.tasks.cancelled;
                if status.is_idle() && settled >= tasks {
                    break;
                }
                if Instant::now() >= deadline {
                    warn!(timeout_secs, settled, "Timed out waiting for demo tasks");
                    break;
                }
                tokio::time::sleep(poll).await;
            }

            orchestrator.stop();
            loops.await??;
            let status = orchestrator.get_status().await;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}

/// `name` or `name:agent_type`; an unknown type keeps the whole string as
/// the name.
fn parse_option(raw: &str) -> Proposal {
    match raw.split_once(':') {
        Some((name, kind)) => match kind.parse::<AgentType>() {
            Ok(kind) => Proposal::new(name, 1.0).with_kind(kind),
            Err(_) => Proposal::new(raw, 1.0),
        },
        None => Proposal::new(raw, 1.0),
    }
}

/// A mix of priorities and specialisations for `serve`.
fn demo_tasks(count: usize) -> Vec<Task> {
    const KINDS: [(AgentType, &str); 5] = [
        (AgentType::Programming, "Implement feature"),
        (AgentType::Testing, "Write regression tests"),
        (AgentType::Documentation, "Update changelog"),
        (AgentType::Design, "Sketch settings page"),
        (AgentType::Analysis, "Profile hot path"),
    ];
    const PRIORITIES: [TaskPriority; 4] = [
        TaskPriority::High,
        TaskPriority::Medium,
        TaskPriority::Critical,
        TaskPriority::Low,
    ];
    (0..count)
        .map(|i| {
            let (kind, title) = KINDS[i % KINDS.len()];
            Task::new(format!("{title} #{}", i + 1), "demo task")
                .with_priority(PRIORITIES[i % PRIORITIES.len()])
                .with_required_type(kind)
        })
        .collect()
}
