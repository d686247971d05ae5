//! Hierarchical task decomposition.
//!
//! A task whose complexity score exceeds the configured threshold is broken
//! into phase subtasks picked by keyword pattern, or into a generic linear
//! split when no pattern matches. Subtasks are then layered into stages with
//! Kahn's algorithm so that each stage only depends on earlier ones.

use crate::config::DecomposerConfig;
use cohort_core::{AgentType, CohortError, CohortResult, Task, TaskId, TaskPriority};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// How phases of a pattern depend on each other.
#[derive(Debug, Clone, Copy)]
enum Shape {
    /// Each phase depends on the previous one.
    Linear,
    /// Phases up to `n` form a chain; every later phase depends on phase `n`.
    FanOutAfter(usize),
}

struct PhasePattern {
    name: &'static str,
    keywords: &'static [&'static str],
    phases: &'static [&'static str],
    shape: Shape,
}

/// Checked in order; the first pattern with a keyword hit wins.
const PATTERNS: &[PhasePattern] = &[
    PhasePattern {
        name: "api",
        keywords: &["api"],
        phases: &["design", "implement", "test", "document"],
        shape: Shape::FanOutAfter(1),
    },
    PhasePattern {
        name: "database",
        keywords: &["database", "schema", "migration"],
        phases: &[
            "schema design",
            "migration",
            "data access layer",
            "verification",
        ],
        shape: Shape::Linear,
    },
    PhasePattern {
        name: "interface",
        keywords: &["ui", "frontend", "interface"],
        phases: &[
            "wireframes",
            "components",
            "integration",
            "usability testing",
        ],
        shape: Shape::Linear,
    },
    PhasePattern {
        name: "system",
        keywords: &["system", "architecture"],
        phases: &[
            "requirements analysis",
            "architecture design",
            "implementation",
            "integration",
            "system testing",
        ],
        shape: Shape::Linear,
    },
];

/// Agent type a phase is routed to.
fn phase_agent_type(phase: &str) -> AgentType {
    let phase = phase.to_lowercase();
    if phase.contains("test") || phase.contains("verification") {
        AgentType::Testing
    } else if phase.contains("design") || phase.contains("wireframe") {
        AgentType::Design
    } else if phase.contains("document") {
        AgentType::Documentation
    } else if phase.contains("analysis") {
        AgentType::Analysis
    } else {
        AgentType::Programming
    }
}

fn priority_weight(priority: TaskPriority) -> u32 {
    match priority {
        TaskPriority::Critical => 20,
        TaskPriority::High => 15,
        TaskPriority::Medium => 10,
        TaskPriority::Low => 5,
        TaskPriority::Background => 0,
    }
}

fn length_weight(description: &str) -> u32 {
    match description.chars().count() {
        n if n < 50 => 5,
        n if n < 150 => 15,
        n if n < 400 => 25,
        _ => 35,
    }
}

/// Layered execution order for a set of subtasks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Each stage only depends on tasks in earlier stages.
    pub stages: Vec<Vec<TaskId>>,
    /// True when a dependency cycle forced the remaining tasks into one final
    /// stage. That stage carries no ordering guarantee.
    pub cycle_broken: bool,
}

impl ExecutionPlan {
    /// Layer `order` by the intra-set dependencies in `dependencies`.
    ///
    /// Dependencies on ids outside `order` count as satisfied. If at some
    /// point nothing is ready but tasks remain, the rest is dumped into one
    /// last stage and `cycle_broken` is set. This is a deadlock-avoidance
    /// heuristic, not a topological guarantee.
    pub fn build(order: &[TaskId], dependencies: &BTreeMap<TaskId, Vec<TaskId>>) -> Self {
        let members: HashSet<TaskId> = order.iter().copied().collect();
        let mut placed: HashSet<TaskId> = HashSet::new();
        let mut remaining: Vec<TaskId> = order.to_vec();
        let mut plan = ExecutionPlan::default();

        while !remaining.is_empty() {
            let (ready, blocked): (Vec<TaskId>, Vec<TaskId>) =
                remaining.into_iter().partition(|id| {
                    dependencies.get(id).map_or(true, |deps| {
                        deps.iter()
                            .all(|d| !members.contains(d) || placed.contains(d))
                    })
                });

            if ready.is_empty() {
                plan.stages.push(blocked);
                plan.cycle_broken = true;
                break;
            }
            placed.extend(ready.iter().copied());
            plan.stages.push(ready);
            remaining = blocked;
        }
        plan
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Index of the stage holding `id`.
    pub fn stage_of(&self, id: TaskId) -> Option<usize> {
        self.stages.iter().position(|stage| stage.contains(&id))
    }

    /// Every task id across all stages.
    pub fn task_ids(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.stages.iter().flatten().copied()
    }
}

/// Which rule produced a decomposition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "name")]
pub enum DecompositionKind {
    /// Below threshold: the task itself.
    Identity,
    /// Named phase pattern.
    Phased(String),
    /// N-way linear split.
    GenericSplit(usize),
    /// Caller-supplied subtasks.
    Custom,
}

impl std::fmt::Display for DecompositionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecompositionKind::Identity => write!(f, "identity"),
            DecompositionKind::Phased(name) => write!(f, "phased:{name}"),
            DecompositionKind::GenericSplit(n) => write!(f, "split:{n}"),
            DecompositionKind::Custom => write!(f, "custom"),
        }
    }
}

/// A task broken into subtasks plus the order to run them in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDecomposition {
    pub original: Task,
    pub kind: DecompositionKind,
    pub complexity: u32,
    pub subtasks: Vec<Task>,
    /// Subtask id to the subtask ids it waits for.
    pub dependencies: BTreeMap<TaskId, Vec<TaskId>>,
    pub plan: ExecutionPlan,
}

impl TaskDecomposition {
    /// Build from explicit subtasks, taking each subtask's own dependency set
    /// restricted to the group.
    pub fn from_subtasks(
        original: Task,
        kind: DecompositionKind,
        complexity: u32,
        subtasks: Vec<Task>,
    ) -> Self {
        let members: HashSet<TaskId> = subtasks.iter().map(|t| t.id).collect();
        let dependencies: BTreeMap<TaskId, Vec<TaskId>> = subtasks
            .iter()
            .map(|t| {
                let deps = t
                    .dependencies()
                    .iter()
                    .copied()
                    .filter(|d| members.contains(d))
                    .collect();
                (t.id, deps)
            })
            .collect();
        let order: Vec<TaskId> = subtasks.iter().map(|t| t.id).collect();
        let plan = ExecutionPlan::build(&order, &dependencies);
        Self {
            original,
            kind,
            complexity,
            subtasks,
            dependencies,
            plan,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.kind == DecompositionKind::Identity
    }

    pub fn subtask(&self, id: TaskId) -> Option<&Task> {
        self.subtasks.iter().find(|t| t.id == id)
    }

    /// Subtasks of stage `index`, in stage order.
    pub fn stage_tasks(&self, index: usize) -> Vec<&Task> {
        self.plan
            .stages
            .get(index)
            .map(|ids| ids.iter().filter_map(|id| self.subtask(*id)).collect())
            .unwrap_or_default()
    }

    /// Short label used as a vote option.
    pub fn label(&self) -> String {
        format!(
            "{} ({} subtasks, {} stages)",
            self.kind,
            self.subtasks.len(),
            self.plan.len()
        )
    }
}

/// Scores tasks and splits complex ones into dependency-ordered subtasks.
#[derive(Debug, Clone)]
pub struct HierarchicalDecomposer {
    config: DecomposerConfig,
    keywords: Option<Regex>,
    word: Regex,
}

impl HierarchicalDecomposer {
    pub fn new(config: DecomposerConfig) -> CohortResult<Self> {
        let keywords = if config.complexity_keywords.is_empty() {
            None
        } else {
            let alternation = config
                .complexity_keywords
                .iter()
                .map(|k| regex::escape(k))
                .collect::<Vec<_>>()
                .join("|");
            Some(
                Regex::new(&format!(r"(?i)\b(?:{alternation})\b"))
                    .map_err(|e| CohortError::Decomposition(format!("Bad keyword list: {e}")))?,
            )
        };
        let word = Regex::new(r"[A-Za-z0-9]+")
            .map_err(|e| CohortError::Decomposition(e.to_string()))?;
        Ok(Self {
            config,
            keywords,
            word,
        })
    }

    pub fn config(&self) -> &DecomposerConfig {
        &self.config
    }

    /// Heuristic complexity in `0..=100`.
    pub fn complexity(&self, task: &Task) -> u32 {
        let text = format!("{} {}", task.title, task.description);
        let keyword_hits = self
            .keywords
            .as_ref()
            .map(|re| {
                re.find_iter(&text)
                    .map(|m| m.as_str().to_lowercase())
                    .collect::<HashSet<_>>()
                    .len() as u32
            })
            .unwrap_or(0);

        let score = length_weight(&task.description)
            + keyword_hits * 10
            + priority_weight(task.priority)
            + task.dependencies().len() as u32 * 5;
        score.min(100)
    }

    /// The preferred decomposition: a phase pattern if one matches, else the
    /// generic split, or the task itself when it is simple enough.
    pub fn decompose(&self, task: &Task) -> TaskDecomposition {
        let complexity = self.complexity(task);
        if complexity <= self.config.complexity_threshold {
            return self.identity(task, complexity);
        }
        match self.matching_pattern(task) {
            Some(pattern) => self.phased(task, complexity, pattern),
            None => self.generic_split(task, complexity),
        }
    }

    /// Every applicable decomposition, preferred first. Below threshold this
    /// is just the identity.
    pub fn propose_decompositions(&self, task: &Task) -> Vec<TaskDecomposition> {
        let complexity = self.complexity(task);
        if complexity <= self.config.complexity_threshold {
            return vec![self.identity(task, complexity)];
        }
        let mut proposals = Vec::with_capacity(2);
        if let Some(pattern) = self.matching_pattern(task) {
            proposals.push(self.phased(task, complexity, pattern));
        }
        proposals.push(self.generic_split(task, complexity));
        proposals
    }

    fn matching_pattern(&self, task: &Task) -> Option<&'static PhasePattern> {
        let text = format!("{} {}", task.title, task.description);
        let words: HashSet<String> = self
            .word
            .find_iter(&text)
            .map(|m| m.as_str().to_lowercase())
            .collect();
        PATTERNS
            .iter()
            .find(|p| p.keywords.iter().any(|k| words.contains(*k)))
    }

    fn identity(&self, task: &Task, complexity: u32) -> TaskDecomposition {
        TaskDecomposition::from_subtasks(
            task.clone(),
            DecompositionKind::Identity,
            complexity,
            vec![task.clone()],
        )
    }

    fn phased(&self, task: &Task, complexity: u32, pattern: &PhasePattern) -> TaskDecomposition {
        let mut subtasks: Vec<Task> = Vec::with_capacity(pattern.phases.len());
        for (i, phase) in pattern.phases.iter().enumerate() {
            let prerequisite = match pattern.shape {
                Shape::Linear => i.checked_sub(1),
                Shape::FanOutAfter(n) if i > n => Some(n),
                Shape::FanOutAfter(_) => i.checked_sub(1),
            };
            let sub = child(
                task,
                format!("{}: {}", capitalize(phase), task.title),
                format!("{} phase of: {}", capitalize(phase), task.description),
                Some(phase_agent_type(phase)),
                phase,
                i,
            );
            let sub = match prerequisite {
                Some(p) => sub.with_dependencies([subtasks[p].id]),
                None => sub.with_dependencies(task.dependencies().iter().copied()),
            };
            subtasks.push(sub);
        }
        TaskDecomposition::from_subtasks(
            task.clone(),
            DecompositionKind::Phased(pattern.name.to_string()),
            complexity,
            subtasks,
        )
    }

    fn generic_split(&self, task: &Task, complexity: u32) -> TaskDecomposition {
        let parts = self.config.generic_split.max(1);
        let mut subtasks: Vec<Task> = Vec::with_capacity(parts);
        for i in 0..parts {
            let sub = child(
                task,
                format!("Part {}/{}: {}", i + 1, parts, task.title),
                format!("Part {} of {}: {}", i + 1, parts, task.description),
                task.required_type,
                "part",
                i,
            );
            let sub = match subtasks.last() {
                Some(prev) => sub.with_dependencies([prev.id]),
                None => sub.with_dependencies(task.dependencies().iter().copied()),
            };
            subtasks.push(sub);
        }
        TaskDecomposition::from_subtasks(
            task.clone(),
            DecompositionKind::GenericSplit(parts),
            complexity,
            subtasks,
        )
    }
}

/// A subtask inheriting priority, retries and requirements from `parent`.
fn child(
    parent: &Task,
    title: String,
    description: String,
    agent_type: Option<AgentType>,
    phase: &str,
    index: usize,
) -> Task {
    let mut sub = Task::new(title, description)
        .with_priority(parent.priority)
        .with_max_retries(parent.max_retries)
        .with_parent(parent.id)
        .with_tag(format!("phase:{phase}"));
    sub.required_type = agent_type;
    sub.required_capabilities = parent.required_capabilities.clone();
    sub.deadline = parent.deadline;
    sub.input = parent.input.clone();
    sub.metadata
        .insert("phase_index".to_string(), serde_json::json!(index));
    sub
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
