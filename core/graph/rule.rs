use super::BuildGraph;
use crate::job::Job;
use crate::model::JobId;
use crate::sync::Arc;

/// Something that knows how to create the job for a leaf rule.
///
/// Implementations should create the job with `Job::child` when a parent is given, so that the
/// scheduler can find it again, and must leave it `Pending`: the scheduler decides when it runs.
///
pub trait Taskable: Send + Sync {
    fn create_job(&self, rule: &str, parent: Option<JobId>) -> Job<()>;
}

/// A node in a dependency graph.
#[derive(Clone, Debug)]
pub enum Rule {
    Leaf(LeafRule),
    Composite(CompositeRule),
}

impl Rule {
    pub fn name(&self) -> &str {
        match self {
            Rule::Leaf(leaf) => &leaf.name,
            Rule::Composite(composite) => &composite.name,
        }
    }

    pub fn deps(&self) -> &[String] {
        match self {
            Rule::Leaf(leaf) => &leaf.deps,
            Rule::Composite(composite) => &composite.deps,
        }
    }
}

impl From<LeafRule> for Rule {
    fn from(leaf: LeafRule) -> Self {
        Rule::Leaf(leaf)
    }
}

impl From<CompositeRule> for Rule {
    fn from(composite: CompositeRule) -> Self {
        Rule::Composite(composite)
    }
}

#[derive(Clone)]
pub struct LeafRule {
    name: String,
    deps: Vec<String>,
    exclusive: bool,
    task: Arc<dyn Taskable>,
}

impl LeafRule {
    pub fn new<N, T>(name: N, task: T) -> Self
    where
        N: Into<String>,
        T: Taskable + 'static,
    {
        Self {
            name: name.into(),
            deps: vec![],
            exclusive: false,
            task: Arc::new(task),
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deps.extend(deps.into_iter().map(Into::into));
        self
    }

    /// Exclusive leaves run through the `SerialQueue` instead of being resumed right away.
    pub fn exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn deps(&self) -> &[String] {
        &self.deps
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    pub fn create_job(&self, parent: Option<JobId>) -> Job<()> {
        self.task.create_job(&self.name, parent)
    }
}

impl std::fmt::Debug for LeafRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeafRule")
            .field("name", &self.name)
            .field("deps", &self.deps)
            .field("exclusive", &self.exclusive)
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct CompositeRule {
    name: String,
    deps: Vec<String>,
    graph: BuildGraph,
}

impl CompositeRule {
    pub fn new<N: Into<String>>(name: N, graph: BuildGraph) -> Self {
        Self {
            name: name.into(),
            deps: vec![],
            graph,
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deps.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn deps(&self) -> &[String] {
        &self.deps
    }

    pub fn graph(&self) -> &BuildGraph {
        &self.graph
    }
}
