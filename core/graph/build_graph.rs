use super::{GraphError, Rule};
use crate::sync::Arc;
use daggy::{Dag, NodeIndex};
use fxhash::{FxHashMap, FxHashSet};

/// A validated set of rules and the progress of a build over them.
///
/// Construction checks that names are unique, that every dependency names a sibling rule, and
/// that the dependencies form a DAG. Rules are kept in declaration order, which is also the order
/// in which `buildable_rules` returns them.
///
/// Cloning a graph is cheap, and every clone tracks its own progress: the scheduler clones the
/// graph of a composite rule for each run of it.
///
#[derive(Clone, Debug)]
pub struct BuildGraph {
    rules: Arc<Vec<Rule>>,
    remaining: FxHashSet<String>,
    started: FxHashSet<String>,
}

impl BuildGraph {
    pub fn new<I>(rules: I) -> Result<Self, GraphError>
    where
        I: IntoIterator,
        I::Item: Into<Rule>,
    {
        let rules: Vec<Rule> = rules.into_iter().map(Into::into).collect();

        let mut dag: Dag<&str, (), u32> = Dag::new();
        let mut nodes: FxHashMap<&str, NodeIndex> = FxHashMap::default();
        for rule in &rules {
            if nodes.contains_key(rule.name()) {
                return Err(GraphError::DuplicateRule {
                    rule: rule.name().to_string(),
                });
            }
            nodes.insert(rule.name(), dag.add_node(rule.name()));
        }

        for rule in &rules {
            let node_idx = nodes[rule.name()];
            for dep in rule.deps() {
                let dep_idx = nodes.get(dep.as_str()).copied().ok_or_else(|| {
                    GraphError::UnknownDependency {
                        rule: rule.name().to_string(),
                        dependency: dep.clone(),
                    }
                })?;
                dag.add_edge(dep_idx, node_idx, ())
                    .map_err(|_| GraphError::DependencyCycle {
                        rule: rule.name().to_string(),
                        dependency: dep.clone(),
                    })?;
            }
        }

        let remaining = rules.iter().map(|rule| rule.name().to_string()).collect();
        Ok(Self {
            rules: Arc::new(rules),
            remaining,
            started: FxHashSet::default(),
        })
    }

    /// The rules whose dependencies have all finished and that have not been started yet.
    pub fn buildable_rules(&self) -> Vec<&Rule> {
        self.rules
            .iter()
            .filter(|rule| {
                self.remaining.contains(rule.name())
                    && !self.started.contains(rule.name())
                    && rule.deps().iter().all(|dep| !self.remaining.contains(dep))
            })
            .collect()
    }

    pub fn will_start_building<S: AsRef<str>>(&mut self, rules: &[S]) {
        for rule in rules {
            self.started.insert(rule.as_ref().to_string());
        }
    }

    /// Mark `rule` as finished. Returns false if it was already finished (or is unknown), so
    /// that reporting the same completion twice is harmless.
    pub fn did_finish_building(&mut self, rule: &str) -> bool {
        self.remaining.remove(rule)
    }

    /// The rules that have not finished yet, in declaration order.
    pub fn remaining(&self) -> Vec<&str> {
        self.rules
            .iter()
            .map(Rule::name)
            .filter(|name| self.remaining.contains(*name))
            .collect()
    }

    pub fn is_done(&self) -> bool {
        self.remaining.is_empty()
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn get(&self, name: &str) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.name() == name)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
