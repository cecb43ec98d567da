use crate::simulator::SimulatedTask;
use kiln_core::{BuildGraph, CompositeRule, GraphError, LeafRule, Rule};
use serde_derive::Deserialize;
use std::path::Path;
use std::time::Duration;

/// A build graph described in JSON:
///
/// ```json
/// {
///   "name": "pipeline",
///   "rules": [
///     { "name": "tokenizer", "steps": 2 },
///     { "name": "unet", "deps": ["tokenizer"], "exclusive": true },
///     { "name": "decoder", "deps": ["unet"], "rules": [ { "name": "vae" } ] }
///   ]
/// }
/// ```
///
/// Rules with nested `rules` are composites, everything else is a simulated leaf task.
///
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GraphFile {
    #[serde(default = "default_name")]
    pub name: String,
    pub rules: Vec<RuleSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSpec {
    pub name: String,
    #[serde(default)]
    pub deps: Vec<String>,
    #[serde(default = "default_steps")]
    pub steps: u32,
    #[serde(default = "default_step_ms")]
    pub step_ms: u64,
    #[serde(default)]
    pub fail: bool,
    #[serde(default)]
    pub exclusive: bool,
    #[serde(default)]
    pub rules: Option<Vec<RuleSpec>>,
}

fn default_name() -> String {
    "build".to_string()
}

fn default_steps() -> u32 {
    1
}

fn default_step_ms() -> u64 {
    10
}

impl GraphFile {
    pub async fn read(path: &Path) -> Result<Self, anyhow::Error> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|err| anyhow::anyhow!("Could not read {}: {}", path.display(), err))?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// The whole file as a single composite rule.
    pub fn into_rule(self) -> Result<Rule, GraphError> {
        let graph = into_graph(self.rules)?;
        Ok(CompositeRule::new(self.name, graph).into())
    }
}

fn into_graph(specs: Vec<RuleSpec>) -> Result<BuildGraph, GraphError> {
    let rules = specs
        .into_iter()
        .map(RuleSpec::into_rule)
        .collect::<Result<Vec<Rule>, GraphError>>()?;
    BuildGraph::new(rules)
}

impl RuleSpec {
    pub fn into_rule(self) -> Result<Rule, GraphError> {
        let rule = match self.rules {
            Some(rules) => CompositeRule::new(self.name, into_graph(rules)?)
                .depends_on(self.deps)
                .into(),
            None => {
                let task = SimulatedTask {
                    steps: self.steps,
                    step_delay: Duration::from_millis(self.step_ms),
                    fail: self.fail,
                };
                LeafRule::new(self.name, task)
                    .depends_on(self.deps)
                    .exclusive(self.exclusive)
                    .into()
            }
        };
        Ok(rule)
    }
}
