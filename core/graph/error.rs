use thiserror::*;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Rule {rule} is declared more than once")]
    DuplicateRule { rule: String },

    #[error("Rule {rule} depends on {dependency}, which is not part of its graph")]
    UnknownDependency { rule: String, dependency: String },

    #[error("The dependency of {rule} on {dependency} closes a cycle")]
    DependencyCycle { rule: String, dependency: String },

    #[error("No rule can be built, but {} remain: {}", .remaining.len(), .remaining.join(", "))]
    Stalled { remaining: Vec<String> },
}
