use serde_derive::{Deserialize, Serialize};

/// The discriminant used to group heterogeneous jobs in the `JobRegistry`.
///
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub enum JobKind {
    /// A user-facing generation request.
    Generate,

    /// Construction of an expensive resource (a pipeline handle) owned by the `ResourceCache`.
    LoadResource,

    /// A sampling run against the accelerator.
    Sample,

    /// A scheduling run over a composite rule's sub-graph.
    Build,

    /// A leaf rule's own work.
    Task,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobKind::Generate => "generate",
            JobKind::LoadResource => "load",
            JobKind::Sample => "sample",
            JobKind::Build => "build",
            JobKind::Task => "task",
        };
        f.write_str(name)
    }
}
