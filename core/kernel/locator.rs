use crate::job::JobError;
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tracing::*;

/// Finds where the resource for a key lives.
#[async_trait]
pub trait Locator: Send + Sync + 'static {
    async fn locate(&self, key: &str) -> Result<PathBuf, JobError>;
}

/// Resolves keys to entries (files or directories) directly under a root directory.
#[derive(Debug, Clone)]
pub struct DirLocator {
    root: PathBuf,
}

impl DirLocator {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl Locator for DirLocator {
    async fn locate(&self, key: &str) -> Result<PathBuf, JobError> {
        let not_found = || JobError::NotFound {
            key: key.to_string(),
        };

        let mut components = Path::new(key).components();
        let is_plain_name = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if !is_plain_name {
            debug!("Refusing to locate {:?} outside of {:?}", key, self.root);
            return Err(not_found());
        }

        let path = self.root.join(key);
        match tokio::fs::metadata(&path).await {
            Ok(_) => Ok(path),
            Err(err) => {
                debug!("Could not locate {} at {:?}: {}", key, path, err);
                Err(not_found())
            }
        }
    }
}
