//! Generated artifact store.
//!
//! A flat, append-only directory of Python files. Names carry a local
//! timestamp (`code_<YYYYMMDD_HHMMSS>.py`, `test_<YYYYMMDD_HHMMSS>.py`); two
//! writes in the same second get numeric suffixes (`code_<ts>_1.py`, ...).
//! Files are created with `create_new`, so a name is never reused.

mod document;

pub use document::{Artifact, ArtifactKind};

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Local;
use tokio::io::AsyncWriteExt;

use crate::error::ArtifactError;

/// Attempts at finding a free name before giving up.
const MAX_NAME_ATTEMPTS: u32 = 1000;

/// Directory-scoped store for generated code and tests.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Create a store rooted at `root`. The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Write `content` as a new artifact of `kind`.
    pub async fn persist(
        &self,
        kind: ArtifactKind,
        content: &str,
    ) -> Result<Artifact, ArtifactError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| io_error(&self.root, e))?;

        let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let name = if attempt == 0 {
                format!("{}{}.py", kind.prefix(), stamp)
            } else {
                format!("{}{}_{}.py", kind.prefix(), stamp, attempt)
            };
            let path = self.root.join(&name);

            let file = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;

            match file {
                Ok(mut file) => {
                    file.write_all(content.as_bytes())
                        .await
                        .map_err(|e| io_error(&path, e))?;
                    file.flush().await.map_err(|e| io_error(&path, e))?;

                    tracing::info!(artifact = %name, kind = %kind, bytes = content.len(), "Persisted artifact");
                    return Ok(Artifact { kind, name, path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(io_error(&path, e)),
            }
        }

        Err(ArtifactError::Io {
            path: self.root.clone(),
            reason: format!("no free artifact name for {}{}", kind.prefix(), stamp),
        })
    }

    /// Names of all artifacts, sorted.
    pub async fn list(&self) -> Result<Vec<String>, ArtifactError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&self.root, e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error(&self.root, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if ArtifactKind::of_name(&name).is_some() {
                names.push(name);
            }
        }

        names.sort_by_key(|name| document::name_order_key(name));
        Ok(names)
    }

    /// Read an artifact by name.
    pub async fn read(&self, name: &str) -> Result<String, ArtifactError> {
        validate_name(name)?;
        let path = self.root.join(name);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(ArtifactError::NotFound {
                name: name.to_string(),
            }),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    /// Newest artifact of `kind`, if any.
    pub async fn latest(&self, kind: ArtifactKind) -> Result<Option<Artifact>, ArtifactError> {
        let newest = self
            .list()
            .await?
            .into_iter()
            .filter(|name| ArtifactKind::of_name(name) == Some(kind))
            .max_by_key(|name| document::name_order_key(name));

        Ok(newest.map(|name| Artifact {
            kind,
            path: self.root.join(&name),
            name,
        }))
    }
}

fn validate_name(name: &str) -> Result<(), ArtifactError> {
    let invalid = name.is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name.contains("..")
        || ArtifactKind::of_name(name).is_none();
    if invalid {
        return Err(ArtifactError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(())
}

fn io_error(path: &Path, err: std::io::Error) -> ArtifactError {
    ArtifactError::Io {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}
