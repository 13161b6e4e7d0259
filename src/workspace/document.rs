//! Artifact types.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ArtifactError;

/// Kind of generated file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Implementation code (`code_<ts>.py`).
    Code,
    /// Test suite (`test_<ts>.py`).
    Test,
}

impl ArtifactKind {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Code => "code",
            ArtifactKind::Test => "test",
        }
    }

    /// File name prefix, including the separator.
    pub fn prefix(&self) -> &'static str {
        match self {
            ArtifactKind::Code => "code_",
            ArtifactKind::Test => "test_",
        }
    }

    /// Classify an artifact by file name.
    pub fn of_name(name: &str) -> Option<Self> {
        if !name.ends_with(".py") {
            return None;
        }
        [ArtifactKind::Code, ArtifactKind::Test]
            .into_iter()
            .find(|kind| name.starts_with(kind.prefix()))
    }
}

impl TryFrom<&str> for ArtifactKind {
    type Error = ArtifactError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "code" => Ok(ArtifactKind::Code),
            "test" => Ok(ArtifactKind::Test),
            _ => Err(ArtifactError::InvalidName {
                name: s.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A persisted artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub kind: ArtifactKind,
    /// File name within the store.
    pub name: String,
    /// Full path on disk.
    pub path: PathBuf,
}

/// Sort key that orders `code_<ts>.py` before `code_<ts>_1.py` before `code_<ts>_10.py`.
pub(crate) fn name_order_key(name: &str) -> (String, u32) {
    let stem = name.strip_suffix(".py").unwrap_or(name);
    if let Some((base, suffix)) = stem.rsplit_once('_')
        && base.matches('_').count() >= 2
        && let Ok(n) = suffix.parse::<u32>()
    {
        return (base.to_string(), n);
    }
    (stem.to_string(), 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parse() {
        assert_eq!(ArtifactKind::try_from("code").unwrap(), ArtifactKind::Code);
        assert_eq!(ArtifactKind::try_from("test").unwrap(), ArtifactKind::Test);
        assert!(ArtifactKind::try_from("notes").is_err());
    }

    #[test]
    fn test_of_name() {
        assert_eq!(
            ArtifactKind::of_name("code_20250101_120000.py"),
            Some(ArtifactKind::Code)
        );
        assert_eq!(
            ArtifactKind::of_name("test_20250101_120000_2.py"),
            Some(ArtifactKind::Test)
        );
        assert_eq!(ArtifactKind::of_name("code_20250101_120000.txt"), None);
        assert_eq!(ArtifactKind::of_name("readme.py"), None);
    }

    #[test]
    fn test_name_order_key() {
        assert_eq!(
            name_order_key("code_20250101_120000.py"),
            ("code_20250101_120000".to_string(), 0)
        );
        assert_eq!(
            name_order_key("code_20250101_120000_10.py"),
            ("code_20250101_120000".to_string(), 10)
        );
        assert!(name_order_key("code_20250101_120000_2.py") < name_order_key("code_20250101_120000_10.py"));
    }
}
