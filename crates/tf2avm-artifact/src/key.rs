//! Run and stage addressing
//!
//! A persisted artifact is addressed by `(run id, stage key)`. The stage
//! key carries a sequence number that is part of the on-disk contract
//! (`03_mappings`, `04_01_retry_mappings`, ...), so lexical order of the
//! file names is the order in which the stages ran.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Unique run identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunId(pub Ulid);

impl RunId {
    /// Generate a new run ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RunId {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s)
            .map(Self)
            .map_err(|_| KeyError::InvalidRunId(s.to_string()))
    }
}

/// How a stage artifact is laid out on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// JSON envelope around a structured payload
    Json,
    /// Markdown text
    Markdown,
    /// Directory owned by the stage (output trees, per-item artifacts)
    Directory,
}

impl ArtifactKind {
    fn extension(self) -> Option<&'static str> {
        match self {
            ArtifactKind::Json => Some("json"),
            ArtifactKind::Markdown => Some("md"),
            ArtifactKind::Directory => None,
        }
    }
}

/// Stage key: sequence + slug, optionally nested under a directory stage
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StageKey {
    sequence: String,
    slug: String,
    kind: ArtifactKind,
    parent: Option<String>,
}

impl StageKey {
    /// Create a top-level stage key
    ///
    /// # Errors
    /// - `KeyError::InvalidSequence` unless the sequence is digits separated by `_`
    /// - `KeyError::InvalidSlug` unless the slug is `[a-z0-9_.-]+`
    pub fn new(
        sequence: impl Into<String>,
        slug: impl Into<String>,
        kind: ArtifactKind,
    ) -> Result<Self, KeyError> {
        let sequence = sequence.into();
        let slug = slug.into();

        let valid_sequence = !sequence.is_empty()
            && !sequence.starts_with('_')
            && !sequence.ends_with('_')
            && sequence.chars().all(|c| c.is_ascii_digit() || c == '_');
        if !valid_sequence {
            return Err(KeyError::InvalidSequence(sequence));
        }

        let valid_slug = !slug.is_empty()
            && slug
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '.' | '-'));
        if !valid_slug {
            return Err(KeyError::InvalidSlug(slug));
        }

        Ok(Self {
            sequence,
            slug,
            kind,
            parent: None,
        })
    }

    /// Nest a key under a directory stage (e.g. one plan file under `06_plans`)
    ///
    /// # Errors
    /// Returns `KeyError::NotADirectory` if `self` is not a directory stage,
    /// or any error from [`StageKey::new`] for the child.
    pub fn child(
        &self,
        sequence: impl Into<String>,
        slug: impl Into<String>,
        kind: ArtifactKind,
    ) -> Result<Self, KeyError> {
        if self.kind != ArtifactKind::Directory {
            return Err(KeyError::NotADirectory(self.stem()));
        }
        let mut child = Self::new(sequence, slug, kind)?;
        child.parent = Some(self.relative_path());
        Ok(child)
    }

    /// `<sequence>_<slug>`
    #[inline]
    #[must_use]
    pub fn stem(&self) -> String {
        format!("{}_{}", self.sequence, self.slug)
    }

    /// Path relative to the run directory
    #[must_use]
    pub fn relative_path(&self) -> String {
        let name = match self.kind.extension() {
            Some(ext) => format!("{}.{}", self.stem(), ext),
            None => self.stem(),
        };
        match &self.parent {
            Some(parent) => format!("{}/{}", parent, name),
            None => name,
        }
    }

    /// Sequence number as written on disk
    #[inline]
    #[must_use]
    pub fn sequence(&self) -> &str {
        &self.sequence
    }

    /// Stage slug
    #[inline]
    #[must_use]
    pub fn slug(&self) -> &str {
        &self.slug
    }

    /// Layout kind
    #[inline]
    #[must_use]
    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    /// Turn free text (e.g. a resource address) into a valid slug
    #[must_use]
    pub fn sanitize_slug(raw: &str) -> String {
        let mut out = String::with_capacity(raw.len());
        for c in raw.chars() {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '.' | '-') {
                out.push(c);
            } else {
                out.push('_');
            }
        }
        if out.is_empty() {
            out.push('_');
        }
        out
    }
}

impl fmt::Display for StageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.relative_path())
    }
}

/// Key construction errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("invalid stage sequence: {0:?}")]
    InvalidSequence(String),

    #[error("invalid stage slug: {0:?}")]
    InvalidSlug(String),

    #[error("stage {0} is not a directory stage")]
    NotADirectory(String),

    #[error("invalid run id: {0}")]
    InvalidRunId(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_follow_sequence_and_kind() {
        let mappings = StageKey::new("03", "mappings", ArtifactKind::Json).unwrap();
        assert_eq!(mappings.relative_path(), "03_mappings.json");

        let retry = StageKey::new("04_01", "retry_mappings", ArtifactKind::Json).unwrap();
        assert_eq!(retry.relative_path(), "04_01_retry_mappings.json");

        let migrated = StageKey::new("08", "migrated", ArtifactKind::Directory).unwrap();
        assert_eq!(migrated.relative_path(), "08_migrated");
    }

    #[test]
    fn child_keys_nest_under_directory() {
        let plans = StageKey::new("06", "plans", ArtifactKind::Directory).unwrap();
        let item = plans
            .child("001", "azurerm_subnet.subnet1", ArtifactKind::Json)
            .unwrap();
        assert_eq!(item.relative_path(), "06_plans/001_azurerm_subnet.subnet1.json");
    }

    #[test]
    fn keys_differing_only_in_kind_are_distinct() {
        use std::collections::HashSet;
        let keys: HashSet<StageKey> = [
            StageKey::new("06", "plans", ArtifactKind::Directory).unwrap(),
            StageKey::new("06", "plans", ArtifactKind::Json).unwrap(),
            StageKey::new("06", "plans", ArtifactKind::Directory).unwrap(),
        ]
        .into_iter()
        .collect();
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn child_of_file_stage_is_rejected() {
        let scan = StageKey::new("01", "scan", ArtifactKind::Json).unwrap();
        assert!(matches!(
            scan.child("001", "x", ArtifactKind::Json),
            Err(KeyError::NotADirectory(_))
        ));
    }

    #[test]
    fn invalid_keys_are_rejected() {
        assert!(StageKey::new("", "scan", ArtifactKind::Json).is_err());
        assert!(StageKey::new("0a", "scan", ArtifactKind::Json).is_err());
        assert!(StageKey::new("_01", "scan", ArtifactKind::Json).is_err());
        assert!(StageKey::new("01", "Scan", ArtifactKind::Json).is_err());
        assert!(StageKey::new("01", "a/b", ArtifactKind::Json).is_err());
    }

    #[test]
    fn sanitize_slug_keeps_addresses_readable() {
        assert_eq!(
            StageKey::sanitize_slug("azurerm_subnet.subnet[\"a\"]"),
            "azurerm_subnet.subnet__a__"
        );
        assert_eq!(StageKey::sanitize_slug(""), "_");
    }

    #[test]
    fn run_id_roundtrips_through_string() {
        let id = RunId::new();
        let parsed: RunId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-ulid".parse::<RunId>().is_err());
    }
}
