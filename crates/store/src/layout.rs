//! Deterministic on-disk layout of resource artifacts.
//!
//! A version's artifacts live in `<kind>/<id>_<version>/<name>` under the
//! resource root. The path depends on nothing but those four values, so any
//! version can be located again from the row alone. Submitted judge code
//! lives beside them in `code/<problem>_<user>_<record>`.

use phoenix_core::error::{PhoenixError, PhoenixResult};
use phoenix_core::{JudgeRecord, ResourceId, ResourceKind};
use std::fmt;
use std::path::PathBuf;

/// Folder for submitted code, relative to the resource root.
pub const CODE_DIR: &str = "code";

pub fn code_path(record: &JudgeRecord) -> PathBuf {
    PathBuf::from(CODE_DIR).join(record.code_file_name())
}

/// Address of one artifact of one resource version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArtifactLocation {
    pub kind: ResourceKind,
    pub id: ResourceId,
    pub version: u32,
    pub name: String,
}

impl ArtifactLocation {
    pub fn new(
        kind: ResourceKind,
        id: ResourceId,
        version: u32,
        name: impl Into<String>,
    ) -> PhoenixResult<Self> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self {
            kind,
            id,
            version,
            name,
        })
    }

    /// Locations of every required artifact of `(kind, id, version)`.
    pub fn all(kind: ResourceKind, id: ResourceId, version: u32) -> Vec<Self> {
        kind.required_artifacts()
            .iter()
            .map(|name| Self {
                kind,
                id,
                version,
                name: (*name).to_string(),
            })
            .collect()
    }

    /// Folder holding all artifacts of this version, relative to the root.
    pub fn version_dir(kind: ResourceKind, id: ResourceId, version: u32) -> PathBuf {
        PathBuf::from(kind.dir_name()).join(format!("{id}_{version}"))
    }

    pub fn relative_path(&self) -> PathBuf {
        Self::version_dir(self.kind, self.id, self.version).join(&self.name)
    }
}

impl fmt::Display for ArtifactLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}_{}/{}",
            self.kind.dir_name(),
            self.id,
            self.version,
            self.name
        )
    }
}

/// Artifact names become file names; reject anything that could escape
/// the version folder.
fn validate_name(name: &str) -> PhoenixResult<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if bad {
        return Err(PhoenixError::InvalidInput(format!(
            "invalid artifact name {name:?}"
        )));
    }
    Ok(())
}
