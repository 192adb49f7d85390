//! Domain types for the Phoenix access-control core.

use crate::error::{PhoenixError, PhoenixResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize,
            Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }
    };
}

id_type!(
    /// Opaque user identifier, as resolved from a request credential.
    UserId
);
id_type!(OrgId);
id_type!(
    /// Auto-incremented identifier of a problem or tutorial row.
    ResourceId
);
id_type!(RecordId);

// ---------------------------------------------------------------------------
// Principal
// ---------------------------------------------------------------------------

/// The actor issuing a request.
///
/// Carries no privileged state: organization standing is always recomputed
/// from the membership ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Principal {
    Anonymous,
    User(UserId),
}

impl Principal {
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Self::Anonymous => None,
            Self::User(id) => Some(*id),
        }
    }

    pub fn is(&self, user: UserId) -> bool {
        self.user_id() == Some(user)
    }
}

impl From<Option<UserId>> for Principal {
    fn from(user: Option<UserId>) -> Self {
        user.map_or(Self::Anonymous, Self::User)
    }
}

// ---------------------------------------------------------------------------
// Organizations
// ---------------------------------------------------------------------------

/// An organization. Its creator is an admin forever, without needing a
/// membership row to say so.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrgId,
    pub name: String,
    pub profile: String,
    pub creator_id: UserId,
}

/// Relationship between a user and an organization.
///
/// `is_valid == false` is a pending invitation; `true` is accepted
/// membership. At most one record exists per `(user_id, org_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub user_id: UserId,
    pub org_id: OrgId,
    pub is_admin: bool,
    pub is_valid: bool,
}

impl Membership {
    pub fn pending(user_id: UserId, org_id: OrgId, is_admin: bool) -> Self {
        Self {
            user_id,
            org_id,
            is_admin,
            is_valid: false,
        }
    }

    /// The self-invitation written when a user creates an organization.
    pub fn founder(user_id: UserId, org_id: OrgId) -> Self {
        Self {
            user_id,
            org_id,
            is_admin: true,
            is_valid: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Visibility
// ---------------------------------------------------------------------------

/// Read or write access to a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessMode {
    Read,
    Write,
}

/// Graduated visibility of a resource, stored on the wire as `0..=3`.
///
/// Ordered from most to least restrictive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Visibility {
    CreatorOnly = 0,
    AdminOnly = 1,
    MemberOnly = 2,
    Public = 3,
}

impl Visibility {
    /// Decodes a wire level. Unknown levels yield `None`.
    pub fn from_level(level: i32) -> Option<Self> {
        match level {
            0 => Some(Self::CreatorOnly),
            1 => Some(Self::AdminOnly),
            2 => Some(Self::MemberOnly),
            3 => Some(Self::Public),
            _ => None,
        }
    }

    pub fn level(self) -> i32 {
        self as i32
    }

    /// Levels a resource may carry for `mode`. `Public` is never writable.
    pub fn valid_for(self, mode: AccessMode) -> bool {
        match mode {
            AccessMode::Read => true,
            AccessMode::Write => self != Self::Public,
        }
    }
}

impl TryFrom<i32> for Visibility {
    type Error = PhoenixError;

    fn try_from(level: i32) -> PhoenixResult<Self> {
        Self::from_level(level)
            .ok_or_else(|| PhoenixError::InvalidInput(format!("unknown visibility level {level}")))
    }
}

impl From<Visibility> for i32 {
    fn from(v: Visibility) -> Self {
        v.level()
    }
}

// ---------------------------------------------------------------------------
// Versioned resources
// ---------------------------------------------------------------------------

/// The two file-backed resource kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Problem,
    Tutorial,
}

const PROBLEM_ARTIFACTS: &[&str] = &["description", "input", "output"];
const TUTORIAL_ARTIFACTS: &[&str] = &["content"];

impl ResourceKind {
    /// Artifact names every version of this kind owns, sorted.
    pub fn required_artifacts(self) -> &'static [&'static str] {
        match self {
            Self::Problem => PROBLEM_ARTIFACTS,
            Self::Tutorial => TUTORIAL_ARTIFACTS,
        }
    }

    /// Directory under the resource root holding this kind's artifacts.
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Problem => "problems",
            Self::Tutorial => "tutorials",
        }
    }

    /// Rejects artifact sets that are not exactly the required names.
    pub fn check_artifacts(self, artifacts: &ArtifactSet) -> PhoenixResult<()> {
        let required = self.required_artifacts();
        for name in artifacts.keys() {
            if !required.contains(&name.as_str()) {
                return Err(PhoenixError::InvalidInput(format!(
                    "unknown {self} artifact `{name}`"
                )));
            }
        }
        for name in required {
            if !artifacts.contains_key(*name) {
                return Err(PhoenixError::InvalidInput(format!(
                    "missing {self} artifact `{name}`"
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Problem => "problem",
            Self::Tutorial => "tutorial",
        })
    }
}

/// Named artifact contents for one version.
pub type ArtifactSet = BTreeMap<String, Vec<u8>>;

/// A problem or tutorial row. `version` starts at 1 and is the source of
/// truth for which artifact set is current.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedResource {
    pub id: ResourceId,
    pub kind: ResourceKind,
    pub name: String,
    /// Tutorial profile; empty for problems.
    #[serde(default)]
    pub summary: String,
    /// Problem difficulty; zero for tutorials.
    #[serde(default)]
    pub difficulty: i32,
    pub version: u32,
    pub org_id: OrgId,
    pub creator_id: UserId,
    pub readable: i32,
    pub writable: i32,
}

impl VersionedResource {
    pub fn from_draft(
        id: ResourceId,
        kind: ResourceKind,
        creator_id: UserId,
        d: ResourceDraft,
    ) -> Self {
        Self {
            id,
            kind,
            name: d.name,
            summary: d.summary,
            difficulty: d.difficulty,
            version: 1,
            org_id: d.org_id,
            creator_id,
            readable: d.readable,
            writable: d.writable,
        }
    }
}

/// Caller-supplied fields of a new resource.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceDraft {
    pub name: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub difficulty: i32,
    pub org_id: OrgId,
    pub readable: i32,
    pub writable: i32,
}

/// Field changes applied by an update. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceChanges {
    pub name: Option<String>,
    pub summary: Option<String>,
    pub difficulty: Option<i32>,
    pub readable: Option<i32>,
    pub writable: Option<i32>,
}

impl ResourceChanges {
    pub fn apply(&self, r: &mut VersionedResource) {
        if let Some(name) = &self.name {
            r.name = name.clone();
        }
        if let Some(summary) = &self.summary {
            r.summary = summary.clone();
        }
        if let Some(difficulty) = self.difficulty {
            r.difficulty = difficulty;
        }
        if let Some(readable) = self.readable {
            r.readable = readable;
        }
        if let Some(writable) = self.writable {
            r.writable = writable;
        }
    }
}

/// Validates a resource's name and visibility pair before it is persisted.
pub fn validate_resource(r: &VersionedResource) -> PhoenixResult<()> {
    if r.name.trim().is_empty() {
        return Err(PhoenixError::InvalidInput("name must not be empty".into()));
    }
    Visibility::try_from(r.readable)?;
    let writable = Visibility::try_from(r.writable)?;
    if !writable.valid_for(AccessMode::Write) {
        return Err(PhoenixError::InvalidInput(format!(
            "visibility level {} is not valid for write",
            r.writable
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Judge records
// ---------------------------------------------------------------------------

/// Outcome of one judged submission. Wire codes 0..=3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Accepted,
    WrongAnswer,
    TimeLimitExceeded,
    RuntimeError,
}

impl Verdict {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Accepted),
            1 => Some(Self::WrongAnswer),
            2 => Some(Self::TimeLimitExceeded),
            3 => Some(Self::RuntimeError),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::Accepted => 0,
            Self::WrongAnswer => 1,
            Self::TimeLimitExceeded => 2,
            Self::RuntimeError => 3,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Accepted => "AC",
            Self::WrongAnswer => "WA",
            Self::TimeLimitExceeded => "TLE",
            Self::RuntimeError => "RE",
        })
    }
}

/// Accepts the short form (`AC`, `wa`, ...) or the numeric wire code.
impl FromStr for Verdict {
    type Err = PhoenixError;

    fn from_str(raw: &str) -> PhoenixResult<Self> {
        let parsed = match raw.to_ascii_uppercase().as_str() {
            "AC" => Some(Self::Accepted),
            "WA" => Some(Self::WrongAnswer),
            "TLE" => Some(Self::TimeLimitExceeded),
            "RE" => Some(Self::RuntimeError),
            other => other.parse().ok().and_then(Self::from_code),
        };
        parsed.ok_or_else(|| PhoenixError::InvalidInput(format!("unknown verdict {raw:?}")))
    }
}

/// One submission a user ran against a problem, with its verdict.
///
/// The submitted source is stored next to the resource artifacts under
/// [`JudgeRecord::code_file_name`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgeRecord {
    pub id: RecordId,
    pub problem_id: ResourceId,
    pub user_id: UserId,
    pub verdict: Verdict,
    pub language: String,
    /// Seconds since the Unix epoch.
    pub submitted_at: u64,
}

impl JudgeRecord {
    /// `<problem>_<user>_<record>`; unique per record.
    pub fn code_file_name(&self) -> String {
        format!("{}_{}_{}", self.problem_id, self.user_id, self.id)
    }
}

/// A user's overall result on one problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attempt {
    Untried,
    Solved,
    Unsolved,
}

impl Attempt {
    /// Solved once any verdict was accepted, unsolved if none was.
    pub fn of<'a>(records: impl IntoIterator<Item = &'a JudgeRecord>) -> Self {
        let mut attempt = Self::Untried;
        for record in records {
            if record.verdict == Verdict::Accepted {
                return Self::Solved;
            }
            attempt = Self::Unsolved;
        }
        attempt
    }

    /// Wire code: 0 untried, 1 solved, -1 unsolved.
    pub fn code(self) -> i32 {
        match self {
            Self::Untried => 0,
            Self::Solved => 1,
            Self::Unsolved => -1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifacts(names: &[&str]) -> ArtifactSet {
        names.iter().map(|n| (n.to_string(), Vec::new())).collect()
    }

    #[test]
    fn visibility_wire_levels() {
        assert_eq!(Visibility::from_level(2), Some(Visibility::MemberOnly));
        assert_eq!(Visibility::Public.level(), 3);
        assert!(Visibility::from_level(4).is_none());
        assert!(Visibility::from_level(-1).is_none());
        assert!(Visibility::try_from(7).is_err());
    }

    #[test]
    fn public_is_not_writable() {
        assert!(Visibility::Public.valid_for(AccessMode::Read));
        assert!(!Visibility::Public.valid_for(AccessMode::Write));
        assert!(Visibility::MemberOnly.valid_for(AccessMode::Write));
    }

    #[test]
    fn problem_requires_exact_artifact_set() {
        let kind = ResourceKind::Problem;
        assert!(kind
            .check_artifacts(&artifacts(&["input", "output", "description"]))
            .is_ok());
        assert!(kind.check_artifacts(&artifacts(&["input", "output"])).is_err());
        assert!(kind
            .check_artifacts(&artifacts(&["input", "output", "description", "extra"]))
            .is_err());
        assert!(ResourceKind::Tutorial
            .check_artifacts(&artifacts(&["content"]))
            .is_ok());
    }

    #[test]
    fn changes_only_touch_given_fields() {
        let mut r = VersionedResource::from_draft(
            ResourceId(1),
            ResourceKind::Tutorial,
            UserId(9),
            ResourceDraft {
                name: "intro".into(),
                summary: "first".into(),
                org_id: OrgId(3),
                readable: 3,
                writable: 0,
                ..Default::default()
            },
        );
        ResourceChanges {
            summary: Some("second".into()),
            ..Default::default()
        }
        .apply(&mut r);
        assert_eq!(r.name, "intro");
        assert_eq!(r.summary, "second");
        assert_eq!(r.version, 1);
    }

    #[test]
    fn validation_rejects_public_write() {
        let mut r = VersionedResource::from_draft(
            ResourceId(1),
            ResourceKind::Problem,
            UserId(1),
            ResourceDraft {
                name: "a+b".into(),
                org_id: OrgId(1),
                readable: 3,
                writable: 1,
                ..Default::default()
            },
        );
        assert!(validate_resource(&r).is_ok());
        r.writable = 3;
        assert!(validate_resource(&r).is_err());
        r.writable = 0;
        r.readable = 5;
        assert!(validate_resource(&r).is_err());
    }

    fn record(id: u64, verdict: Verdict) -> JudgeRecord {
        JudgeRecord {
            id: RecordId(id),
            problem_id: ResourceId(7),
            user_id: UserId(3),
            verdict,
            language: "rust".into(),
            submitted_at: 0,
        }
    }

    #[test]
    fn verdict_parses_short_forms_and_codes() {
        assert_eq!("ac".parse::<Verdict>().unwrap(), Verdict::Accepted);
        assert_eq!("TLE".parse::<Verdict>().unwrap(), Verdict::TimeLimitExceeded);
        assert_eq!("3".parse::<Verdict>().unwrap(), Verdict::RuntimeError);
        assert!("4".parse::<Verdict>().is_err());
        assert!("ok".parse::<Verdict>().is_err());
        assert_eq!(Verdict::from_code(Verdict::WrongAnswer.code()), Some(Verdict::WrongAnswer));
    }

    #[test]
    fn attempt_summarizes_history() {
        assert_eq!(Attempt::of(&[]), Attempt::Untried);
        let failed = [record(1, Verdict::WrongAnswer), record(2, Verdict::RuntimeError)];
        assert_eq!(Attempt::of(&failed), Attempt::Unsolved);
        assert_eq!(Attempt::of(&failed).code(), -1);
        let solved = [record(1, Verdict::WrongAnswer), record(2, Verdict::Accepted)];
        assert_eq!(Attempt::of(&solved), Attempt::Solved);
    }

    #[test]
    fn code_file_name_is_unique_per_record() {
        assert_eq!(record(12, Verdict::Accepted).code_file_name(), "7_3_12");
        assert_ne!(
            record(12, Verdict::Accepted).code_file_name(),
            record(13, Verdict::Accepted).code_file_name()
        );
    }
}
