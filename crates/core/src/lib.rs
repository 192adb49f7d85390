//! Domain models, shared types, configuration, and error definitions.
//!
//! Foundation crate -- no async or I/O dependencies.

pub mod config;
pub mod error;
pub mod types;

pub use config::PhoenixConfig;
pub use error::{PhoenixError, PhoenixResult};
pub use types::{
    AccessMode, ArtifactSet, Attempt, JudgeRecord, Membership, OrgId, Organization, Principal,
    RecordId, ResourceChanges, ResourceDraft, ResourceId, ResourceKind, UserId, Verdict,
    VersionedResource, Visibility,
};
