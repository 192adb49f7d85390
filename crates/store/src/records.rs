//! [`Record`] bindings for the domain rows.

use crate::Record;
use phoenix_core::{
    JudgeRecord, Membership, OrgId, Organization, RecordId, ResourceId, UserId, VersionedResource,
};

impl Record for Organization {
    type Key = OrgId;
    const TABLE: &'static str = "organizations";

    fn key(&self) -> OrgId {
        self.id
    }
}

/// Keyed by `(user, org)`, which makes the one-record-per-pair rule a
/// property of the table itself.
impl Record for Membership {
    type Key = (UserId, OrgId);
    const TABLE: &'static str = "memberships";

    fn key(&self) -> (UserId, OrgId) {
        (self.user_id, self.org_id)
    }
}

impl Record for VersionedResource {
    type Key = ResourceId;
    const TABLE: &'static str = "resources";

    fn key(&self) -> ResourceId {
        self.id
    }
}

impl Record for JudgeRecord {
    type Key = RecordId;
    const TABLE: &'static str = "judge_records";

    fn key(&self) -> RecordId {
        self.id
    }
}
