//! Graduated read/write permission decisions.
//!
//! | level | read              | write             |
//! |-------|-------------------|-------------------|
//! | 0     | creator only      | creator only      |
//! | 1     | org admins        | org admins        |
//! | 2     | any org member    | org admins        |
//! | 3     | anyone            | nobody            |
//!
//! The creator of a resource passes at every level. Unknown levels deny
//! everyone else. Evaluation has no side effects.

use crate::ledger::{MembershipLedger, Standing};
use phoenix_core::error::PhoenixResult;
use phoenix_core::{AccessMode, OrgId, Principal, UserId, VersionedResource, Visibility};
use std::collections::HashMap;
use std::sync::Arc;

/// What a non-creator principal needs to pass a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Requirement {
    /// Anyone, including anonymous principals.
    Anyone,
    /// Valid membership in the owning organization.
    Member,
    /// Admin standing in the owning organization.
    Admin,
    /// Only the creator.
    Nobody,
}

impl Requirement {
    /// Maps a wire visibility level to its requirement for `mode`.
    pub fn for_level(level: i32, mode: AccessMode) -> Self {
        match (Visibility::from_level(level), mode) {
            (Some(Visibility::Public), AccessMode::Read) => Self::Anyone,
            (Some(Visibility::MemberOnly), AccessMode::Read) => Self::Member,
            // Level 2 is not a write level; it falls back to admin-only.
            (Some(Visibility::MemberOnly | Visibility::AdminOnly), _) => Self::Admin,
            (Some(Visibility::CreatorOnly), _) => Self::Nobody,
            (Some(Visibility::Public), AccessMode::Write) | (None, _) => Self::Nobody,
        }
    }
}

/// Decides whether a principal may read or write a resource.
pub struct PermissionEvaluator {
    ledger: Arc<MembershipLedger>,
}

impl PermissionEvaluator {
    pub fn new(ledger: Arc<MembershipLedger>) -> Self {
        Self { ledger }
    }

    /// `allows(level, org, creator, principal, mode)`.
    pub async fn allows(
        &self,
        level: i32,
        org: OrgId,
        creator: UserId,
        principal: &Principal,
        mode: AccessMode,
    ) -> PhoenixResult<bool> {
        let requirement = Requirement::for_level(level, mode);
        if requirement == Requirement::Anyone || principal.is(creator) {
            return Ok(true);
        }
        let Some(user) = principal.user_id() else {
            return Ok(false);
        };

        let allowed = match requirement {
            Requirement::Anyone => true,
            Requirement::Member => self.ledger.is_member(org, user).await?,
            Requirement::Admin => self.ledger.is_admin(org, user).await?,
            Requirement::Nobody => false,
        };
        tracing::debug!(level, %org, %user, ?mode, allowed, "permission evaluated");
        Ok(allowed)
    }

    pub async fn can_read(
        &self,
        resource: &VersionedResource,
        principal: &Principal,
    ) -> PhoenixResult<bool> {
        self.allows(
            resource.readable,
            resource.org_id,
            resource.creator_id,
            principal,
            AccessMode::Read,
        )
        .await
    }

    pub async fn can_write(
        &self,
        resource: &VersionedResource,
        principal: &Principal,
    ) -> PhoenixResult<bool> {
        self.allows(
            resource.writable,
            resource.org_id,
            resource.creator_id,
            principal,
            AccessMode::Write,
        )
        .await
    }

    /// Keeps the resources `principal` may read, looking up the principal's
    /// standing at most once per organization.
    pub async fn filter_readable(
        &self,
        resources: Vec<VersionedResource>,
        principal: &Principal,
    ) -> PhoenixResult<Vec<VersionedResource>> {
        let mut standings: HashMap<OrgId, Standing> = HashMap::new();
        let mut readable = Vec::with_capacity(resources.len());

        for r in resources {
            let requirement = Requirement::for_level(r.readable, AccessMode::Read);
            let allowed = if requirement == Requirement::Anyone || principal.is(r.creator_id) {
                true
            } else if let Some(user) = principal.user_id() {
                let standing = match standings.get(&r.org_id) {
                    Some(s) => *s,
                    None => {
                        let s = self.ledger.standing(r.org_id, user).await?;
                        standings.insert(r.org_id, s);
                        s
                    }
                };
                match requirement {
                    Requirement::Member => standing.is_member(),
                    Requirement::Admin => standing.is_admin(),
                    Requirement::Anyone | Requirement::Nobody => false,
                }
            } else {
                false
            };
            if allowed {
                readable.push(r);
            }
        }
        Ok(readable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phoenix_core::{Membership, Organization};
    use phoenix_store::MemoryTable;

    const CREATOR: UserId = UserId(10);
    const OWNER: UserId = UserId(1);
    const ADMIN: UserId = UserId(2);
    const MEMBER: UserId = UserId(3);
    const STRANGER: UserId = UserId(4);

    async fn setup() -> (PermissionEvaluator, OrgId) {
        let ledger = Arc::new(MembershipLedger::new(
            Arc::new(MemoryTable::<Organization>::new()),
            Arc::new(MemoryTable::<Membership>::new()),
        ));
        let org = ledger.create_organization(OWNER, "acm", "").await.unwrap().id;
        for (user, admin) in [(ADMIN, true), (MEMBER, false)] {
            ledger.invite(OWNER, user, org, admin).await.unwrap();
            ledger.accept(user, org).await.unwrap();
        }
        (PermissionEvaluator::new(ledger), org)
    }

    async fn read(ev: &PermissionEvaluator, level: i32, org: OrgId, who: Principal) -> bool {
        ev.allows(level, org, CREATOR, &who, AccessMode::Read)
            .await
            .unwrap()
    }

    async fn write(ev: &PermissionEvaluator, level: i32, org: OrgId, who: Principal) -> bool {
        ev.allows(level, org, CREATOR, &who, AccessMode::Write)
            .await
            .unwrap()
    }

    #[test]
    fn requirement_table() {
        use AccessMode::{Read, Write};
        assert_eq!(Requirement::for_level(0, Read), Requirement::Nobody);
        assert_eq!(Requirement::for_level(1, Read), Requirement::Admin);
        assert_eq!(Requirement::for_level(2, Read), Requirement::Member);
        assert_eq!(Requirement::for_level(3, Read), Requirement::Anyone);
        assert_eq!(Requirement::for_level(2, Write), Requirement::Admin);
        assert_eq!(Requirement::for_level(3, Write), Requirement::Nobody);
        assert_eq!(Requirement::for_level(9, Read), Requirement::Nobody);
        assert_eq!(Requirement::for_level(-1, Write), Requirement::Nobody);
    }

    #[tokio::test]
    async fn creator_passes_every_level() {
        let (ev, org) = setup().await;
        for level in -1..=5 {
            assert!(read(&ev, level, org, Principal::User(CREATOR)).await);
            assert!(write(&ev, level, org, Principal::User(CREATOR)).await);
        }
    }

    #[tokio::test]
    async fn public_read_includes_anonymous() {
        let (ev, org) = setup().await;
        assert!(read(&ev, 3, org, Principal::Anonymous).await);
        assert!(read(&ev, 3, OrgId(77), Principal::User(STRANGER)).await);
        assert!(!write(&ev, 3, org, Principal::User(OWNER)).await);
    }

    #[tokio::test]
    async fn member_level_reads() {
        let (ev, org) = setup().await;
        assert!(read(&ev, 2, org, Principal::User(MEMBER)).await);
        assert!(read(&ev, 2, org, Principal::User(ADMIN)).await);
        assert!(read(&ev, 2, org, Principal::User(OWNER)).await);
        assert!(!read(&ev, 2, org, Principal::User(STRANGER)).await);
        assert!(!read(&ev, 2, org, Principal::Anonymous).await);
    }

    #[tokio::test]
    async fn admin_level_includes_org_creator() {
        let (ev, org) = setup().await;
        assert!(read(&ev, 1, org, Principal::User(OWNER)).await);
        assert!(read(&ev, 1, org, Principal::User(ADMIN)).await);
        assert!(!read(&ev, 1, org, Principal::User(MEMBER)).await);
        assert!(write(&ev, 1, org, Principal::User(OWNER)).await);
        assert!(!write(&ev, 1, org, Principal::User(MEMBER)).await);
    }

    #[tokio::test]
    async fn member_level_write_is_admin_only() {
        let (ev, org) = setup().await;
        assert!(write(&ev, 2, org, Principal::User(ADMIN)).await);
        assert!(!write(&ev, 2, org, Principal::User(MEMBER)).await);
    }

    #[tokio::test]
    async fn creator_only_and_unknown_levels_deny_others() {
        let (ev, org) = setup().await;
        for level in [0, 4, -3] {
            assert!(!read(&ev, level, org, Principal::User(OWNER)).await);
            assert!(!write(&ev, level, org, Principal::User(ADMIN)).await);
            assert!(!read(&ev, level, org, Principal::Anonymous).await);
        }
    }
}
