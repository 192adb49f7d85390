//! Organizations and the membership ledger.
//!
//! Every question of the form "is this user an admin / a member of this
//! organization" is answered by [`MembershipLedger::standing`]. It folds in
//! the rule that an organization's creator is an admin forever, which the
//! membership table alone does not capture. Callers must not read the
//! membership table to decide standing themselves.

use phoenix_core::error::{PhoenixError, PhoenixResult};
use phoenix_core::{Membership, OrgId, Organization, UserId};
use phoenix_store::Table;
use serde::Serialize;
use std::sync::Arc;

/// A user's standing in one organization, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Standing {
    Outsider,
    /// Holds a pending invitation.
    Invited,
    Member,
    /// Admin by membership flag, or the organization's creator.
    Admin,
}

impl Standing {
    pub fn is_admin(self) -> bool {
        self == Self::Admin
    }

    pub fn is_member(self) -> bool {
        self >= Self::Member
    }
}

/// An organization as seen by one of its members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrganizationView {
    pub organization: Organization,
    pub is_admin: bool,
}

/// One valid member of an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Member {
    pub user_id: UserId,
    pub is_admin: bool,
}

pub struct MembershipLedger {
    organizations: Arc<dyn Table<Organization>>,
    memberships: Arc<dyn Table<Membership>>,
}

impl MembershipLedger {
    pub fn new(
        organizations: Arc<dyn Table<Organization>>,
        memberships: Arc<dyn Table<Membership>>,
    ) -> Self {
        Self {
            organizations,
            memberships,
        }
    }

    // -----------------------------------------------------------------------
    // Standing
    // -----------------------------------------------------------------------

    /// Standing of `user` in `org`. Unknown organizations have no members.
    pub async fn standing(&self, org: OrgId, user: UserId) -> PhoenixResult<Standing> {
        match self.organizations.get(&org).await? {
            Some(organization) => self.standing_in(&organization, user).await,
            None => Ok(Standing::Outsider),
        }
    }

    async fn standing_in(&self, org: &Organization, user: UserId) -> PhoenixResult<Standing> {
        if org.creator_id == user {
            return Ok(Standing::Admin);
        }
        let standing = match self.memberships.get(&(user, org.id)).await? {
            None => Standing::Outsider,
            Some(m) if !m.is_valid => Standing::Invited,
            Some(m) if m.is_admin => Standing::Admin,
            Some(_) => Standing::Member,
        };
        Ok(standing)
    }

    pub async fn is_admin(&self, org: OrgId, user: UserId) -> PhoenixResult<bool> {
        Ok(self.standing(org, user).await?.is_admin())
    }

    pub async fn is_member(&self, org: OrgId, user: UserId) -> PhoenixResult<bool> {
        Ok(self.standing(org, user).await?.is_member())
    }

    // -----------------------------------------------------------------------
    // Organizations
    // -----------------------------------------------------------------------

    pub async fn organization(&self, org: OrgId) -> PhoenixResult<Organization> {
        self.organizations
            .get(&org)
            .await?
            .ok_or_else(|| PhoenixError::NotFound(format!("organization {org}")))
    }

    /// Creates an organization and the creator's own valid admin membership.
    pub async fn create_organization(
        &self,
        creator: UserId,
        name: &str,
        profile: &str,
    ) -> PhoenixResult<Organization> {
        let name = name.trim();
        if name.is_empty() {
            return Err(PhoenixError::InvalidInput(
                "organization name must not be empty".into(),
            ));
        }
        self.ensure_name_free(name, None).await?;

        let organization = Organization {
            id: OrgId(self.organizations.next_id().await?),
            name: name.to_string(),
            profile: profile.to_string(),
            creator_id: creator,
        };
        self.organizations.insert(organization.clone()).await?;

        if let Err(e) = self
            .memberships
            .insert(Membership::founder(creator, organization.id))
            .await
        {
            tracing::warn!(
                org_id = %organization.id,
                error = %e,
                "founder membership failed, removing organization"
            );
            self.organizations.delete(&organization.id).await?;
            return Err(e);
        }

        tracing::info!(
            org_id = %organization.id,
            user_id = %creator,
            name,
            "organization created"
        );
        Ok(organization)
    }

    /// Renames / re-describes an organization. Admins only.
    pub async fn update_organization(
        &self,
        caller: UserId,
        org: OrgId,
        name: &str,
        profile: &str,
    ) -> PhoenixResult<Organization> {
        let current = self.organization(org).await?;
        if !self.standing_in(&current, caller).await?.is_admin() {
            return Err(PhoenixError::Forbidden(format!(
                "user {caller} is not an admin of organization {org}"
            )));
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(PhoenixError::InvalidInput(
                "organization name must not be empty".into(),
            ));
        }
        self.ensure_name_free(name, Some(org)).await?;

        let next = Organization {
            name: name.to_string(),
            profile: profile.to_string(),
            ..current.clone()
        };
        if !self.organizations.compare_and_swap(&current, next.clone()).await? {
            return Err(PhoenixError::Conflict(format!(
                "organization {org} changed concurrently"
            )));
        }
        tracing::info!(org_id = %org, user_id = %caller, "organization updated");
        Ok(next)
    }

    /// Deletes every membership record of an organization, then the
    /// organization itself.
    ///
    /// Only the creator may dissolve; creators cannot otherwise leave. If a
    /// membership delete fails the organization is kept, so the creator can
    /// retry instead of leaving orphaned rows behind.
    pub async fn dissolve(&self, caller: UserId, org: OrgId) -> PhoenixResult<()> {
        let organization = self.organization(org).await?;
        if organization.creator_id != caller {
            return Err(PhoenixError::Forbidden(format!(
                "only the creator may dissolve organization {org}"
            )));
        }

        let mut removed = 0usize;
        for m in self.memberships.scan().await? {
            if m.org_id == org {
                self.memberships.delete(&(m.user_id, org)).await?;
                removed += 1;
            }
        }
        self.organizations.delete(&org).await?;
        tracing::info!(org_id = %org, memberships = removed, "organization dissolved");
        Ok(())
    }

    async fn ensure_name_free(&self, name: &str, except: Option<OrgId>) -> PhoenixResult<()> {
        let taken = self
            .organizations
            .scan()
            .await?
            .into_iter()
            .any(|o| o.name == name && Some(o.id) != except);
        if taken {
            return Err(PhoenixError::Conflict(format!(
                "organization name {name:?} is taken"
            )));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Membership lifecycle
    // -----------------------------------------------------------------------

    /// Records a pending invitation for `user`, issued by an admin.
    ///
    /// Fails with `Conflict` if any record for `(user, org)` already exists.
    pub async fn invite(
        &self,
        caller: UserId,
        user: UserId,
        org: OrgId,
        as_admin: bool,
    ) -> PhoenixResult<Membership> {
        let organization = self.organization(org).await?;
        if !self.standing_in(&organization, caller).await?.is_admin() {
            return Err(PhoenixError::Forbidden(format!(
                "user {caller} is not an admin of organization {org}"
            )));
        }
        if organization.creator_id == user {
            return Err(PhoenixError::Conflict(format!(
                "user {user} created organization {org}"
            )));
        }

        let invitation = Membership::pending(user, org, as_admin);
        self.memberships
            .insert(invitation.clone())
            .await
            .map_err(|e| match e {
                PhoenixError::Conflict(_) => PhoenixError::Conflict(format!(
                    "user {user} already has a membership record in organization {org}"
                )),
                other => other,
            })?;

        tracing::info!(
            org_id = %org,
            user_id = %user,
            by = %caller,
            as_admin,
            "invitation created"
        );
        Ok(invitation)
    }

    /// Turns the pending invitation for `(user, org)` into membership.
    pub async fn accept(&self, user: UserId, org: OrgId) -> PhoenixResult<Membership> {
        let current = self
            .memberships
            .get(&(user, org))
            .await?
            .ok_or_else(|| {
                PhoenixError::NotFound(format!(
                    "no invitation for user {user} in organization {org}"
                ))
            })?;
        if current.is_valid {
            return Err(PhoenixError::Conflict(format!(
                "user {user} is already a member of organization {org}"
            )));
        }

        let accepted = Membership {
            is_valid: true,
            ..current.clone()
        };
        if !self.memberships.compare_and_swap(&current, accepted.clone()).await? {
            return Err(PhoenixError::Conflict(format!(
                "invitation for user {user} in organization {org} changed concurrently"
            )));
        }
        tracing::info!(org_id = %org, user_id = %user, "invitation accepted");
        Ok(accepted)
    }

    /// Promotes or demotes `user`. Only the creator may do this, and the
    /// creator's own admin status cannot be revoked.
    pub async fn set_admin(
        &self,
        caller: UserId,
        org: OrgId,
        user: UserId,
        admin: bool,
    ) -> PhoenixResult<()> {
        let organization = self.organization(org).await?;
        if organization.creator_id == user && !admin {
            return Err(PhoenixError::Forbidden(format!(
                "the creator of organization {org} cannot be demoted"
            )));
        }
        if organization.creator_id != caller {
            return Err(PhoenixError::Forbidden(format!(
                "only the creator of organization {org} may change admins"
            )));
        }
        if organization.creator_id == user {
            return Ok(());
        }

        let current = self
            .memberships
            .get(&(user, org))
            .await?
            .ok_or_else(|| {
                PhoenixError::NotFound(format!("user {user} is not in organization {org}"))
            })?;
        if current.is_admin == admin {
            return Ok(());
        }
        let next = Membership {
            is_admin: admin,
            ..current.clone()
        };
        if !self.memberships.compare_and_swap(&current, next).await? {
            return Err(PhoenixError::Conflict(format!(
                "membership of user {user} in organization {org} changed concurrently"
            )));
        }
        tracing::info!(org_id = %org, user_id = %user, admin, "admin flag changed");
        Ok(())
    }

    /// Removes `user`'s membership record on behalf of `caller`.
    ///
    /// Any admin may remove a non-admin; only the creator may remove an
    /// admin; nobody may remove the creator.
    pub async fn remove(&self, caller: UserId, org: OrgId, user: UserId) -> PhoenixResult<()> {
        let organization = self.organization(org).await?;
        if organization.creator_id == user {
            return Err(PhoenixError::Forbidden(format!(
                "the creator of organization {org} cannot be removed"
            )));
        }
        if !self.standing_in(&organization, caller).await?.is_admin() {
            return Err(PhoenixError::Forbidden(format!(
                "user {caller} is not an admin of organization {org}"
            )));
        }
        let target = self.standing_in(&organization, user).await?;
        if target == Standing::Outsider {
            return Err(PhoenixError::NotFound(format!(
                "user {user} is not in organization {org}"
            )));
        }
        if target.is_admin() && organization.creator_id != caller {
            return Err(PhoenixError::Forbidden(format!(
                "only the creator of organization {org} may remove an admin"
            )));
        }

        self.memberships.delete(&(user, org)).await?;
        tracing::info!(org_id = %org, user_id = %user, by = %caller, "member removed");
        Ok(())
    }

    /// Leaves an organization (or drops a pending invitation).
    pub async fn quit(&self, user: UserId, org: OrgId) -> PhoenixResult<()> {
        if let Some(organization) = self.organizations.get(&org).await? {
            if organization.creator_id == user {
                return Err(PhoenixError::Forbidden(format!(
                    "the creator of organization {org} cannot quit, only dissolve it"
                )));
            }
        }
        match self.memberships.delete(&(user, org)).await? {
            Some(_) => {
                tracing::info!(org_id = %org, user_id = %user, "member quit");
                Ok(())
            }
            None => Err(PhoenixError::NotFound(format!(
                "user {user} is not in organization {org}"
            ))),
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Organizations `user` belongs to (valid membership or creator).
    pub async fn organizations_of(&self, user: UserId) -> PhoenixResult<Vec<OrganizationView>> {
        let mut views = Vec::new();
        for organization in self.organizations.scan().await? {
            let standing = self.standing_in(&organization, user).await?;
            if standing.is_member() {
                views.push(OrganizationView {
                    organization,
                    is_admin: standing.is_admin(),
                });
            }
        }
        Ok(views)
    }

    /// Invitations `user` has not accepted yet.
    pub async fn pending_invitations(&self, user: UserId) -> PhoenixResult<Vec<Membership>> {
        Ok(self
            .memberships
            .scan()
            .await?
            .into_iter()
            .filter(|m| m.user_id == user && !m.is_valid)
            .collect())
    }

    /// Valid members of `org`, the creator included.
    pub async fn members(&self, org: OrgId) -> PhoenixResult<Vec<Member>> {
        let organization = self.organization(org).await?;
        let mut members = vec![Member {
            user_id: organization.creator_id,
            is_admin: true,
        }];
        for m in self.memberships.scan().await? {
            if m.org_id != org || !m.is_valid || m.user_id == organization.creator_id {
                continue;
            }
            members.push(Member {
                user_id: m.user_id,
                is_admin: self.standing_in(&organization, m.user_id).await?.is_admin(),
            });
        }
        Ok(members)
    }
}
