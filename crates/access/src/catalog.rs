//! Permission-checked problem and tutorial operations.
//!
//! Every read goes through the evaluator before any artifact content is
//! returned; every write is checked against the resource's `writable` level
//! before the versioned manager is touched. A problem the caller may not read
//! is reported as missing, a tutorial as forbidden.
//!
//! Problem views for a signed-in caller carry the caller's judge result.

use crate::evaluator::PermissionEvaluator;
use crate::judging::JudgeLog;
use crate::ledger::MembershipLedger;
use crate::versioned::VersionedArtifactManager;
use phoenix_core::config::DEFAULT_PAGE_SIZE;
use phoenix_core::error::{PhoenixError, PhoenixResult};
use phoenix_core::{
    ArtifactSet, Attempt, JudgeRecord, Principal, RecordId, ResourceChanges, ResourceDraft,
    ResourceId, ResourceKind, UserId, Verdict, VersionedResource,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A resource row plus the names of its current artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceView {
    #[serde(flatten)]
    pub resource: VersionedResource,
    pub artifacts: Vec<String>,
    /// The caller's result on a problem; absent for tutorials and anonymous
    /// callers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<Attempt>,
}

impl From<VersionedResource> for ResourceView {
    fn from(resource: VersionedResource) -> Self {
        let artifacts = resource
            .kind
            .required_artifacts()
            .iter()
            .map(|name| name.to_string())
            .collect();
        Self {
            resource,
            artifacts,
            attempt: None,
        }
    }
}

/// Listing parameters.
///
/// `sorter`: `1` newest first, `2` by name, `3` hardest first; a negative
/// value reverses the order and anything else keeps id order. `page` is
/// 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListQuery {
    pub page: usize,
    #[serde(default)]
    pub sorter: i32,
    #[serde(default)]
    pub keyword: Option<String>,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            page: 1,
            sorter: 0,
            keyword: None,
        }
    }
}

/// One page of a listing. `total` counts every match, not just this page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page {
    pub total: usize,
    pub items: Vec<ResourceView>,
}

pub struct Catalog {
    ledger: Arc<MembershipLedger>,
    evaluator: PermissionEvaluator,
    manager: VersionedArtifactManager,
    judge: JudgeLog,
    page_size: usize,
}

impl Catalog {
    pub fn new(
        ledger: Arc<MembershipLedger>,
        manager: VersionedArtifactManager,
        judge: JudgeLog,
    ) -> Self {
        Self {
            evaluator: PermissionEvaluator::new(ledger.clone()),
            ledger,
            manager,
            judge,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Creates a resource owned by `principal` inside `draft.org_id`.
    ///
    /// The caller must be signed in and a member of that organization.
    pub async fn create(
        &self,
        principal: &Principal,
        kind: ResourceKind,
        draft: ResourceDraft,
        artifacts: &ArtifactSet,
    ) -> PhoenixResult<ResourceView> {
        let user = signed_in(principal)?;
        if !self.ledger.is_member(draft.org_id, user).await? {
            return Err(PhoenixError::Forbidden(format!(
                "user {user} is not a member of organization {}",
                draft.org_id
            )));
        }
        let row = self.manager.create(kind, user, draft, artifacts).await?;
        Ok(row.into())
    }

    pub async fn get(
        &self,
        principal: &Principal,
        kind: ResourceKind,
        id: ResourceId,
    ) -> PhoenixResult<ResourceView> {
        let mut view = ResourceView::from(self.readable(principal, kind, id).await?);
        if let (ResourceKind::Problem, Some(user)) = (kind, principal.user_id()) {
            view.attempt = Some(self.judge.attempt(id, user).await?);
        }
        Ok(view)
    }

    /// Content of artifact `name` at the current version.
    pub async fn read_artifact(
        &self,
        principal: &Principal,
        kind: ResourceKind,
        id: ResourceId,
        name: &str,
    ) -> PhoenixResult<Vec<u8>> {
        self.readable(principal, kind, id).await?;
        let (row, content) = self.manager.read(kind, id, name).await?;
        // The row may have been rewritten between the check and the read.
        if !self.evaluator.can_read(&row, principal).await? {
            return Err(read_denied(kind, id));
        }
        Ok(content)
    }

    pub async fn version(
        &self,
        principal: &Principal,
        kind: ResourceKind,
        id: ResourceId,
    ) -> PhoenixResult<u32> {
        Ok(self.readable(principal, kind, id).await?.version)
    }

    /// Writes version `expected_version + 1`.
    pub async fn update(
        &self,
        principal: &Principal,
        kind: ResourceKind,
        id: ResourceId,
        expected_version: u32,
        changes: &ResourceChanges,
        artifacts: &ArtifactSet,
    ) -> PhoenixResult<ResourceView> {
        self.writable(principal, kind, id).await?;
        let row = self
            .manager
            .update(kind, id, expected_version, changes, artifacts)
            .await?;
        Ok(row.into())
    }

    pub async fn delete(
        &self,
        principal: &Principal,
        kind: ResourceKind,
        id: ResourceId,
    ) -> PhoenixResult<()> {
        self.writable(principal, kind, id).await?;
        self.manager.delete(kind, id).await?;
        Ok(())
    }

    /// The resources of `kind` visible to `principal`, filtered, sorted and
    /// paged per `query`.
    pub async fn list(
        &self,
        principal: &Principal,
        kind: ResourceKind,
        query: &ListQuery,
    ) -> PhoenixResult<Page> {
        if query.page == 0 {
            return Err(PhoenixError::InvalidInput("page numbers start at 1".into()));
        }

        let rows = self.manager.list(kind).await?;
        let mut items = self.evaluator.filter_readable(rows, principal).await?;

        if let Some(keyword) = query.keyword.as_deref().map(str::trim) {
            if !keyword.is_empty() {
                let needle = keyword.to_lowercase();
                items.retain(|r| r.name.to_lowercase().contains(&needle));
            }
        }
        apply_sorter(&mut items, query.sorter);

        let total = items.len();
        let mut items: Vec<ResourceView> = items
            .into_iter()
            .skip((query.page - 1).saturating_mul(self.page_size))
            .take(self.page_size)
            .map(ResourceView::from)
            .collect();
        if let (ResourceKind::Problem, Some(user)) = (kind, principal.user_id()) {
            let attempts = self.judge.attempts(user).await?;
            for view in &mut items {
                let attempt = attempts.get(&view.resource.id).copied();
                view.attempt = Some(attempt.unwrap_or(Attempt::Untried));
            }
        }
        Ok(Page { total, items })
    }

    // -----------------------------------------------------------------------
    // Judge records
    // -----------------------------------------------------------------------

    /// Records a judged submission by `principal` on a problem they can read.
    pub async fn submit_record(
        &self,
        principal: &Principal,
        problem: ResourceId,
        verdict: Verdict,
        language: &str,
        code: &[u8],
    ) -> PhoenixResult<JudgeRecord> {
        let user = signed_in(principal)?;
        self.readable(principal, ResourceKind::Problem, problem).await?;
        self.judge.submit(problem, user, verdict, language, code).await
    }

    /// The caller's own records on `problem`, oldest first.
    pub async fn records(
        &self,
        principal: &Principal,
        problem: ResourceId,
    ) -> PhoenixResult<Vec<JudgeRecord>> {
        let user = signed_in(principal)?;
        self.judge.history(problem, user).await
    }

    /// Source code of one of the caller's records. Other users' records are
    /// reported as missing.
    pub async fn record_code(
        &self,
        principal: &Principal,
        id: RecordId,
    ) -> PhoenixResult<Vec<u8>> {
        let user = signed_in(principal)?;
        let record = self.judge.record(id).await?;
        if record.user_id != user {
            return Err(PhoenixError::NotFound(format!("judge record {id}")));
        }
        self.judge.code(&record).await
    }

    async fn readable(
        &self,
        principal: &Principal,
        kind: ResourceKind,
        id: ResourceId,
    ) -> PhoenixResult<VersionedResource> {
        let row = self.manager.get(kind, id).await?;
        if !self.evaluator.can_read(&row, principal).await? {
            tracing::debug!(%kind, resource_id = %id, ?principal, "read denied");
            return Err(read_denied(kind, id));
        }
        Ok(row)
    }

    async fn writable(
        &self,
        principal: &Principal,
        kind: ResourceKind,
        id: ResourceId,
    ) -> PhoenixResult<VersionedResource> {
        let row = self.manager.get(kind, id).await?;
        if !self.evaluator.can_write(&row, principal).await? {
            tracing::debug!(%kind, resource_id = %id, ?principal, "write denied");
            return Err(PhoenixError::Forbidden(format!(
                "no write access to {kind} {id}"
            )));
        }
        Ok(row)
    }
}

fn signed_in(principal: &Principal) -> PhoenixResult<UserId> {
    principal
        .user_id()
        .ok_or_else(|| PhoenixError::Forbidden("sign in required".into()))
}

fn read_denied(kind: ResourceKind, id: ResourceId) -> PhoenixError {
    match kind {
        ResourceKind::Problem => PhoenixError::NotFound(format!("{kind} {id}")),
        ResourceKind::Tutorial => {
            PhoenixError::Forbidden(format!("no read access to {kind} {id}"))
        }
    }
}

fn apply_sorter(items: &mut [VersionedResource], sorter: i32) {
    match sorter.unsigned_abs() {
        1 => items.sort_by(|a, b| b.id.cmp(&a.id)),
        2 => items.sort_by(|a, b| a.name.cmp(&b.name)),
        3 => items.sort_by(|a, b| b.difficulty.cmp(&a.difficulty)),
        _ => return,
    }
    if sorter < 0 {
        items.reverse();
    }
}
