//! Keeps a resource row and its per-version artifact files consistent.
//!
//! Invariant: whenever a row is observable through this manager, every
//! artifact of `(kind, id, row.version)` exists in full.
//!
//! - create: insert row at version 1, write artifacts; on a failed write the
//!   row is deleted again.
//! - update: bump the row's version (compare-and-swap against the version the
//!   caller read), write the new version's artifacts into their own folder;
//!   on a failed write the row is swapped back and the previous version's
//!   files are left untouched.
//! - delete: drop the row atomically, then clean up every version's files on
//!   a best-effort basis.
//!
//! Operations on the same resource are serialized by a per-resource lock, so
//! readers (listings included) never see a version whose artifacts are still
//! being written. A lock entry lives only while someone holds or waits on it.

use phoenix_core::error::{PhoenixError, PhoenixResult};
use phoenix_core::types::validate_resource;
use phoenix_core::{
    ArtifactSet, ResourceChanges, ResourceDraft, ResourceId, ResourceKind, UserId,
    VersionedResource,
};
use phoenix_store::{ArtifactLocation, ArtifactStore, Table};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as SyncMutex, PoisonError};
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap = SyncMutex<HashMap<ResourceId, Arc<Mutex<()>>>>;

pub struct VersionedArtifactManager {
    resources: Arc<dyn Table<VersionedResource>>,
    artifacts: Arc<dyn ArtifactStore>,
    locks: LockMap,
}

/// Holds one resource's lock; drops the map entry once nobody else needs it.
struct ResourceGuard<'a> {
    id: ResourceId,
    locks: &'a LockMap,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ResourceGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Every other holder or waiter cloned the Arc under this map lock.
        if locks.get(&self.id).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(&self.id);
        }
    }
}

impl VersionedArtifactManager {
    pub fn new(
        resources: Arc<dyn Table<VersionedResource>>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            resources,
            artifacts,
            locks: SyncMutex::new(HashMap::new()),
        }
    }

    async fn lock(&self, id: ResourceId) -> ResourceGuard<'_> {
        let lock = self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id)
            .or_default()
            .clone();
        ResourceGuard {
            id,
            locks: &self.locks,
            guard: Some(lock.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn lock_entries(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    async fn load(
        &self,
        kind: ResourceKind,
        id: ResourceId,
    ) -> PhoenixResult<VersionedResource> {
        match self.resources.get(&id).await? {
            Some(row) if row.kind == kind => Ok(row),
            _ => Err(PhoenixError::NotFound(format!("{kind} {id}"))),
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Current row of a resource.
    pub async fn get(
        &self,
        kind: ResourceKind,
        id: ResourceId,
    ) -> PhoenixResult<VersionedResource> {
        let _guard = self.lock(id).await;
        self.load(kind, id).await
    }

    /// Reads one artifact of the current version, together with the row it
    /// was resolved from.
    pub async fn read(
        &self,
        kind: ResourceKind,
        id: ResourceId,
        name: &str,
    ) -> PhoenixResult<(VersionedResource, Vec<u8>)> {
        if !kind.required_artifacts().contains(&name) {
            return Err(PhoenixError::NotFound(format!("{kind} artifact `{name}`")));
        }
        let _guard = self.lock(id).await;
        let row = self.load(kind, id).await?;
        let location = ArtifactLocation::new(kind, id, row.version, name)?;
        let content = self.artifacts.get(&location).await?;
        Ok((row, content))
    }

    /// Every row of `kind`, in id order.
    ///
    /// Each row is re-read under its lock, so a version still being written
    /// is never listed. Rows deleted meanwhile are skipped.
    pub async fn list(&self, kind: ResourceKind) -> PhoenixResult<Vec<VersionedResource>> {
        let ids: Vec<ResourceId> = self
            .resources
            .scan()
            .await?
            .into_iter()
            .filter(|r| r.kind == kind)
            .map(|r| r.id)
            .collect();

        let mut rows = Vec::with_capacity(ids.len());
        for id in ids {
            let _guard = self.lock(id).await;
            match self.resources.get(&id).await? {
                Some(row) if row.kind == kind => rows.push(row),
                _ => {}
            }
        }
        Ok(rows)
    }

    /// Locations of the artifacts `row` currently points at.
    pub fn locations(row: &VersionedResource) -> Vec<ArtifactLocation> {
        ArtifactLocation::all(row.kind, row.id, row.version)
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    pub async fn create(
        &self,
        kind: ResourceKind,
        creator: UserId,
        draft: ResourceDraft,
        artifacts: &ArtifactSet,
    ) -> PhoenixResult<VersionedResource> {
        kind.check_artifacts(artifacts)?;
        let id = ResourceId(self.resources.next_id().await?);
        let row = VersionedResource::from_draft(id, kind, creator, draft);
        validate_resource(&row)?;

        let _guard = self.lock(id).await;
        self.resources.insert(row.clone()).await?;

        if let Err(e) = self.write_version(&row, artifacts).await {
            tracing::warn!(
                %kind,
                resource_id = %id,
                error = %e,
                "artifact write failed, deleting row"
            );
            if let Err(undo) = self.resources.delete(&id).await {
                tracing::error!(
                    %kind,
                    resource_id = %id,
                    error = %undo,
                    "compensating delete failed"
                );
            }
            self.discard_version(kind, id, 1).await;
            return Err(PhoenixError::StorageFailure(format!(
                "creating {kind} {id}: {e}"
            )));
        }

        tracing::info!(%kind, resource_id = %id, user_id = %creator, "resource created");
        Ok(row)
    }

    /// Applies `changes` and a new artifact set as version `expected + 1`.
    ///
    /// Fails with `Conflict` if the stored version is no longer `expected`.
    pub async fn update(
        &self,
        kind: ResourceKind,
        id: ResourceId,
        expected_version: u32,
        changes: &ResourceChanges,
        artifacts: &ArtifactSet,
    ) -> PhoenixResult<VersionedResource> {
        kind.check_artifacts(artifacts)?;
        let _guard = self.lock(id).await;

        let previous = self.load(kind, id).await?;
        if previous.version != expected_version {
            return Err(PhoenixError::Conflict(format!(
                "{kind} {id} is at version {}, not {expected_version}",
                previous.version
            )));
        }

        let mut next = previous.clone();
        changes.apply(&mut next);
        next.version = previous.version + 1;
        validate_resource(&next)?;

        if !self.resources.compare_and_swap(&previous, next.clone()).await? {
            return Err(PhoenixError::Conflict(format!(
                "{kind} {id} changed concurrently"
            )));
        }

        if let Err(e) = self.write_version(&next, artifacts).await {
            tracing::warn!(
                %kind,
                resource_id = %id,
                version = next.version,
                error = %e,
                "artifact write failed, restoring previous version"
            );
            self.discard_version(kind, id, next.version).await;
            match self.resources.compare_and_swap(&next, previous.clone()).await {
                Ok(true) => {}
                Ok(false) => tracing::error!(
                    %kind,
                    resource_id = %id,
                    "row changed before it could be restored"
                ),
                Err(undo) => tracing::error!(
                    %kind,
                    resource_id = %id,
                    error = %undo,
                    "restoring row failed"
                ),
            }
            return Err(PhoenixError::StorageFailure(format!(
                "updating {kind} {id} to version {}: {e}",
                next.version
            )));
        }

        tracing::info!(%kind, resource_id = %id, version = next.version, "resource updated");
        Ok(next)
    }

    /// Deletes the row, then every version's artifacts (best effort).
    pub async fn delete(
        &self,
        kind: ResourceKind,
        id: ResourceId,
    ) -> PhoenixResult<VersionedResource> {
        let _guard = self.lock(id).await;
        let row = self.load(kind, id).await?;
        let removed = self
            .resources
            .delete(&id)
            .await?
            .ok_or_else(|| PhoenixError::NotFound(format!("{kind} {id}")))?;

        for version in 1..=removed.version {
            self.discard_version(kind, id, version).await;
        }

        tracing::info!(%kind, resource_id = %id, versions = row.version, "resource deleted");
        Ok(removed)
    }

    async fn write_version(
        &self,
        row: &VersionedResource,
        artifacts: &ArtifactSet,
    ) -> PhoenixResult<()> {
        for (name, content) in artifacts {
            let location = ArtifactLocation::new(row.kind, row.id, row.version, name.as_str())?;
            self.artifacts.put(&location, content).await?;
        }
        Ok(())
    }

    async fn discard_version(&self, kind: ResourceKind, id: ResourceId, version: u32) {
        if let Err(e) = self.artifacts.remove_version(kind, id, version).await {
            tracing::warn!(
                %kind,
                resource_id = %id,
                version,
                error = %e,
                "artifact cleanup failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phoenix_core::{JudgeRecord, OrgId};
    use phoenix_store::test_utils::FailingArtifactStore;
    use phoenix_store::{MemoryArtifactStore, MemoryTable};
    use std::time::Duration;
    use tokio::sync::Notify;

    const AUTHOR: UserId = UserId(1);

    /// Parks the first write of `version` until released, then fails it.
    struct GatedStore {
        inner: MemoryArtifactStore,
        version: u32,
        entered: Notify,
        release: Notify,
    }

    #[async_trait::async_trait]
    impl ArtifactStore for GatedStore {
        async fn put(&self, location: &ArtifactLocation, content: &[u8]) -> PhoenixResult<()> {
            if location.version == self.version {
                self.entered.notify_one();
                self.release.notified().await;
                return Err(PhoenixError::Store("disk full".into()));
            }
            self.inner.put(location, content).await
        }

        async fn get(&self, location: &ArtifactLocation) -> PhoenixResult<Vec<u8>> {
            self.inner.get(location).await
        }

        async fn exists(&self, location: &ArtifactLocation) -> PhoenixResult<bool> {
            self.inner.exists(location).await
        }

        async fn remove_version(
            &self,
            kind: ResourceKind,
            id: ResourceId,
            version: u32,
        ) -> PhoenixResult<()> {
            self.inner.remove_version(kind, id, version).await
        }

        async fn put_code(&self, record: &JudgeRecord, content: &[u8]) -> PhoenixResult<()> {
            self.inner.put_code(record, content).await
        }

        async fn get_code(&self, record: &JudgeRecord) -> PhoenixResult<Vec<u8>> {
            self.inner.get_code(record).await
        }

        async fn remove_code(&self, record: &JudgeRecord) -> PhoenixResult<()> {
            self.inner.remove_code(record).await
        }
    }

    struct Harness {
        manager: VersionedArtifactManager,
        rows: Arc<MemoryTable<VersionedResource>>,
        files: Arc<FailingArtifactStore<MemoryArtifactStore>>,
    }

    fn harness() -> Harness {
        let rows = Arc::new(MemoryTable::<VersionedResource>::new());
        let files = Arc::new(FailingArtifactStore::new(MemoryArtifactStore::new()));
        let manager = VersionedArtifactManager::new(rows.clone(), files.clone());
        Harness {
            manager,
            rows,
            files,
        }
    }

    fn problem_files(input: &str, output: &str) -> ArtifactSet {
        [
            ("input", input),
            ("output", output),
            ("description", "add two numbers"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
        .collect()
    }

    fn draft() -> ResourceDraft {
        ResourceDraft {
            name: "a+b".into(),
            difficulty: 1,
            org_id: OrgId(1),
            readable: 2,
            writable: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_then_read_version_one() {
        let h = harness();
        let row = h
            .manager
            .create(ResourceKind::Problem, AUTHOR, draft(), &problem_files("1 2", "3"))
            .await
            .unwrap();
        assert_eq!(row.version, 1);

        let (_, input) = h.manager.read(ResourceKind::Problem, row.id, "input").await.unwrap();
        let (_, output) = h.manager.read(ResourceKind::Problem, row.id, "output").await.unwrap();
        assert_eq!(input, b"1 2");
        assert_eq!(output, b"3");
    }

    #[tokio::test]
    async fn failed_create_leaves_nothing_behind() {
        let h = harness();
        h.files.fail_after(Some(1));

        let err = h
            .manager
            .create(ResourceKind::Problem, AUTHOR, draft(), &problem_files("1 2", "3"))
            .await
            .unwrap_err();
        assert!(err.is_storage_failure());
        assert!(h.rows.scan().await.unwrap().is_empty());
        assert!(h.files.inner().is_empty().await);
    }

    #[tokio::test]
    async fn create_rejects_incomplete_artifacts_before_touching_the_row() {
        let h = harness();
        let mut files = problem_files("1 2", "3");
        files.remove("output");
        let err = h
            .manager
            .create(ResourceKind::Problem, AUTHOR, draft(), &files)
            .await
            .unwrap_err();
        assert!(matches!(err, PhoenixError::InvalidInput(_)));
        assert!(h.rows.scan().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_bumps_version_and_keeps_old_files() {
        let h = harness();
        let row = h
            .manager
            .create(ResourceKind::Problem, AUTHOR, draft(), &problem_files("1 2", "3"))
            .await
            .unwrap();

        let changes = ResourceChanges {
            name: Some("a+b+c".into()),
            ..Default::default()
        };
        let updated = h
            .manager
            .update(ResourceKind::Problem, row.id, 1, &changes, &problem_files("1 2 3", "6"))
            .await
            .unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.name, "a+b+c");

        let (_, input) = h.manager.read(ResourceKind::Problem, row.id, "input").await.unwrap();
        assert_eq!(input, b"1 2 3");
        let v1 = ArtifactLocation::new(ResourceKind::Problem, row.id, 1, "input").unwrap();
        assert_eq!(h.files.get(&v1).await.unwrap(), b"1 2");
    }

    #[tokio::test]
    async fn stale_version_is_a_conflict() {
        let h = harness();
        let row = h
            .manager
            .create(ResourceKind::Problem, AUTHOR, draft(), &problem_files("1", "1"))
            .await
            .unwrap();
        let files = problem_files("2", "2");
        h.manager
            .update(ResourceKind::Problem, row.id, 1, &ResourceChanges::default(), &files)
            .await
            .unwrap();

        let err = h
            .manager
            .update(ResourceKind::Problem, row.id, 1, &ResourceChanges::default(), &files)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(h.manager.get(ResourceKind::Problem, row.id).await.unwrap().version, 2);
    }

    #[tokio::test]
    async fn failed_update_restores_previous_row() {
        let h = harness();
        let row = h
            .manager
            .create(ResourceKind::Problem, AUTHOR, draft(), &problem_files("1 2", "3"))
            .await
            .unwrap();

        h.files.fail_after(Some(2));
        let changes = ResourceChanges {
            name: Some("renamed".into()),
            readable: Some(3),
            ..Default::default()
        };
        let err = h
            .manager
            .update(ResourceKind::Problem, row.id, 1, &changes, &problem_files("x", "y"))
            .await
            .unwrap_err();
        assert!(err.is_storage_failure());

        assert_eq!(h.manager.get(ResourceKind::Problem, row.id).await.unwrap(), row);
        let v2 = ArtifactLocation::all(ResourceKind::Problem, row.id, 2);
        for location in &v2 {
            assert!(!h.files.exists(location).await.unwrap());
        }
        assert_eq!(h.files.inner().len().await, 3);
    }

    #[tokio::test]
    async fn concurrent_updates_from_same_version_serialize() {
        let h = Arc::new(harness());
        let row = h
            .manager
            .create(ResourceKind::Problem, AUTHOR, draft(), &problem_files("0", "0"))
            .await
            .unwrap();

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..8 {
            let h = h.clone();
            tasks.spawn(async move {
                let files = problem_files(&i.to_string(), "out");
                h.manager
                    .update(ResourceKind::Problem, row.id, 1, &ResourceChanges::default(), &files)
                    .await
            });
        }

        let mut won = 0;
        let mut conflicts = 0;
        while let Some(result) = tasks.join_next().await {
            match result.unwrap() {
                Ok(r) => {
                    assert_eq!(r.version, 2);
                    won += 1;
                }
                Err(e) => {
                    assert!(e.is_conflict());
                    conflicts += 1;
                }
            }
        }
        assert_eq!((won, conflicts), (1, 7));
    }

    #[tokio::test]
    async fn delete_removes_row_and_all_versions() {
        let h = harness();
        let row = h
            .manager
            .create(ResourceKind::Problem, AUTHOR, draft(), &problem_files("1", "1"))
            .await
            .unwrap();
        h.manager
            .update(
                ResourceKind::Problem,
                row.id,
                1,
                &ResourceChanges::default(),
                &problem_files("2", "2"),
            )
            .await
            .unwrap();

        let removed = h.manager.delete(ResourceKind::Problem, row.id).await.unwrap();
        assert_eq!(removed.version, 2);
        assert!(h.files.inner().is_empty().await);
        assert!(h
            .manager
            .get(ResourceKind::Problem, row.id)
            .await
            .unwrap_err()
            .is_not_found());
        assert!(h
            .manager
            .delete(ResourceKind::Problem, row.id)
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn kind_mismatch_is_not_found() {
        let h = harness();
        let row = h
            .manager
            .create(ResourceKind::Problem, AUTHOR, draft(), &problem_files("1", "1"))
            .await
            .unwrap();
        assert!(h
            .manager
            .get(ResourceKind::Tutorial, row.id)
            .await
            .unwrap_err()
            .is_not_found());
        assert!(h
            .manager
            .read(ResourceKind::Problem, row.id, "content")
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn list_waits_for_in_flight_update() {
        let files = Arc::new(GatedStore {
            inner: MemoryArtifactStore::new(),
            version: 2,
            entered: Notify::new(),
            release: Notify::new(),
        });
        let rows = Arc::new(MemoryTable::<VersionedResource>::new());
        let manager = Arc::new(VersionedArtifactManager::new(rows, files.clone()));
        let row = manager
            .create(ResourceKind::Problem, AUTHOR, draft(), &problem_files("1", "1"))
            .await
            .unwrap();

        let updater = {
            let manager = manager.clone();
            tokio::spawn(async move {
                let files = problem_files("2", "2");
                manager
                    .update(ResourceKind::Problem, row.id, 1, &ResourceChanges::default(), &files)
                    .await
            })
        };
        // The row already says version 2 while its files are being written.
        files.entered.notified().await;

        let lister = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.list(ResourceKind::Problem).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!lister.is_finished());

        files.release.notify_one();
        assert!(updater.await.unwrap().unwrap_err().is_storage_failure());
        let listed = lister.await.unwrap().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].version, 1);
        for location in VersionedArtifactManager::locations(&listed[0]) {
            assert!(files.exists(&location).await.unwrap());
        }
    }

    #[tokio::test]
    async fn lock_entries_do_not_outlive_their_users() {
        let h = harness();
        for id in 1..=10_000u64 {
            let _ = h.manager.get(ResourceKind::Problem, ResourceId(id)).await;
        }
        assert_eq!(h.manager.lock_entries(), 0);

        let row = h
            .manager
            .create(ResourceKind::Problem, AUTHOR, draft(), &problem_files("1", "1"))
            .await
            .unwrap();
        h.manager.list(ResourceKind::Problem).await.unwrap();
        h.manager.read(ResourceKind::Problem, row.id, "input").await.unwrap();
        assert_eq!(h.manager.lock_entries(), 0);
    }
}
