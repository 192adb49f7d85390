//! Fault-injecting wrappers for exercising rollback paths.

use crate::layout::ArtifactLocation;
use crate::ArtifactStore;
use async_trait::async_trait;
use phoenix_core::error::{PhoenixError, PhoenixResult};
use phoenix_core::{JudgeRecord, ResourceId, ResourceKind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Wraps an [`ArtifactStore`] and fails `put` on demand, like a full disk.
///
/// Writes can be made to fail for one specific version, for submitted code,
/// or after a budget of successful writes has been spent. Reads and removals
/// pass through.
pub struct FailingArtifactStore<S> {
    inner: S,
    faults: Mutex<Faults>,
    failures: AtomicUsize,
}

#[derive(Default)]
struct Faults {
    version: Option<u32>,
    code: bool,
    budget: Option<usize>,
}

impl<S: ArtifactStore> FailingArtifactStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            faults: Mutex::new(Faults::default()),
            failures: AtomicUsize::new(0),
        }
    }

    /// Fail every write to `version` (or stop failing with `None`).
    pub fn fail_version(&self, version: Option<u32>) {
        self.faults.lock().unwrap().version = version;
    }

    /// Fail every code write.
    pub fn fail_code(&self, fail: bool) {
        self.faults.lock().unwrap().code = fail;
    }

    /// Let `n` more writes succeed, then fail the rest.
    pub fn fail_after(&self, n: Option<usize>) {
        self.faults.lock().unwrap().budget = n;
    }

    /// Number of writes rejected so far.
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// `version` is `None` for code writes.
    fn should_fail(&self, version: Option<u32>) -> bool {
        let mut faults = self.faults.lock().unwrap();
        let targeted = match version {
            Some(v) => faults.version == Some(v),
            None => faults.code,
        };
        if targeted {
            return true;
        }
        match faults.budget.as_mut() {
            Some(0) => true,
            Some(n) => {
                *n -= 1;
                false
            }
            None => false,
        }
    }
}

#[async_trait]
impl<S: ArtifactStore> ArtifactStore for FailingArtifactStore<S> {
    async fn put(&self, location: &ArtifactLocation, content: &[u8]) -> PhoenixResult<()> {
        if self.should_fail(Some(location.version)) {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(PhoenixError::Store(format!(
                "No space left on device writing {location}"
            )));
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
        if self.should_fail(None) {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(PhoenixError::Store(format!(
                "No space left on device writing code {}",
                record.code_file_name()
            )));
        }
        self.inner.put_code(record, content).await
    }

    async fn get_code(&self, record: &JudgeRecord) -> PhoenixResult<Vec<u8>> {
        self.inner.get_code(record).await
    }

    async fn remove_code(&self, record: &JudgeRecord) -> PhoenixResult<()> {
        self.inner.remove_code(record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryArtifactStore;

    #[tokio::test]
    async fn budget_counts_down_then_fails() {
        let store = FailingArtifactStore::new(MemoryArtifactStore::new());
        store.fail_after(Some(1));
        let a = ArtifactLocation::new(ResourceKind::Tutorial, ResourceId(1), 1, "content").unwrap();
        let b = ArtifactLocation::new(ResourceKind::Tutorial, ResourceId(2), 1, "content").unwrap();

        store.put(&a, b"ok").await.unwrap();
        assert!(store.put(&b, b"full").await.is_err());
        assert_eq!(store.failures(), 1);
        assert!(!store.exists(&b).await.unwrap());
    }
}
