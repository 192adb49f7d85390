//! Access control and versioned artifact management.
//!
//! - [`ledger`] -- organizations and the user/organization membership ledger
//! - [`evaluator`] -- graduated read/write permission decisions
//! - [`versioned`] -- row + artifact consistency for problems and tutorials
//! - [`judging`] -- judge records and the submitted code behind them
//! - [`catalog`] -- permission-checked resource operations for request handlers

pub mod catalog;
pub mod evaluator;
pub mod judging;
pub mod ledger;
pub mod versioned;

pub use catalog::{Catalog, ListQuery, Page, ResourceView};
pub use evaluator::{PermissionEvaluator, Requirement};
pub use judging::JudgeLog;
pub use ledger::{Member, MembershipLedger, OrganizationView, Standing};
pub use versioned::VersionedArtifactManager;

use phoenix_core::error::PhoenixResult;
use phoenix_core::{JudgeRecord, Membership, Organization, PhoenixConfig, VersionedResource};
use phoenix_store::{
    ArtifactStore, DataDirLock, FsArtifactStore, MemoryArtifactStore, MemoryTable, Table,
};
use std::sync::Arc;

/// Fully wired access layer.
pub struct Phoenix {
    pub ledger: Arc<MembershipLedger>,
    pub catalog: Catalog,
    /// Exclusive hold on the data directory, released on drop.
    _lock: Option<DataDirLock>,
}

impl std::fmt::Debug for Phoenix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Phoenix")
            .field("lock", &self._lock)
            .finish_non_exhaustive()
    }
}

impl Phoenix {
    /// File-backed tables and artifacts rooted at `config.data_dir`.
    ///
    /// Waits up to `config.lock_timeout()` while another process has the
    /// same data directory open, then fails with `Conflict`.
    pub async fn open(config: &PhoenixConfig) -> PhoenixResult<Self> {
        let lock = DataDirLock::acquire(&config.data_dir, config.lock_timeout()).await?;
        let state = config.state_dir();
        let organizations: Arc<dyn Table<Organization>> =
            Arc::new(MemoryTable::<Organization>::open(&state).await?);
        let memberships: Arc<dyn Table<Membership>> =
            Arc::new(MemoryTable::<Membership>::open(&state).await?);
        let resources: Arc<dyn Table<VersionedResource>> =
            Arc::new(MemoryTable::<VersionedResource>::open(&state).await?);
        let records: Arc<dyn Table<JudgeRecord>> =
            Arc::new(MemoryTable::<JudgeRecord>::open(&state).await?);
        let artifacts: Arc<dyn ArtifactStore> =
            Arc::new(FsArtifactStore::new(config.resource_dir()));

        tracing::info!(data_dir = %config.data_dir.display(), "opened phoenix state");
        let mut phoenix = Self::assemble(
            organizations,
            memberships,
            resources,
            records,
            artifacts,
            config.page_size,
        );
        phoenix._lock = Some(lock);
        Ok(phoenix)
    }

    /// Everything in memory.
    pub fn in_memory() -> Self {
        Self::with_artifacts(Arc::new(MemoryArtifactStore::new()))
    }

    /// In-memory tables over the given artifact store.
    pub fn with_artifacts(artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self::assemble(
            Arc::new(MemoryTable::<Organization>::new()),
            Arc::new(MemoryTable::<Membership>::new()),
            Arc::new(MemoryTable::<VersionedResource>::new()),
            Arc::new(MemoryTable::<JudgeRecord>::new()),
            artifacts,
            phoenix_core::config::DEFAULT_PAGE_SIZE,
        )
    }

    fn assemble(
        organizations: Arc<dyn Table<Organization>>,
        memberships: Arc<dyn Table<Membership>>,
        resources: Arc<dyn Table<VersionedResource>>,
        records: Arc<dyn Table<JudgeRecord>>,
        artifacts: Arc<dyn ArtifactStore>,
        page_size: usize,
    ) -> Self {
        let ledger = Arc::new(MembershipLedger::new(organizations, memberships));
        let manager = VersionedArtifactManager::new(resources, artifacts.clone());
        let judge = JudgeLog::new(records, artifacts);
        let catalog = Catalog::new(ledger.clone(), manager, judge).with_page_size(page_size);
        Self {
            ledger,
            catalog,
            _lock: None,
        }
    }
}
