//! Storage abstractions for Phoenix.
//!
//! Two seams, both async and both injected into the access layer as trait
//! objects: [`Table`] for relational rows and [`ArtifactStore`] for the file
//! content owned by each resource version.

pub mod artifacts;
pub mod dirlock;
pub mod layout;
pub mod memory;
pub mod records;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

use async_trait::async_trait;
use phoenix_core::error::PhoenixResult;
use phoenix_core::{JudgeRecord, ResourceId, ResourceKind};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

pub use artifacts::{FsArtifactStore, MemoryArtifactStore};
pub use dirlock::DataDirLock;
pub use layout::ArtifactLocation;
pub use memory::MemoryTable;

/// A row type stored in a [`Table`].
pub trait Record:
    Clone + PartialEq + Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
    type Key: Clone + Ord + Debug + Send + Sync;

    /// Table name, used for snapshot file names and log fields.
    const TABLE: &'static str;

    fn key(&self) -> Self::Key;
}

/// Transactional key/value-by-ID store. Every call is atomic on its own.
#[async_trait]
pub trait Table<T: Record>: Send + Sync {
    /// Allocates the next auto-increment identifier. Never reuses a value.
    async fn next_id(&self) -> PhoenixResult<u64>;

    async fn get(&self, key: &T::Key) -> PhoenixResult<Option<T>>;

    /// Inserts a new row. Fails with `Conflict` if the key is taken.
    async fn insert(&self, row: T) -> PhoenixResult<()>;

    /// Replaces the stored row with `next` iff it still equals `current`.
    ///
    /// Returns `false` (and changes nothing) when the row is gone or has
    /// been changed since `current` was read.
    async fn compare_and_swap(&self, current: &T, next: T) -> PhoenixResult<bool>;

    /// Removes a row, returning it if it existed.
    async fn delete(&self, key: &T::Key) -> PhoenixResult<Option<T>>;

    /// All rows in key order.
    async fn scan(&self) -> PhoenixResult<Vec<T>>;
}

/// Content store for resource artifacts, addressed by [`ArtifactLocation`],
/// and for the source code behind each [`JudgeRecord`].
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put(&self, location: &ArtifactLocation, content: &[u8]) -> PhoenixResult<()>;

    /// Fails with `NotFound` if nothing is stored at `location`.
    async fn get(&self, location: &ArtifactLocation) -> PhoenixResult<Vec<u8>>;

    async fn exists(&self, location: &ArtifactLocation) -> PhoenixResult<bool>;

    /// Removes every artifact of one version. Absent versions are not an error.
    async fn remove_version(
        &self,
        kind: ResourceKind,
        id: ResourceId,
        version: u32,
    ) -> PhoenixResult<()>;

    async fn put_code(&self, record: &JudgeRecord, content: &[u8]) -> PhoenixResult<()>;

    /// Fails with `NotFound` if no code was stored for `record`.
    async fn get_code(&self, record: &JudgeRecord) -> PhoenixResult<Vec<u8>>;

    /// Absent code is not an error.
    async fn remove_code(&self, record: &JudgeRecord) -> PhoenixResult<()>;
}
