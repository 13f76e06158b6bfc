use std::future::Future;

use relmesh_core::tuple::{ObjectRef, Subject, Tuple, TupleFilter};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("unique constraint violated: {0}")]
    UniqueConstraint(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("circuit open, retry after {retry_after_ms}ms")]
    CircuitOpen { retry_after_ms: u64 },

    #[error("internal storage error: {0}")]
    Internal(String),
}

impl StorageError {
    /// Transient errors are the ones worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Unavailable(_))
    }
}

/// Relation-tuple persistence as the engine and service consume it.
///
/// `query_tuples` returns its results ordered by
/// `(userset_entity, userset_relation)` ascending; evaluation relies on that
/// ordering for determinism. `write` is all-or-nothing within a single call.
pub trait TupleStore: Send + Sync {
    /// Idempotent schema bring-up on the backend.
    fn migrate(&self) -> impl Future<Output = Result<(), StorageError>> + Send;

    fn query_tuples(
        &self,
        object: &ObjectRef,
        relation: &str,
    ) -> impl Future<Output = Result<Vec<Tuple>, StorageError>> + Send;

    /// Tuples whose userset side matches `subject`, for reverse traversals.
    fn reverse_query_tuples(
        &self,
        subject: &Subject,
    ) -> impl Future<Output = Result<Vec<Tuple>, StorageError>> + Send;

    fn read(
        &self,
        filter: &TupleFilter,
    ) -> impl Future<Output = Result<Vec<Tuple>, StorageError>> + Send;

    fn write(
        &self,
        tuples: &[Tuple],
    ) -> impl Future<Output = Result<usize, StorageError>> + Send;

    /// Deletes exactly the given tuples, returning how many existed.
    fn delete(
        &self,
        tuples: &[Tuple],
    ) -> impl Future<Output = Result<usize, StorageError>> + Send;
}

/// One entity's persisted configuration: its DSL text and the schema version
/// it was written at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityConfig {
    pub name: String,
    pub serialized: String,
    pub version: u64,
}

/// Persistence of entity definitions, replaced wholesale on each schema
/// write at a new monotonic version.
pub trait SchemaStore: Send + Sync {
    fn migrate(&self) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Replaces the stored schema with `configs`, stamping and returning the
    /// new version.
    fn write_entity_configs(
        &self,
        configs: &[EntityConfig],
    ) -> impl Future<Output = Result<u64, StorageError>> + Send;

    fn read_entity_config(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<EntityConfig, StorageError>> + Send;

    fn read_entity_configs(
        &self,
    ) -> impl Future<Output = Result<Vec<EntityConfig>, StorageError>> + Send;
}
