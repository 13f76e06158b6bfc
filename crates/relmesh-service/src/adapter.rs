use std::sync::Arc;

use relmesh_core::engine::{CheckError, TupleReader};
use relmesh_core::tuple::{ObjectRef, Tuple};
use relmesh_storage::{StorageError, TupleStore};

/// Bridges a `TupleStore` into the engine's `TupleReader`, translating
/// storage faults into engine error categories. Transient faults stay
/// transient so the engine never converts them into a deny.
pub struct StoreTupleReader<T: TupleStore> {
    store: Arc<T>,
}

impl<T: TupleStore> StoreTupleReader<T> {
    pub fn new(store: Arc<T>) -> Self {
        Self { store }
    }
}

impl<T: TupleStore> TupleReader for StoreTupleReader<T> {
    async fn query_tuples(
        &self,
        object: &ObjectRef,
        relation: &str,
    ) -> Result<Vec<Tuple>, CheckError> {
        self.store
            .query_tuples(object, relation)
            .await
            .map_err(storage_to_check)
    }
}

pub(crate) fn storage_to_check(err: StorageError) -> CheckError {
    match err {
        StorageError::Unavailable(message) => CheckError::Unavailable(message),
        StorageError::CircuitOpen { retry_after_ms } => {
            CheckError::Unavailable(format!("circuit open, retry after {retry_after_ms}ms"))
        }
        other => CheckError::Internal(other.to_string()),
    }
}
