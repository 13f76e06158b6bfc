mod check;
mod expand;

pub use check::{CheckEngine, CheckRequest, CheckResult, Decision};
pub use expand::{ExpandEngine, ExpandRequest, ExpandTree};

use std::future::Future;
use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::schema::EntityDefinition;
use crate::tuple::{ObjectRef, Tuple};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CheckError {
    #[error("schema does not define entity '{0}'")]
    UndefinedEntity(String),

    #[error("schema does not define '{item}' on entity '{entity}'")]
    Undefined { entity: String, item: String },

    #[error("max evaluation depth exceeded: {0}")]
    MaxDepthExceeded(usize),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl CheckError {
    pub fn undefined(entity: impl Into<String>, item: impl Into<String>) -> Self {
        Self::Undefined {
            entity: entity.into(),
            item: item.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { max_depth: 32 }
    }
}

/// Cancellation token and deadline carried by every engine request.
///
/// Both are checked immediately before each store call; expression
/// evaluation between calls is CPU-only and never suspends.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub cancel: CancellationToken,
    pub deadline: Option<Instant>,
}

impl RequestContext {
    /// A context that never cancels and never expires.
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: Some(deadline),
        }
    }

    pub fn with_cancel(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    pub fn ensure_active(&self) -> Result<(), CheckError> {
        if self.cancel.is_cancelled() {
            return Err(CheckError::Cancelled);
        }
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            return Err(CheckError::Cancelled);
        }
        Ok(())
    }
}

/// Read side of the tuple store as the engines see it. Results are ordered
/// by `(userset_entity, userset_relation)` ascending, which makes evaluation
/// order fully deterministic.
pub trait TupleReader: Send + Sync {
    fn query_tuples(
        &self,
        object: &ObjectRef,
        relation: &str,
    ) -> impl Future<Output = Result<Vec<Tuple>, CheckError>> + Send;
}

/// Entity definition lookup as the engines see it. Implementations resolve
/// through the schema manager (and its cache) or a fixed test schema.
pub trait SchemaReader: Send + Sync {
    fn entity(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Arc<EntityDefinition>, CheckError>> + Send;
}
