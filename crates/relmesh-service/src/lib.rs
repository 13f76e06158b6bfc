//! Service layer for relmesh: the `AuthzService` façade over the check and
//! expand engines, the cached schema manager, configuration, and the error
//! categories surfaced at the boundary.

pub mod adapter;
pub mod audit;
pub mod config;
pub mod error;
pub mod manager;
pub mod service;

pub use adapter::StoreTupleReader;
pub use config::{AppConfig, ConfigError, LogFormat};
pub use error::{ApiError, ErrorKind};
pub use manager::{SchemaLoadError, SchemaManager};
pub use service::{
    AuthzService, CheckPermissionInput, CheckPermissionOutput, DeleteRelationshipsOutput,
    ExpandPermissionInput, ExpandPermissionOutput, LookupResourcesInput, LookupResourcesOutput,
    LookupSubjectsInput, LookupSubjectsOutput, WriteRelationshipsOutput, WriteSchemaOutput,
};
