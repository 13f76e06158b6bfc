//! Core of the relmesh authorization engine: the schema DSL (lexer, parser,
//! typed definitions), the relation-tuple model, and the check/expand
//! evaluation engines. Storage backends and the service façade live in the
//! sibling crates.

pub mod engine;
pub mod schema;
pub mod tuple;
