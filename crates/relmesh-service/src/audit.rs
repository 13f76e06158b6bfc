pub fn audit_schema_write(version: u64, entity_count: usize) {
    tracing::info!(
        target: "audit",
        event = "schema_write",
        version = version,
        entity_count = entity_count,
        "schema written"
    );
}

pub fn audit_relationship_write(written: usize) {
    tracing::info!(
        target: "audit",
        event = "relationship_write",
        written = written,
        "relationships written"
    );
}

pub fn audit_relationship_delete(deleted: usize) {
    tracing::info!(
        target: "audit",
        event = "relationship_delete",
        deleted = deleted,
        "relationships deleted"
    );
}
