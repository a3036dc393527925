use uuid::Uuid;

/// Generates a collision-resistant id for a `Node`/`Workflow`/`LogEntry`.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
