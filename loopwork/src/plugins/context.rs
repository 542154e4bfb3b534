//! The context object passed to per-task plugin hooks.

/// Identifies the iteration a task-scoped hook is firing for.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task_id: String,
    pub iteration: u32,
    pub namespace: String,
}
