//! Prompt assembly (§4.7.1): a deterministic template built from a task's
//! title and description, with heuristic success criteria and an optional
//! retry context section. No templating engine is needed here — the
//! sections are fixed and the substitutions are plain string interpolation,
//! the same simple-string-replacement idiom the teacher's loop engine uses
//! for its own iteration prompts.

use taskstore::Task;

/// Context carried forward from a prior failed attempt on the same task,
/// attached to the prompt on retry.
#[derive(Debug, Clone)]
pub struct RetryContext {
    pub attempt: u32,
    /// Last 1 KiB of the previous attempt's combined output.
    pub previous_output_tail: String,
}

/// Build the prompt markdown for one iteration against `task`.
pub fn build_prompt(task: &Task, retry: Option<&RetryContext>) -> String {
    let mut sections = Vec::new();

    sections.push(format!("# Task {}", task.id));
    sections.push(format!("## Title\n{}", task.title));

    sections.push(format!(
        "## PRD\n{}",
        if task.description.is_empty() { "(no description provided)" } else { &task.description }
    ));

    sections.push(format!("## Success Criteria\n{}", success_criteria(task)));
    sections.push(format!("## Failure Criteria\n{}", failure_criteria()));
    sections.push(format!("## Instructions\n{}", instructions()));

    if let Some(retry) = retry {
        sections.push(format!(
            "## Previous Attempt Context\nAttempt {} failed. Last output:\n```\n{}\n```",
            retry.attempt, retry.previous_output_tail
        ));
    }

    sections.join("\n\n") + "\n"
}

/// Heuristic success criteria generated from keywords in title + description,
/// falling back to a generic default when nothing matches.
fn success_criteria(task: &Task) -> String {
    let haystack = format!("{} {}", task.title, task.description).to_lowercase();
    let mut criteria = Vec::new();

    if haystack.contains("test") {
        criteria.push("- All relevant tests pass");
    }
    if haystack.contains("api") || haystack.contains("endpoint") {
        criteria.push("- The API endpoint behaves as described and returns correct status codes");
    }
    if haystack.contains("ui") || haystack.contains("component") {
        criteria.push("- The UI component renders correctly and matches the described behavior");
    }
    if haystack.contains("database") || haystack.contains("migration") {
        criteria.push("- Database schema changes apply cleanly and migrations are reversible");
    }
    if haystack.contains("fix") || haystack.contains("bug") {
        criteria.push("- The reported bug no longer reproduces");
    }
    if haystack.contains("refactor") {
        criteria.push("- Behavior is unchanged and the code is easier to follow");
    }

    if criteria.is_empty() {
        "- The task's description is fully addressed\n- The change builds and existing tests still pass".to_string()
    } else {
        criteria.join("\n")
    }
}

fn failure_criteria() -> &'static str {
    "- Tests fail or the build breaks\n- The change is incomplete relative to the description\n- Unrelated functionality regresses"
}

fn instructions() -> &'static str {
    "Work directly in this repository. Make the smallest change that satisfies the success \
criteria above. When finished, ensure the validation command for this project passes."
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use taskstore::{Priority, TaskStatus, Timestamps};

    fn task(title: &str, description: &str) -> Task {
        Task {
            id: "TASK-001".to_string(),
            title: title.to_string(),
            description: description.to_string(),
            status: TaskStatus::Pending,
            priority: Priority::Medium,
            feature: None,
            parent_id: None,
            depends_on: vec![],
            scheduled_for: None,
            failure_count: 0,
            last_error: None,
            labels: vec![],
            metadata: HashMap::new(),
            timestamps: Timestamps::default(),
            events: vec![],
        }
    }

    #[test]
    fn includes_task_id_and_title() {
        let t = task("Add login form", "");
        let prompt = build_prompt(&t, None);
        assert!(prompt.contains("# Task TASK-001"));
        assert!(prompt.contains("Add login form"));
    }

    #[test]
    fn test_keyword_triggers_test_criteria() {
        let t = task("Add tests for parser", "");
        let prompt = build_prompt(&t, None);
        assert!(prompt.contains("All relevant tests pass"));
    }

    #[test]
    fn no_keyword_match_uses_default_criteria() {
        let t = task("Improve the onboarding flow", "polish the copy");
        let prompt = build_prompt(&t, None);
        assert!(prompt.contains("fully addressed"));
    }

    #[test]
    fn retry_context_appends_section_only_when_present() {
        let t = task("Fix crash", "");
        let without = build_prompt(&t, None);
        assert!(!without.contains("Previous Attempt Context"));

        let retry = RetryContext { attempt: 2, previous_output_tail: "panic: index out of bounds".into() };
        let with = build_prompt(&t, Some(&retry));
        assert!(with.contains("Previous Attempt Context"));
        assert!(with.contains("panic: index out of bounds"));
    }
}
