//! The two supported CLI tool variants and how to build their argument
//! vectors: `claude` takes the prompt positionally and needs a
//! permission-grant environment variable; `codex` reads the prompt from
//! its own standard input.

use std::path::Path;

use tokio::process::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolVariant {
    Claude,
    Codex,
}

impl ToolVariant {
    pub fn from_tool_name(name: &str) -> Self {
        match name {
            "codex" => ToolVariant::Codex,
            _ => ToolVariant::Claude,
        }
    }

    /// Build the subprocess command for this variant, given the resolved
    /// binary path and the model to request.
    pub fn build_command(&self, binary: &Path, model: &str, prompt: &str) -> Command {
        let mut command = Command::new(binary);
        match self {
            ToolVariant::Claude => {
                command.arg(prompt).arg("--model").arg(model).env("CLAUDE_DANGEROUSLY_SKIP_PERMISSIONS", "1");
            }
            ToolVariant::Codex => {
                // Prompt is piped to stdin by the caller; only the model
                // selection is passed as an argument here.
                command.arg("--model").arg(model);
            }
        }
        command
    }
}
