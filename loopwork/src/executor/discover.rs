//! Tool discovery: locate installed AI CLI binaries by walking `PATH` plus
//! a fixed list of well-known install directories, the same lookup shape
//! the teacher's daemon module uses to resolve its own executable via
//! `std::env::current_exe`.

use std::path::PathBuf;

/// The two CLI tool variants this core knows how to drive.
const KNOWN_TOOLS: &[&str] = &["claude", "codex"];

/// Directories checked when a tool isn't found on `PATH`.
fn well_known_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(home) = dirs::home_dir() {
        dirs.push(home.join(".local/bin"));
        dirs.push(home.join(".claude/local"));
    }
    dirs.push(PathBuf::from("/usr/local/bin"));
    dirs
}

/// Resolve one tool name to an absolute path, consulting `PATH` first and
/// falling back to the well-known directories.
pub fn resolve_tool(name: &str) -> Option<PathBuf> {
    if let Some(path_var) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&path_var) {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }

    for dir in well_known_dirs() {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }

    None
}

/// Every known tool that resolves to an installed binary, as `(name, path)`.
pub fn discover_tools() -> Vec<(String, PathBuf)> {
    KNOWN_TOOLS.iter().filter_map(|name| resolve_tool(name).map(|path| (name.to_string(), path))).collect()
}
