//! Task spec file parser: extracts a [`Task`] from a per-task markdown
//! file discovered under a configured tasks directory.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use super::{Task, MAX_TASK_FILE_BYTES};
use crate::error::{RavenError, RavenResult};

/// Result of attempting to parse one discovered file.
pub enum TaskParseOutcome {
    Task(Task),
    /// Sentinel for "not a task file" — discovery should skip it without
    /// treating it as an error (§4.4).
    NotATask,
}

fn id_from_filename_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"T-(\d+)").unwrap())
}

fn id_heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^#\s*(T-\d+)\s*:\s*(.+)$").unwrap())
}

fn dependencies_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?mi)^\*\*Dependencies:\*\*\s*(.+)$").unwrap())
}

/// Strip a UTF-8 BOM and normalize CRLF to LF (§3: "BOM/CRLF
/// normalized").
fn normalize_text(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let text = text.strip_prefix('\u{feff}').unwrap_or(&text);
    text.replace("\r\n", "\n")
}

/// Parse one task-spec file. Returns [`TaskParseOutcome::NotATask`] when
/// the file has no discoverable `T-NNN` id (filename or heading) rather
/// than erroring, so directory discovery can skip non-task files.
pub fn parse_task_file(path: &Path) -> RavenResult<TaskParseOutcome> {
    let metadata = std::fs::metadata(path).map_err(|e| RavenError::io(path, e))?;
    if metadata.len() as usize >= MAX_TASK_FILE_BYTES {
        return Err(RavenError::InvalidInput(format!(
            "task file {} exceeds the {MAX_TASK_FILE_BYTES}-byte cap",
            path.display()
        )));
    }

    let raw = std::fs::read(path).map_err(|e| RavenError::io(path, e))?;
    let text = normalize_text(&raw);

    let filename = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();

    let (id, title) = if let Some(caps) = id_heading_re().captures(&text) {
        (caps[1].to_string(), caps[2].trim().to_string())
    } else if let Some(caps) = id_from_filename_re().captures(filename) {
        let id = format!("T-{}", &caps[1]);
        let title = filename.to_string();
        (id, title)
    } else {
        return Ok(TaskParseOutcome::NotATask);
    };

    let dependencies = dependencies_re()
        .captures(&text)
        .map(|caps| {
            caps[1]
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();

    Ok(TaskParseOutcome::Task(Task {
        id,
        title,
        spec_text: text,
        dependencies,
    }))
}

/// Recursively discover and parse every task file under `dir`.
/// Non-task files (no recoverable id) are silently skipped.
pub fn discover_tasks(dir: &Path) -> RavenResult<Vec<Task>> {
    let mut tasks = Vec::new();
    if !dir.exists() {
        return Ok(tasks);
    }
    let walker = ignore::WalkBuilder::new(dir).hidden(false).build();
    for entry in walker {
        let entry = entry.map_err(|e| RavenError::InvalidInput(e.to_string()))?;
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }
        if let TaskParseOutcome::Task(task) = parse_task_file(path)? {
            tasks.push(task);
        }
    }
    tasks.sort_by_key(|t| Task::id_number(&t.id).unwrap_or(u32::MAX));
    Ok(tasks)
}
