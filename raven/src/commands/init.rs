//! `raven init [template]` (§6): scaffold a project. Explicitly skips
//! config loading — there is nothing to resolve yet.

use std::path::Path;

const DEFAULT_RAVEN_TOML: &str = r#"[project]
name = "{name}"
language = "rust"
tasks_dir = "tasks"
task_state_file = "tasks/task-state.conf"
phases_conf = "tasks/phases.conf"
progress_file = "tasks/PROGRESS.md"
log_dir = ".raven/logs"
branch_template = "phase/{{id}}-{{slug}}"
verification_commands = ["cargo test"]

[agents.claude]
command = "claude"

[agents.codex]
command = "codex"

[review]
extensions = "\\.(rs|go|py|js|ts)$"
risk_patterns = ["auth", "crypto", "security", "migration"]
"#;

pub fn run(template: Option<String>, name: Option<String>, force: bool, project_root: &Path) -> i32 {
    if let Some(template) = &template {
        if template != "default" {
            eprintln!("unknown template '{template}' — only 'default' is built in");
            return super::EXIT_ERROR;
        }
    }

    let config_path = project_root.join("raven.toml");
    if config_path.exists() && !force {
        eprintln!("{} already exists; pass --force to overwrite", config_path.display());
        return super::EXIT_ERROR;
    }

    let project_name = name.unwrap_or_else(|| {
        project_root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "project".to_string())
    });

    let tasks_dir = project_root.join("tasks");
    if let Err(e) = std::fs::create_dir_all(&tasks_dir) {
        eprintln!("creating {}: {e}", tasks_dir.display());
        return super::EXIT_ERROR;
    }

    let toml_text = DEFAULT_RAVEN_TOML.replace("{name}", &project_name);
    if let Err(e) = std::fs::write(&config_path, toml_text) {
        eprintln!("writing {}: {e}", config_path.display());
        return super::EXIT_ERROR;
    }

    let phases_path = tasks_dir.join("phases.conf");
    if !phases_path.exists() {
        let _ = std::fs::write(&phases_path, "# id|name|first_task_id|last_task_id\n");
    }
    let state_path = tasks_dir.join("task-state.conf");
    if !state_path.exists() {
        let _ = std::fs::write(&state_path, "");
    }

    println!("Initialized raven project '{project_name}' at {}", project_root.display());
    super::EXIT_OK
}
