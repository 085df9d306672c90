//! `raven.toml` discovery, parsing, and CLI > env > file > default
//! precedence resolution (§6, §9).
//!
//! Grounded on `swarm-agents::config::SwarmConfig`
//! env-var-driven `Default` impl for the override convention, with TOML
//! file parsing layered underneath it — the library crate only defines
//! the resolved *shape* (`raven_core::config`); the loading and
//! precedence logic, being CLI/config-file concerns (§1 Out-of-scope),
//! lives here in the binary.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use raven_core::config::{
    AgentConfig, ConfigSource, FieldProvenance, ProjectConfig, ResolvedConfig, ReviewConfig,
};

const CONFIG_FILENAME: &str = "raven.toml";

/// Everything `raven config debug`/`validate` needs, plus what every
/// other subcommand consumes to build its request types.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub resolved: ResolvedConfig,
    pub provenance: Vec<FieldProvenance>,
    pub unknown_keys: Vec<String>,
    pub source_path: Option<PathBuf>,
    pub project_root: PathBuf,
}

/// Walk upward from `start` looking for `raven.toml`, the way git walks
/// upward for `.git`.
pub fn locate_config(start: &Path) -> Option<PathBuf> {
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILENAME);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !dir.pop() {
            return None;
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Records which precedence tier supplied each resolved field. `cli`
/// wins over `env`, which wins over `file`, which wins over `default`.
struct FieldResolver {
    provenance: Vec<FieldProvenance>,
}

impl FieldResolver {
    fn new() -> Self {
        Self { provenance: Vec::new() }
    }

    fn resolve_string(
        &mut self,
        field: &str,
        env_key: &str,
        file: Option<String>,
        default: String,
    ) -> String {
        let (value, source) = if let Some(v) = env_string(env_key) {
            (v, ConfigSource::EnvVar)
        } else if let Some(v) = file {
            (v, ConfigSource::ConfigFile)
        } else {
            (default, ConfigSource::Default)
        };
        self.provenance.push(FieldProvenance {
            field: field.to_string(),
            source,
            value: value.clone(),
        });
        value
    }
}

const KNOWN_TOP_LEVEL: &[&str] = &["project", "agents", "review", "workflows"];
const KNOWN_PROJECT_KEYS: &[&str] = &[
    "name",
    "language",
    "tasks_dir",
    "task_state_file",
    "phases_conf",
    "progress_file",
    "log_dir",
    "prompt_dir",
    "branch_template",
    "verification_commands",
    "max_iterations",
    "max_limit_waits",
    "sleep_between_secs",
];
const KNOWN_AGENT_KEYS: &[&str] = &["command", "model", "effort", "prompt_template", "allowed_tools"];
const KNOWN_REVIEW_KEYS: &[&str] = &["extensions", "risk_patterns", "prompts_dir", "rules_dir", "project_brief_file"];

/// §6: "Unknown keys produce warnings" — collected rather than rejected,
/// so a project can carry forward-compatible config without breaking.
fn collect_unknown_keys(raw: &toml::Value) -> Vec<String> {
    let mut unknown = Vec::new();
    let Some(table) = raw.as_table() else {
        return unknown;
    };
    for key in table.keys() {
        if !KNOWN_TOP_LEVEL.contains(&key.as_str()) {
            unknown.push(format!("unknown top-level key: {key}"));
        }
    }
    if let Some(project) = table.get("project").and_then(|v| v.as_table()) {
        for key in project.keys() {
            if !KNOWN_PROJECT_KEYS.contains(&key.as_str()) {
                unknown.push(format!("unknown [project] key: {key}"));
            }
        }
    }
    if let Some(agents) = table.get("agents").and_then(|v| v.as_table()) {
        for (name, agent) in agents {
            if let Some(agent) = agent.as_table() {
                for key in agent.keys() {
                    if !KNOWN_AGENT_KEYS.contains(&key.as_str()) {
                        unknown.push(format!("unknown [agents.{name}] key: {key}"));
                    }
                }
            }
        }
    }
    if let Some(review) = table.get("review").and_then(|v| v.as_table()) {
        for key in review.keys() {
            if !KNOWN_REVIEW_KEYS.contains(&key.as_str()) {
                unknown.push(format!("unknown [review] key: {key}"));
            }
        }
    }
    unknown
}

fn str_at<'a>(table: &'a toml::Value, key: &str) -> Option<&'a str> {
    table.get(key).and_then(|v| v.as_str())
}

fn string_list_at(table: &toml::Value, key: &str) -> Option<Vec<String>> {
    table.get(key).and_then(|v| v.as_array()).map(|arr| {
        arr.iter()
            .filter_map(|v| v.as_str().map(|s| s.to_string()))
            .collect()
    })
}

/// Load, parse, and fully resolve `raven.toml` (if present) against
/// environment overrides and built-in defaults, starting the upward
/// walk at `start_dir` unless `explicit_path` names a file directly.
pub fn load(explicit_path: Option<&Path>, start_dir: &Path) -> anyhow::Result<LoadedConfig> {
    let source_path = match explicit_path {
        Some(p) => Some(p.to_path_buf()),
        None => locate_config(start_dir),
    };

    let raw_text = match &source_path {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?,
        None => String::new(),
    };
    let raw: toml::Value = if raw_text.is_empty() {
        toml::Value::Table(Default::default())
    } else {
        raw_text
            .parse::<toml::Value>()
            .map_err(|e| anyhow::anyhow!("parsing raven.toml: {e}"))?
    };
    let unknown_keys = collect_unknown_keys(&raw);

    let project_root = source_path
        .as_ref()
        .and_then(|p| p.parent())
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| start_dir.to_path_buf());

    let project_table = raw.get("project").cloned().unwrap_or(toml::Value::Table(Default::default()));
    let defaults = ProjectConfig::default();
    let mut resolver = FieldResolver::new();

    let name = resolver.resolve_string(
        "project.name",
        "RAVEN_PROJECT_NAME",
        str_at(&project_table, "name").map(String::from),
        defaults.name.clone(),
    );
    let language = resolver.resolve_string(
        "project.language",
        "RAVEN_PROJECT_LANGUAGE",
        str_at(&project_table, "language").map(String::from),
        defaults.language.clone(),
    );
    let tasks_dir = resolver.resolve_string(
        "project.tasks_dir",
        "RAVEN_TASKS_DIR",
        str_at(&project_table, "tasks_dir").map(String::from),
        defaults.tasks_dir.display().to_string(),
    );
    let task_state_file = resolver.resolve_string(
        "project.task_state_file",
        "RAVEN_TASK_STATE_FILE",
        str_at(&project_table, "task_state_file").map(String::from),
        defaults.task_state_file.display().to_string(),
    );
    let phases_conf = resolver.resolve_string(
        "project.phases_conf",
        "RAVEN_PHASES_CONF",
        str_at(&project_table, "phases_conf").map(String::from),
        defaults.phases_conf.display().to_string(),
    );
    let progress_file = resolver.resolve_string(
        "project.progress_file",
        "RAVEN_PROGRESS_FILE",
        str_at(&project_table, "progress_file").map(String::from),
        defaults.progress_file.display().to_string(),
    );
    let log_dir = resolver.resolve_string(
        "project.log_dir",
        "RAVEN_LOG_DIR",
        str_at(&project_table, "log_dir").map(String::from),
        defaults.log_dir.display().to_string(),
    );
    let branch_template = resolver.resolve_string(
        "project.branch_template",
        "RAVEN_BRANCH_TEMPLATE",
        str_at(&project_table, "branch_template").map(String::from),
        defaults.branch_template.clone(),
    );
    let prompt_dir = str_at(&project_table, "prompt_dir").map(PathBuf::from);
    let verification_commands = string_list_at(&project_table, "verification_commands").unwrap_or_default();

    let max_iterations: u32 = env_string("RAVEN_MAX_ITERATIONS")
        .and_then(|v| v.parse().ok())
        .or_else(|| project_table.get("max_iterations").and_then(|v| v.as_integer()).map(|v| v as u32))
        .unwrap_or(500);
    let max_limit_waits: u32 = env_string("RAVEN_MAX_LIMIT_WAITS")
        .and_then(|v| v.parse().ok())
        .or_else(|| project_table.get("max_limit_waits").and_then(|v| v.as_integer()).map(|v| v as u32))
        .unwrap_or(5);
    let sleep_between_secs: u64 = env_string("RAVEN_SLEEP_BETWEEN_SECS")
        .and_then(|v| v.parse().ok())
        .or_else(|| project_table.get("sleep_between_secs").and_then(|v| v.as_integer()).map(|v| v as u64))
        .unwrap_or(0);

    let project = ProjectConfig {
        name,
        language,
        tasks_dir: PathBuf::from(tasks_dir),
        task_state_file: PathBuf::from(task_state_file),
        phases_conf: PathBuf::from(phases_conf),
        progress_file: PathBuf::from(progress_file),
        log_dir: PathBuf::from(log_dir),
        prompt_dir,
        branch_template,
        verification_commands,
    };

    let mut agents: HashMap<String, AgentConfig> = HashMap::new();
    if let Some(table) = raw.get("agents").and_then(|v| v.as_table()) {
        for (name, value) in table {
            agents.insert(
                name.clone(),
                AgentConfig {
                    command: str_at(value, "command").unwrap_or(name).to_string(),
                    model: str_at(value, "model").map(String::from),
                    effort: str_at(value, "effort").map(String::from),
                    prompt_template: str_at(value, "prompt_template").map(String::from),
                    allowed_tools: str_at(value, "allowed_tools").map(String::from),
                },
            );
        }
    }
    for builtin in ["claude", "codex"] {
        agents.entry(builtin.to_string()).or_insert_with(|| AgentConfig {
            command: builtin.to_string(),
            model: None,
            effort: None,
            prompt_template: None,
            allowed_tools: None,
        });
    }

    let review_table = raw.get("review").cloned().unwrap_or(toml::Value::Table(Default::default()));
    let review_defaults = ReviewConfig::default();
    let review = ReviewConfig {
        extensions: resolver.resolve_string(
            "review.extensions",
            "RAVEN_REVIEW_EXTENSIONS",
            str_at(&review_table, "extensions").map(String::from),
            review_defaults.extensions.clone(),
        ),
        risk_patterns: string_list_at(&review_table, "risk_patterns").unwrap_or(review_defaults.risk_patterns),
        prompts_dir: str_at(&review_table, "prompts_dir").map(PathBuf::from),
        rules_dir: str_at(&review_table, "rules_dir").map(PathBuf::from),
        project_brief_file: str_at(&review_table, "project_brief_file").map(PathBuf::from),
    };

    let resolved = ResolvedConfig {
        project,
        agents,
        review,
        max_iterations,
        max_limit_waits,
        sleep_between_secs,
    };

    Ok(LoadedConfig {
        resolved,
        provenance: resolver.provenance,
        unknown_keys,
        source_path,
        project_root,
    })
}

/// Read a project's brief/rules text for the review pipeline, tolerating
/// either file being absent (empty string rather than an error — a
/// project need not have authored either yet).
pub fn read_optional(path: Option<&Path>) -> String {
    path.and_then(|p| std::fs::read_to_string(p).ok()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_config_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let loaded = load(None, dir.path()).unwrap();
        assert_eq!(loaded.resolved.project.name, "project");
        assert!(loaded.source_path.is_none());
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("raven.toml"),
            "[project]\nname = \"acme\"\nlanguage = \"rust\"\n",
        )
        .unwrap();
        let loaded = load(None, dir.path()).unwrap();
        assert_eq!(loaded.resolved.project.name, "acme");
        assert_eq!(
            loaded
                .provenance
                .iter()
                .find(|p| p.field == "project.name")
                .unwrap()
                .source,
            ConfigSource::ConfigFile
        );
    }

    #[test]
    fn unknown_keys_are_collected_not_rejected() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("raven.toml"),
            "[project]\nname = \"acme\"\nbogus_key = 1\n",
        )
        .unwrap();
        let loaded = load(None, dir.path()).unwrap();
        assert_eq!(loaded.resolved.project.name, "acme");
        assert!(loaded.unknown_keys.iter().any(|k| k.contains("bogus_key")));
    }

    #[test]
    fn env_var_beats_file_value() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("raven.toml"),
            "[project]\nname = \"from-file\"\n",
        )
        .unwrap();
        std::env::set_var("RAVEN_PROJECT_NAME", "from-env");
        let loaded = load(None, dir.path()).unwrap();
        std::env::remove_var("RAVEN_PROJECT_NAME");
        assert_eq!(loaded.resolved.project.name, "from-env");
    }
}
