//! `raven config {debug|validate}` (§6).

use crate::config::LoadedConfig;

pub fn debug(loaded: &LoadedConfig) -> i32 {
    println!(
        "config file: {}",
        loaded
            .source_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none found — using defaults)".to_string())
    );
    println!();
    println!("{:<28} {:<12} value", "field", "source");
    for field in &loaded.provenance {
        println!("{:<28} {:<12?} {}", field.field, field.source, field.value);
    }
    if !loaded.unknown_keys.is_empty() {
        println!();
        println!("warnings:");
        for key in &loaded.unknown_keys {
            println!("  - {key}");
        }
    }
    super::EXIT_OK
}

pub fn validate(loaded: &LoadedConfig) -> i32 {
    let mut errors = Vec::new();
    let mut warnings: Vec<String> = loaded.unknown_keys.clone();

    if loaded.resolved.project.name.trim().is_empty() {
        errors.push("project.name is empty".to_string());
    }
    if loaded.resolved.project.verification_commands.is_empty() {
        warnings.push("project.verification_commands is empty — fix cycles will report verified=true trivially".to_string());
    }
    for (name, agent) in &loaded.resolved.agents {
        if agent.command.trim().is_empty() {
            errors.push(format!("agents.{name}.command is empty"));
        }
    }
    if let Err(e) = regex::Regex::new(&loaded.resolved.review.extensions) {
        errors.push(format!("review.extensions is not a valid regex: {e}"));
    }
    for pattern in &loaded.resolved.review.risk_patterns {
        if let Err(e) = regex::Regex::new(pattern) {
            errors.push(format!("review.risk_patterns entry '{pattern}' is not a valid regex: {e}"));
        }
    }

    if errors.is_empty() {
        println!("config is valid ({} warning(s))", warnings.len());
    } else {
        println!("config is INVALID ({} error(s), {} warning(s))", errors.len(), warnings.len());
    }
    for e in &errors {
        println!("  error: {e}");
    }
    for w in &warnings {
        println!("  warning: {w}");
    }

    if errors.is_empty() {
        super::EXIT_OK
    } else {
        super::EXIT_ERROR
    }
}
