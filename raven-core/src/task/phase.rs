//! Phase loader: a contiguous range of task IDs grouping related work,
//! parsed from a 4-field or 6-field pipe-delimited config file with the
//! format auto-detected per file (§3, §4.4).

use std::path::Path;

use super::Task;
use crate::error::{RavenError, RavenResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phase {
    pub id: i64,
    pub name: String,
    pub first_task_id: String,
    pub last_task_id: String,
    /// Present only in the 6-field extended variant; `None` when loaded
    /// from the 4-field format.
    pub description: Option<String>,
    pub agent_hint: Option<String>,
}

impl Phase {
    fn first_number(&self) -> u32 {
        Task::id_number(&self.first_task_id).unwrap_or(0)
    }

    fn last_number(&self) -> u32 {
        Task::id_number(&self.last_task_id).unwrap_or(0)
    }

    pub fn contains_task(&self, task_id: &str) -> bool {
        match Task::id_number(task_id) {
            Some(n) => n >= self.first_number() && n <= self.last_number(),
            None => false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PhaseConfig {
    phases: Vec<Phase>,
}

impl PhaseConfig {
    /// Load and sort-by-id a `phases.conf` file, auto-detecting the
    /// 4-field (`id|name|first|last`) or 6-field extended format from
    /// the first non-empty, non-comment line. Rejects overlapping task-ID
    /// ranges across phases (§3: "Phase ranges MUST NOT overlap").
    pub fn load(path: &Path) -> RavenResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| RavenError::io(path, e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> RavenResult<Self> {
        let mut phases = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            phases.push(parse_phase_line(line)?);
        }
        phases.sort_by_key(|p| p.id);
        reject_overlaps(&phases)?;
        Ok(Self { phases })
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn phase_by_id(&self, id: i64) -> Option<&Phase> {
        self.phases.iter().find(|p| p.id == id)
    }

    pub fn phase_for_task(&self, task_id: &str) -> Option<&Phase> {
        self.phases.iter().find(|p| p.contains_task(task_id))
    }

    pub fn tasks_in_phase<'a>(&self, id: i64, all_tasks: &'a [Task]) -> Vec<&'a Task> {
        let Some(phase) = self.phase_by_id(id) else {
            return Vec::new();
        };
        all_tasks
            .iter()
            .filter(|t| phase.contains_task(&t.id))
            .collect()
    }

    pub fn task_id_number(id: &str) -> Option<u32> {
        Task::id_number(id)
    }
}

fn parse_phase_line(line: &str) -> RavenResult<Phase> {
    let fields: Vec<&str> = line.split('|').map(|f| f.trim()).collect();
    match fields.len() {
        4 => {
            let id = fields[0]
                .parse()
                .map_err(|_| RavenError::InvalidInput(format!("bad phase id: {}", fields[0])))?;
            Ok(Phase {
                id,
                name: fields[1].to_string(),
                first_task_id: fields[2].to_string(),
                last_task_id: fields[3].to_string(),
                description: None,
                agent_hint: None,
            })
        }
        6 => {
            let id = fields[0]
                .parse()
                .map_err(|_| RavenError::InvalidInput(format!("bad phase id: {}", fields[0])))?;
            Ok(Phase {
                id,
                name: fields[1].to_string(),
                first_task_id: fields[2].to_string(),
                last_task_id: fields[3].to_string(),
                description: non_empty(fields[4]),
                agent_hint: non_empty(fields[5]),
            })
        }
        n => Err(RavenError::InvalidInput(format!(
            "phase line has {n} fields, expected 4 or 6: {line}"
        ))),
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn reject_overlaps(phases: &[Phase]) -> RavenResult<()> {
    for i in 0..phases.len() {
        for j in (i + 1)..phases.len() {
            let (a, b) = (&phases[i], &phases[j]);
            if a.first_number() <= b.last_number() && b.first_number() <= a.last_number() {
                return Err(RavenError::InvalidInput(format!(
                    "phase {} ({}-{}) overlaps phase {} ({}-{})",
                    a.id, a.first_task_id, a.last_task_id, b.id, b.first_task_id, b.last_task_id
                )));
            }
        }
    }
    Ok(())
}
