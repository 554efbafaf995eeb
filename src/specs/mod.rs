//! Job specification types: the tagged sum of `Job`, `JobArray` and `JobGroup`,
//! plus the resource-request types nested inside a `Job`.

mod resource;

pub use resource::{License, Memory, Resources};

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raised when a spec fails validation. Carries enough context for the CLI
/// to print a precise diagnostic (variant name, offending field, message).
#[derive(Debug, Error)]
#[error("issue in {variant} specification field '{field}': {message}")]
pub struct SpecError {
    pub variant: &'static str,
    pub field: &'static str,
    pub message: String,
}

impl SpecError {
    fn new(variant: &'static str, field: &'static str, message: impl Into<String>) -> Self {
        SpecError {
            variant,
            field,
            message: message.into(),
        }
    }
}

/// A job specification: either a single leaf process, a repeated array of
/// sub-specs, or a group of sub-specs run once each.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Spec {
    #[serde(rename = "Job")]
    Job(Job),
    #[serde(rename = "JobArray")]
    JobArray(JobArray),
    #[serde(rename = "JobGroup")]
    JobGroup(JobGroup),
}

impl Spec {
    pub fn id(&self) -> Option<&str> {
        match self {
            Spec::Job(j) => j.id.as_deref(),
            Spec::JobArray(j) => j.id.as_deref(),
            Spec::JobGroup(j) => j.id.as_deref(),
        }
    }

    pub fn set_id(&mut self, id: String) {
        match self {
            Spec::Job(j) => j.id = Some(id),
            Spec::JobArray(j) => j.id = Some(id),
            Spec::JobGroup(j) => j.id = Some(id),
        }
    }

    pub fn env(&self) -> &HashMap<String, String> {
        match self {
            Spec::Job(j) => &j.env,
            Spec::JobArray(j) => &j.env,
            Spec::JobGroup(j) => &j.env,
        }
    }

    pub fn set_env(&mut self, env: HashMap<String, String>) {
        match self {
            Spec::Job(j) => j.env = env,
            Spec::JobArray(j) => j.env = env,
            Spec::JobGroup(j) => j.env = env,
        }
    }

    pub fn cwd(&self) -> Option<&str> {
        match self {
            Spec::Job(j) => j.cwd.as_deref(),
            Spec::JobArray(j) => j.cwd.as_deref(),
            Spec::JobGroup(j) => j.cwd.as_deref(),
        }
    }

    pub fn set_cwd(&mut self, cwd: Option<String>) {
        match self {
            Spec::Job(j) => j.cwd = cwd,
            Spec::JobArray(j) => j.cwd = cwd,
            Spec::JobGroup(j) => j.cwd = cwd,
        }
    }

    pub fn on_pass(&self) -> &[String] {
        match self {
            Spec::Job(j) => &j.on_pass,
            Spec::JobArray(j) => &j.on_pass,
            Spec::JobGroup(j) => &j.on_pass,
        }
    }

    pub fn on_fail(&self) -> &[String] {
        match self {
            Spec::Job(j) => &j.on_fail,
            Spec::JobArray(j) => &j.on_fail,
            Spec::JobGroup(j) => &j.on_fail,
        }
    }

    pub fn on_done(&self) -> &[String] {
        match self {
            Spec::Job(j) => &j.on_done,
            Spec::JobArray(j) => &j.on_done,
            Spec::JobGroup(j) => &j.on_done,
        }
    }

    /// Total number of leaf `Job`s this spec will expand into.
    pub fn expected_jobs(&self) -> u32 {
        match self {
            Spec::Job(_) => 1,
            Spec::JobArray(a) => a.repeats * a.jobs.iter().map(Spec::expected_jobs).sum::<u32>(),
            Spec::JobGroup(g) => g.jobs.iter().map(Spec::expected_jobs).sum(),
        }
    }

    /// Child specs of a composite; empty for a leaf `Job`.
    pub fn jobs(&self) -> &[Spec] {
        match self {
            Spec::Job(_) => &[],
            Spec::JobArray(a) => &a.jobs,
            Spec::JobGroup(g) => &g.jobs,
        }
    }

    pub fn is_composite(&self) -> bool {
        !matches!(self, Spec::Job(_))
    }

    /// Recursively validates this spec and every descendant.
    pub fn check(&self) -> Result<(), SpecError> {
        match self {
            Spec::Job(j) => j.check(),
            Spec::JobArray(a) => a.check(),
            Spec::JobGroup(g) => g.check(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Job {
    pub id: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub cwd: Option<String>,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub resources: Resources,
    #[serde(default)]
    pub on_fail: Vec<String>,
    #[serde(default)]
    pub on_pass: Vec<String>,
    #[serde(default)]
    pub on_done: Vec<String>,
}

impl Job {
    fn check(&self) -> Result<(), SpecError> {
        if self.command.trim().is_empty() {
            return Err(SpecError::new(
                "Job",
                "command",
                "command must not be empty",
            ));
        }
        if let Some(id) = &self.id {
            if id.trim().is_empty() {
                return Err(SpecError::new("Job", "id", "id must not be blank if set"));
            }
        }
        self.resources.check()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobArray {
    pub id: Option<String>,
    #[serde(default = "default_repeats")]
    pub repeats: u32,
    #[serde(default)]
    pub jobs: Vec<Spec>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub cwd: Option<String>,
    #[serde(default)]
    pub on_fail: Vec<String>,
    #[serde(default)]
    pub on_pass: Vec<String>,
    #[serde(default)]
    pub on_done: Vec<String>,
}

fn default_repeats() -> u32 {
    1
}

impl JobArray {
    fn check(&self) -> Result<(), SpecError> {
        if self.repeats < 1 {
            return Err(SpecError::new(
                "JobArray",
                "repeats",
                "repeats must be at least 1",
            ));
        }
        check_no_duplicate_ids("JobArray", &self.jobs)?;
        for job in &self.jobs {
            job.check()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobGroup {
    pub id: Option<String>,
    #[serde(default)]
    pub jobs: Vec<Spec>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub cwd: Option<String>,
    #[serde(default)]
    pub on_fail: Vec<String>,
    #[serde(default)]
    pub on_pass: Vec<String>,
    #[serde(default)]
    pub on_done: Vec<String>,
}

impl JobGroup {
    fn check(&self) -> Result<(), SpecError> {
        check_no_duplicate_ids("JobGroup", &self.jobs)?;
        for job in &self.jobs {
            job.check()?;
        }
        Ok(())
    }
}

/// Sibling ids must be unique within a composite's direct `jobs` list — a
/// repeated explicit id would collide in the parent Tier's child map.
/// Blank ids are exempt here since they're synthesized as distinct `T<index>`
/// values before any collision can occur.
fn check_no_duplicate_ids(variant: &'static str, jobs: &[Spec]) -> Result<(), SpecError> {
    let mut seen = std::collections::HashSet::new();
    for job in jobs {
        if let Some(id) = job.id() {
            if !seen.insert(id) {
                return Err(SpecError::new(
                    variant,
                    "jobs",
                    format!("duplicate sibling id '{id}'"),
                ));
            }
        }
    }
    Ok(())
}

/// Loads and validates a spec tree from a YAML file.
pub fn load(path: &PathBuf) -> anyhow::Result<Spec> {
    let text = std::fs::read_to_string(path)?;
    let spec: Spec = serde_yaml::from_str(&text)?;
    spec.check()?;
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(id: &str) -> Spec {
        Spec::Job(Job {
            id: Some(id.to_string()),
            command: "true".to_string(),
            ..Default::default()
        })
    }

    #[test]
    fn expected_jobs_single() {
        assert_eq!(leaf("a").expected_jobs(), 1);
    }

    #[test]
    fn expected_jobs_array() {
        let arr = Spec::JobArray(JobArray {
            repeats: 3,
            jobs: vec![leaf("a"), leaf("b")],
            ..Default::default()
        });
        assert_eq!(arr.expected_jobs(), 6);
    }

    #[test]
    fn expected_jobs_nested_group_in_array() {
        let group = Spec::JobGroup(JobGroup {
            jobs: vec![leaf("a"), leaf("b")],
            ..Default::default()
        });
        let arr = Spec::JobArray(JobArray {
            repeats: 2,
            jobs: vec![group],
            ..Default::default()
        });
        assert_eq!(arr.expected_jobs(), 4);
    }

    #[test]
    fn job_requires_command() {
        let job = Job {
            command: "".to_string(),
            ..Default::default()
        };
        assert!(job.check().is_err());
    }

    #[test]
    fn duplicate_sibling_id_is_rejected() {
        let group = JobGroup {
            jobs: vec![leaf("a"), leaf("a")],
            ..Default::default()
        };
        assert!(group.check().is_err());
    }

    #[test]
    fn blank_sibling_ids_do_not_collide() {
        let group = JobGroup {
            jobs: vec![
                Spec::Job(Job {
                    command: "true".to_string(),
                    ..Default::default()
                }),
                Spec::Job(Job {
                    command: "true".to_string(),
                    ..Default::default()
                }),
            ],
            ..Default::default()
        };
        assert!(group.check().is_ok());
    }
}
