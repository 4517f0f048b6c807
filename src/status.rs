use std::fmt;
use std::fs;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::fs_util;
use crate::layout::{MODULE_NAME, SubjectLayout};

pub const STATUS_CSV_HEADER: &str =
    "participant,session,module,status,completed_steps,total_steps,user,workstation,date,version";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StageStatus {
    Completed,
    Incomplete,
}

impl StageStatus {
    pub fn from_counts(completed: usize, total: usize) -> Self {
        if completed == total {
            StageStatus::Completed
        } else {
            StageStatus::Incomplete
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StageStatus::Completed => "COMPLETED",
            StageStatus::Incomplete => "INCOMPLETE",
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub module: String,
    pub status: StageStatus,
    pub progress: String,
    pub completed_steps: usize,
    pub total_steps: usize,
    pub subject: String,
    pub participant: String,
    pub session: Option<String>,
    pub surface_recon: String,
    pub atlases: Vec<String>,
    pub threads: usize,
    pub processing_mode: String,
    pub user: String,
    pub workstation: String,
    pub date: String,
    pub duration_minutes: f64,
    pub version: String,
}

impl CompletionRecord {
    pub fn progress(completed: usize, total: usize) -> String {
        format!("{completed}/{total}")
    }

    pub fn module_name() -> String {
        MODULE_NAME.to_string()
    }
}

pub fn write_completion(
    layout: &SubjectLayout,
    record: &CompletionRecord,
) -> Result<(), PipelineError> {
    fs_util::write_json_atomic(&layout.completion_record(), record)
}

pub fn append_status_row(
    layout: &SubjectLayout,
    record: &CompletionRecord,
) -> Result<(), PipelineError> {
    let completed = record.completed_steps.to_string();
    let total = record.total_steps.to_string();
    let row = [
        record.participant.as_str(),
        record.session.as_deref().unwrap_or(""),
        record.module.as_str(),
        record.status.as_str(),
        completed.as_str(),
        total.as_str(),
        record.user.as_str(),
        record.workstation.as_str(),
        record.date.as_str(),
        record.version.as_str(),
    ]
    .iter()
    .map(|field| csv_field(field))
    .collect::<Vec<_>>()
    .join(",");
    fs_util::append_row(&layout.status_csv(), STATUS_CSV_HEADER, &row)
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub fn current_user() -> String {
    ["USER", "USERNAME", "LOGNAME"]
        .into_iter()
        .find_map(|key| std::env::var(key).ok().filter(|value| !value.is_empty()))
        .unwrap_or_else(|| "unknown".to_string())
}

pub fn workstation() -> String {
    ["HOSTNAME", "COMPUTERNAME"]
        .into_iter()
        .find_map(|key| std::env::var(key).ok().filter(|value| !value.is_empty()))
        .or_else(|| {
            fs::read_to_string("/etc/hostname")
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_from_counts() {
        assert_eq!(StageStatus::from_counts(8, 8), StageStatus::Completed);
        assert_eq!(StageStatus::from_counts(7, 8), StageStatus::Incomplete);
    }

    #[test]
    fn csv_quoting() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn status_serializes_uppercase() {
        let json = serde_json::to_string(&StageStatus::Incomplete).unwrap();
        assert_eq!(json, "\"INCOMPLETE\"");
    }
}
