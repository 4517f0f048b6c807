use std::collections::BTreeMap;
use std::fmt;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::domain::ReconMethod;
use crate::error::PipelineError;
use crate::fs_util;

pub const MANIFEST_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Done,
    Failed,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Done => "done",
            StepStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub status: StepStatus,
    #[serde(default)]
    pub outputs: Vec<String>,
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub schema_version: u32,
    pub subject: String,
    #[serde(default)]
    pub recon: Option<ReconMethod>,
    #[serde(default)]
    pub steps: BTreeMap<String, StepRecord>,
}

impl Manifest {
    pub fn new(subject: &str) -> Self {
        Self {
            schema_version: MANIFEST_SCHEMA_VERSION,
            subject: subject.to_string(),
            recon: None,
            steps: BTreeMap::new(),
        }
    }

    pub fn load_or_new(path: &Utf8Path, subject: &str) -> Result<Self, PipelineError> {
        if !path.as_std_path().exists() {
            return Ok(Self::new(subject));
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| PipelineError::Manifest(format!("read {path}: {err}")))?;
        let manifest: Manifest = serde_json::from_str(&content)
            .map_err(|err| PipelineError::Manifest(format!("parse {path}: {err}")))?;
        if manifest.subject != subject {
            return Err(PipelineError::Manifest(format!(
                "{path} belongs to {}, not {subject}",
                manifest.subject
            )));
        }
        Ok(manifest)
    }

    pub fn save(&self, path: &Utf8Path) -> Result<(), PipelineError> {
        fs_util::write_json_atomic(path, self)
    }

    pub fn status(&self, step: &str) -> StepStatus {
        self.steps
            .get(step)
            .map(|record| record.status)
            .unwrap_or(StepStatus::Pending)
    }

    pub fn record(
        &mut self,
        step: &str,
        status: StepStatus,
        outputs: &[Utf8PathBuf],
        detail: Option<String>,
    ) {
        self.steps.insert(
            step.to_string(),
            StepRecord {
                status,
                outputs: outputs.iter().map(|path| path.to_string()).collect(),
                updated_at: chrono::Utc::now().to_rfc3339(),
                detail,
            },
        );
    }

    pub fn trusts_outputs(&self, step: &str) -> bool {
        self.steps
            .get(step)
            .is_none_or(|record| record.status == StepStatus::Done)
    }

    pub fn invalidate(&mut self, step: &str, cause: &str) {
        let outputs = self
            .steps
            .get(step)
            .map(|record| record.outputs.clone())
            .unwrap_or_default();
        self.steps.insert(
            step.to_string(),
            StepRecord {
                status: StepStatus::Pending,
                outputs,
                updated_at: chrono::Utc::now().to_rfc3339(),
                detail: Some(format!("inputs rebuilt by {cause}")),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn unknown_steps_are_pending() {
        let manifest = Manifest::new("sub-01");
        assert_eq!(manifest.status("affine"), StepStatus::Pending);
    }

    #[test]
    fn persisted_and_reloaded() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("QC").join("manifest.json")).unwrap();

        let mut manifest = Manifest::new("sub-01");
        manifest.recon = Some(ReconMethod::Freesurfer);
        manifest.record("affine", StepStatus::Done, &[Utf8PathBuf::from("/x.mat")], None);
        manifest.record(
            "fsLR-32k:L",
            StepStatus::Failed,
            &[],
            Some("wb_command exited with 1".to_string()),
        );
        manifest.save(&path).unwrap();

        let loaded = Manifest::load_or_new(&path, "sub-01").unwrap();
        assert_eq!(loaded.status("affine"), StepStatus::Done);
        assert_eq!(loaded.status("fsLR-32k:L"), StepStatus::Failed);
        assert!(loaded.trusts_outputs("affine"));
        assert!(!loaded.trusts_outputs("fsLR-32k:L"));
        assert_eq!(loaded.recon, Some(ReconMethod::Freesurfer));
    }

    #[test]
    fn manifest_of_other_subject_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("manifest.json")).unwrap();
        Manifest::new("sub-01").save(&path).unwrap();
        assert_matches!(
            Manifest::load_or_new(&path, "sub-02"),
            Err(PipelineError::Manifest(_))
        );
    }

    #[test]
    fn invalidated_step_is_untrusted() {
        let mut manifest = Manifest::new("sub-01");
        assert!(manifest.trusts_outputs("parcellation:aparc"));
        manifest.record(
            "parcellation:aparc",
            StepStatus::Done,
            &[Utf8PathBuf::from("/parc.nii.gz")],
            None,
        );
        manifest.invalidate("parcellation:aparc", "affine");
        assert_eq!(manifest.status("parcellation:aparc"), StepStatus::Pending);
        assert!(!manifest.trusts_outputs("parcellation:aparc"));
        assert_eq!(
            manifest.steps["parcellation:aparc"].outputs,
            vec!["/parc.nii.gz".to_string()]
        );
    }
}
