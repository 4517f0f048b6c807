use std::fs;

use serde_json::Value;
use tracing::{info, warn};

use crate::domain::ReconMethod;
use crate::error::PipelineError;
use crate::layout::SubjectLayout;

// A marker without a JSON `status` field counts as completed.
pub fn completed_methods(layout: &SubjectLayout) -> Vec<ReconMethod> {
    ReconMethod::ALL
        .into_iter()
        .filter(|method| {
            let marker = layout.recon_marker(*method);
            let Ok(content) = fs::read_to_string(marker.as_std_path()) else {
                return false;
            };
            marker_is_complete(&content)
        })
        .collect()
}

fn marker_is_complete(content: &str) -> bool {
    let Ok(value) = serde_json::from_str::<Value>(content) else {
        return true;
    };
    let status = value
        .get("status")
        .or_else(|| value.get("Status"))
        .and_then(Value::as_str);
    match status {
        Some(status) => status.eq_ignore_ascii_case("completed"),
        None => true,
    }
}

pub fn select_method(
    completed: &[ReconMethod],
    prefer_fastsurfer: bool,
    subject: &str,
) -> Result<ReconMethod, PipelineError> {
    match completed {
        [] => Err(PipelineError::MissingPriorStage {
            subject: subject.to_string(),
        }),
        [only] => {
            if prefer_fastsurfer && *only != ReconMethod::Fastsurfer {
                warn!(method = %only, "fastsurfer requested but only {only} outputs exist");
            }
            Ok(*only)
        }
        _ => {
            let method = if prefer_fastsurfer {
                ReconMethod::Fastsurfer
            } else {
                ReconMethod::Freesurfer
            };
            info!(method = %method, "multiple surface reconstructions found");
            Ok(method)
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn marker_status_field() {
        assert!(marker_is_complete(r#"{"status": "COMPLETED"}"#));
        assert!(marker_is_complete(r#"{"Status": "completed"}"#));
        assert!(!marker_is_complete(r#"{"status": "INCOMPLETE"}"#));
        assert!(marker_is_complete(r#"{"module": "proc_surf"}"#));
        assert!(marker_is_complete("COMPLETED"));
    }

    #[test]
    fn selection_rules() {
        let both = [ReconMethod::Freesurfer, ReconMethod::Fastsurfer];
        assert_eq!(select_method(&both, false, "sub-01").unwrap(), ReconMethod::Freesurfer);
        assert_eq!(select_method(&both, true, "sub-01").unwrap(), ReconMethod::Fastsurfer);
        assert_eq!(
            select_method(&[ReconMethod::Fastsurfer], false, "sub-01").unwrap(),
            ReconMethod::Fastsurfer
        );
        assert_eq!(
            select_method(&[ReconMethod::Freesurfer], true, "sub-01").unwrap(),
            ReconMethod::Freesurfer
        );
        assert_matches!(
            select_method(&[], false, "sub-01"),
            Err(PipelineError::MissingPriorStage { .. })
        );
    }
}
