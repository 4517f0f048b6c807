use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum PipelineError {
    #[error("invalid participant id: {0}")]
    InvalidParticipant(String),

    #[error("invalid session id: {0}")]
    InvalidSession(String),

    #[error("invalid atlas name: {0}")]
    InvalidAtlasName(String),

    #[error("invalid reconstruction method: {0}")]
    InvalidReconMethod(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("no completed surface reconstruction found for {subject}")]
    #[diagnostic(help("run the surface reconstruction stage (freesurfer or fastsurfer) first"))]
    MissingPriorStage { subject: String },

    #[error("missing {what}: {path}")]
    MissingInput { what: String, path: String },

    #[error("bundled library file not found: {0}")]
    #[diagnostic(help("point --library (or POST_STRUCTURAL_LIBRARY) at the bundled parcellation/surface library"))]
    MissingLibraryFile(String),

    #[error("no bundled parcellation matches atlas selector: {0}")]
    #[diagnostic(help("run `post-structural atlases` to list available parcellations"))]
    AtlasNotFound(String),

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("failed to start {tool}: {message}")]
    ToolSpawn { tool: String, message: String },

    #[error("{tool} exited with {status}: {message}")]
    ToolFailed {
        tool: String,
        status: String,
        message: String,
    },

    #[error("unexpected output from {tool}: {message}")]
    ToolOutput { tool: String, message: String },

    #[error("step manifest error: {0}")]
    Manifest(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("interrupted")]
    Interrupted,
}

impl PipelineError {
    pub fn missing_input(what: &str, path: impl std::fmt::Display) -> Self {
        PipelineError::MissingInput {
            what: what.to_string(),
            path: path.to_string(),
        }
    }

    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            PipelineError::InvalidParticipant(_)
                | PipelineError::InvalidSession(_)
                | PipelineError::InvalidAtlasName(_)
                | PipelineError::InvalidReconMethod(_)
                | PipelineError::InvalidConfig(_)
                | PipelineError::ConfigRead(_)
                | PipelineError::ConfigParse(_)
                | PipelineError::MissingPriorStage { .. }
                | PipelineError::MissingInput { .. }
                | PipelineError::MissingLibraryFile(_)
                | PipelineError::AtlasNotFound(_)
        )
    }
}
