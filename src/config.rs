use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::domain::{AtlasSelector, ParticipantId, SessionId, SubjectId};
use crate::error::PipelineError;
use crate::tools::Tool;

pub const CONFIG_FILE_NAME: &str = "post-structural.json";
pub const DEFAULT_PIPELINE_DIR: &str = "micapipe_v0.2.0";
pub const DEFAULT_THREADS: usize = 6;
pub const DEFAULT_PROC_MODE: &str = "LOCAL";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub pipeline_dir: Option<String>,
    #[serde(default)]
    pub library_dir: Option<String>,
    #[serde(default)]
    pub tmp_dir: Option<String>,
    #[serde(default)]
    pub threads: Option<usize>,
    #[serde(default)]
    pub tools: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub bids: String,
    pub out: String,
    pub participant: String,
    pub session: Option<String>,
    pub atlas: String,
    pub prefer_fastsurfer: bool,
    pub threads: Option<usize>,
    pub tmp: Option<String>,
    pub no_cleanup: bool,
    pub proc_mode: Option<String>,
    pub library: Option<String>,
    pub force: bool,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub subject: SubjectId,
    pub bids_root: Utf8PathBuf,
    pub out_root: Utf8PathBuf,
    pub pipeline_dir: String,
    pub atlas: AtlasSelector,
    pub prefer_fastsurfer: bool,
    pub threads: usize,
    pub tmp_root: Utf8PathBuf,
    pub no_cleanup: bool,
    pub proc_mode: String,
    pub library_dir: Utf8PathBuf,
    pub force: bool,
    pub tools: BTreeMap<Tool, PathBuf>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load(path: Option<&str>) -> Result<Config, PipelineError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => match Self::default_location() {
                Some(path) => path,
                None => return Ok(Config::default()),
            },
        };

        let content = fs::read_to_string(&config_path)
            .map_err(|_| PipelineError::ConfigRead(config_path.clone()))?;
        serde_json::from_str(&content).map_err(|err| PipelineError::ConfigParse(err.to_string()))
    }

    fn default_location() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.is_file() {
            return Some(local);
        }
        ProjectDirs::from("", "", "post-structural")
            .map(|dirs| dirs.config_dir().join("config.json"))
            .filter(|path| path.is_file())
    }

    fn default_library() -> Option<Utf8PathBuf> {
        ProjectDirs::from("", "", "post-structural")
            .and_then(|dirs| Utf8PathBuf::from_path_buf(dirs.data_dir().join("library")).ok())
    }

    pub fn resolve_library(
        explicit: Option<String>,
        config: &Config,
    ) -> Result<Utf8PathBuf, PipelineError> {
        explicit
            .or_else(|| config.library_dir.clone())
            .map(Utf8PathBuf::from)
            .or_else(Self::default_library)
            .ok_or_else(|| PipelineError::InvalidConfig("library directory is not set".to_string()))
    }

    pub fn resolve(request: RunRequest, config: Config) -> Result<PipelineConfig, PipelineError> {
        let participant: ParticipantId = request.participant.parse()?;
        let session = request
            .session
            .as_deref()
            .filter(|value| !value.trim().is_empty() && !value.eq_ignore_ascii_case("SINGLE"))
            .map(str::parse::<SessionId>)
            .transpose()?;
        let subject = SubjectId::new(participant, session);

        let bids_root = Utf8PathBuf::from(request.bids);
        if !bids_root.as_std_path().is_dir() {
            return Err(PipelineError::missing_input("BIDS directory", &bids_root));
        }
        let out_root = Utf8PathBuf::from(request.out);
        if !out_root.as_std_path().is_dir() {
            return Err(PipelineError::missing_input("output directory", &out_root));
        }

        let threads = request
            .threads
            .or(config.threads)
            .unwrap_or(DEFAULT_THREADS);
        if threads == 0 {
            return Err(PipelineError::InvalidConfig(
                "threads must be at least 1".to_string(),
            ));
        }

        let library_dir = Self::resolve_library(request.library, &config)?;

        let tmp_root = match request.tmp.or(config.tmp_dir) {
            Some(path) => Utf8PathBuf::from(path),
            None => Utf8PathBuf::from_path_buf(std::env::temp_dir()).map_err(|_| {
                PipelineError::InvalidConfig("non-utf8 temp directory".to_string())
            })?,
        };

        let tools = config
            .tools
            .into_iter()
            .map(|(name, program)| Ok((name.parse::<Tool>()?, PathBuf::from(program))))
            .collect::<Result<BTreeMap<_, _>, PipelineError>>()?;

        Ok(PipelineConfig {
            subject,
            bids_root,
            out_root,
            pipeline_dir: config
                .pipeline_dir
                .unwrap_or_else(|| DEFAULT_PIPELINE_DIR.to_string()),
            atlas: request.atlas.parse()?,
            prefer_fastsurfer: request.prefer_fastsurfer,
            threads,
            tmp_root,
            no_cleanup: request.no_cleanup,
            proc_mode: request
                .proc_mode
                .unwrap_or_else(|| DEFAULT_PROC_MODE.to_string()),
            library_dir,
            force: request.force,
            tools,
        })
    }
}
