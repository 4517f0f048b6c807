#![allow(dead_code)]

use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use flate2::Compression;
use flate2::write::GzEncoder;
use tempfile::TempDir;

use post_structural::config::{Config, ConfigLoader, PipelineConfig, RunRequest};
use post_structural::domain::{Hemisphere, ReconMethod, SubjectId};
use post_structural::error::PipelineError;
use post_structural::layout::SubjectLayout;
use post_structural::orchestrator::{Orchestrator, ProgressEvent, ProgressSink};
use post_structural::signal::CancelToken;
use post_structural::tools::{Tool, ToolInvocation, ToolOutput, ToolRunner};

pub const PARTICIPANT: &str = "HC001";
pub const SESSION: &str = "01";
pub const ATLASES: [&str; 2] = ["aparc", "schaefer-400"];

pub struct Fixture {
    _temp: TempDir,
    pub root: Utf8PathBuf,
    pub bids: Utf8PathBuf,
    pub out: Utf8PathBuf,
    pub library: Utf8PathBuf,
    pub tmp: Utf8PathBuf,
}

impl Fixture {
    /// Dataset with native anatomicals and a bundled library, but no
    /// surface reconstruction yet.
    pub fn bare() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let fixture = Self {
            bids: root.join("rawdata"),
            out: root.join("derivatives"),
            library: root.join("library"),
            tmp: root.join("tmp"),
            root,
            _temp: temp,
        };
        fs::create_dir_all(&fixture.bids).unwrap();
        fs::create_dir_all(&fixture.out).unwrap();
        fixture.write_library();

        let layout = fixture.layout();
        write_gz(&layout.nativepro_t1w());
        write_gz(&layout.nativepro_segmentation());
        fixture
    }

    pub fn new() -> Self {
        let fixture = Self::bare();
        fixture.add_recon(ReconMethod::Freesurfer);
        fixture
    }

    pub fn layout(&self) -> SubjectLayout {
        let subject = SubjectId::new(
            PARTICIPANT.parse().unwrap(),
            Some(SESSION.parse().unwrap()),
        );
        SubjectLayout::new(&self.out, "micapipe_v0.2.0", subject)
    }

    pub fn add_recon(&self, method: ReconMethod) {
        self.write_marker(method, "COMPLETED");
        let layout = self.layout();
        write_file(&layout.recon_t1(method), b"mgz");
        for hemi in Hemisphere::BOTH {
            for name in ["white", "pial", "sphere.reg"] {
                write_file(&layout.recon_surface(method, hemi, name), b"surface");
            }
        }
    }

    pub fn write_marker(&self, method: ReconMethod, status: &str) {
        let marker = self.layout().recon_marker(method);
        write_file(
            &marker,
            format!("{{\"Module\": \"proc_surf\", \"status\": \"{status}\"}}").as_bytes(),
        );
    }

    fn write_library(&self) {
        let parcellations = self.library.join("parcellations");
        for atlas in ATLASES {
            for hemi in ["lh", "rh"] {
                write_file(&parcellations.join(format!("{hemi}.{atlas}_mics.annot")), b"annot");
            }
        }
        fs::create_dir_all(self.library.join("fsaverage5").join("surf")).unwrap();
        let surfaces = self.library.join("surfaces");
        for h in ["L", "R"] {
            write_file(
                &surfaces.join(format!("fsaverage_std_sphere.{h}.164k_fsavg_{h}.surf.gii")),
                b"gii",
            );
            write_file(
                &surfaces.join(format!(
                    "fs_LR-deformed_to-fsaverage.{h}.sphere.164k_fs_LR.surf.gii"
                )),
                b"gii",
            );
            write_file(&surfaces.join(format!("fsLR-32k.{h}.sphere.surf.gii")), b"gii");
        }
    }

    pub fn request(&self) -> RunRequest {
        RunRequest {
            bids: self.bids.to_string(),
            out: self.out.to_string(),
            participant: format!("sub-{PARTICIPANT}"),
            session: Some(format!("ses-{SESSION}")),
            atlas: "DEFAULT".to_string(),
            threads: Some(2),
            tmp: Some(self.tmp.to_string()),
            library: Some(self.library.to_string()),
            ..RunRequest::default()
        }
    }

    pub fn config(&self) -> PipelineConfig {
        self.config_with(|_| {})
    }

    pub fn config_with(&self, adjust: impl FnOnce(&mut RunRequest)) -> PipelineConfig {
        let mut request = self.request();
        adjust(&mut request);
        ConfigLoader::resolve(request, Config::default()).unwrap()
    }

    pub fn orchestrator(&self, config: PipelineConfig) -> Orchestrator<MockRunner> {
        let cancel = CancelToken::new();
        Orchestrator::new(config, MockRunner::new(), cancel)
    }

    pub fn orchestrator_with(
        &self,
        config: PipelineConfig,
        runner: MockRunner,
    ) -> Orchestrator<MockRunner> {
        Orchestrator::new(config, runner, CancelToken::new())
    }

    pub fn scratch_entries(&self) -> usize {
        match fs::read_dir(&self.tmp) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }
}

pub fn write_file(path: &Utf8Path, content: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

pub fn write_gz(path: &Utf8Path) {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(b"volume").unwrap();
    write_file(path, &encoder.finish().unwrap());
}

/// Stands in for the external toolchain: records every invocation and
/// creates the artifacts each one declares.
#[derive(Default)]
pub struct MockRunner {
    pub calls: Mutex<Vec<ToolInvocation>>,
    pub skip_outputs: BTreeSet<Tool>,
    pub fail_after_outputs: BTreeSet<Tool>,
    pub cancel_on: Option<Tool>,
    pub unavailable: BTreeSet<Tool>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skipping(tool: Tool) -> Self {
        Self {
            skip_outputs: BTreeSet::from([tool]),
            ..Self::default()
        }
    }

    pub fn failing_after_outputs(tool: Tool) -> Self {
        Self {
            fail_after_outputs: BTreeSet::from([tool]),
            ..Self::default()
        }
    }

    pub fn cancelling_on(tool: Tool) -> Self {
        Self {
            cancel_on: Some(tool),
            ..Self::default()
        }
    }

    pub fn without(tool: Tool) -> Self {
        Self {
            unavailable: BTreeSet::from([tool]),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<ToolInvocation> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, tool: Tool) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.tool == tool)
            .count()
    }
}

impl ToolRunner for MockRunner {
    fn run(
        &self,
        invocation: &ToolInvocation,
        cancel: &CancelToken,
    ) -> Result<ToolOutput, PipelineError> {
        self.calls.lock().unwrap().push(invocation.clone());
        if self.cancel_on == Some(invocation.tool) {
            cancel.cancel();
            return Err(PipelineError::Interrupted);
        }
        if !self.skip_outputs.contains(&invocation.tool) {
            for path in &invocation.creates {
                if path.as_str().ends_with(".gz") {
                    write_gz(path);
                } else {
                    write_file(path, b"artifact");
                }
            }
        }
        if self.fail_after_outputs.contains(&invocation.tool) {
            return Err(PipelineError::ToolFailed {
                tool: invocation.tool.to_string(),
                status: "exit status: 1".to_string(),
                message: "registration did not converge".to_string(),
            });
        }
        let stdout = match invocation.tool {
            Tool::MriInfo => "0.500000 -12.250000 8.000000\n".to_string(),
            _ => String::new(),
        };
        Ok(ToolOutput {
            stdout,
            stderr: String::new(),
        })
    }

    fn locate(&self, tool: Tool) -> Option<PathBuf> {
        if self.unavailable.contains(&tool) {
            None
        } else {
            Some(PathBuf::from("/usr/local/bin").join(tool.default_program()))
        }
    }

    fn tool_version(&self, tool: Tool) -> Option<String> {
        Some(format!("{} mock-1.0", tool.key()))
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub messages: Mutex<Vec<String>>,
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.messages.lock().unwrap().push(event.message);
    }
}
