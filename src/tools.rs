use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::str::FromStr;
use std::thread;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::debug;

use crate::error::PipelineError;
use crate::signal::CancelToken;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    MriConvert,
    MrisConvert,
    MriInfo,
    MriSurf2Surf,
    MriAparc2Aseg,
    AntsRegistrationSyN,
    AntsApplyTransforms,
    WbCommand,
    Morphology,
}

impl Tool {
    pub const ALL: [Tool; 9] = [
        Tool::MriConvert,
        Tool::MrisConvert,
        Tool::MriInfo,
        Tool::MriSurf2Surf,
        Tool::MriAparc2Aseg,
        Tool::AntsRegistrationSyN,
        Tool::AntsApplyTransforms,
        Tool::WbCommand,
        Tool::Morphology,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Tool::MriConvert => "mri_convert",
            Tool::MrisConvert => "mris_convert",
            Tool::MriInfo => "mri_info",
            Tool::MriSurf2Surf => "mri_surf2surf",
            Tool::MriAparc2Aseg => "mri_aparc2aseg",
            Tool::AntsRegistrationSyN => "antsRegistrationSyN",
            Tool::AntsApplyTransforms => "antsApplyTransforms",
            Tool::WbCommand => "wb_command",
            Tool::Morphology => "morphology",
        }
    }

    pub fn default_program(self) -> &'static str {
        match self {
            Tool::AntsRegistrationSyN => "antsRegistrationSyN.sh",
            Tool::Morphology => "post-structural-morphology",
            other => other.key(),
        }
    }

    fn version_args(self) -> Option<&'static [&'static str]> {
        match self {
            Tool::WbCommand => Some(&["-version"]),
            Tool::MriConvert => Some(&["--version"]),
            _ => None,
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Tool {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        Tool::ALL
            .into_iter()
            .find(|tool| tool.key() == trimmed || tool.default_program() == trimmed)
            .ok_or_else(|| PipelineError::InvalidConfig(format!("unknown tool: {value}")))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub tool: Tool,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<Utf8PathBuf>,
    pub creates: Vec<Utf8PathBuf>,
}

impl ToolInvocation {
    pub fn new(tool: Tool) -> Self {
        Self {
            tool,
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
            creates: Vec::new(),
        }
    }

    pub fn arg(mut self, value: impl Into<String>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn args<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(values.into_iter().map(Into::into));
        self
    }

    pub fn path(self, value: &Utf8Path) -> Self {
        self.arg(value.as_str())
    }

    pub fn output(mut self, value: &Utf8Path) -> Self {
        self.creates.push(value.to_path_buf());
        self.arg(value.as_str())
    }

    pub fn creates(mut self, value: &Utf8Path) -> Self {
        self.creates.push(value.to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: &Utf8Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    pub fn command_line(&self) -> String {
        let mut line = self.tool.default_program().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

pub trait ToolRunner: Send + Sync {
    fn run(
        &self,
        invocation: &ToolInvocation,
        cancel: &CancelToken,
    ) -> Result<ToolOutput, PipelineError>;
    fn locate(&self, tool: Tool) -> Option<PathBuf>;
    fn tool_version(&self, tool: Tool) -> Option<String>;
}

#[derive(Debug, Clone)]
pub struct SystemToolRunner {
    programs: BTreeMap<Tool, PathBuf>,
}

impl SystemToolRunner {
    pub fn new(overrides: &BTreeMap<Tool, PathBuf>) -> Self {
        let programs = Tool::ALL
            .into_iter()
            .filter_map(|tool| {
                let program = match overrides.get(&tool) {
                    Some(path) if path.components().count() > 1 => {
                        path.exists().then(|| path.clone())
                    }
                    Some(path) => find_in_path(&path.to_string_lossy()),
                    None => find_in_path(tool.default_program()),
                };
                program.map(|program| (tool, program))
            })
            .collect();
        Self { programs }
    }

    fn require(&self, tool: Tool) -> Result<&PathBuf, PipelineError> {
        self.programs
            .get(&tool)
            .ok_or_else(|| PipelineError::MissingTool(tool.default_program().to_string()))
    }
}

impl ToolRunner for SystemToolRunner {
    fn run(
        &self,
        invocation: &ToolInvocation,
        cancel: &CancelToken,
    ) -> Result<ToolOutput, PipelineError> {
        let program = self.require(invocation.tool)?;
        debug!(command = %invocation.command_line(), "tool.start");

        let mut cmd = Command::new(program);
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in &invocation.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &invocation.cwd {
            cmd.current_dir(dir.as_std_path());
        }

        let spawn_error = |err: std::io::Error| PipelineError::ToolSpawn {
            tool: invocation.tool.to_string(),
            message: err.to_string(),
        };
        let mut child = cmd.spawn().map_err(spawn_error)?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = loop {
            if cancel.is_cancelled() {
                let _ = child.kill();
                let _ = child.wait();
                return Err(PipelineError::Interrupted);
            }
            match child.try_wait().map_err(spawn_error)? {
                Some(status) => break status,
                None => thread::sleep(POLL_INTERVAL),
            }
        };

        let output = ToolOutput {
            stdout: stdout.join().unwrap_or_default(),
            stderr: stderr.join().unwrap_or_default(),
        };
        if !output.stdout.trim().is_empty() {
            debug!(tool = %invocation.tool, stdout = %output.stdout.trim(), "tool.stdout");
        }
        if !output.stderr.trim().is_empty() {
            debug!(tool = %invocation.tool, stderr = %output.stderr.trim(), "tool.stderr");
        }

        if status.success() {
            return Ok(output);
        }
        let stderr = output.stderr.trim();
        let message = if stderr.is_empty() {
            format!("command failed: {}", invocation.command_line())
        } else {
            last_lines(stderr, 5)
        };
        Err(PipelineError::ToolFailed {
            tool: invocation.tool.to_string(),
            status: status.to_string(),
            message,
        })
    }

    fn locate(&self, tool: Tool) -> Option<PathBuf> {
        self.programs.get(&tool).cloned()
    }

    fn tool_version(&self, tool: Tool) -> Option<String> {
        let args = tool.version_args()?;
        tool_version(self.programs.get(&tool)?, args)
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buffer);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    })
}

fn last_lines(text: &str, count: usize) -> String {
    let lines = text.lines().collect::<Vec<_>>();
    lines[lines.len().saturating_sub(count)..].join("\n")
}

pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.is_file() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.is_file() {
            return Some(plain);
        }
    }
    None
}

fn tool_version(path: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new(path).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    stdout.lines().next().map(str::to_string)
}
