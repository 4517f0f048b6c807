mod affine;
mod fslr;
mod morphology;
mod nativepro;
mod parcellation;

use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};

use crate::config::PipelineConfig;
use crate::domain::{AtlasName, Hemisphere, ReconMethod};
use crate::error::PipelineError;
use crate::layout::{Library, SubjectLayout};
use crate::signal::CancelToken;
use crate::tools::{Tool, ToolInvocation, ToolOutput, ToolRunner};

pub use nativepro::parse_cras;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Affine,
    Parcellation(AtlasName),
    FsLr32k(Hemisphere),
    NativePro(Hemisphere),
    Morphology,
}

impl Step {
    pub fn sequence(atlases: &[AtlasName]) -> Vec<Step> {
        let mut steps = vec![Step::Affine];
        steps.extend(atlases.iter().cloned().map(Step::Parcellation));
        steps.extend(Hemisphere::BOTH.into_iter().map(Step::FsLr32k));
        steps.extend(Hemisphere::BOTH.into_iter().map(Step::NativePro));
        steps.push(Step::Morphology);
        steps
    }

    pub fn id(&self) -> String {
        match self {
            Step::Affine => "affine".to_string(),
            Step::Parcellation(atlas) => format!("parcellation:{atlas}"),
            Step::FsLr32k(hemi) => format!("fsLR-32k:{hemi}"),
            Step::NativePro(hemi) => format!("nativepro:{hemi}"),
            Step::Morphology => "morphology".to_string(),
        }
    }

    pub fn inputs(&self, env: &StepEnv<'_>) -> Vec<Utf8PathBuf> {
        match self {
            Step::Affine => affine::inputs(env),
            Step::Parcellation(atlas) => parcellation::inputs(env, atlas),
            Step::FsLr32k(hemi) => fslr::inputs(env, *hemi),
            Step::NativePro(hemi) => nativepro::inputs(env, *hemi),
            Step::Morphology => morphology::inputs(env),
        }
    }

    pub fn outputs(&self, env: &StepEnv<'_>) -> Vec<Utf8PathBuf> {
        match self {
            Step::Affine => affine::outputs(env),
            Step::Parcellation(atlas) => parcellation::outputs(env, atlas),
            Step::FsLr32k(hemi) => fslr::outputs(env, *hemi),
            Step::NativePro(hemi) => nativepro::outputs(env, *hemi),
            Step::Morphology => morphology::outputs(env),
        }
    }

    pub fn execute(&self, ctx: &StepContext<'_>) -> Result<(), PipelineError> {
        match self {
            Step::Affine => affine::execute(ctx),
            Step::Parcellation(atlas) => parcellation::execute(ctx, atlas),
            Step::FsLr32k(hemi) => fslr::execute(ctx, *hemi),
            Step::NativePro(hemi) => nativepro::execute(ctx, *hemi),
            Step::Morphology => morphology::execute(ctx),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}

pub struct StepEnv<'a> {
    pub config: &'a PipelineConfig,
    pub layout: &'a SubjectLayout,
    pub library: &'a Library,
    pub method: ReconMethod,
}

pub struct StepContext<'a> {
    pub env: &'a StepEnv<'a>,
    scratch: &'a Utf8Path,
    runner: &'a dyn ToolRunner,
    cancel: &'a CancelToken,
}

impl<'a> StepContext<'a> {
    pub fn new(
        env: &'a StepEnv<'a>,
        scratch: &'a Utf8Path,
        runner: &'a dyn ToolRunner,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            env,
            scratch,
            runner,
            cancel,
        }
    }

    pub fn scratch(&self, name: &str) -> Utf8PathBuf {
        self.scratch.join(name)
    }

    pub fn tool(&self, tool: Tool) -> ToolInvocation {
        let threads = self.env.config.threads.to_string();
        ToolInvocation::new(tool)
            .env("OMP_NUM_THREADS", threads.clone())
            .env("ITK_GLOBAL_DEFAULT_NUMBER_OF_THREADS", threads)
            .current_dir(self.scratch)
    }

    pub fn run(&self, invocation: ToolInvocation) -> Result<ToolOutput, PipelineError> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Interrupted);
        }
        self.runner.run(&invocation, self.cancel)
    }

    pub fn tool_version(&self, tool: Tool) -> Option<String> {
        self.runner.tool_version(tool)
    }

    pub fn subjects_dir(&self) -> Result<Utf8PathBuf, PipelineError> {
        let dir = self.scratch("subjects");
        let links = [
            (
                dir.join(self.env.layout.bids_id()),
                self.env.layout.recon_subject_dir(self.env.method),
            ),
            (dir.join("fsaverage5"), self.env.library.fsaverage5()),
        ];
        crate::fs_util::ensure_dir(&dir)?;
        for (link, target) in links {
            if link.as_std_path().symlink_metadata().is_ok() {
                continue;
            }
            symlink(&target, &link)?;
        }
        Ok(dir)
    }

    pub fn world_affine(&self) -> Result<Utf8PathBuf, PipelineError> {
        let world = self.scratch("from-fsnative_to_nativepro_world.mat");
        if world.as_std_path().is_file() {
            return Ok(world);
        }
        self.run(
            self.tool(Tool::WbCommand)
                .args(["-convert-affine", "-from-itk"])
                .path(&self.env.layout.affine())
                .arg("-to-world")
                .output(&world)
                .arg("-inverse"),
        )?;
        Ok(world)
    }
}

#[cfg(unix)]
fn symlink(target: &Utf8Path, link: &Utf8Path) -> Result<(), PipelineError> {
    std::os::unix::fs::symlink(target.as_std_path(), link.as_std_path())
        .map_err(|err| PipelineError::Filesystem(format!("link {link} -> {target}: {err}")))
}

#[cfg(not(unix))]
fn symlink(target: &Utf8Path, link: &Utf8Path) -> Result<(), PipelineError> {
    Err(PipelineError::Filesystem(format!(
        "cannot link {link} -> {target}: symlinks require a unix host"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_order_and_ids() {
        let atlases = vec![
            "aparc".parse::<AtlasName>().unwrap(),
            "schaefer-400".parse::<AtlasName>().unwrap(),
        ];
        let ids = Step::sequence(&atlases)
            .iter()
            .map(Step::id)
            .collect::<Vec<_>>();
        assert_eq!(
            ids,
            vec![
                "affine",
                "parcellation:aparc",
                "parcellation:schaefer-400",
                "fsLR-32k:L",
                "fsLR-32k:R",
                "nativepro:L",
                "nativepro:R",
                "morphology",
            ]
        );
    }
}
