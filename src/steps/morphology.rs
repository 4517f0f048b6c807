use camino::Utf8PathBuf;

use super::{StepContext, StepEnv};
use crate::domain::{Hemisphere, MorphologyMap, Space, SurfaceArtifact, SurfaceLabel};
use crate::error::PipelineError;
use crate::tools::Tool;

pub(super) fn inputs(env: &StepEnv<'_>) -> Vec<Utf8PathBuf> {
    let mut inputs = vec![env.layout.recon_subject_dir(env.method)];
    for hemi in Hemisphere::BOTH {
        for label in SurfaceLabel::ALL {
            inputs.push(
                env.layout
                    .surface(SurfaceArtifact::new(hemi, Space::Fsnative, label)),
            );
        }
    }
    inputs
}

pub(super) fn outputs(env: &StepEnv<'_>) -> Vec<Utf8PathBuf> {
    MorphologyMap::expected()
        .into_iter()
        .map(|map| env.layout.morphology_map(map))
        .collect()
}

pub(super) fn execute(ctx: &StepContext<'_>) -> Result<(), PipelineError> {
    let env = ctx.env;
    let config = env.config;
    let mut invocation = ctx
        .tool(Tool::Morphology)
        .arg("--bids")
        .path(&config.bids_root)
        .arg("--out")
        .path(&config.out_root)
        .args(["--sub", config.subject.participant.as_str()]);
    if let Some(session) = &config.subject.session {
        invocation = invocation.args(["--ses", session.as_str()]);
    }
    invocation = invocation
        .args(["--threads".to_string(), config.threads.to_string()])
        .args(["--recon", env.method.as_str()])
        .arg("--surf-dir")
        .path(&env.layout.recon_subject_dir(env.method))
        .arg("--maps-dir")
        .path(&env.layout.maps_dir());
    for map in outputs(env) {
        invocation = invocation.creates(&map);
    }
    ctx.run(invocation)?;
    Ok(())
}
