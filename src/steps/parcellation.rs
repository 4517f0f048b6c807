use camino::Utf8PathBuf;

use super::{StepContext, StepEnv};
use crate::atlas;
use crate::domain::{AtlasName, Hemisphere};
use crate::error::PipelineError;
use crate::tools::Tool;

pub(super) fn inputs(env: &StepEnv<'_>, atlas: &AtlasName) -> Vec<Utf8PathBuf> {
    let mut inputs = vec![
        env.layout.affine(),
        env.layout.nativepro_t1w(),
        env.layout.recon_subject_dir(env.method),
    ];
    inputs.extend(atlas::annotation_inputs(env.library, atlas));
    inputs
}

pub(super) fn outputs(env: &StepEnv<'_>, atlas: &AtlasName) -> Vec<Utf8PathBuf> {
    vec![env.layout.parcellation(atlas)]
}

pub(super) fn execute(ctx: &StepContext<'_>, atlas: &AtlasName) -> Result<(), PipelineError> {
    let env = ctx.env;
    let bids_id = env.layout.bids_id();
    let subjects_dir = ctx.subjects_dir()?;

    for hemi in Hemisphere::BOTH {
        ctx.run(
            ctx.tool(Tool::MriSurf2Surf)
                .env("SUBJECTS_DIR", subjects_dir.as_str())
                .args(["--hemi", hemi.fs_prefix()])
                .args(["--srcsubject", "fsaverage5", "--trgsubject", bids_id])
                .arg("--sval-annot")
                .path(&env.library.annotation(hemi, atlas))
                .arg("--tval")
                .output(&env.layout.recon_annotation(env.method, hemi, atlas)),
        )?;
    }

    let label_mgz = ctx.scratch(&format!("{atlas}.mgz"));
    let label_nii = ctx.scratch(&format!("{atlas}.nii.gz"));
    ctx.run(
        ctx.tool(Tool::MriAparc2Aseg)
            .env("SUBJECTS_DIR", subjects_dir.as_str())
            .args(["--s", bids_id, "--o"])
            .output(&label_mgz)
            .args(["--annot".to_string(), format!("{atlas}_mics")])
            .arg("--new-ribbon"),
    )?;
    ctx.run(ctx.tool(Tool::MriConvert).path(&label_mgz).output(&label_nii))?;
    ctx.run(
        ctx.tool(Tool::AntsApplyTransforms)
            .args(["-d", "3", "-i"])
            .path(&label_nii)
            .arg("-r")
            .path(&env.layout.nativepro_t1w())
            .args(["-n", "GenericLabel", "-t"])
            .path(&env.layout.affine())
            .arg("-o")
            .output(&env.layout.parcellation(atlas))
            .args(["-u", "int"]),
    )?;
    Ok(())
}
