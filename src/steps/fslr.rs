use camino::{Utf8Path, Utf8PathBuf};

use super::{StepContext, StepEnv};
use crate::domain::{Hemisphere, Space, SurfaceArtifact, SurfaceLabel};
use crate::error::PipelineError;
use crate::tools::Tool;

pub(super) fn inputs(env: &StepEnv<'_>, hemi: Hemisphere) -> Vec<Utf8PathBuf> {
    vec![
        env.layout.recon_surface(env.method, hemi, "white"),
        env.layout.recon_surface(env.method, hemi, "pial"),
        env.layout.recon_surface(env.method, hemi, "sphere.reg"),
        env.library.fsaverage_sphere(hemi),
        env.library.fslr_deformed_sphere(hemi),
        env.library.fslr32k_sphere(hemi),
    ]
}

pub(super) fn outputs(env: &StepEnv<'_>, hemi: Hemisphere) -> Vec<Utf8PathBuf> {
    SurfaceLabel::ALL
        .into_iter()
        .map(|label| env.layout.surface(SurfaceArtifact::new(hemi, Space::Fsnative, label)))
        .collect()
}

pub(super) fn execute(ctx: &StepContext<'_>, hemi: Hemisphere) -> Result<(), PipelineError> {
    let env = ctx.env;
    let sphere = project_sphere(ctx, hemi)?;

    for label in SurfaceLabel::BOUNDARIES {
        let native = convert_native(ctx, hemi, label.as_str())?;
        let target = env
            .layout
            .surface(SurfaceArtifact::new(hemi, Space::Fsnative, label));
        resample(ctx, hemi, &native, &sphere, &target)?;
    }

    average(ctx, hemi, Space::Fsnative)
}

pub(super) fn project_sphere(
    ctx: &StepContext<'_>,
    hemi: Hemisphere,
) -> Result<Utf8PathBuf, PipelineError> {
    let env = ctx.env;
    let native = convert_native(ctx, hemi, "sphere.reg")?;
    let projected = ctx.scratch(&format!("{}.sphere.reg.fsLR.surf.gii", hemi.fs_prefix()));
    ctx.run(
        ctx.tool(Tool::WbCommand)
            .arg("-surface-sphere-project-unproject")
            .path(&native)
            .path(&env.library.fsaverage_sphere(hemi))
            .path(&env.library.fslr_deformed_sphere(hemi))
            .output(&projected),
    )?;
    Ok(projected)
}

pub(super) fn convert_native(
    ctx: &StepContext<'_>,
    hemi: Hemisphere,
    name: &str,
) -> Result<Utf8PathBuf, PipelineError> {
    let source = ctx.env.layout.recon_surface(ctx.env.method, hemi, name);
    let target = ctx.scratch(&format!("{}.{name}.surf.gii", hemi.fs_prefix()));
    ctx.run(ctx.tool(Tool::MrisConvert).path(&source).output(&target))?;
    Ok(target)
}

pub(super) fn resample(
    ctx: &StepContext<'_>,
    hemi: Hemisphere,
    surface: &Utf8Path,
    sphere: &Utf8Path,
    target: &Utf8Path,
) -> Result<(), PipelineError> {
    ctx.run(
        ctx.tool(Tool::WbCommand)
            .arg("-surface-resample")
            .path(surface)
            .path(sphere)
            .path(&ctx.env.library.fslr32k_sphere(hemi))
            .arg("BARYCENTRIC")
            .output(target),
    )?;
    Ok(())
}

pub(super) fn average(
    ctx: &StepContext<'_>,
    hemi: Hemisphere,
    space: Space,
) -> Result<(), PipelineError> {
    let surface = |label| ctx.env.layout.surface(SurfaceArtifact::new(hemi, space, label));
    ctx.run(
        ctx.tool(Tool::WbCommand)
            .arg("-surface-average")
            .output(&surface(SurfaceLabel::Midthickness))
            .arg("-surf")
            .path(&surface(SurfaceLabel::White))
            .arg("-surf")
            .path(&surface(SurfaceLabel::Pial)),
    )?;
    Ok(())
}
