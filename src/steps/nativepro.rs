use camino::{Utf8Path, Utf8PathBuf};

use super::{StepContext, StepEnv, fslr};
use crate::domain::{Hemisphere, ReconMethod, Space, SurfaceArtifact, SurfaceLabel};
use crate::error::PipelineError;
use crate::fs_util;
use crate::tools::Tool;

pub(super) fn inputs(env: &StepEnv<'_>, hemi: Hemisphere) -> Vec<Utf8PathBuf> {
    let mut inputs = vec![env.layout.affine()];
    match env.method {
        ReconMethod::Freesurfer => {
            inputs.push(env.layout.recon_t1(env.method));
            inputs.extend(SurfaceLabel::ALL.into_iter().map(|label| {
                env.layout
                    .surface(SurfaceArtifact::new(hemi, Space::Fsnative, label))
            }));
        }
        ReconMethod::Fastsurfer => {
            inputs.push(env.layout.recon_surface(env.method, hemi, "white"));
            inputs.push(env.layout.recon_surface(env.method, hemi, "pial"));
            inputs.push(env.layout.recon_surface(env.method, hemi, "sphere.reg"));
            inputs.push(env.library.fslr32k_sphere(hemi));
        }
    }
    inputs
}

pub(super) fn outputs(env: &StepEnv<'_>, hemi: Hemisphere) -> Vec<Utf8PathBuf> {
    SurfaceLabel::ALL
        .into_iter()
        .map(|label| {
            env.layout
                .surface(SurfaceArtifact::new(hemi, Space::Nativepro, label))
        })
        .collect()
}

pub(super) fn execute(ctx: &StepContext<'_>, hemi: Hemisphere) -> Result<(), PipelineError> {
    match ctx.env.method {
        ReconMethod::Freesurfer => apply_affine(ctx, hemi),
        ReconMethod::Fastsurfer => resample_native(ctx, hemi),
    }
}

fn apply_affine(ctx: &StepContext<'_>, hemi: Hemisphere) -> Result<(), PipelineError> {
    let env = ctx.env;
    let output = ctx.run(
        ctx.tool(Tool::MriInfo)
            .arg("--cras")
            .path(&env.layout.recon_t1(env.method)),
    )?;
    let cras = parse_cras(&output.stdout)?;
    let offset = ctx.scratch(&format!("{}_cras_offset.mat", hemi.fs_prefix()));
    write_offset_matrix(&offset, cras)?;
    let world = ctx.world_affine()?;

    for label in SurfaceLabel::ALL {
        let source = env
            .layout
            .surface(SurfaceArtifact::new(hemi, Space::Fsnative, label));
        let shifted = ctx.scratch(&format!(
            "{}.{}.cras.surf.gii",
            hemi.fs_prefix(),
            label.as_str()
        ));
        let target = env
            .layout
            .surface(SurfaceArtifact::new(hemi, Space::Nativepro, label));
        ctx.run(
            ctx.tool(Tool::WbCommand)
                .arg("-surface-apply-affine")
                .path(&source)
                .path(&offset)
                .output(&shifted),
        )?;
        ctx.run(
            ctx.tool(Tool::WbCommand)
                .arg("-surface-apply-affine")
                .path(&shifted)
                .path(&world)
                .output(&target),
        )?;
    }
    Ok(())
}

fn resample_native(ctx: &StepContext<'_>, hemi: Hemisphere) -> Result<(), PipelineError> {
    let env = ctx.env;
    let world = ctx.world_affine()?;
    let sphere = fslr::project_sphere(ctx, hemi)?;

    for label in SurfaceLabel::BOUNDARIES {
        let native = fslr::convert_native(ctx, hemi, label.as_str())?;
        let moved = ctx.scratch(&format!(
            "{}.{}.nativepro.surf.gii",
            hemi.fs_prefix(),
            label.as_str()
        ));
        ctx.run(
            ctx.tool(Tool::WbCommand)
                .arg("-surface-apply-affine")
                .path(&native)
                .path(&world)
                .output(&moved),
        )?;
        let target = env
            .layout
            .surface(SurfaceArtifact::new(hemi, Space::Nativepro, label));
        fslr::resample(ctx, hemi, &moved, &sphere, &target)?;
    }

    fslr::average(ctx, hemi, Space::Nativepro)
}

pub fn parse_cras(stdout: &str) -> Result<[f64; 3], PipelineError> {
    let invalid = || PipelineError::ToolOutput {
        tool: Tool::MriInfo.to_string(),
        message: format!("expected three coordinates, got {:?}", stdout.trim()),
    };
    let line = stdout
        .lines()
        .map(str::trim)
        .rfind(|line| !line.is_empty())
        .ok_or_else(invalid)?;
    let values = line
        .split_whitespace()
        .map(str::parse::<f64>)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| invalid())?;
    match values.as_slice() {
        [x, y, z] if values.iter().all(|value| value.is_finite()) => Ok([*x, *y, *z]),
        _ => Err(invalid()),
    }
}

fn write_offset_matrix(path: &Utf8Path, [x, y, z]: [f64; 3]) -> Result<(), PipelineError> {
    let matrix = format!(
        "1 0 0 {x:.6}\n0 1 0 {y:.6}\n0 0 1 {z:.6}\n0 0 0 1\n"
    );
    fs_util::write_bytes_atomic(path, matrix.as_bytes())
}
