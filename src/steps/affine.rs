use std::collections::BTreeMap;

use camino::Utf8PathBuf;
use serde::Serialize;

use super::{StepContext, StepEnv};
use crate::domain::ReconMethod;
use crate::error::PipelineError;
use crate::fs_util;
use crate::tools::Tool;

#[derive(Debug, Serialize)]
struct TransformProvenance {
    from_space: &'static str,
    to_space: &'static str,
    surface_recon: ReconMethod,
    moving: String,
    fixed: String,
    transforms: Vec<String>,
    registration: &'static str,
    tool_versions: BTreeMap<String, String>,
    created_at: String,
    tool: String,
}

pub(super) fn inputs(env: &StepEnv<'_>) -> Vec<Utf8PathBuf> {
    vec![
        env.layout.nativepro_t1w(),
        env.layout.recon_t1(env.method),
    ]
}

pub(super) fn outputs(env: &StepEnv<'_>) -> Vec<Utf8PathBuf> {
    vec![env.layout.affine(), env.layout.transform_provenance()]
}

pub(super) fn execute(ctx: &StepContext<'_>) -> Result<(), PipelineError> {
    let layout = ctx.env.layout;
    let recon_t1 = layout.recon_t1(ctx.env.method);
    let nativepro = layout.nativepro_t1w();
    let t1surf = ctx.scratch("T1surf.nii.gz");

    ctx.run(ctx.tool(Tool::MriConvert).path(&recon_t1).output(&t1surf))?;
    ctx.run(
        ctx.tool(Tool::AntsRegistrationSyN)
            .args(["-d", "3", "-f"])
            .path(&nativepro)
            .arg("-m")
            .path(&t1surf)
            .arg("-o")
            .path(&layout.affine_prefix())
            .creates(&layout.affine())
            .args(["-t", "a", "-n"])
            .arg(ctx.env.config.threads.to_string())
            .args(["-p", "d"]),
    )?;

    let tool_versions = [Tool::WbCommand, Tool::MriConvert]
        .into_iter()
        .filter_map(|tool| ctx.tool_version(tool).map(|version| (tool.to_string(), version)))
        .collect();
    let provenance = TransformProvenance {
        from_space: "fsnative",
        to_space: "nativepro",
        surface_recon: ctx.env.method,
        moving: recon_t1.to_string(),
        fixed: nativepro.to_string(),
        transforms: vec![layout.affine().to_string()],
        registration: "affine",
        tool_versions,
        created_at: chrono::Utc::now().to_rfc3339(),
        tool: format!("post-structural/{}", env!("CARGO_PKG_VERSION")),
    };
    fs_util::write_json_atomic(&layout.transform_provenance(), &provenance)
}
