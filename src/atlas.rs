use std::fs;
use std::sync::OnceLock;

use regex::Regex;
use tracing::warn;

use crate::domain::{AtlasName, AtlasSelector, Hemisphere};
use crate::error::PipelineError;
use crate::layout::Library;

fn annotation_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^lh\.(?P<name>.+)_mics\.annot$").expect("annotation pattern is valid")
    })
}

pub fn available_atlases(library: &Library) -> Result<Vec<AtlasName>, PipelineError> {
    let dir = library.parcellations_dir();
    if !dir.as_std_path().is_dir() {
        return Err(PipelineError::MissingLibraryFile(dir.to_string()));
    }
    let entries = fs::read_dir(dir.as_std_path())
        .map_err(|err| PipelineError::Filesystem(format!("read {dir}: {err}")))?;
    let mut atlases = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| PipelineError::Filesystem(err.to_string()))?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        let Some(captures) = annotation_pattern().captures(file_name) else {
            continue;
        };
        if let Ok(atlas) = captures["name"].parse::<AtlasName>() {
            atlases.push(atlas);
        }
    }
    atlases.sort();
    atlases.dedup();
    Ok(atlases)
}

pub fn resolve_atlases(
    library: &Library,
    selector: &AtlasSelector,
) -> Result<Vec<AtlasName>, PipelineError> {
    let available = available_atlases(library)?;
    let resolved = match selector {
        AtlasSelector::Default => available,
        AtlasSelector::Explicit(names) => {
            let mut resolved = Vec::new();
            for name in names {
                let matched = name
                    .parse::<AtlasName>()
                    .ok()
                    .filter(|atlas| available.contains(atlas));
                match matched {
                    Some(atlas) if !resolved.contains(&atlas) => resolved.push(atlas),
                    Some(_) => {}
                    None => warn!(atlas = %name, "no bundled parcellation matches, skipping"),
                }
            }
            resolved
        }
    };

    if resolved.is_empty() {
        return Err(PipelineError::AtlasNotFound(selector.to_string()));
    }
    Ok(resolved)
}

pub fn annotation_inputs(library: &Library, atlas: &AtlasName) -> Vec<camino::Utf8PathBuf> {
    Hemisphere::BOTH
        .into_iter()
        .map(|hemi| library.annotation(hemi, atlas))
        .collect()
}
