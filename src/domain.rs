use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ParticipantId {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = strip_entity(value, "sub-");
        if !is_bids_label(normalized) {
            return Err(PipelineError::InvalidParticipant(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = strip_entity(value, "ses-");
        if !is_bids_label(normalized) {
            return Err(PipelineError::InvalidSession(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

fn strip_entity<'a>(value: &'a str, prefix: &str) -> &'a str {
    let trimmed = value.trim();
    trimmed.strip_prefix(prefix).unwrap_or(trimmed)
}

fn is_bids_label(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|ch| ch.is_ascii_alphanumeric())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubjectId {
    pub participant: ParticipantId,
    pub session: Option<SessionId>,
}

impl SubjectId {
    pub fn new(participant: ParticipantId, session: Option<SessionId>) -> Self {
        Self {
            participant,
            session,
        }
    }

    pub fn bids_id(&self) -> String {
        match &self.session {
            Some(session) => format!("sub-{}_ses-{}", self.participant, session),
            None => format!("sub-{}", self.participant),
        }
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bids_id())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReconMethod {
    Freesurfer,
    Fastsurfer,
}

impl ReconMethod {
    pub const ALL: [ReconMethod; 2] = [ReconMethod::Freesurfer, ReconMethod::Fastsurfer];

    pub fn as_str(self) -> &'static str {
        match self {
            ReconMethod::Freesurfer => "freesurfer",
            ReconMethod::Fastsurfer => "fastsurfer",
        }
    }
}

impl fmt::Display for ReconMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReconMethod {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "freesurfer" => Ok(ReconMethod::Freesurfer),
            "fastsurfer" => Ok(ReconMethod::Fastsurfer),
            _ => Err(PipelineError::InvalidReconMethod(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Hemisphere {
    Left,
    Right,
}

impl Hemisphere {
    pub const BOTH: [Hemisphere; 2] = [Hemisphere::Left, Hemisphere::Right];

    pub fn letter(self) -> &'static str {
        match self {
            Hemisphere::Left => "L",
            Hemisphere::Right => "R",
        }
    }

    pub fn fs_prefix(self) -> &'static str {
        match self {
            Hemisphere::Left => "lh",
            Hemisphere::Right => "rh",
        }
    }
}

impl fmt::Display for Hemisphere {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.letter())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Space {
    Fsnative,
    Nativepro,
}

impl Space {
    pub fn as_str(self) -> &'static str {
        match self {
            Space::Fsnative => "fsnative",
            Space::Nativepro => "nativepro",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceLabel {
    White,
    Pial,
    Midthickness,
}

impl SurfaceLabel {
    pub const ALL: [SurfaceLabel; 3] = [
        SurfaceLabel::White,
        SurfaceLabel::Pial,
        SurfaceLabel::Midthickness,
    ];

    pub const BOUNDARIES: [SurfaceLabel; 2] = [SurfaceLabel::White, SurfaceLabel::Pial];

    pub fn as_str(self) -> &'static str {
        match self {
            SurfaceLabel::White => "white",
            SurfaceLabel::Pial => "pial",
            SurfaceLabel::Midthickness => "midthickness",
        }
    }
}

pub const STANDARD_MESH: &str = "fsLR-32k";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceArtifact {
    pub hemisphere: Hemisphere,
    pub space: Space,
    pub label: SurfaceLabel,
}

impl SurfaceArtifact {
    pub fn new(hemisphere: Hemisphere, space: Space, label: SurfaceLabel) -> Self {
        Self {
            hemisphere,
            space,
            label,
        }
    }

    pub fn file_name(&self, bids_id: &str) -> String {
        format!(
            "{bids_id}_hemi-{}_space-{}_surf-{STANDARD_MESH}_label-{}.surf.gii",
            self.hemisphere.letter(),
            self.space.as_str(),
            self.label.as_str()
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MorphologySurface {
    FsLr32k,
    Fsaverage5,
    Fsnative,
}

impl MorphologySurface {
    pub const ALL: [MorphologySurface; 3] = [
        MorphologySurface::FsLr32k,
        MorphologySurface::Fsaverage5,
        MorphologySurface::Fsnative,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MorphologySurface::FsLr32k => STANDARD_MESH,
            MorphologySurface::Fsaverage5 => "fsaverage5",
            MorphologySurface::Fsnative => "fsnative",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MorphologyLabel {
    Thickness,
    Curv,
}

impl MorphologyLabel {
    pub const ALL: [MorphologyLabel; 2] = [MorphologyLabel::Thickness, MorphologyLabel::Curv];

    pub fn as_str(self) -> &'static str {
        match self {
            MorphologyLabel::Thickness => "thickness",
            MorphologyLabel::Curv => "curv",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MorphologyMap {
    pub hemisphere: Hemisphere,
    pub surface: MorphologySurface,
    pub label: MorphologyLabel,
}

impl MorphologyMap {
    pub fn expected() -> Vec<MorphologyMap> {
        let mut maps = Vec::new();
        for hemisphere in Hemisphere::BOTH {
            for surface in MorphologySurface::ALL {
                for label in MorphologyLabel::ALL {
                    maps.push(MorphologyMap {
                        hemisphere,
                        surface,
                        label,
                    });
                }
            }
        }
        maps
    }

    pub fn file_name(&self, bids_id: &str) -> String {
        format!(
            "{bids_id}_hemi-{}_surf-{}_label-{}.func.gii",
            self.hemisphere.letter(),
            self.surface.as_str(),
            self.label.as_str()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AtlasName(String);

impl AtlasName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AtlasName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AtlasName {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let is_valid = !trimmed.is_empty()
            && trimmed
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
            && !trimmed.starts_with('.');
        if !is_valid {
            return Err(PipelineError::InvalidAtlasName(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AtlasSelector {
    Default,
    Explicit(Vec<String>),
}

impl fmt::Display for AtlasSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AtlasSelector::Default => f.write_str("DEFAULT"),
            AtlasSelector::Explicit(names) => f.write_str(&names.join(",")),
        }
    }
}

impl FromStr for AtlasSelector {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.eq_ignore_ascii_case("default") {
            return Ok(AtlasSelector::Default);
        }
        let names = trimmed
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>();
        if names.is_empty() {
            return Err(PipelineError::AtlasNotFound(value.to_string()));
        }
        Ok(AtlasSelector::Explicit(names))
    }
}
