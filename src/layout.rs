use camino::{Utf8Path, Utf8PathBuf};

use crate::domain::{
    AtlasName, Hemisphere, MorphologyMap, ReconMethod, SubjectId, SurfaceArtifact,
};
use crate::error::PipelineError;
use crate::fs_util;

pub const MODULE_NAME: &str = "post_structural";

#[derive(Debug, Clone)]
pub struct SubjectLayout {
    bids_id: String,
    out_root: Utf8PathBuf,
    pipeline_root: Utf8PathBuf,
    subject_dir: Utf8PathBuf,
}

impl SubjectLayout {
    pub fn new(out_root: &Utf8Path, pipeline_dir: &str, subject: SubjectId) -> Self {
        let pipeline_root = out_root.join(pipeline_dir);
        let mut subject_dir = pipeline_root.join(format!("sub-{}", subject.participant));
        if let Some(session) = &subject.session {
            subject_dir = subject_dir.join(format!("ses-{session}"));
        }
        Self {
            bids_id: subject.bids_id(),
            out_root: out_root.to_path_buf(),
            pipeline_root,
            subject_dir,
        }
    }

    pub fn bids_id(&self) -> &str {
        &self.bids_id
    }

    pub fn subject_dir(&self) -> &Utf8Path {
        &self.subject_dir
    }

    pub fn anat_dir(&self) -> Utf8PathBuf {
        self.subject_dir.join("anat")
    }

    pub fn surf_dir(&self) -> Utf8PathBuf {
        self.subject_dir.join("surf")
    }

    pub fn parc_dir(&self) -> Utf8PathBuf {
        self.subject_dir.join("parc")
    }

    pub fn xfm_dir(&self) -> Utf8PathBuf {
        self.subject_dir.join("xfm")
    }

    pub fn maps_dir(&self) -> Utf8PathBuf {
        self.subject_dir.join("maps")
    }

    pub fn qc_dir(&self) -> Utf8PathBuf {
        self.subject_dir.join("QC")
    }

    pub fn output_dirs(&self) -> Vec<Utf8PathBuf> {
        vec![
            self.surf_dir(),
            self.parc_dir(),
            self.xfm_dir(),
            self.maps_dir(),
            self.qc_dir(),
        ]
    }

    pub fn ensure_output_dirs(&self) -> Result<(), PipelineError> {
        for dir in self.output_dirs() {
            fs_util::ensure_dir(&dir)?;
        }
        Ok(())
    }

    pub fn nativepro_t1w(&self) -> Utf8PathBuf {
        self.anat_dir()
            .join(format!("{}_space-nativepro_T1w.nii.gz", self.bids_id))
    }

    pub fn nativepro_segmentation(&self) -> Utf8PathBuf {
        self.anat_dir().join(format!(
            "{}_space-nativepro_T1w_atlas-subcortical.nii.gz",
            self.bids_id
        ))
    }

    pub fn recon_marker(&self, method: ReconMethod) -> Utf8PathBuf {
        self.qc_dir().join(format!(
            "{}_module-proc_surf-{}.json",
            self.bids_id,
            method.as_str()
        ))
    }

    pub fn recon_root(&self, method: ReconMethod) -> Utf8PathBuf {
        self.out_root.join(method.as_str())
    }

    pub fn recon_subject_dir(&self, method: ReconMethod) -> Utf8PathBuf {
        self.recon_root(method).join(&self.bids_id)
    }

    pub fn recon_t1(&self, method: ReconMethod) -> Utf8PathBuf {
        self.recon_subject_dir(method).join("mri").join("T1.mgz")
    }

    pub fn recon_surface(&self, method: ReconMethod, hemi: Hemisphere, name: &str) -> Utf8PathBuf {
        self.recon_subject_dir(method)
            .join("surf")
            .join(format!("{}.{name}", hemi.fs_prefix()))
    }

    pub fn recon_annotation(
        &self,
        method: ReconMethod,
        hemi: Hemisphere,
        atlas: &AtlasName,
    ) -> Utf8PathBuf {
        self.recon_subject_dir(method)
            .join("label")
            .join(format!("{}.{atlas}_mics.annot", hemi.fs_prefix()))
    }

    pub fn affine_prefix(&self) -> Utf8PathBuf {
        self.xfm_dir()
            .join(format!("{}_from-fsnative_to_nativepro_T1w_", self.bids_id))
    }

    pub fn affine(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("{}0GenericAffine.mat", self.affine_prefix()))
    }

    pub fn transform_provenance(&self) -> Utf8PathBuf {
        self.xfm_dir().join(format!(
            "{}_transformations-{MODULE_NAME}.json",
            self.bids_id
        ))
    }

    pub fn parcellation(&self, atlas: &AtlasName) -> Utf8PathBuf {
        self.parc_dir().join(format!(
            "{}_space-nativepro_T1w_atlas-{atlas}.nii.gz",
            self.bids_id
        ))
    }

    pub fn surface(&self, artifact: SurfaceArtifact) -> Utf8PathBuf {
        self.surf_dir().join(artifact.file_name(&self.bids_id))
    }

    pub fn morphology_map(&self, map: MorphologyMap) -> Utf8PathBuf {
        self.maps_dir().join(map.file_name(&self.bids_id))
    }

    pub fn manifest(&self) -> Utf8PathBuf {
        self.qc_dir().join(format!(
            "{}_module-{MODULE_NAME}_manifest.json",
            self.bids_id
        ))
    }

    pub fn completion_record(&self) -> Utf8PathBuf {
        self.qc_dir()
            .join(format!("{}_module-{MODULE_NAME}.json", self.bids_id))
    }

    pub fn status_csv(&self) -> Utf8PathBuf {
        self.pipeline_root.join("processed_subjects.csv")
    }
}

#[derive(Debug, Clone)]
pub struct Library {
    root: Utf8PathBuf,
}

impl Library {
    pub fn new(root: &Utf8Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn parcellations_dir(&self) -> Utf8PathBuf {
        self.root.join("parcellations")
    }

    pub fn annotation(&self, hemi: Hemisphere, atlas: &AtlasName) -> Utf8PathBuf {
        self.parcellations_dir()
            .join(format!("{}.{atlas}_mics.annot", hemi.fs_prefix()))
    }

    pub fn fsaverage5(&self) -> Utf8PathBuf {
        self.root.join("fsaverage5")
    }

    pub fn fsaverage_sphere(&self, hemi: Hemisphere) -> Utf8PathBuf {
        let h = hemi.letter();
        self.root
            .join("surfaces")
            .join(format!("fsaverage_std_sphere.{h}.164k_fsavg_{h}.surf.gii"))
    }

    pub fn fslr_deformed_sphere(&self, hemi: Hemisphere) -> Utf8PathBuf {
        self.root.join("surfaces").join(format!(
            "fs_LR-deformed_to-fsaverage.{}.sphere.164k_fs_LR.surf.gii",
            hemi.letter()
        ))
    }

    pub fn fslr32k_sphere(&self, hemi: Hemisphere) -> Utf8PathBuf {
        self.root
            .join("surfaces")
            .join(format!("fsLR-32k.{}.sphere.surf.gii", hemi.letter()))
    }

    pub fn required_files(&self) -> Vec<Utf8PathBuf> {
        let mut files = vec![self.fsaverage5()];
        for hemi in Hemisphere::BOTH {
            files.push(self.fsaverage_sphere(hemi));
            files.push(self.fslr_deformed_sphere(hemi));
            files.push(self.fslr32k_sphere(hemi));
        }
        files
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Space, SurfaceLabel};

    fn layout() -> SubjectLayout {
        let subject = SubjectId::new("HC001".parse().unwrap(), Some("01".parse().unwrap()));
        SubjectLayout::new(Utf8Path::new("/data/derivatives"), "micapipe_v0.2.0", subject)
    }

    #[test]
    fn layout_paths() {
        let layout = layout();
        assert_eq!(
            layout.subject_dir(),
            "/data/derivatives/micapipe_v0.2.0/sub-HC001/ses-01"
        );
        assert!(
            layout
                .nativepro_t1w()
                .ends_with("anat/sub-HC001_ses-01_space-nativepro_T1w.nii.gz")
        );
        assert_eq!(
            layout.recon_t1(ReconMethod::Fastsurfer),
            "/data/derivatives/fastsurfer/sub-HC001_ses-01/mri/T1.mgz"
        );
        assert!(
            layout
                .affine()
                .ends_with("xfm/sub-HC001_ses-01_from-fsnative_to_nativepro_T1w_0GenericAffine.mat")
        );
        let white = layout.surface(SurfaceArtifact::new(
            Hemisphere::Left,
            Space::Fsnative,
            SurfaceLabel::White,
        ));
        assert!(white.starts_with(layout.surf_dir()));
    }

    #[test]
    fn library_paths() {
        let library = Library::new(Utf8Path::new("/opt/library"));
        let atlas: AtlasName = "schaefer-400".parse().unwrap();
        assert_eq!(
            library.annotation(Hemisphere::Right, &atlas),
            "/opt/library/parcellations/rh.schaefer-400_mics.annot"
        );
        assert_eq!(library.required_files().len(), 7);
    }
}
