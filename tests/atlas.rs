mod common;

use std::fs;

use assert_matches::assert_matches;

use post_structural::atlas::{available_atlases, resolve_atlases};
use post_structural::domain::{AtlasName, AtlasSelector};
use post_structural::error::PipelineError;
use post_structural::layout::Library;

use common::{Fixture, write_file};

fn names(atlases: &[AtlasName]) -> Vec<&str> {
    atlases.iter().map(AtlasName::as_str).collect()
}

#[test]
fn default_selects_every_bundled_atlas() {
    let fixture = Fixture::bare();
    let library = Library::new(&fixture.library);

    let available = available_atlases(&library).unwrap();
    let resolved = resolve_atlases(&library, &AtlasSelector::Default).unwrap();

    assert_eq!(names(&available), vec!["aparc", "schaefer-400"]);
    assert_eq!(resolved, available);
}

#[test]
fn right_hemisphere_and_foreign_files_are_not_atlases() {
    let fixture = Fixture::bare();
    let parcellations = fixture.library.join("parcellations");
    write_file(&parcellations.join("rh.glasser-360_mics.annot"), b"annot");
    write_file(&parcellations.join("README.txt"), b"notes");
    let library = Library::new(&fixture.library);

    let available = available_atlases(&library).unwrap();

    assert_eq!(names(&available), vec!["aparc", "schaefer-400"]);
}

#[test]
fn explicit_names_keep_order_and_skip_unknown() {
    let fixture = Fixture::bare();
    let library = Library::new(&fixture.library);
    let selector: AtlasSelector = "schaefer-400,glasser-360,aparc,schaefer-400".parse().unwrap();

    let resolved = resolve_atlases(&library, &selector).unwrap();

    assert_eq!(names(&resolved), vec!["schaefer-400", "aparc"]);
}

#[test]
fn no_matching_name_is_an_error() {
    let fixture = Fixture::bare();
    let library = Library::new(&fixture.library);
    let selector: AtlasSelector = "glasser-360".parse().unwrap();

    assert_matches!(
        resolve_atlases(&library, &selector),
        Err(PipelineError::AtlasNotFound(_))
    );
}

#[test]
fn empty_library_is_an_error_for_default() {
    let fixture = Fixture::bare();
    let parcellations = fixture.library.join("parcellations");
    fs::remove_dir_all(&parcellations).unwrap();
    fs::create_dir_all(&parcellations).unwrap();
    let library = Library::new(&fixture.library);

    assert_matches!(
        resolve_atlases(&library, &AtlasSelector::Default),
        Err(PipelineError::AtlasNotFound(_))
    );
}

#[test]
fn missing_parcellation_directory_is_reported() {
    let fixture = Fixture::bare();
    fs::remove_dir_all(fixture.library.join("parcellations")).unwrap();
    let library = Library::new(&fixture.library);

    assert_matches!(
        available_atlases(&library),
        Err(PipelineError::MissingLibraryFile(_))
    );
}

#[test]
fn selector_parsing() {
    assert_eq!("default".parse::<AtlasSelector>().unwrap(), AtlasSelector::Default);
    assert_eq!(
        " aparc , ,schaefer-400 ".parse::<AtlasSelector>().unwrap(),
        AtlasSelector::Explicit(vec!["aparc".to_string(), "schaefer-400".to_string()])
    );
    assert_matches!(
        " , ".parse::<AtlasSelector>(),
        Err(PipelineError::AtlasNotFound(_))
    );
}
