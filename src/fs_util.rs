use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use camino::Utf8Path;
use flate2::read::GzDecoder;
use serde::Serialize;

use crate::error::PipelineError;

pub fn validate_gzip(path: &Path) -> Result<(), PipelineError> {
    let file = fs::File::open(path)
        .map_err(|err| PipelineError::Filesystem(format!("open {}: {err}", path.display())))?;
    let mut decoder = GzDecoder::new(file);
    io::copy(&mut decoder, &mut io::sink()).map_err(|err| {
        PipelineError::Filesystem(format!("corrupt gzip {}: {err}", path.display()))
    })?;
    Ok(())
}

pub fn verify_artifact(path: &Utf8Path) -> Result<(), PipelineError> {
    if !path.as_std_path().is_file() {
        return Err(PipelineError::missing_input("output", path));
    }
    if path.extension() == Some("gz") {
        validate_gzip(path.as_std_path())?;
    }
    Ok(())
}

pub fn ensure_dir(path: &Utf8Path) -> Result<(), PipelineError> {
    fs::create_dir_all(path.as_std_path())
        .map_err(|err| PipelineError::Filesystem(format!("create {path}: {err}")))
}

pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let tmp_path = path.with_extension(match path.extension() {
        Some(ext) => format!("{ext}.tmp"),
        None => "tmp".to_string(),
    });
    fs::write(tmp_path.as_std_path(), content)
        .map_err(|err| PipelineError::Filesystem(err.to_string()))?;
    fs::rename(tmp_path.as_std_path(), path.as_std_path())
        .map_err(|err| PipelineError::Filesystem(err.to_string()))?;
    Ok(())
}

pub fn write_json_atomic<T: Serialize>(path: &Utf8Path, value: &T) -> Result<(), PipelineError> {
    let content =
        serde_json::to_vec_pretty(value).map_err(|err| PipelineError::Filesystem(err.to_string()))?;
    write_bytes_atomic(path, &content)
}

pub fn append_row(path: &Utf8Path, header: &str, row: &str) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let needs_header = fs::metadata(path.as_std_path())
        .map(|meta| meta.len() == 0)
        .unwrap_or(true);
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path.as_std_path())
        .map_err(|err| PipelineError::Filesystem(format!("open {path}: {err}")))?;
    let mut content = String::new();
    if needs_header {
        content.push_str(header);
        content.push('\n');
    }
    content.push_str(row);
    content.push('\n');
    file.write_all(content.as_bytes())
        .map_err(|err| PipelineError::Filesystem(err.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use camino::Utf8PathBuf;
    use flate2::Compression;
    use flate2::write::GzEncoder;

    fn utf8(path: std::path::PathBuf) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(path).unwrap()
    }

    #[test]
    fn truncated_gzip_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let path = utf8(temp.path().join("parc.nii.gz"));

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&[7u8; 4096]).unwrap();
        let bytes = encoder.finish().unwrap();

        fs::write(&path, &bytes).unwrap();
        verify_artifact(&path).unwrap();

        fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();
        assert_matches!(verify_artifact(&path), Err(PipelineError::Filesystem(_)));
    }

    #[test]
    fn missing_artifact_is_reported() {
        let temp = tempfile::tempdir().unwrap();
        let path = utf8(temp.path().join("lh.white.surf.gii"));
        assert_matches!(
            verify_artifact(&path),
            Err(PipelineError::MissingInput { .. })
        );
    }

    #[test]
    fn header_written_once() {
        let temp = tempfile::tempdir().unwrap();
        let path = utf8(temp.path().join("status").join("rows.csv"));
        append_row(&path, "a,b", "1,2").unwrap();
        append_row(&path, "a,b", "3,4").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "a,b\n1,2\n3,4\n");
    }

    #[test]
    fn atomic_write_leaves_no_temp_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = utf8(temp.path().join("record.json"));
        write_json_atomic(&path, &serde_json::json!({ "status": "COMPLETED" })).unwrap();
        assert!(path.as_std_path().exists());
        assert!(!temp.path().join("record.json.tmp").exists());
    }
}
