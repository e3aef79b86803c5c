//! Archive and format normalizer.
//!
//! Flattens a downloaded attachment into a flat list of files annotated
//! with their nesting depth, recursing into containers (zip, rar, 7z). A
//! corrupted or encrypted container yields zero entries for that branch
//! and a warning; it never aborts the whole procurement.

pub mod file_type;

use std::io::{Cursor, Read};
use std::path::Path;
use std::process::Command;

use tracing::warn;

pub use file_type::{infer_extension, resolve_extension};

use crate::models::extension_of;

/// One file produced by flattening, with its depth inside nested archives.
#[derive(Debug, Clone)]
pub struct ExtractedFile {
    /// Path including parent archive names, e.g. `docs.zip/anexo/edital.pdf`.
    pub path: String,
    pub content: Vec<u8>,
    pub nesting_level: u32,
}

/// Result of flattening one attachment.
#[derive(Debug, Default)]
pub struct FlattenOutcome {
    pub files: Vec<ExtractedFile>,
    /// Paths of containers that could not be opened (corrupted, encrypted,
    /// or missing extraction tool). Recorded so the caller can keep an
    /// audit trail for the dropped branch.
    pub failed_archives: Vec<String>,
}

/// Recursively flatten `content` named `name` into leaf files.
pub fn flatten(name: &str, content: Vec<u8>) -> FlattenOutcome {
    let mut outcome = FlattenOutcome::default();
    walk(name.to_string(), content, 0, &mut outcome);
    outcome
}

fn walk(path: String, content: Vec<u8>, level: u32, outcome: &mut FlattenOutcome) {
    match container_kind(&path, &content) {
        Some(kind) => match kind.extract(&content) {
            Ok(entries) => {
                for (member_name, member_content) in entries {
                    let nested_path = format!("{}/{}", path, member_name);
                    walk(nested_path, member_content, level + 1, outcome);
                }
            }
            Err(e) => {
                warn!("Could not extract archive '{}': {}. Branch skipped.", path, e);
                outcome.failed_archives.push(path);
            }
        },
        None => outcome.files.push(ExtractedFile {
            path,
            content,
            nesting_level: level,
        }),
    }
}

#[derive(Debug, Clone, Copy)]
enum ContainerKind {
    Zip,
    Rar,
    SevenZ,
}

/// Office formats that ride the zip container. A zip sniff on one of
/// these is the document itself, not an archive to recurse into.
const ZIP_CARRIER_EXTENSIONS: &[&str] = &["docx", "xlsx", "xlsb", "pptx", "odt", "ods"];

/// Mislabeled archives are common in the feed, so the sniffed type wins
/// whenever the declared extension is absent or contradicts it.
fn container_kind(path: &str, content: &[u8]) -> Option<ContainerKind> {
    let declared = extension_of(path);
    match infer_extension(content) {
        Some("zip") => {
            if matches!(declared.as_deref(), Some(ext) if ZIP_CARRIER_EXTENSIONS.contains(&ext)) {
                return None;
            }
            return Some(ContainerKind::Zip);
        }
        Some("rar") => return Some(ContainerKind::Rar),
        Some("7z") => return Some(ContainerKind::SevenZ),
        _ => {}
    }
    match declared.as_deref() {
        Some("zip") => Some(ContainerKind::Zip),
        Some("rar") => Some(ContainerKind::Rar),
        Some("7z") => Some(ContainerKind::SevenZ),
        _ => None,
    }
}

impl ContainerKind {
    fn extract(&self, content: &[u8]) -> Result<Vec<(String, Vec<u8>)>, ExtractionError> {
        match self {
            Self::Zip => extract_zip(content),
            Self::Rar => extract_rar(content),
            Self::SevenZ => extract_7z(content),
        }
    }
}

/// Errors while opening a container. Callers treat all of them as a
/// skipped branch rather than a fatal condition.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("invalid archive: {0}")]
    Invalid(String),
    #[error("extraction tool unavailable: {0}")]
    ToolUnavailable(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn extract_zip(content: &[u8]) -> Result<Vec<(String, Vec<u8>)>, ExtractionError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(content))
        .map_err(|e| ExtractionError::Invalid(e.to_string()))?;

    let mut entries = Vec::new();
    for idx in 0..archive.len() {
        let mut entry = archive
            .by_index(idx)
            .map_err(|e| ExtractionError::Invalid(e.to_string()))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry
            .enclosed_name()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| entry.name().to_string());
        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut bytes)
            .map_err(|e| ExtractionError::Invalid(e.to_string()))?;
        entries.push((name, bytes));
    }
    Ok(entries)
}

/// Extract a rar archive via the external `unrar` binary, the same way
/// other external tools (soffice, ffmpeg) are invoked: temp dir in, files
/// out. `-p-` refuses password prompts so encrypted archives fail fast.
fn extract_rar(content: &[u8]) -> Result<Vec<(String, Vec<u8>)>, ExtractionError> {
    let unrar = which::which("unrar")
        .map_err(|_| ExtractionError::ToolUnavailable("unrar not found in PATH".to_string()))?;

    let dir = tempfile::tempdir()?;
    let input = dir.path().join("input.rar");
    std::fs::write(&input, content)?;
    let out_dir = dir.path().join("out");
    std::fs::create_dir_all(&out_dir)?;

    let output = Command::new(unrar)
        .arg("x")
        .arg("-y")
        .arg("-p-")
        .arg(&input)
        .arg(&out_dir)
        .output()?;
    if !output.status.success() {
        return Err(ExtractionError::Invalid(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    let mut entries = Vec::new();
    collect_dir(&out_dir, &out_dir, &mut entries)?;
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(entries)
}

/// Extract a 7z archive via an external `7z` binary (also accepting the
/// `7za`/`7zr` variants), mirroring the rar path. `-p-` supplies a dummy
/// password so encrypted archives fail fast instead of prompting.
fn extract_7z(content: &[u8]) -> Result<Vec<(String, Vec<u8>)>, ExtractionError> {
    let tool = which::which("7z")
        .or_else(|_| which::which("7za"))
        .or_else(|_| which::which("7zr"))
        .map_err(|_| ExtractionError::ToolUnavailable("7z not found in PATH".to_string()))?;

    let dir = tempfile::tempdir()?;
    let input = dir.path().join("input.7z");
    std::fs::write(&input, content)?;
    let out_dir = dir.path().join("out");
    std::fs::create_dir_all(&out_dir)?;

    let output = Command::new(tool)
        .arg("x")
        .arg("-y")
        .arg("-p-")
        .arg(format!("-o{}", out_dir.display()))
        .arg(&input)
        .output()?;
    if !output.status.success() {
        return Err(ExtractionError::Invalid(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    let mut entries = Vec::new();
    collect_dir(&out_dir, &out_dir, &mut entries)?;
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(entries)
}

fn collect_dir(
    root: &Path,
    dir: &Path,
    entries: &mut Vec<(String, Vec<u8>)>,
) -> Result<(), std::io::Error> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_dir(root, &path, entries)?;
        } else {
            let rel = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .into_owned();
            entries.push((rel, std::fs::read(&path)?));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn build_zip(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buf);
            let options = zip::write::SimpleFileOptions::default();
            for (name, content) in files {
                writer.start_file(*name, options).unwrap();
                writer.write_all(content).unwrap();
            }
            writer.finish().unwrap();
        }
        buf.into_inner()
    }

    #[test]
    fn test_non_archive_is_a_leaf_at_level_zero() {
        let outcome = flatten("edital.pdf", b"%PDF-1.7 content".to_vec());
        assert_eq!(outcome.files.len(), 1);
        assert_eq!(outcome.files[0].path, "edital.pdf");
        assert_eq!(outcome.files[0].nesting_level, 0);
        assert!(outcome.failed_archives.is_empty());
    }

    #[test]
    fn test_zip_entries_get_incremented_nesting() {
        let zip_bytes = build_zip(&[("anexo.txt", b"oi"), ("sub/edital.pdf", b"%PDF-1.4")]);
        let outcome = flatten("docs.zip", zip_bytes);
        assert_eq!(outcome.files.len(), 2);
        for file in &outcome.files {
            assert_eq!(file.nesting_level, 1);
            assert!(file.path.starts_with("docs.zip/"));
        }
    }

    #[test]
    fn test_nested_zip_recurses() {
        let inner = build_zip(&[("planilha.csv", b"a,b\n1,2")]);
        let outer = build_zip(&[("inner.zip", &inner), ("nota.txt", b"n")]);
        let outcome = flatten("pacote.zip", outer);

        let deep = outcome
            .files
            .iter()
            .find(|f| f.path.ends_with("planilha.csv"))
            .expect("nested file present");
        assert_eq!(deep.nesting_level, 2);
        assert_eq!(deep.path, "pacote.zip/inner.zip/planilha.csv");

        let shallow = outcome.files.iter().find(|f| f.path.ends_with("nota.txt")).unwrap();
        assert_eq!(shallow.nesting_level, 1);
    }

    #[test]
    fn test_corrupted_zip_yields_zero_entries_and_a_failure() {
        let outcome = flatten("quebrado.zip", b"PK\x03\x04 definitely not a zip".to_vec());
        assert!(outcome.files.is_empty());
        assert_eq!(outcome.failed_archives, vec!["quebrado.zip".to_string()]);
    }

    #[test]
    fn test_mislabeled_zip_is_still_extracted() {
        let zip_bytes = build_zip(&[("edital.pdf", b"%PDF-1.4")]);
        let outcome = flatten("anexo.dat", zip_bytes);
        assert_eq!(outcome.files.len(), 1);
        assert_eq!(outcome.files[0].path, "anexo.dat/edital.pdf");
        assert_eq!(outcome.files[0].nesting_level, 1);
    }

    #[test]
    fn test_office_zip_carrier_stays_a_leaf() {
        let docx = build_zip(&[
            ("[Content_Types].xml", b"<Types/>".as_slice()),
            ("word/document.xml", b"<w:document/>".as_slice()),
        ]);
        let outcome = flatten("edital.docx", docx);
        assert_eq!(outcome.files.len(), 1);
        assert_eq!(outcome.files[0].path, "edital.docx");
        assert_eq!(outcome.files[0].nesting_level, 0);
    }

    #[test]
    fn test_bad_7z_yields_a_failure() {
        // fails on the signature when 7z is installed and on tool lookup
        // when it is not; either way the branch is recorded, not fatal
        let outcome = flatten("arquivo.7z", b"not a sevenzip archive".to_vec());
        assert!(outcome.files.is_empty());
        assert_eq!(outcome.failed_archives, vec!["arquivo.7z".to_string()]);
    }
}
