//! Conversion pipeline: turns raw files into AI-ready artifacts.
//!
//! Each source format has an ordered fallback chain. A chain that runs out
//! of options fails the single candidate with `ConversionError`, which the
//! caller records as an exclusion reason; it never aborts the procurement.

pub mod image;
pub mod office;
pub mod spreadsheet;

use crate::models::{Artifact, FileCandidate};

/// Terminal failure of a conversion chain for one file.
#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("unsupported extension: {0}")]
    Unsupported(String),
    #[error("conversion tool unavailable: {0}")]
    ToolUnavailable(String),
    #[error("{tool} failed: {detail}")]
    ToolFailed { tool: String, detail: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Formats the AI accepts without any conversion.
const DIRECT_EXTENSIONS: &[&str] = &[
    "pdf", "txt", "csv", "md", "html", "htm", "json", "xml", "png", "jpg", "jpeg", "webp", "mp4",
    "mov", "mpeg", "mp3", "wav", "ogg", "flac", "aac",
];

const OFFICE_EXTENSIONS: &[&str] = &["doc", "docx", "rtf", "odt"];
const SPREADSHEET_EXTENSIONS: &[&str] = &["xls", "xlsx", "xlsb", "ods"];

/// Whether some chain (possibly the identity one) exists for `ext`.
pub fn is_supported(ext: &str) -> bool {
    DIRECT_EXTENSIONS.contains(&ext)
        || OFFICE_EXTENSIONS.contains(&ext)
        || SPREADSHEET_EXTENSIONS.contains(&ext)
        || matches!(ext, "bmp" | "tiff" | "tif" | "svg" | "gif")
}

/// MIME type sent alongside an artifact's bytes.
pub fn content_type_for(ext: &str) -> &'static str {
    match ext {
        "pdf" => "application/pdf",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "xml" => "text/xml",
        "md" => "text/markdown",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "mpeg" => "video/mpeg",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "flac" => "audio/flac",
        "aac" => "audio/aac",
        _ => "text/plain",
    }
}

/// Run the conversion chain for `candidate`, filling its artifacts,
/// warnings, and fallback flag in place.
pub async fn prepare(candidate: &mut FileCandidate) -> Result<(), ConversionError> {
    let ext = candidate
        .effective_extension()
        .map(|e| e.to_string())
        .ok_or_else(|| ConversionError::Unsupported("(none)".to_string()))?;
    let name = candidate.file_name().to_string();

    if DIRECT_EXTENSIONS.contains(&ext.as_str()) {
        candidate.artifacts.push(Artifact {
            name,
            content_type: content_type_for(&ext).to_string(),
            bytes: candidate.original_content.clone(),
        });
        return Ok(());
    }

    if OFFICE_EXTENSIONS.contains(&ext.as_str()) {
        let (artifacts, used_fallback) =
            office::convert(&name, &ext, &candidate.original_content).await?;
        candidate.artifacts.extend(artifacts);
        candidate.used_fallback_conversion = used_fallback;
        return Ok(());
    }

    if SPREADSHEET_EXTENSIONS.contains(&ext.as_str()) {
        let (artifacts, warnings) = spreadsheet::convert(&name, &candidate.original_content)?;
        candidate.artifacts.extend(artifacts);
        candidate.warnings.extend(warnings);
        return Ok(());
    }

    match ext.as_str() {
        "bmp" => {
            candidate
                .artifacts
                .push(image::bmp_to_png(&name, &candidate.original_content)?);
            Ok(())
        }
        "tiff" | "tif" | "svg" => {
            candidate
                .artifacts
                .push(image::magick_to_png(&name, &ext, &candidate.original_content)?);
            Ok(())
        }
        "gif" => {
            let (artifact, warning, used_fallback) =
                image::gif_to_video(&name, &candidate.original_content)?;
            candidate.artifacts.push(artifact);
            candidate.warnings.extend(warning);
            candidate.used_fallback_conversion = used_fallback;
            Ok(())
        }
        other => Err(ConversionError::Unsupported(other.to_string())),
    }
}
