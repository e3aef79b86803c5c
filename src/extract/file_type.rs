//! File-type inference from content.
//!
//! Declared extensions on procurement attachments are frequently missing
//! or wrong; magic-byte sniffing recovers the real type. The inferred
//! extension is recorded separately from the declared one for audit.

/// Infer an extension (without the dot) from magic bytes, or None when
/// the content is not a recognized type.
pub fn infer_extension(content: &[u8]) -> Option<&'static str> {
    let kind = infer::get(content)?;
    match kind.extension() {
        // Normalize a couple of sniffer spellings to the extensions the
        // rest of the pipeline keys on.
        "jpg" => Some("jpg"),
        ext => Some(ext),
    }
}

/// Decide the effective extension for a file: keep the declared one when
/// it agrees with (or cannot be checked against) the content, otherwise
/// trust the sniffed type. Returns `(effective, inferred)`.
pub fn resolve_extension(
    declared: Option<&str>,
    content: &[u8],
) -> (Option<String>, Option<String>) {
    let inferred = infer_extension(content).map(|s| s.to_string());

    match (declared, inferred.as_deref()) {
        (None, Some(sniffed)) => (Some(sniffed.to_string()), inferred),
        (None, None) => (None, None),
        (Some(decl), None) => (Some(decl.to_string()), None),
        (Some(decl), Some(sniffed)) => {
            if extensions_agree(decl, sniffed) {
                (Some(decl.to_string()), inferred)
            } else {
                (Some(sniffed.to_string()), inferred)
            }
        }
    }
}

/// Sniffers cannot tell apart zip-container office formats and report
/// several equivalent spellings; treat those families as agreement.
fn extensions_agree(declared: &str, sniffed: &str) -> bool {
    if declared == sniffed {
        return true;
    }
    const FAMILIES: &[&[&str]] = &[
        &["jpg", "jpeg"],
        &["zip", "docx", "xlsx", "xlsb", "pptx", "odt", "ods"],
        &["doc", "xls", "ppt", "msi"],
        &["mp4", "mov", "m4v"],
        &["html", "htm", "xml", "txt", "json", "csv", "md"],
    ];
    FAMILIES
        .iter()
        .any(|family| family.contains(&declared) && family.contains(&sniffed))
}
