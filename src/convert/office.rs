//! Office document conversion via LibreOffice, with plain-text salvage
//! fallbacks for when `soffice` is unavailable or chokes on a file.

use std::io::Read;
use std::process::Command;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{ConversionError, content_type_for};
use crate::models::Artifact;

/// soffice cannot run concurrently against the same user profile, so all
/// invocations across the process are serialized.
static SOFFICE_LOCK: Mutex<()> = Mutex::const_new(());

/// Convert an office document to AI-ready artifacts.
///
/// Primary path is soffice → PDF. When that fails, formats with a textual
/// substrate (docx, odt, rtf) get a plain-text salvage pass, flagged as a
/// fallback conversion so the audit trail shows the degraded fidelity.
pub async fn convert(
    name: &str,
    ext: &str,
    content: &[u8],
) -> Result<(Vec<Artifact>, bool), ConversionError> {
    match to_pdf(name, ext, content).await {
        Ok(pdf) => Ok((
            vec![Artifact {
                name: format!("{name}.pdf"),
                content_type: content_type_for("pdf").to_string(),
                bytes: pdf,
            }],
            false,
        )),
        Err(primary) => {
            warn!("soffice conversion of '{}' failed ({}), trying text salvage", name, primary);
            let text = match ext {
                "docx" => salvage_docx(content),
                "odt" => salvage_odt(content),
                "rtf" => salvage_rtf(content),
                _ => None,
            };
            match text {
                Some(text) if !text.trim().is_empty() => Ok((
                    vec![Artifact {
                        name: format!("{name}.txt"),
                        content_type: "text/plain".to_string(),
                        bytes: text.into_bytes(),
                    }],
                    true,
                )),
                _ => Err(primary),
            }
        }
    }
}

async fn to_pdf(name: &str, ext: &str, content: &[u8]) -> Result<Vec<u8>, ConversionError> {
    let soffice = which::which("soffice")
        .map_err(|_| ConversionError::ToolUnavailable("soffice not found in PATH".to_string()))?;

    let _guard = SOFFICE_LOCK.lock().await;

    let dir = tempfile::tempdir()?;
    let input = dir.path().join(format!("input.{ext}"));
    std::fs::write(&input, content)?;

    debug!("Converting '{}' to PDF via soffice", name);
    let output = Command::new(soffice)
        .args(["--headless", "--convert-to", "pdf", "--outdir"])
        .arg(dir.path())
        .arg(&input)
        .output()?;
    if !output.status.success() {
        return Err(ConversionError::ToolFailed {
            tool: "soffice".to_string(),
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let produced = dir.path().join("input.pdf");
    std::fs::read(&produced).map_err(|_| ConversionError::ToolFailed {
        tool: "soffice".to_string(),
        detail: "no PDF produced".to_string(),
    })
}

/// Pull readable text out of a docx by stripping the tags from its
/// `word/document.xml` part.
fn salvage_docx(content: &[u8]) -> Option<String> {
    xml_part_text(content, "word/document.xml", "</w:p>")
}

fn salvage_odt(content: &[u8]) -> Option<String> {
    xml_part_text(content, "content.xml", "</text:p>")
}

fn xml_part_text(content: &[u8], part: &str, paragraph_close: &str) -> Option<String> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(content)).ok()?;
    let mut entry = archive.by_name(part).ok()?;
    let mut xml = String::new();
    entry.read_to_string(&mut xml).ok()?;
    Some(strip_tags(&xml.replace(paragraph_close, "\n")))
}

fn strip_tags(xml: &str) -> String {
    let mut out = String::with_capacity(xml.len() / 2);
    let mut in_tag = false;
    for c in xml.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
}

/// Strip RTF control words and group braces, keeping the text runs.
fn salvage_rtf(content: &[u8]) -> Option<String> {
    let source = String::from_utf8_lossy(content);
    let mut out = String::new();
    let mut chars = source.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' | '}' => {}
            '\\' => {
                match chars.peek() {
                    // escaped literals
                    Some('\\') | Some('{') | Some('}') => {
                        out.push(chars.next().unwrap_or_default());
                    }
                    Some('\'') => {
                        chars.next();
                        let hex: String = chars.by_ref().take(2).collect();
                        if let Ok(byte) = u8::from_str_radix(&hex, 16) {
                            out.push(byte as char);
                        }
                    }
                    _ => {
                        let mut word = String::new();
                        while let Some(&n) = chars.peek() {
                            if n.is_ascii_alphabetic() {
                                word.push(n);
                                chars.next();
                            } else {
                                break;
                            }
                        }
                        // numeric parameter
                        while let Some(&n) = chars.peek() {
                            if n.is_ascii_digit() || n == '-' {
                                chars.next();
                            } else {
                                break;
                            }
                        }
                        // the delimiting space belongs to the control word
                        if chars.peek() == Some(&' ') {
                            chars.next();
                        }
                        if word == "par" || word == "line" {
                            out.push('\n');
                        }
                    }
                }
            }
            '\r' | '\n' => {}
            c => out.push(c),
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx_with_body(body_xml: &str) -> Vec<u8> {
        let mut buf = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buf);
            let options = zip::write::SimpleFileOptions::default();
            writer.start_file("word/document.xml", options).unwrap();
            writer.write_all(body_xml.as_bytes()).unwrap();
            writer.finish().unwrap();
        }
        buf.into_inner()
    }

    #[test]
    fn test_docx_salvage_strips_tags_and_keeps_paragraphs() {
        let docx = docx_with_body(
            "<w:document><w:p><w:r><w:t>Objeto: aquisi\u{e7}\u{e3}o</w:t></w:r></w:p>\
             <w:p><w:r><w:t>Valor estimado</w:t></w:r></w:p></w:document>",
        );
        let text = salvage_docx(&docx).unwrap();
        assert!(text.contains("Objeto: aquisi\u{e7}\u{e3}o"));
        assert!(text.contains("Valor estimado"));
        assert!(!text.contains('<'));
    }

    #[test]
    fn test_rtf_salvage_drops_control_words() {
        let rtf = br"{\rtf1\ansi\deff0 {\b Edital} de licita\'e7\'e3o.\par Segunda linha}";
        let text = salvage_rtf(rtf).unwrap();
        assert!(text.contains("Edital"), "got: {text}");
        assert!(text.contains("de licita\u{e7}\u{e3}o."));
        assert!(text.contains("Segunda linha"));
        assert!(!text.contains('\\'));
    }

    #[test]
    fn test_salvage_of_garbage_docx_is_none() {
        assert!(salvage_docx(b"not a zip at all").is_none());
    }
}
