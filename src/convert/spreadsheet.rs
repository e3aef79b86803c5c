//! Spreadsheet conversion: one CSV artifact per data sheet.

use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader, SheetType};
use tracing::debug;

use super::ConversionError;
use crate::models::{Artifact, PipelineWarning};

/// Convert a workbook into one CSV per sheet that actually holds data.
///
/// Chart sheets, macro sheets, and sheets with no cells are skipped with an
/// `IgnoredNonDataSheet` warning each; when anything was skipped alongside
/// converted sheets, a single `PartialConversion` warning is added too.
pub fn convert(
    name: &str,
    content: &[u8],
) -> Result<(Vec<Artifact>, Vec<PipelineWarning>), ConversionError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(content.to_vec()))
        .map_err(|e| ConversionError::ToolFailed {
            tool: "calamine".to_string(),
            detail: e.to_string(),
        })?;

    let sheets = workbook.sheets_metadata().to_vec();
    let mut artifacts = Vec::new();
    let mut warnings = Vec::new();
    let mut used_names: Vec<String> = Vec::new();

    for sheet in &sheets {
        if sheet.typ != SheetType::WorkSheet {
            warnings.push(PipelineWarning::IgnoredNonDataSheet {
                sheet_name: sheet.name.clone(),
                sheet_kind: format!("{:?}", sheet.typ),
            });
            continue;
        }
        let range = workbook
            .worksheet_range(&sheet.name)
            .map_err(|e| ConversionError::ToolFailed {
                tool: "calamine".to_string(),
                detail: e.to_string(),
            })?;
        if range.is_empty() {
            warnings.push(PipelineWarning::IgnoredNonDataSheet {
                sheet_name: sheet.name.clone(),
                sheet_kind: "WorkSheet".to_string(),
            });
            continue;
        }

        let mut csv = String::new();
        for row in range.rows() {
            let fields: Vec<String> = row.iter().map(|c| csv_field(&cell_text(c))).collect();
            csv.push_str(&fields.join(","));
            csv.push('\n');
        }

        let sheet_slug = unique_name(&sanitize(&sheet.name), &mut used_names);
        debug!("Sheet '{}' of '{}' converted to CSV", sheet.name, name);
        artifacts.push(Artifact {
            name: format!("{name}_{sheet_slug}.csv"),
            content_type: "text/csv".to_string(),
            bytes: csv.into_bytes(),
        });
    }

    if !warnings.is_empty() && !artifacts.is_empty() {
        warnings.push(PipelineWarning::PartialConversion {
            file_name: name.to_string(),
        });
    }
    if artifacts.is_empty() {
        return Err(ConversionError::ToolFailed {
            tool: "calamine".to_string(),
            detail: "workbook has no data sheets".to_string(),
        });
    }
    Ok((artifacts, warnings))
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 1e15 {
                format!("{}", *f as i64)
            } else {
                format!("{f}")
            }
        }
        Data::Int(i) => format!("{i}"),
        Data::Bool(b) => format!("{b}"),
        Data::DateTime(dt) => format!("{}", dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Error(_) => String::new(),
    }
}

fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Sheet names go into file names, so anything outside `[A-Za-z0-9_-]`
/// becomes an underscore.
fn sanitize(sheet_name: &str) -> String {
    let cleaned: String = sheet_name
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "planilha".to_string()
    } else {
        cleaned
    }
}

/// Distinct sanitized names can collide; suffix `_2`, `_3`, ... as needed.
fn unique_name(base: &str, used: &mut Vec<String>) -> String {
    let mut candidate = base.to_string();
    let mut n = 1;
    while used.iter().any(|u| u == &candidate) {
        n += 1;
        candidate = format!("{base}_{n}");
    }
    used.push(candidate.clone());
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_replaces_non_ascii() {
        assert_eq!(sanitize("Or\u{e7}amento 2024"), "Or_amento_2024");
        assert_eq!(sanitize("  Custos  "), "Custos");
        assert_eq!(sanitize("***"), "___");
        assert_eq!(sanitize(""), "planilha");
    }

    #[test]
    fn test_unique_name_adds_collision_suffixes() {
        let mut used = Vec::new();
        assert_eq!(unique_name("Plan_1", &mut used), "Plan_1");
        assert_eq!(unique_name("Plan_1", &mut used), "Plan_1_2");
        assert_eq!(unique_name("Plan_1", &mut used), "Plan_1_3");
        assert_eq!(unique_name("Outra", &mut used), "Outra");
    }

    #[test]
    fn test_csv_field_escaping() {
        assert_eq!(csv_field("simples"), "simples");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("cita \"isso\""), "\"cita \"\"isso\"\"\"");
    }

    #[test]
    fn test_cell_text_formats_whole_floats_as_integers() {
        assert_eq!(cell_text(&Data::Float(1500.0)), "1500");
        assert_eq!(cell_text(&Data::Float(0.5)), "0.5");
        assert_eq!(cell_text(&Data::Empty), "");
    }
}
