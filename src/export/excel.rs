//! Excel (xlsx) export.

use rust_xlsxwriter::{Color, Format, FormatAlign, FormatUnderline, Workbook, Worksheet};
use serde_json::Value;
use std::path::{Path, PathBuf};

use super::{
    ensure_parent, output_path, record_columns, ExportError, ExportFormat, ExportOptions,
    Exporter, COLUMNS, UNCERTAINTY_STATUS_COLUMN,
};
use crate::filter::{KeptRecord, UncertaintyStatus};
use crate::utils::format_number;

const SHEET_NAME: &str = "GBIF Data";
const HEADER_BLUE: u32 = 0x4472C4;
const UNCERTAIN_YELLOW: u32 = 0xFFF2CC;
const LINK_BLUE: u32 = 0x0563C1;
/// Rows sampled when sizing columns
const WIDTH_SAMPLE: usize = 100;
const MAX_COLUMN_WIDTH: usize = 50;

/// Writes a single styled worksheet.
///
/// The header row is frozen and links are clickable. With highlighting on,
/// every row whose uncertainty is unknown gets a yellow fill and an
/// `Uncertainty Status` column is added.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExcelExporter;

/// Cell formats for one row
struct RowFormats {
    plain: Format,
    link: Format,
}

impl RowFormats {
    fn new(highlighted: bool) -> Self {
        let mut plain = Format::new();
        let mut link = Format::new()
            .set_font_color(Color::RGB(LINK_BLUE))
            .set_underline(FormatUnderline::Single);
        if highlighted {
            plain = plain.set_background_color(Color::RGB(UNCERTAIN_YELLOW));
            link = link.set_background_color(Color::RGB(UNCERTAIN_YELLOW));
        }
        Self { plain, link }
    }
}

impl ExcelExporter {
    pub fn new() -> Self {
        Self
    }

    fn header(options: &ExportOptions) -> Vec<&'static str> {
        let mut header = COLUMNS.to_vec();
        if options.highlight_uncertain {
            header.push(UNCERTAINTY_STATUS_COLUMN);
        }
        header
    }

    fn write_cell(
        sheet: &mut Worksheet,
        row: u32,
        col: u16,
        value: &Value,
        formats: &RowFormats,
    ) -> Result<(), ExportError> {
        match value {
            Value::Null => {
                sheet.write_blank(row, col, &formats.plain)?;
            }
            Value::Number(n) => {
                let number = n.as_f64().unwrap_or_default();
                sheet.write_number_with_format(row, col, number, &formats.plain)?;
            }
            Value::String(s) if s.starts_with("http") => {
                sheet.write_url_with_format(row, col, s.as_str(), &formats.link)?;
            }
            Value::String(s) => {
                sheet.write_string_with_format(row, col, s, &formats.plain)?;
            }
            other => {
                sheet.write_string_with_format(row, col, other.to_string(), &formats.plain)?;
            }
        }
        Ok(())
    }
}

/// Whether a row gets the yellow fill
pub(crate) fn is_highlighted(kept: &KeptRecord, options: &ExportOptions) -> bool {
    options.highlight_uncertain && kept.uncertainty == UncertaintyStatus::Unknown
}

fn display_len(value: &Value) -> usize {
    match value {
        Value::Null => 0,
        Value::String(s) => s.chars().count(),
        other => other.to_string().chars().count(),
    }
}

/// Column widths from the header and the first rows, padded and capped
pub(crate) fn column_widths(records: &[KeptRecord], header: &[&str]) -> Vec<usize> {
    let mut widths: Vec<usize> = header.iter().map(|label| label.chars().count()).collect();

    for kept in records.iter().take(WIDTH_SAMPLE) {
        for (width, (_, value)) in widths.iter_mut().zip(record_columns(&kept.record).iter()) {
            *width = (*width).max(display_len(value));
        }
        if let Some(status) = widths.get_mut(COLUMNS.len()) {
            *status = (*status).max(kept.uncertainty.to_string().len());
        }
    }

    widths
        .into_iter()
        .map(|w| (w + 2).min(MAX_COLUMN_WIDTH))
        .collect()
}

impl Exporter for ExcelExporter {
    fn format(&self) -> ExportFormat {
        ExportFormat::Excel
    }

    fn export(
        &self,
        records: &[KeptRecord],
        path: &Path,
        options: &ExportOptions,
    ) -> Result<PathBuf, ExportError> {
        let path = output_path(path, ExportFormat::Excel);
        ensure_parent(&path)?;

        tracing::info!("Exporting {} records to Excel...", format_number(records.len() as u64));

        let header = Self::header(options);
        let header_format = Format::new()
            .set_bold()
            .set_font_color(Color::White)
            .set_background_color(Color::RGB(HEADER_BLUE))
            .set_align(FormatAlign::Center);
        let normal = RowFormats::new(false);
        let uncertain = RowFormats::new(true);

        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.set_name(SHEET_NAME)?;

        for (col, label) in (0u16..).zip(header.iter()) {
            sheet.write_string_with_format(0, col, *label, &header_format)?;
        }

        for (row, kept) in (1u32..).zip(records.iter()) {
            let formats = if is_highlighted(kept, options) {
                &uncertain
            } else {
                &normal
            };

            for (col, (_, value)) in (0u16..).zip(record_columns(&kept.record).iter()) {
                Self::write_cell(sheet, row, col, value, formats)?;
            }
            if options.highlight_uncertain {
                let status = Value::String(kept.uncertainty.to_string());
                Self::write_cell(sheet, row, COLUMNS.len() as u16, &status, formats)?;
            }
        }

        for (col, width) in (0u16..).zip(column_widths(records, &header)) {
            sheet.set_column_width(col, width as f64)?;
        }
        sheet.set_freeze_panes(1, 0)?;

        workbook.save(&path)?;
        tracing::info!("Excel file saved: {}", path.display());

        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::test_support::kept;
    use tempfile::tempdir;

    #[test]
    fn test_excel_export_writes_xlsx() {
        let dir = tempdir().unwrap();
        let records = vec![
            kept(1, UncertaintyStatus::Known),
            kept(2, UncertaintyStatus::Unknown),
        ];

        let path = ExcelExporter::new()
            .export(&records, &dir.path().join("nebria.csv"), &ExportOptions::default())
            .unwrap();
        assert_eq!(path, dir.path().join("nebria.xlsx"));

        // xlsx is a zip container
        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.len() > 100);
        assert_eq!(&bytes[..2], b"PK");
    }

    #[test]
    fn test_excel_export_empty_into_new_dir() {
        let dir = tempdir().unwrap();
        let options = ExportOptions {
            highlight_uncertain: false,
        };

        let path = ExcelExporter::new()
            .export(&[], &dir.path().join("out/empty"), &options)
            .unwrap();

        assert_eq!(path, dir.path().join("out/empty.xlsx"));
        assert!(path.exists());
    }

    #[test]
    fn test_only_unknown_uncertainty_is_highlighted() {
        let known = kept(1, UncertaintyStatus::Known);
        let unknown = kept(2, UncertaintyStatus::Unknown);
        let off = ExportOptions {
            highlight_uncertain: false,
        };

        assert!(is_highlighted(&unknown, &ExportOptions::default()));
        assert!(!is_highlighted(&known, &ExportOptions::default()));
        assert!(!is_highlighted(&unknown, &off));
    }

    #[test]
    fn test_column_widths() {
        let records = vec![kept(1, UncertaintyStatus::Unknown)];
        let header = ExcelExporter::header(&ExportOptions::default());

        let widths = column_widths(&records, &header);
        assert_eq!(widths.len(), COLUMNS.len() + 1);
        // "Year" vs "2020"
        assert_eq!(widths[0], 6);
        // locality text is longer than its label
        assert_eq!(widths[6], "Passo dello Stelvio, \"upper\" meadow".len() + 2);
        // the link is capped
        assert!(widths[15] <= MAX_COLUMN_WIDTH);
        assert_eq!(widths[16], UNCERTAINTY_STATUS_COLUMN.len() + 2);
    }
}
