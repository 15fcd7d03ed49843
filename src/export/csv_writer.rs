//! CSV export.

use serde_json::Value;
use std::path::{Path, PathBuf};

use super::{
    ensure_parent, output_path, record_columns, ExportError, ExportFormat, ExportOptions,
    Exporter, COLUMNS, UNCERTAINTY_STATUS_COLUMN,
};
use crate::filter::KeptRecord;
use crate::utils::format_number;

/// Writes one row per record under a header of human-readable labels.
///
/// With highlighting on, an `Uncertainty Status` column carries
/// `known`/`unknown` so spreadsheet users can filter on it.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvExporter;

impl CsvExporter {
    pub fn new() -> Self {
        Self
    }
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl Exporter for CsvExporter {
    fn format(&self) -> ExportFormat {
        ExportFormat::Csv
    }

    fn export(
        &self,
        records: &[KeptRecord],
        path: &Path,
        options: &ExportOptions,
    ) -> Result<PathBuf, ExportError> {
        let path = output_path(path, ExportFormat::Csv);
        ensure_parent(&path)?;

        tracing::info!("Exporting {} records to CSV...", format_number(records.len() as u64));

        let mut writer = csv::Writer::from_path(&path)?;

        let mut header: Vec<&str> = COLUMNS.to_vec();
        if options.highlight_uncertain {
            header.push(UNCERTAINTY_STATUS_COLUMN);
        }
        writer.write_record(&header)?;

        for kept in records {
            let mut row: Vec<String> = record_columns(&kept.record)
                .iter()
                .map(|(_, value)| cell(value))
                .collect();
            if options.highlight_uncertain {
                row.push(kept.uncertainty.to_string());
            }
            writer.write_record(&row)?;
        }

        writer.flush()?;
        tracing::info!("CSV file saved: {}", path.display());

        Ok(path)
    }
}
