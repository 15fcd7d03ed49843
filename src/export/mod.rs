//! Writers for filtered occurrence records.
//!
//! Exporters receive the kept records, an output path and [`ExportOptions`];
//! they own every file-format concern. The output path's extension is
//! corrected to match the format and the resolved path is returned.

#[cfg(feature = "csv-export")]
mod csv_writer;
#[cfg(feature = "excel-export")]
mod excel;
#[cfg(feature = "geojson-export")]
mod geojson;

#[cfg(feature = "csv-export")]
pub use csv_writer::CsvExporter;
#[cfg(feature = "excel-export")]
pub use excel::ExcelExporter;
#[cfg(feature = "geojson-export")]
pub use geojson::GeoJsonExporter;

use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::filter::KeptRecord;
use crate::models::OccurrenceRecord;

/// Column labels, in output order
pub const COLUMNS: [&str; 16] = [
    "Year",
    "Date",
    "Latitude",
    "Longitude",
    "Uncertainty (m)",
    "Elevation (m)",
    "Locality",
    "Genus",
    "Species",
    "Scientific Name",
    "Institution",
    "Catalog No",
    "Recorded By",
    "Country",
    "State/Province",
    "Link",
];

/// Extra column written when uncertainty highlighting is on
pub const UNCERTAINTY_STATUS_COLUMN: &str = "Uncertainty Status";

/// Export errors
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "csv-export")]
    #[error("CSV error: {0}")]
    Csv(#[from] ::csv::Error),

    #[cfg(feature = "excel-export")]
    #[error("Excel error: {0}")]
    Excel(#[from] rust_xlsxwriter::XlsxError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Unsupported(String),
}

/// Options shared by every exporter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportOptions {
    /// Mark records whose coordinate uncertainty is unknown
    pub highlight_uncertain: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            highlight_uncertain: true,
        }
    }
}

/// Writes kept records to a file
pub trait Exporter {
    fn format(&self) -> ExportFormat;

    /// Write `records` to `path` (extension corrected), returning the path
    /// actually written
    fn export(
        &self,
        records: &[KeptRecord],
        path: &Path,
        options: &ExportOptions,
    ) -> Result<PathBuf, ExportError>;
}

/// Supported output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportFormat {
    Excel,
    Csv,
    GeoJson,
}

impl ExportFormat {
    /// Default file extension
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Excel => "xlsx",
            ExportFormat::Csv => "csv",
            ExportFormat::GeoJson => "geojson",
        }
    }

    /// Extensions accepted as-is
    pub fn accepted_extensions(&self) -> &'static [&'static str] {
        match self {
            ExportFormat::Excel => &["xlsx"],
            ExportFormat::Csv => &["csv"],
            ExportFormat::GeoJson => &["geojson", "json"],
        }
    }

    /// The exporter for this format, if compiled in
    pub fn exporter(&self) -> Result<Box<dyn Exporter>, ExportError> {
        match self {
            #[cfg(feature = "excel-export")]
            ExportFormat::Excel => Ok(Box::new(ExcelExporter::new())),
            #[cfg(feature = "csv-export")]
            ExportFormat::Csv => Ok(Box::new(CsvExporter::new())),
            #[cfg(feature = "geojson-export")]
            ExportFormat::GeoJson => Ok(Box::new(GeoJsonExporter::new())),
            #[allow(unreachable_patterns)]
            other => Err(ExportError::Unsupported(format!(
                "{} export is not enabled in this build",
                other
            ))),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Excel => write!(f, "excel"),
            ExportFormat::Csv => write!(f, "csv"),
            ExportFormat::GeoJson => write!(f, "geojson"),
        }
    }
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "excel" | "xlsx" => Ok(ExportFormat::Excel),
            "csv" => Ok(ExportFormat::Csv),
            "geojson" | "json" => Ok(ExportFormat::GeoJson),
            other => Err(ExportError::Unsupported(format!(
                "Unsupported format: {}. Supported formats: excel, xlsx, csv, geojson, json",
                other
            ))),
        }
    }
}

/// Export with the exporter for `format`
pub fn export_records(
    format: ExportFormat,
    records: &[KeptRecord],
    path: &Path,
    options: &ExportOptions,
) -> Result<PathBuf, ExportError> {
    format.exporter()?.export(records, path, options)
}

/// Column values for one record, paired with their labels
pub fn record_columns(record: &OccurrenceRecord) -> [(&'static str, Value); 16] {
    let text = |v: &Option<String>| v.clone().map(Value::String).unwrap_or(Value::Null);
    let number = |v: Option<f64>| v.map(Value::from).unwrap_or(Value::Null);

    [
        (COLUMNS[0], record.year.map(Value::from).unwrap_or(Value::Null)),
        (COLUMNS[1], text(&record.event_date)),
        (COLUMNS[2], number(record.latitude)),
        (COLUMNS[3], number(record.longitude)),
        (COLUMNS[4], number(record.coordinate_uncertainty)),
        (COLUMNS[5], number(record.elevation)),
        (COLUMNS[6], text(&record.locality)),
        (COLUMNS[7], text(&record.genus)),
        (COLUMNS[8], text(&record.species)),
        (COLUMNS[9], text(&record.scientific_name)),
        (COLUMNS[10], text(&record.institution_code)),
        (COLUMNS[11], text(&record.catalog_number)),
        (COLUMNS[12], text(&record.recorded_by)),
        (COLUMNS[13], text(&record.country)),
        (COLUMNS[14], text(&record.state_province)),
        (COLUMNS[15], Value::String(record.gbif_url())),
    ]
}

/// Force the path's extension to one the format accepts
pub(crate) fn output_path(path: &Path, format: ExportFormat) -> PathBuf {
    let accepted = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            format
                .accepted_extensions()
                .iter()
                .any(|a| a.eq_ignore_ascii_case(e))
        })
        .unwrap_or(false);

    if accepted {
        path.to_path_buf()
    } else {
        path.with_extension(format.extension())
    }
}

/// Create the parent directory of `path` if needed
pub(crate) fn ensure_parent(path: &Path) -> Result<(), ExportError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::filter::{KeptRecord, UncertaintyStatus};
    use crate::models::OccurrenceRecord;

    pub fn kept(key: u64, uncertainty: UncertaintyStatus) -> KeptRecord {
        KeptRecord {
            record: OccurrenceRecord {
                year: Some(2020),
                event_date: Some("2020-06-15".to_string()),
                latitude: Some(46.5),
                longitude: Some(10.25),
                coordinate_uncertainty: match uncertainty {
                    UncertaintyStatus::Unknown => None,
                    _ => Some(50.0),
                },
                elevation: Some(2100.0),
                locality: Some("Passo dello Stelvio, \"upper\" meadow".to_string()),
                genus: Some("Nebria".to_string()),
                species: Some("Nebria germarii".to_string()),
                scientific_name: Some("Nebria germarii Heer, 1837".to_string()),
                institution_code: Some("MZUF".to_string()),
                country: Some("IT".to_string()),
                ..OccurrenceRecord::new(key)
            },
            uncertainty,
        }
    }
}
