//! GeoJSON export.

use serde_json::{json, Map, Value};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::{
    ensure_parent, output_path, record_columns, ExportError, ExportFormat, ExportOptions,
    Exporter, UNCERTAINTY_STATUS_COLUMN,
};
use crate::filter::KeptRecord;
use crate::utils::format_number;

/// Writes a FeatureCollection of Point features.
///
/// Records without both coordinates cannot be placed and are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeoJsonExporter;

impl GeoJsonExporter {
    pub fn new() -> Self {
        Self
    }

    fn feature(kept: &KeptRecord, options: &ExportOptions) -> Option<Value> {
        let record = &kept.record;
        let (lat, lon) = (record.latitude?, record.longitude?);

        let mut properties: Map<String, Value> = record_columns(record)
            .into_iter()
            .filter(|(label, _)| *label != "Latitude" && *label != "Longitude")
            .map(|(label, value)| (label.to_string(), value))
            .collect();
        if options.highlight_uncertain {
            properties.insert(
                UNCERTAINTY_STATUS_COLUMN.to_string(),
                Value::String(kept.uncertainty.to_string()),
            );
        }

        Some(json!({
            "type": "Feature",
            "id": record.key.to_string(),
            "geometry": {
                "type": "Point",
                "coordinates": [lon, lat],
            },
            "properties": properties,
        }))
    }
}

impl Exporter for GeoJsonExporter {
    fn format(&self) -> ExportFormat {
        ExportFormat::GeoJson
    }

    fn export(
        &self,
        records: &[KeptRecord],
        path: &Path,
        options: &ExportOptions,
    ) -> Result<PathBuf, ExportError> {
        let path = output_path(path, ExportFormat::GeoJson);
        ensure_parent(&path)?;

        tracing::info!(
            "Exporting {} records to GeoJSON...",
            format_number(records.len() as u64)
        );

        let features: Vec<Value> = records
            .iter()
            .filter_map(|kept| Self::feature(kept, options))
            .collect();

        let skipped = records.len() - features.len();
        if skipped > 0 {
            tracing::warn!("Skipped {} records without coordinates", skipped);
        }

        let collection = json!({
            "type": "FeatureCollection",
            "features": features,
        });

        let mut writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(&mut writer, &collection)?;
        writer.flush()?;

        tracing::info!("GeoJSON file saved: {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::test_support::kept;
    use crate::filter::UncertaintyStatus;
    use tempfile::tempdir;

    #[test]
    fn test_geojson_export() {
        let dir = tempdir().unwrap();
        let mut unplaced = kept(3, UncertaintyStatus::Known);
        unplaced.record.longitude = None;

        let records = vec![
            kept(1, UncertaintyStatus::Known),
            kept(2, UncertaintyStatus::Unknown),
            unplaced,
        ];

        let path = GeoJsonExporter::new()
            .export(&records, &dir.path().join("nebria"), &ExportOptions::default())
            .unwrap();
        assert_eq!(path, dir.path().join("nebria.geojson"));

        let value: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["type"], "FeatureCollection");

        let features = value["features"].as_array().unwrap();
        assert_eq!(features.len(), 2);

        let first = &features[0];
        assert_eq!(first["id"], "1");
        assert_eq!(first["geometry"]["type"], "Point");
        assert_eq!(first["geometry"]["coordinates"], json!([10.25, 46.5]));
        assert_eq!(first["properties"]["Year"], 2020);
        assert_eq!(first["properties"]["Uncertainty Status"], "known");
        assert!(first["properties"].get("Latitude").is_none());
        assert_eq!(features[1]["properties"]["Uncertainty (m)"], Value::Null);
    }

    #[test]
    fn test_geojson_keeps_json_extension() {
        let dir = tempdir().unwrap();
        let options = ExportOptions {
            highlight_uncertain: false,
        };

        let path = GeoJsonExporter::new()
            .export(&[kept(1, UncertaintyStatus::Known)], &dir.path().join("nebria.json"), &options)
            .unwrap();
        assert_eq!(path, dir.path().join("nebria.json"));

        let value: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(value["features"][0]["properties"]
            .get("Uncertainty Status")
            .is_none());
    }
}
