//! Occurrence record model.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Base URL for the public occurrence page of a record
const OCCURRENCE_PAGE_BASE: &str = "https://www.gbif.org/occurrence";

/// One specimen or observation.
///
/// Every field except `key` is optional; absence is a filterable condition
/// rather than an error. Numeric fields that arrive as non-numeric values are
/// read as absent, and text fields accept numbers or lists of strings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OccurrenceRecord {
    /// Unique occurrence key (the deduplication key)
    pub key: u64,

    #[serde(default, deserialize_with = "lenient_i32")]
    pub year: Option<i32>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub event_date: Option<String>,

    #[serde(default, rename = "decimalLatitude", deserialize_with = "lenient_f64")]
    pub latitude: Option<f64>,

    #[serde(default, rename = "decimalLongitude", deserialize_with = "lenient_f64")]
    pub longitude: Option<f64>,

    /// Coordinate uncertainty in meters
    #[serde(
        default,
        rename = "coordinateUncertaintyInMeters",
        deserialize_with = "lenient_f64"
    )]
    pub coordinate_uncertainty: Option<f64>,

    /// Elevation in meters
    #[serde(default, deserialize_with = "lenient_f64")]
    pub elevation: Option<f64>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub locality: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub genus: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub species: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub scientific_name: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub specific_epithet: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub institution_code: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub catalog_number: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub recorded_by: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub country: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub state_province: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub basis_of_record: Option<String>,
}

impl OccurrenceRecord {
    /// Create a bare record with only its key set
    pub fn new(key: u64) -> Self {
        Self {
            key,
            ..Default::default()
        }
    }

    /// URL of this record's page on gbif.org
    pub fn gbif_url(&self) -> String {
        format!("{}/{}", OCCURRENCE_PAGE_BASE, self.key)
    }

    /// Whether both coordinates are present (usable for mapping)
    pub fn has_coordinates(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some()
    }
}

/// One page of occurrence search results.
///
/// Result items are decoded one by one: an item without a usable `key` is
/// dropped and counted in `skipped` instead of failing the whole page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawOccurrencePage")]
pub struct OccurrencePage {
    pub offset: u64,

    pub limit: u64,

    /// Whether the server has no records beyond this page
    pub end_of_records: bool,

    /// Total number of matching records for the query
    pub count: u64,

    pub results: Vec<OccurrenceRecord>,

    /// Items the server sent that could not be read as records
    #[serde(skip)]
    pub skipped: u64,
}

impl OccurrencePage {
    /// Number of items the server sent, readable or not
    pub fn served(&self) -> u64 {
        self.results.len() as u64 + self.skipped
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOccurrencePage {
    #[serde(default)]
    offset: u64,
    #[serde(default)]
    limit: u64,
    #[serde(default)]
    end_of_records: bool,
    #[serde(default)]
    count: u64,
    #[serde(default)]
    results: Vec<Value>,
}

impl From<RawOccurrencePage> for OccurrencePage {
    fn from(raw: RawOccurrencePage) -> Self {
        let served = raw.results.len();
        let results: Vec<OccurrenceRecord> = raw
            .results
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect();

        Self {
            offset: raw.offset,
            limit: raw.limit,
            end_of_records: raw.end_of_records,
            count: raw.count,
            skipped: (served - results.len()) as u64,
            results,
        }
    }
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite()))
}

fn lenient_i32<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(|v| i32::try_from(v).ok())
            .or_else(|| n.as_f64().and_then(whole_i32)),
        Some(Value::String(s)) => {
            let s = s.trim();
            s.parse::<i32>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(whole_i32))
        }
        _ => None,
    })
}

/// `2020.0` is a year, `2020.5` is not
fn whole_i32(v: f64) -> Option<i32> {
    let in_range = v >= f64::from(i32::MIN) && v <= f64::from(i32::MAX);
    (v.is_finite() && v.fract() == 0.0 && in_range).then(|| v as i32)
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(value_text))
}

fn value_text(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.into_iter().filter_map(value_text).collect();
            (!parts.is_empty()).then(|| parts.join("; "))
        }
        _ => None,
    }
}
