//! Taxon match model returned by backbone name matching.

use serde::{Deserialize, Serialize};

/// Taxonomic rank as reported by the backbone
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaxonRank {
    Kingdom,
    Phylum,
    Class,
    Order,
    Family,
    Genus,
    Species,
    Subspecies,
    #[serde(untagged)]
    Other(String),
}

impl TaxonRank {
    /// Returns the rank as the API spells it
    pub fn as_str(&self) -> &str {
        match self {
            TaxonRank::Kingdom => "KINGDOM",
            TaxonRank::Phylum => "PHYLUM",
            TaxonRank::Class => "CLASS",
            TaxonRank::Order => "ORDER",
            TaxonRank::Family => "FAMILY",
            TaxonRank::Genus => "GENUS",
            TaxonRank::Species => "SPECIES",
            TaxonRank::Subspecies => "SUBSPECIES",
            TaxonRank::Other(s) => s,
        }
    }
}

impl Default for TaxonRank {
    fn default() -> Self {
        TaxonRank::Other(String::new())
    }
}

impl std::fmt::Display for TaxonRank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How the backbone matched the requested name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MatchType {
    Exact,
    #[serde(rename = "HIGHERRANK")]
    HigherRank,
    #[serde(alias = "VARIANT")]
    Fuzzy,
    #[default]
    None,
}

impl std::fmt::Display for MatchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MatchType::Exact => "EXACT",
            MatchType::HigherRank => "HIGHERRANK",
            MatchType::Fuzzy => "FUZZY",
            MatchType::None => "NONE",
        };
        write!(f, "{}", s)
    }
}

/// Result of resolving a free-text name against the backbone taxonomy.
///
/// `usage_key` is the join key for every occurrence query of a run and is
/// only meaningful when `match_type` is not [`MatchType::None`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxonMatch {
    /// Backbone taxon key
    #[serde(default)]
    pub usage_key: u64,

    /// Full scientific name with authority
    #[serde(default)]
    pub scientific_name: String,

    /// Name without authority
    #[serde(default)]
    pub canonical_name: String,

    #[serde(default)]
    pub rank: TaxonRank,

    /// Taxonomic status (ACCEPTED, SYNONYM, ...)
    #[serde(default)]
    pub status: String,

    /// Match confidence (0-100)
    #[serde(default)]
    pub confidence: u8,

    #[serde(default)]
    pub match_type: MatchType,

    #[serde(default)]
    pub kingdom: Option<String>,

    #[serde(default)]
    pub family: Option<String>,

    #[serde(default)]
    pub genus: Option<String>,
}

impl TaxonMatch {
    /// Whether the backbone produced any candidate at all
    pub fn is_match(&self) -> bool {
        self.match_type != MatchType::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_full_match() {
        let json = r#"{
            "usageKey": 1035566,
            "scientificName": "Nebria Latreille, 1802",
            "canonicalName": "Nebria",
            "rank": "GENUS",
            "status": "ACCEPTED",
            "confidence": 100,
            "matchType": "EXACT",
            "kingdom": "Animalia",
            "family": "Carabidae",
            "genus": "Nebria"
        }"#;

        let matched: TaxonMatch = serde_json::from_str(json).unwrap();
        assert_eq!(matched.usage_key, 1035566);
        assert_eq!(matched.canonical_name, "Nebria");
        assert_eq!(matched.rank, TaxonRank::Genus);
        assert_eq!(matched.match_type, MatchType::Exact);
        assert_eq!(matched.kingdom.as_deref(), Some("Animalia"));
        assert!(matched.is_match());
    }

    #[test]
    fn test_deserialize_missing_fields() {
        let json = r#"{"usageKey": 123, "matchType": "NONE"}"#;
        let matched: TaxonMatch = serde_json::from_str(json).unwrap();

        assert_eq!(matched.usage_key, 123);
        assert_eq!(matched.canonical_name, "");
        assert_eq!(matched.rank.as_str(), "");
        assert!(!matched.is_match());
    }

    #[test]
    fn test_unknown_rank_is_preserved() {
        let json = r#"{"rank": "SUPERFAMILY", "matchType": "HIGHERRANK"}"#;
        let matched: TaxonMatch = serde_json::from_str(json).unwrap();

        assert_eq!(matched.rank, TaxonRank::Other("SUPERFAMILY".to_string()));
        assert_eq!(matched.match_type, MatchType::HigherRank);
    }

    #[test]
    fn test_default_is_no_match() {
        let matched = TaxonMatch::default();
        assert_eq!(matched.usage_key, 0);
        assert_eq!(matched.match_type, MatchType::None);
        assert!(!matched.is_match());
    }
}
