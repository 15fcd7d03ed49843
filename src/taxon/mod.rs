//! Taxon name resolution.
//!
//! Every download starts by turning a free-text name into a backbone usage
//! key. In strict mode the match must agree with the caller on both rank and
//! name; a genus that silently resolves to its class would otherwise pull
//! orders of magnitude more records than intended.

use tracing::Span;

use crate::api::{GbifApi, GbifError, NameMatchQuery};
use crate::models::{TaxonMatch, TaxonRank};

/// Kingdom used when the caller does not name one
pub const DEFAULT_KINGDOM: &str = "Animalia";

/// A name to resolve and the checks to apply to the match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxonQuery {
    pub name: String,
    /// Rank the match must have in strict mode; `None` accepts any rank
    pub expected_rank: Option<TaxonRank>,
    pub kingdom: String,
    pub class_name: Option<String>,
    /// Reject rank and name mismatches
    pub strict: bool,
}

impl TaxonQuery {
    pub fn new(name: impl Into<String>, expected_rank: TaxonRank) -> Self {
        Self {
            name: name.into(),
            expected_rank: Some(expected_rank),
            kingdom: DEFAULT_KINGDOM.to_string(),
            class_name: None,
            strict: true,
        }
    }

    /// Accept a match of any rank
    pub fn any_rank(mut self) -> Self {
        self.expected_rank = None;
        self
    }

    pub fn kingdom(mut self, kingdom: impl Into<String>) -> Self {
        self.kingdom = kingdom.into();
        self
    }

    pub fn class_name(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = Some(class_name.into());
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    fn to_match_query(&self) -> NameMatchQuery {
        let mut query = NameMatchQuery::new(self.name.trim()).kingdom(self.kingdom.clone());
        if let Some(class_name) = &self.class_name {
            query = query.class_name(class_name.clone());
        }
        query
    }
}

/// Resolves names against the backbone taxonomy
#[derive(Debug)]
pub struct TaxonResolver<'a, A: GbifApi + ?Sized> {
    api: &'a A,
    span: Span,
}

impl<'a, A: GbifApi + ?Sized> TaxonResolver<'a, A> {
    pub fn new(api: &'a A) -> Self {
        Self {
            api,
            span: tracing::info_span!("taxon_resolver"),
        }
    }

    /// Attribute this resolver's events to `span`
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Resolve a name, failing with [`GbifError::TaxonNotFound`] when there
    /// is no match or (in strict mode) the match disagrees with the query.
    ///
    /// Transport failures are returned as-is after the client's retries.
    pub async fn resolve(&self, query: &TaxonQuery) -> Result<TaxonMatch, GbifError> {
        let name = query.name.trim();
        tracing::debug!(parent: &self.span, "Matching taxon: {}", name);

        let matched = self.api.match_name(&query.to_match_query()).await?;

        if !matched.is_match() {
            return Err(GbifError::TaxonNotFound(format!(
                "Taxon '{}' not found in GBIF.",
                name
            )));
        }

        if query.strict {
            validate_match(name, query.expected_rank.as_ref(), &matched)?;
        } else if query.expected_rank.as_ref().is_some_and(|r| *r != matched.rank) {
            tracing::warn!(
                parent: &self.span,
                "'{}' matched as {} ({}); continuing because strict matching is off",
                name,
                matched.rank,
                matched.canonical_name
            );
        }

        tracing::info!(
            parent: &self.span,
            "Matched '{}' to {} ({}, key={})",
            name,
            matched.canonical_name,
            matched.rank,
            matched.usage_key
        );

        Ok(matched)
    }
}

fn validate_match(
    name: &str,
    expected_rank: Option<&TaxonRank>,
    matched: &TaxonMatch,
) -> Result<(), GbifError> {
    let Some(expected) = expected_rank else {
        return Ok(());
    };

    if matched.rank != *expected {
        return Err(GbifError::TaxonNotFound(format!(
            "'{}' matched as {} ({}), but expected {}. Please check the spelling.",
            name, matched.rank, matched.canonical_name, expected
        )));
    }

    if matched.canonical_name.to_lowercase() != name.to_lowercase() {
        return Err(GbifError::TaxonNotFound(format!(
            "'{}' matched to '{}' ({}). This may not be what you intended. Please verify.",
            name, matched.canonical_name, matched.rank
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::make_match;
    use crate::api::MockApi;
    use crate::models::MatchType;

    #[tokio::test]
    async fn test_resolve_exact_genus() {
        let api = MockApi::new();
        api.set_match_response(Ok(make_match(1035566, "Nebria", TaxonRank::Genus)));

        let resolver = TaxonResolver::new(&api);
        let matched = resolver
            .resolve(&TaxonQuery::new("Nebria", TaxonRank::Genus))
            .await
            .unwrap();

        assert_eq!(matched.usage_key, 1035566);
        let queries = api.name_queries();
        let sent = &queries[0];
        assert_eq!(sent.name, "Nebria");
        assert_eq!(sent.kingdom.as_deref(), Some("Animalia"));
        assert_eq!(sent.class_name, None);
    }

    #[tokio::test]
    async fn test_no_match_is_taxon_not_found() {
        let api = MockApi::new();
        api.set_match_response(Ok(TaxonMatch {
            match_type: MatchType::None,
            ..TaxonMatch::default()
        }));

        let result = TaxonResolver::new(&api)
            .resolve(&TaxonQuery::new("Nebriaa", TaxonRank::Genus).strict(false))
            .await;

        match result {
            Err(GbifError::TaxonNotFound(msg)) => assert!(msg.contains("not found")),
            other => panic!("Expected TaxonNotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_strict_rank_mismatch_names_actual_rank() {
        let api = MockApi::new();
        api.set_match_response(Ok(TaxonMatch {
            match_type: MatchType::HigherRank,
            ..make_match(216, "Insecta", TaxonRank::Class)
        }));

        let result = TaxonResolver::new(&api)
            .resolve(&TaxonQuery::new("Nebrix", TaxonRank::Genus))
            .await;

        match result {
            Err(GbifError::TaxonNotFound(msg)) => {
                assert!(msg.contains("matched as CLASS"), "{}", msg);
                assert!(msg.contains("expected GENUS"), "{}", msg);
            }
            other => panic!("Expected TaxonNotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_strict_name_mismatch() {
        let api = MockApi::new();
        api.set_match_response(Ok(TaxonMatch {
            match_type: MatchType::Fuzzy,
            ..make_match(1035566, "Nebria", TaxonRank::Genus)
        }));

        let result = TaxonResolver::new(&api)
            .resolve(&TaxonQuery::new("Nebira", TaxonRank::Genus))
            .await;

        match result {
            Err(GbifError::TaxonNotFound(msg)) => {
                assert!(msg.contains("may not be what you intended"), "{}", msg)
            }
            other => panic!("Expected TaxonNotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_name_comparison_ignores_case() {
        let api = MockApi::new();
        api.set_match_response(Ok(make_match(1035566, "Nebria", TaxonRank::Genus)));

        let matched = TaxonResolver::new(&api)
            .resolve(&TaxonQuery::new("nebria", TaxonRank::Genus))
            .await
            .unwrap();

        assert_eq!(matched.canonical_name, "Nebria");
    }

    #[tokio::test]
    async fn test_name_comparison_ignores_non_ascii_case() {
        let api = MockApi::new();
        api.set_match_response(Ok(make_match(4711, "Ægithalos", TaxonRank::Genus)));

        let matched = TaxonResolver::new(&api)
            .resolve(&TaxonQuery::new("ægithalos", TaxonRank::Genus))
            .await
            .unwrap();

        assert_eq!(matched.usage_key, 4711);
    }

    #[tokio::test]
    async fn test_non_strict_accepts_mismatch() {
        let api = MockApi::new();
        api.set_match_response(Ok(TaxonMatch {
            match_type: MatchType::HigherRank,
            ..make_match(216, "Insecta", TaxonRank::Class)
        }));

        let matched = TaxonResolver::new(&api)
            .resolve(
                &TaxonQuery::new("Nebrix", TaxonRank::Genus)
                    .strict(false)
                    .class_name("Insecta"),
            )
            .await
            .unwrap();

        assert_eq!(matched.rank, TaxonRank::Class);
        assert_eq!(api.name_queries()[0].class_name.as_deref(), Some("Insecta"));
    }

    #[tokio::test]
    async fn test_any_rank_skips_rank_check() {
        let api = MockApi::new();
        api.set_match_response(Ok(make_match(3, "Carabidae", TaxonRank::Family)));

        let matched = TaxonResolver::new(&api)
            .resolve(&TaxonQuery::new("Carabidae", TaxonRank::Genus).any_rank())
            .await
            .unwrap();

        assert_eq!(matched.rank, TaxonRank::Family);
    }

    #[tokio::test]
    async fn test_transport_error_passes_through() {
        let api = MockApi::new();
        api.set_match_response(Err(GbifError::RetriesExhausted {
            attempts: 4,
            last: Box::new(GbifError::Timeout("read".to_string())),
        }));

        let result = TaxonResolver::new(&api)
            .resolve(&TaxonQuery::new("Nebria", TaxonRank::Genus))
            .await;

        assert!(matches!(result, Err(GbifError::RetriesExhausted { .. })));
    }
}
