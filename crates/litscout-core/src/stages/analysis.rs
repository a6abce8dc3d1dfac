//! Analysis stage: draft claims, apply the citation gate, verify claims.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::LitScoutError;
use crate::config::AnalysisConfig;
use crate::model::{ClaimRecord, ClaimStatus, Source};

const MAX_CLAIM_CHARS: usize = 320;

/// Turns a source into a candidate claim.
pub trait ClaimDrafter: Send + Sync {
    fn draft(&self, source: &Source) -> Option<String>;
}

/// First sentence of the abstract, else a statement built from the title.
#[derive(Debug, Default, Clone, Copy)]
pub struct AbstractClaimDrafter;

impl ClaimDrafter for AbstractClaimDrafter {
    fn draft(&self, source: &Source) -> Option<String> {
        if let Some(sentence) = first_sentence(&source.abstract_text) {
            return Some(sentence);
        }
        let title = source.title.trim();
        if title.is_empty() {
            return None;
        }
        Some(match source.year {
            Some(year) => format!("\"{title}\" ({year}) addresses this topic."),
            None => format!("\"{title}\" addresses this topic."),
        })
    }
}

fn first_sentence(text: &str) -> Option<String> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let mut chars = text.char_indices().peekable();
    let mut end = text.len();
    while let Some((idx, ch)) = chars.next() {
        if matches!(ch, '.' | '?' | '!')
            && chars.peek().is_none_or(|(_, next)| next.is_whitespace())
        {
            end = idx + ch.len_utf8();
            break;
        }
    }
    let sentence = text[..end].trim();
    Some(match sentence.char_indices().nth(MAX_CLAIM_CHARS) {
        Some((cut, _)) => format!("{}...", sentence[..cut].trim_end()),
        None => sentence.to_string(),
    })
}

/// One line of the provenance listing; every analyzed source appears here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceEntry {
    pub id: String,
    pub title: String,
    pub citation_count: Option<u64>,
    pub providers: Vec<String>,
    pub passed: bool,
}

/// Sources that passed the gate and the claims they verify. Only the
/// analysis stage builds these.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerifiedFindings {
    query: String,
    /// Sources handed to the gate, passing or not.
    retrieved: usize,
    sources: Vec<Source>,
    claims: Vec<ClaimRecord>,
}

impl VerifiedFindings {
    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn retrieved(&self) -> usize {
        self.retrieved
    }

    /// Claims in verification order; every one is `Verified`.
    pub fn claims(&self) -> &[ClaimRecord] {
        &self.claims
    }

    pub fn source(&self, id: &str) -> Option<&Source> {
        self.sources.iter().find(|s| s.id() == id)
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub passing_sources: Vec<Source>,
    pub provenance: Vec<ProvenanceEntry>,
    pub rejected: Vec<ClaimRecord>,
    pub findings: VerifiedFindings,
}

impl AnalysisReport {
    /// Identifiers of sources removed by the citation gate.
    pub fn screened_out(&self) -> Vec<String> {
        self.provenance
            .iter()
            .filter(|entry| !entry.passed)
            .map(|entry| entry.id.clone())
            .collect()
    }
}

pub struct AnalysisStage {
    min_citations: u64,
    allow_missing: bool,
    drafter: Arc<dyn ClaimDrafter>,
}

impl AnalysisStage {
    pub fn new(min_citations: u64, allow_missing: bool) -> Self {
        Self {
            min_citations,
            allow_missing,
            drafter: Arc::new(AbstractClaimDrafter),
        }
    }

    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self::new(config.min_citations, config.allow_missing_citations)
    }

    pub fn with_drafter(mut self, drafter: Arc<dyn ClaimDrafter>) -> Self {
        self.drafter = drafter;
        self
    }

    /// Gate `sources` and verify one drafted claim per source plus `extra_claims`.
    #[instrument(
        name = "stage.analysis",
        skip_all,
        fields(sources = sources.len(), extra = extra_claims.len())
    )]
    pub fn run(
        &self,
        query: &str,
        sources: &[Source],
        extra_claims: Vec<ClaimRecord>,
    ) -> AnalysisReport {
        let mut provenance = Vec::with_capacity(sources.len());
        let mut passing_sources = Vec::new();
        let mut passing_ids = HashSet::new();

        for source in sources {
            let id = source.id();
            let passed = source.meets_citations(self.min_citations, self.allow_missing);
            if passed {
                passing_ids.insert(id.clone());
                passing_sources.push(source.clone());
            } else {
                debug!(
                    %id,
                    citations = ?source.citation_count,
                    "source screened out by citation gate"
                );
            }
            provenance.push(ProvenanceEntry {
                id,
                title: source.title.clone(),
                citation_count: source.citation_count,
                providers: source.provenance.clone(),
                passed,
            });
        }

        let drafted = sources.iter().enumerate().filter_map(|(idx, source)| {
            self.drafter
                .draft(source)
                .map(|text| ClaimRecord::draft(format!("claim-{}", idx + 1), text, [source.id()]))
        });

        let mut verified = Vec::new();
        let mut rejected = Vec::new();
        for mut claim in drafted.chain(extra_claims) {
            claim.supporting.retain(|id| passing_ids.contains(id));
            if claim.supporting.is_empty() {
                claim.status = ClaimStatus::Rejected;
                let err = LitScoutError::VerificationFailed {
                    claim_id: claim.id.clone(),
                };
                warn!(error = %err, "claim rejected");
                rejected.push(claim);
            } else {
                claim.status = ClaimStatus::Verified;
                verified.push(claim);
            }
        }

        info!(
            passing = passing_sources.len(),
            verified = verified.len(),
            rejected = rejected.len(),
            "analysis complete"
        );

        AnalysisReport {
            findings: VerifiedFindings {
                query: query.to_string(),
                retrieved: sources.len(),
                sources: passing_sources.clone(),
                claims: verified,
            },
            passing_sources,
            provenance,
            rejected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paper(title: &str, doi: &str, citations: Option<u64>, abstract_text: &str) -> Source {
        let mut source = Source::new(title, "openalex_search");
        source.doi = Some(doi.to_string());
        source.citation_count = citations;
        source.abstract_text = abstract_text.to_string();
        source
    }

    #[test]
    fn drafter_takes_first_sentence_or_falls_back_to_title() {
        let drafter = AbstractClaimDrafter;
        let with_abstract = paper(
            "Surface codes",
            "10.1/a",
            Some(3),
            "Surface codes reach a 1% threshold. Further work is needed.",
        );
        assert_eq!(
            drafter.draft(&with_abstract).as_deref(),
            Some("Surface codes reach a 1% threshold.")
        );

        let mut bare = paper("Decoders", "10.1/b", Some(3), "");
        bare.year = Some(2022);
        assert_eq!(
            drafter.draft(&bare).as_deref(),
            Some("\"Decoders\" (2022) addresses this topic.")
        );
    }

    #[test]
    fn decimal_points_do_not_end_a_sentence() {
        assert_eq!(
            first_sentence("Error rates fell to 0.5 percent in 2023").as_deref(),
            Some("Error rates fell to 0.5 percent in 2023")
        );
    }

    #[test]
    fn configured_threshold_rejects_claims_below_it() {
        let config = AnalysisConfig {
            min_citations: 5,
            ..AnalysisConfig::default()
        };
        let sources = vec![
            paper("Established", "10.1/established", Some(8), "Established work finds X."),
            paper("Emerging", "10.1/emerging", Some(3), "Emerging work finds Y."),
        ];
        let report = AnalysisStage::from_config(&config).run("q", &sources, Vec::new());

        assert_eq!(report.screened_out(), vec!["doi:10.1/emerging"]);
        assert_eq!(report.findings.claims().len(), 1);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].id, "claim-2");
        assert_eq!(report.rejected[0].status, ClaimStatus::Rejected);
        assert_eq!(report.findings.retrieved(), 2);
    }

    #[test]
    fn uncited_sources_are_listed_but_cannot_support_claims() {
        let sources = vec![
            paper("Cited", "10.1/cited", Some(4), "Cited work finds X."),
            paper("Uncited", "10.1/uncited", Some(0), "Uncited work finds Y."),
            paper("Unknown", "10.1/unknown", None, "Unknown work finds Z."),
        ];
        let report = AnalysisStage::new(1, false).run("q", &sources, Vec::new());

        assert_eq!(report.passing_sources.len(), 1);
        assert_eq!(report.provenance.len(), 3);
        assert_eq!(
            report.screened_out(),
            vec!["doi:10.1/uncited", "doi:10.1/unknown"]
        );
        assert_eq!(report.findings.claims().len(), 1);
        assert_eq!(report.findings.claims()[0].text, "Cited work finds X.");
        assert!(report
            .findings
            .claims()
            .iter()
            .all(|c| c.status == ClaimStatus::Verified));
        assert_eq!(report.rejected.len(), 2);
        assert!(report
            .rejected
            .iter()
            .all(|c| c.status == ClaimStatus::Rejected));
    }

    #[test]
    fn missing_counts_pass_when_allowed() {
        let sources = vec![paper("Unknown", "10.1/unknown", None, "Finds Z.")];
        let report = AnalysisStage::new(1, true).run("q", &sources, Vec::new());
        assert_eq!(report.findings.claims().len(), 1);
    }

    #[test]
    fn external_claims_keep_only_gated_support() {
        let sources = vec![
            paper("Cited", "10.1/cited", Some(10), "Finds X."),
            paper("Uncited", "10.1/uncited", Some(0), "Finds Y."),
        ];
        let mixed = ClaimRecord::draft(
            "external-1",
            "X and Y together",
            ["doi:10.1/cited".to_string(), "doi:10.1/uncited".to_string()],
        );
        let orphan = ClaimRecord::draft("external-2", "Only Y", ["doi:10.1/uncited".to_string()]);

        let report = AnalysisStage::new(1, false).run("q", &sources, vec![mixed, orphan]);

        let external = report
            .findings
            .claims()
            .iter()
            .find(|c| c.id == "external-1")
            .unwrap();
        assert_eq!(external.supporting.len(), 1);
        assert!(external.supporting.contains("doi:10.1/cited"));
        assert!(report.rejected.iter().any(|c| c.id == "external-2"));
    }
}
