//! Writing stage: render verified findings into an attributed report.

use std::collections::HashMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::analysis::VerifiedFindings;
use crate::model::Source;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    /// 1-based reference number used in the report text.
    pub index: usize,
    pub source_id: String,
    pub title: String,
    pub year: Option<i32>,
    pub citation_count: Option<u64>,
    pub link: Option<String>,
    pub highly_cited: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub text: String,
    pub citations: Vec<Citation>,
}

#[derive(Debug, Clone, Copy)]
pub struct WritingStage {
    highly_cited_threshold: u64,
}

impl WritingStage {
    pub fn new(highly_cited_threshold: u64) -> Self {
        Self {
            highly_cited_threshold,
        }
    }

    #[instrument(name = "stage.writing", skip_all, fields(claims = findings.claims().len()))]
    pub fn compose(&self, findings: &VerifiedFindings, screened_out: &[String]) -> Report {
        let citations = self.number_citations(findings);
        let numbers: HashMap<&str, usize> = citations
            .iter()
            .map(|c| (c.source_id.as_str(), c.index))
            .collect();

        let mut text = String::new();
        if findings.retrieved() == 0 {
            let _ = writeln!(
                text,
                "No sources found for \"{}\": the literature databases returned no \
                 matching papers.",
                findings.query()
            );
        } else if findings.is_empty() {
            let _ = writeln!(
                text,
                "No verified findings for \"{}\": none of the retrieved sources met the \
                 citation threshold.",
                findings.query()
            );
        } else {
            let _ = writeln!(text, "Findings for \"{}\"", findings.query());
            let _ = writeln!(text);
            for (position, claim) in findings.claims().iter().enumerate() {
                let markers: String = claim
                    .supporting
                    .iter()
                    .filter_map(|id| numbers.get(id.as_str()))
                    .map(|n| format!("[{n}]"))
                    .collect();
                let _ = writeln!(text, "{}. {} {markers}", position + 1, claim.text);
            }

            let highlighted: Vec<&Citation> = citations.iter().filter(|c| c.highly_cited).collect();
            if !highlighted.is_empty() {
                let _ = writeln!(text);
                let _ = writeln!(text, "Highly cited:");
                for citation in highlighted {
                    let _ = writeln!(
                        text,
                        "  [{}] {} ({} citations)",
                        citation.index,
                        citation.title,
                        citation.citation_count.unwrap_or_default()
                    );
                }
            }

            let _ = writeln!(text);
            let _ = writeln!(text, "References:");
            for citation in &citations {
                if let Some(source) = findings.source(&citation.source_id) {
                    let _ = writeln!(text, "[{}] {}", citation.index, reference_line(source));
                }
            }
        }

        if !screened_out.is_empty() {
            let _ = writeln!(text);
            let _ = writeln!(
                text,
                "Screened out (insufficient citations): {}",
                screened_out.join(", ")
            );
        }

        info!(citations = citations.len(), "report composed");
        Report {
            text: text.trim_end().to_string(),
            citations,
        }
    }

    /// Number sources by first citation across the verified claims.
    fn number_citations(&self, findings: &VerifiedFindings) -> Vec<Citation> {
        let mut citations: Vec<Citation> = Vec::new();
        for claim in findings.claims() {
            for id in &claim.supporting {
                if citations.iter().any(|c| &c.source_id == id) {
                    continue;
                }
                let Some(source) = findings.source(id) else {
                    continue;
                };
                citations.push(Citation {
                    index: citations.len() + 1,
                    source_id: id.clone(),
                    title: source.title.clone(),
                    year: source.year,
                    citation_count: source.citation_count,
                    link: source.link(),
                    highly_cited: source
                        .citation_count
                        .is_some_and(|count| count >= self.highly_cited_threshold),
                });
            }
        }
        citations
    }
}

fn reference_line(source: &Source) -> String {
    let mut line = String::new();
    match source.authors.len() {
        0 => {}
        1..=3 => {
            let _ = write!(line, "{}. ", source.authors.join(", "));
        }
        _ => {
            let _ = write!(line, "{} et al. ", source.authors[0]);
        }
    }
    if let Some(year) = source.year {
        let _ = write!(line, "({year}) ");
    }
    line.push_str(&source.title);
    if let Some(venue) = &source.venue {
        let _ = write!(line, ". {venue}");
    }
    if let Some(count) = source.citation_count {
        let _ = write!(line, ". Cited by {count}");
    }
    if let Some(link) = source.link() {
        let _ = write!(line, ". {link}");
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ClaimRecord;
    use crate::stages::AnalysisStage;

    fn paper(title: &str, doi: &str, citations: u64, abstract_text: &str) -> Source {
        let mut source = Source::new(title, "openalex_search");
        source.doi = Some(doi.to_string());
        source.citation_count = Some(citations);
        source.abstract_text = abstract_text.to_string();
        source.year = Some(2021);
        source
    }

    fn findings() -> VerifiedFindings {
        let sources = vec![
            paper("Landmark", "10.1/landmark", 250, "Landmark result holds."),
            paper("Recent", "10.1/recent", 3, "Recent result extends it."),
            paper("Ignored", "10.1/ignored", 0, "Ignored result disagrees."),
        ];
        let joint = ClaimRecord::draft(
            "joint",
            "Both agree.",
            ["doi:10.1/recent".to_string(), "doi:10.1/landmark".to_string()],
        );
        AnalysisStage::new(1, false)
            .run("qec thresholds", &sources, vec![joint])
            .findings
    }

    #[test]
    fn numbering_follows_first_citation() {
        let report = WritingStage::new(100).compose(&findings(), &[]);
        let ids: Vec<&str> = report.citations.iter().map(|c| c.source_id.as_str()).collect();
        assert_eq!(ids, vec!["doi:10.1/landmark", "doi:10.1/recent"]);
        assert!(report.text.contains("1. Landmark result holds. [1]"));
        assert!(report.text.contains("3. Both agree. [1][2]"));
    }

    #[test]
    fn same_findings_render_identically() {
        let stage = WritingStage::new(100);
        let first = stage.compose(&findings(), &["doi:10.1/ignored".to_string()]);
        let second = stage.compose(&findings(), &["doi:10.1/ignored".to_string()]);
        assert_eq!(first, second);
    }

    #[test]
    fn highlights_and_screened_out_sources_are_listed() {
        let report = WritingStage::new(100).compose(&findings(), &["doi:10.1/ignored".to_string()]);
        assert!(report.citations[0].highly_cited);
        assert!(!report.citations[1].highly_cited);
        assert!(report.text.contains("Highly cited:\n  [1] Landmark (250 citations)"));
        assert!(report.text.contains("Screened out (insufficient citations): doi:10.1/ignored"));
        assert!(!report.text.contains("Ignored result disagrees"));
    }

    #[test]
    fn nothing_retrieved_is_not_reported_as_gated() {
        let empty = AnalysisStage::new(1, false).run("dark matter", &[], Vec::new()).findings;
        let report = WritingStage::new(100).compose(&empty, &[]);
        assert!(report.citations.is_empty());
        assert_eq!(
            report.text,
            "No sources found for \"dark matter\": the literature databases returned no \
             matching papers."
        );
    }

    #[test]
    fn fully_gated_findings_say_so() {
        let uncited = [paper("Preprint", "10.1/preprint", 0, "Preprint claims a lot.")];
        let analysis = AnalysisStage::new(1, false).run("dark matter", &uncited, Vec::new());
        let report = WritingStage::new(100).compose(&analysis.findings, &analysis.screened_out());
        assert!(report.citations.is_empty());
        assert!(report.text.starts_with(
            "No verified findings for \"dark matter\": none of the retrieved sources met \
             the citation threshold."
        ));
        assert!(report.text.contains("Screened out (insufficient citations): doi:10.1/preprint"));
        assert!(!report.text.contains("Preprint claims"));
    }
}
