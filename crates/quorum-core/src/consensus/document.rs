//! Visualization generation and document assembly

use super::guards::{extract_json_array, truncate};
use super::types::{AcademicSource, DialecticRound, ExpertInfluence, Visualization};
use crate::orchestrator::{GenerateOptions, Generator};
use serde::Deserialize;
use tracing::{instrument, warn};

/// At most this many figures per document
const MAX_VISUALIZATIONS: usize = 3;

/// Proposes figures for a consensus text
pub struct DataVisualizerAgent;

impl DataVisualizerAgent {
    /// Ask a model for figure suggestions. Malformed output yields an
    /// empty list, never an error.
    #[instrument(skip_all)]
    pub async fn generate(generator: &dyn Generator, consensus: &str) -> Vec<Visualization> {
        #[derive(Deserialize)]
        struct Suggestion {
            chart_type: String,
            title: String,
            #[serde(default)]
            description: String,
        }

        let prompt = format!(
            "Suggest up to {MAX_VISUALIZATIONS} data visualizations for this text. Respond with \
             ONLY a JSON array shaped like \
             [{{\"chart_type\": \"bar\", \"title\": \"...\", \"description\": \"...\"}}].\n\n{}",
            truncate(consensus, 2000)
        );

        let response = match generator
            .generate(
                prompt,
                GenerateOptions {
                    prefer_fast: true,
                    ..Default::default()
                },
            )
            .await
        {
            Ok(response) => response,
            Err(error) => {
                warn!(%error, "Visualization generation failed, returning none");
                return Vec::new();
            }
        };

        extract_json_array(&response)
            .and_then(|json| serde_json::from_str::<Vec<Suggestion>>(json).ok())
            .map(|suggestions| {
                suggestions
                    .into_iter()
                    .take(MAX_VISUALIZATIONS)
                    .map(|s| Visualization {
                        chart_type: s.chart_type,
                        title: s.title,
                        description: s.description,
                    })
                    .collect()
            })
            .unwrap_or_else(|| {
                warn!("Visualization response was not parseable JSON");
                Vec::new()
            })
    }
}

/// Metadata for document assembly
#[derive(Debug, Clone)]
pub struct DocumentMeta<'a> {
    /// Document title (the original query)
    pub title: &'a str,
    /// Persona names that contributed
    pub agents_used: &'a [String],
    /// "VALIDATED" above the confidence bar, "AUDITED" below it
    pub audit_status: &'a str,
    /// Final confidence score
    pub confidence_score: f64,
    /// Dialectic history
    pub audit_trail: &'a [DialecticRound],
    /// Influence weights
    pub influence_matrix: &'a [ExpertInfluence],
}

/// Deterministic markdown assembly of the final cited document
pub struct DocumentArchitect;

impl DocumentArchitect {
    /// Assemble the academic document from the session's artifacts
    #[must_use]
    pub fn generate(
        consensus: &str,
        sources: &[AcademicSource],
        visualizations: &[Visualization],
        meta: &DocumentMeta<'_>,
    ) -> String {
        let mut doc = String::new();

        doc.push_str(&format!("# {}\n\n", meta.title));
        doc.push_str(&format!(
            "*Panel: {} — status: {} — confidence: {:.1}%*\n\n",
            meta.agents_used.join(", "),
            meta.audit_status,
            meta.confidence_score * 100.0
        ));

        doc.push_str("## Consensus\n\n");
        doc.push_str(consensus);
        doc.push_str("\n\n");

        if !visualizations.is_empty() {
            doc.push_str("## Figures\n\n");
            for (i, viz) in visualizations.iter().enumerate() {
                doc.push_str(&format!(
                    "{}. **{}** ({}) — {}\n",
                    i + 1,
                    viz.title,
                    viz.chart_type,
                    viz.description
                ));
            }
            doc.push('\n');
        }

        if !sources.is_empty() {
            doc.push_str("## Bibliography\n\n");
            for (i, source) in sources.iter().enumerate() {
                doc.push_str(&format!(
                    "{}. [{}]({}) ({:?})\n",
                    i + 1,
                    source.title,
                    source.url,
                    source.source_type
                ));
            }
            doc.push('\n');
        }

        if !meta.audit_trail.is_empty() {
            doc.push_str("## Appendix A: Dialectic audit trail\n\n");
            for (i, round) in meta.audit_trail.iter().enumerate() {
                doc.push_str(&format!(
                    "### Round {}\n\n**Challenge:** {}\n\n**Rebuttal:** {}\n\n",
                    i + 1,
                    truncate(&round.challenge, 600),
                    truncate(&round.rebuttal, 600)
                ));
            }
        }

        if !meta.influence_matrix.is_empty() {
            doc.push_str("## Appendix B: Expert influence\n\n");
            for influence in meta.influence_matrix {
                doc.push_str(&format!(
                    "- {}: {:.2}\n",
                    influence.agent, influence.score
                ));
            }
        }

        doc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::types::SourceType;

    #[test]
    fn test_document_carries_all_sections() {
        let sources = vec![AcademicSource {
            title: "Paper".to_string(),
            url: "https://example.org".to_string(),
            snippet: String::new(),
            source_type: SourceType::Preprint,
            score: None,
        }];
        let visualizations = vec![Visualization {
            chart_type: "bar".to_string(),
            title: "Trend".to_string(),
            description: "yearly change".to_string(),
        }];
        let audit_trail = vec![DialecticRound {
            challenge: "missing data".to_string(),
            rebuttal: "added data".to_string(),
        }];
        let influence = vec![ExpertInfluence {
            agent: "Dr. Bio".to_string(),
            score: 0.8,
        }];
        let agents = vec!["Dr. Bio".to_string()];

        let doc = DocumentArchitect::generate(
            "the consensus body",
            &sources,
            &visualizations,
            &DocumentMeta {
                title: "Why is the sky blue?",
                agents_used: &agents,
                audit_status: "VALIDATED",
                confidence_score: 0.92,
                audit_trail: &audit_trail,
                influence_matrix: &influence,
            },
        );

        assert!(doc.starts_with("# Why is the sky blue?"));
        assert!(doc.contains("## Consensus"));
        assert!(doc.contains("the consensus body"));
        assert!(doc.contains("## Figures"));
        assert!(doc.contains("## Bibliography"));
        assert!(doc.contains("Appendix A"));
        assert!(doc.contains("Appendix B"));
        assert!(doc.contains("92.0%"));
    }

    #[test]
    fn test_document_skips_empty_sections() {
        let doc = DocumentArchitect::generate(
            "body",
            &[],
            &[],
            &DocumentMeta {
                title: "q",
                agents_used: &[],
                audit_status: "AUDITED",
                confidence_score: 0.5,
                audit_trail: &[],
                influence_matrix: &[],
            },
        );
        assert!(!doc.contains("## Figures"));
        assert!(!doc.contains("## Bibliography"));
        assert!(!doc.contains("Appendix"));
    }
}
