//! Deterministic score adjustment.
//!
//! `adjusted = similarity + w_pub(tier) + w_section(section) + w_recency(year)`.
//! The result is re-sorted by adjusted score; equal scores keep their
//! incoming rank.

use chrono::Datelike;
use pubrag_core::config::RerankConfig;
use pubrag_core::types::{DocMeta, EvidenceTier, ScoredChunk, SectionKind};

pub struct Reranker {
    config: RerankConfig,
    current_year: i32,
}

impl Reranker {
    pub fn new(config: RerankConfig, current_year: i32) -> Self {
        Self { config, current_year }
    }

    /// Recency is measured against the current UTC year.
    pub fn from_clock(config: RerankConfig) -> Self {
        Self::new(config, chrono::Utc::now().year())
    }

    pub fn evidence_boost(&self, meta: &DocMeta) -> f32 {
        self.config
            .evidence
            .boost(EvidenceTier::classify(&meta.publication_types))
    }

    pub fn section_boost(&self, section: Option<&str>) -> f32 {
        self.config.sections.boost(SectionKind::classify(section))
    }

    /// Peaks at `max_boost` for the current year (and future-dated papers),
    /// decays toward zero with age. Unknown year earns nothing.
    pub fn recency_boost(&self, year: Option<i32>) -> f32 {
        let Some(year) = year else {
            return 0.0;
        };
        let recency = &self.config.recency;
        let gap = self.current_year.saturating_sub(year).max(0) as f32;
        recency.max_boost * (-gap / recency.decay_years).exp()
    }

    pub fn adjusted_score(&self, chunk: &ScoredChunk) -> f32 {
        let c = &chunk.chunk;
        chunk.similarity
            + self.evidence_boost(&c.meta)
            + self.section_boost(c.section.as_deref())
            + self.recency_boost(c.meta.year)
    }

    pub fn rerank(&self, mut chunks: Vec<ScoredChunk>) -> Vec<ScoredChunk> {
        for c in &mut chunks {
            c.adjusted_score = self.adjusted_score(c);
        }
        chunks.sort_by(|a, b| {
            b.adjusted_score
                .total_cmp(&a.adjusted_score)
                .then_with(|| a.rank.cmp(&b.rank))
        });
        for (rank, c) in chunks.iter_mut().enumerate() {
            c.rank = rank;
        }
        if let Some(top) = chunks.first() {
            tracing::debug!(
                "rerank: top {} ({:.3} → {:.3})",
                top.doc_id(),
                top.similarity,
                top.adjusted_score
            );
        }
        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pubrag_core::types::Chunk;

    fn chunk(doc: &str, sim: f32, rank: usize, pt: &str, section: &str, year: Option<i32>) -> ScoredChunk {
        ScoredChunk::new(
            Chunk {
                doc_id: doc.into(),
                section: Some(section.into()),
                text: "t".into(),
                meta: DocMeta {
                    publication_types: vec![pt.into()],
                    year,
                    ..Default::default()
                },
            },
            sim,
            rank,
        )
    }

    fn reranker() -> Reranker {
        Reranker::new(RerankConfig::default(), 2025)
    }

    #[test]
    fn test_score_non_decreasing_in_evidence_tier() {
        let r = reranker();
        let labels = [
            "Meta-Analysis",
            "Systematic Review",
            "Practice Guideline",
            "Randomized Controlled Trial",
            "Clinical Trial",
            "Observational Study",
            "Review",
            "Case Reports",
            "Letter",
        ];
        let scores: Vec<f32> = labels
            .iter()
            .map(|l| r.adjusted_score(&chunk("P", 0.5, 0, l, "Results", Some(2020))))
            .collect();
        for pair in scores.windows(2) {
            assert!(pair[0] >= pair[1], "{scores:?}");
        }
    }

    #[test]
    fn test_score_non_increasing_in_year_gap() {
        let r = reranker();
        let mut previous = f32::INFINITY;
        for year in (1980..=2025).rev() {
            let s = r.adjusted_score(&chunk("P", 0.5, 0, "Review", "Results", Some(year)));
            assert!(s <= previous);
            previous = s;
        }
        let current = r.recency_boost(Some(2025));
        assert!((current - 0.25).abs() < 1e-6);
        assert!(r.recency_boost(Some(1900)) < 1e-6);
        assert!((r.recency_boost(Some(2030)) - current).abs() < 1e-6);
        assert_eq!(r.recency_boost(None), 0.0);
    }

    #[test]
    fn test_extreme_years_do_not_overflow() {
        let r = reranker();
        assert!(r.recency_boost(Some(i32::MIN)) < 1e-6);
        assert!((r.recency_boost(Some(i32::MAX)) - 0.25).abs() < 1e-6);
        let out = r.rerank(vec![
            chunk("A", 0.5, 0, "Review", "Results", Some(i32::MIN)),
            chunk("B", 0.5, 1, "Review", "Results", Some(2025)),
        ]);
        assert_eq!(out[0].doc_id(), "B");
        assert!(out.iter().all(|c| c.adjusted_score.is_finite()));
    }

    #[test]
    fn test_section_boosts() {
        let r = reranker();
        assert!((r.section_boost(Some("Results")) - 1.5).abs() < 1e-6);
        assert!((r.section_boost(Some("Conclusions")) - 1.5).abs() < 1e-6);
        assert!((r.section_boost(Some("Introduction")) + 0.5).abs() < 1e-6);
        assert_eq!(r.section_boost(None), 0.0);
    }

    #[test]
    fn test_resorts_and_keeps_rank_on_ties() {
        let r = reranker();
        let input = vec![
            chunk("A", 0.9, 0, "Letter", "Introduction", None),
            chunk("B", 0.5, 1, "Meta-Analysis", "Results", Some(2024)),
            chunk("C", 0.5, 2, "Letter", "Methods", None),
            chunk("D", 0.5, 3, "Letter", "Methods", None),
        ];
        let out = r.rerank(input);
        let ids: Vec<_> = out.iter().map(|c| c.doc_id()).collect();
        assert_eq!(ids, vec!["B", "C", "D", "A"]);
        let ranks: Vec<_> = out.iter().map(|c| c.rank).collect();
        assert_eq!(ranks, vec![0, 1, 2, 3]);
        assert!(out.windows(2).all(|w| w[0].adjusted_score >= w[1].adjusted_score));
    }

    #[test]
    fn test_configured_weights_apply() {
        let mut config = RerankConfig::default();
        config.evidence.case_report = 0.0;
        config.sections.results = 0.0;
        config.recency.max_boost = 0.0;
        let r = Reranker::new(config, 2025);
        let c = chunk("P", 0.42, 0, "Case Reports", "Results", Some(2025));
        assert!((r.adjusted_score(&c) - 0.42).abs() < 1e-6);
    }
}
