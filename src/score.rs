//! Scoring and flagging.
//!
//! Aggregates match spans into a single originality score. Overlapping
//! spans (two sources claiming the same region) are resolved by keeping
//! only the highest-ratio span per region, so the accepted set is
//! non-overlapping by construction and the overall score never double-counts
//! tokens.

use crate::config::AnalysisConfig;
use crate::models::{MatchSpan, Severity};
use crate::similarity::sort_spans;

/// Outcome of scoring one document's spans.
#[derive(Debug, Clone)]
pub struct Scored {
    /// Overall score in [0, 100].
    pub overall: f64,
    pub flagged: bool,
    /// Accepted spans, non-overlapping, ordered by descending ratio, each
    /// carrying its severity tier.
    pub spans: Vec<MatchSpan>,
}

/// Score raw spans against the document length (in tokens).
pub fn score(spans: &[MatchSpan], document_tokens: usize, cfg: &AnalysisConfig) -> Scored {
    let mut ordered = spans.to_vec();
    sort_spans(&mut ordered);

    // Highest-ratio span wins each overlapping region; later (lower-ratio)
    // spans touching an accepted region are dropped entirely.
    let mut accepted: Vec<MatchSpan> = Vec::new();
    for candidate in ordered {
        if accepted.iter().any(|kept| kept.overlaps(&candidate)) {
            continue;
        }
        let severity = severity_tier(candidate.ratio, cfg);
        accepted.push(MatchSpan {
            severity,
            ..candidate
        });
    }

    let covered: usize = accepted.iter().map(MatchSpan::token_len).sum();
    let overall = if document_tokens == 0 {
        0.0
    } else {
        (100.0 * covered as f64 / document_tokens as f64).min(100.0)
    };

    Scored {
        overall,
        flagged: overall > cfg.flag_threshold,
        spans: accepted,
    }
}

fn severity_tier(ratio: f64, cfg: &AnalysisConfig) -> Option<Severity> {
    if ratio >= cfg.severity_high {
        Some(Severity::High)
    } else if ratio >= cfg.severity_moderate {
        Some(Severity::Moderate)
    } else {
        None
    }
}
