//! Similarity engine: shingle-fingerprint matching against the corpus.
//!
//! The document's token stream is partitioned into overlapping shingles;
//! each shingle's fingerprint is looked up in the snapshot's inverted map to
//! find candidate sources, and per candidate the shingle sequence is walked
//! to merge runs of consecutive matches into contiguous spans. A gap of at
//! most `gap_tolerance` non-matching shingles is absorbed inside a run to
//! tolerate minor paraphrase.
//!
//! The output is deterministic: re-running on identical input against the
//! same snapshot yields byte-identical spans. Candidate order is sorted, the
//! walk is sequential, and no hash-map iteration order reaches the result.

use crate::config::AnalysisConfig;
use crate::corpus::{shingle_fingerprints, CorpusEntry, CorpusSnapshot};
use crate::models::{MatchSpan, NormalizedText};

/// Match normalized text against one corpus snapshot, producing raw spans.
///
/// Spans from different sources may overlap here; overlap resolution is the
/// scorer's job. Ordering: ratio desc, start asc, source_id asc.
pub fn match_text(
    text: &NormalizedText,
    snapshot: &CorpusSnapshot,
    cfg: &AnalysisConfig,
) -> Vec<MatchSpan> {
    let prints = shingle_fingerprints(&text.tokens, cfg.shingle_len);
    if prints.is_empty() {
        return Vec::new();
    }

    let mut candidates: Vec<usize> = prints
        .iter()
        .flat_map(|fp| snapshot.candidates(*fp))
        .copied()
        .collect();
    candidates.sort_unstable();
    candidates.dedup();

    let mut spans = Vec::new();
    for idx in candidates {
        match_entry(&prints, snapshot.entry(idx), cfg, &mut spans);
    }
    sort_spans(&mut spans);
    spans
}

/// Canonical span ordering: ratio desc, then start asc, then source asc.
pub fn sort_spans(spans: &mut [MatchSpan]) {
    spans.sort_by(|a, b| {
        b.ratio
            .partial_cmp(&a.ratio)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.start.cmp(&b.start))
            .then(a.source_id.cmp(&b.source_id))
    });
}

/// Walk the document's shingle sequence against one entry's fingerprint set
/// and push every merged run that survives the noise filter.
fn match_entry(prints: &[u64], entry: &CorpusEntry, cfg: &AnalysisConfig, out: &mut Vec<MatchSpan>) {
    let k = cfg.shingle_len;
    let mut i = 0;
    while i < prints.len() {
        if !entry.fingerprints.contains(&prints[i]) {
            i += 1;
            continue;
        }

        // Open a run at shingle i; extend while gaps stay within tolerance.
        let start_shingle = i;
        let mut matched: Vec<usize> = vec![i];
        let mut last_match = i;
        let mut gap = 0;
        let mut j = i + 1;
        while j < prints.len() {
            if entry.fingerprints.contains(&prints[j]) {
                matched.push(j);
                last_match = j;
                gap = 0;
            } else {
                gap += 1;
                if gap > cfg.gap_tolerance {
                    break;
                }
            }
            j += 1;
        }

        if matched.len() >= cfg.min_span_shingles {
            let start = start_shingle;
            let end = last_match + k;
            // Local ratio counts tokens covered by matching shingles, not
            // the span's full width.
            let mut covered = vec![false; end - start];
            for m in &matched {
                for t in *m..*m + k {
                    covered[t - start] = true;
                }
            }
            let matched_tokens = covered.iter().filter(|c| **c).count();
            out.push(MatchSpan {
                start,
                end,
                source_id: entry.source_id.clone(),
                ratio: matched_tokens as f64 / (end - start) as f64,
                severity: None,
            });
        }

        // Everything in last_match+1..=j is known non-matching.
        i = j + 1;
    }
}
