//! Recommendation generator.
//!
//! Maps the corpus sources touched by match spans to suggested legitimate
//! reading material from the reference library. Strictly best-effort: a
//! missing or failing library yields an empty list, never a failed analysis.

use std::collections::BTreeSet;

use tracing::warn;

use crate::config::RecommendationConfig;
use crate::corpus::CorpusSnapshot;
use crate::library::{LibraryEntry, ReferenceLibrary};
use crate::models::{MatchSpan, Recommendation};

/// Produce up to `top_k` recommendations for the matched sources.
///
/// Entries are ranked by (topical overlap desc, published desc, title asc),
/// deduplicated by title, excluding the matched sources themselves and
/// titles the student already cited.
pub async fn recommend(
    spans: &[MatchSpan],
    snapshot: &CorpusSnapshot,
    library: &dyn ReferenceLibrary,
    cited: &[String],
    cfg: &RecommendationConfig,
) -> Vec<Recommendation> {
    // Distinct sources touched by spans, then the union of their topic tags.
    let sources: BTreeSet<&str> = spans.iter().map(|s| s.source_id.as_str()).collect();
    if sources.is_empty() {
        return Vec::new();
    }

    let mut topics: BTreeSet<String> = BTreeSet::new();
    for source_id in &sources {
        if let Some(entry) = snapshot.get(source_id) {
            for topic in &entry.topics {
                topics.insert(topic.to_lowercase());
            }
        }
    }
    if topics.is_empty() {
        return Vec::new();
    }
    let query: Vec<String> = topics.iter().cloned().collect();

    let candidates = match library.by_topics(&query).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(error = %e, "reference library unavailable; skipping recommendations");
            return Vec::new();
        }
    };

    let mut ranked: Vec<(usize, &LibraryEntry)> = candidates
        .iter()
        .filter(|entry| {
            let title = entry.title.as_str();
            !sources.iter().any(|s| s.eq_ignore_ascii_case(title))
                && !cited.iter().any(|c| c.eq_ignore_ascii_case(title))
        })
        .map(|entry| {
            let overlap = entry
                .topics
                .iter()
                .filter(|t| topics.contains(&t.to_lowercase()))
                .count();
            (overlap, entry)
        })
        .filter(|(overlap, _)| *overlap > 0)
        .collect();

    ranked.sort_by(|(oa, a), (ob, b)| {
        ob.cmp(oa)
            .then(b.published.cmp(&a.published))
            .then(a.title.cmp(&b.title))
    });

    let mut seen_titles: BTreeSet<String> = BTreeSet::new();
    let mut out = Vec::new();
    for (overlap, entry) in ranked {
        if !seen_titles.insert(entry.title.to_lowercase()) {
            continue;
        }
        out.push(Recommendation {
            title: entry.title.clone(),
            kind: entry.kind,
            relevance: overlap as f64 / query.len() as f64,
        });
        if out.len() >= cfg.top_k {
            break;
        }
    }
    out
}
