//! Fan-out similarity search across every source's store.
//!
//! Scores are merged as reported. Stores with different scoring scales are
//! not normalized against each other, so mixing, say, cosine similarity with
//! inner-product stores ranks by raw number.

use std::cmp::Ordering;

use tracing::{debug, warn};

use crate::store::{SearchResult, StoreHandle};

/// Default number of merged results.
pub const DEFAULT_SEARCH_LIMIT: usize = 5;

/// Sends `query` to every store in order and merges the hits.
///
/// A store that errors contributes nothing; this never fails.
pub async fn federated_search(
    handles: &[StoreHandle],
    query: &str,
    limit: usize,
) -> Vec<SearchResult> {
    if limit == 0 {
        return Vec::new();
    }
    let mut per_store = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.store().search(query, limit).await {
            Ok(mut hits) => {
                debug!(source = handle.label(), hits = hits.len(), "store searched");
                for hit in &mut hits {
                    hit.source = handle.label().to_string();
                }
                per_store.push(hits);
            }
            Err(err) => {
                warn!(source = handle.label(), error = %err, "store search failed; skipping");
            }
        }
    }
    merge_ranked(per_store, limit)
}

/// Concatenates result sets in order, stable-sorts by descending score and
/// keeps the first `limit`. Ties keep arrival order; non-finite scores sink.
pub fn merge_ranked(result_sets: Vec<Vec<SearchResult>>, limit: usize) -> Vec<SearchResult> {
    let mut merged: Vec<SearchResult> = result_sets.into_iter().flatten().collect();
    merged.sort_by(|a, b| compare_scores(b.score, a.score));
    merged.truncate(limit);
    merged
}

fn compare_scores(a: f64, b: f64) -> Ordering {
    match (a.is_finite(), b.is_finite()) {
        (true, true) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => Ordering::Equal,
    }
}
