//! reciprocal rank fusion for the retrieval channels
//!
//! each channel produces a ranked id list; fusion only looks at ranks, never
//! at the channels' raw scores (cosine similarity, BM25 and caption-order
//! ranks live on incomparable scales).
//!
//! ## formula
//!
//! ```text
//! score(id) = Σ_c  w_c / (k + rank_c(id))
//! ```
//!
//! `rank_c` is the 1-based position of `id` in channel `c`; an id absent
//! from a channel contributes 0 there. `k = 60` is the standard constant
//! from the original RRF paper — higher values flatten the gap between the
//! top of a list and its tail.
//!
//! ## ordering
//!
//! fused score descending, ties broken by id descending. the comparison
//! chain uses `total_cmp`, so the output is deterministic for any input.

use std::collections::HashMap;

/// standard RRF constant; not empirically tuned for this archive
pub const DEFAULT_RRF_K: f64 = 60.0;

/// one channel's contribution to fusion: its ranked ids (best first) and
/// the request's weight for that channel
#[derive(Debug, Clone)]
pub struct ChannelRanking {
    pub ids: Vec<i64>,
    pub weight: f64,
}

impl ChannelRanking {
    pub fn new(ids: Vec<i64>, weight: f64) -> Self {
        Self { ids, weight }
    }
}

/// fuse the channels into a single ranked id list
///
/// the candidate set is the union of all channel ids; a zero-weight channel
/// still nominates candidates, they just score 0 from it. ids within one
/// channel are expected to be unique (the channels de-duplicate on their
/// side); a repeated id would simply score both of its positions.
pub fn fuse(channels: &[ChannelRanking], k: f64) -> Vec<i64> {
    let mut fused: HashMap<i64, f64> = HashMap::new();
    for channel in channels {
        for (i, &id) in channel.ids.iter().enumerate() {
            let contribution = channel.weight / (k + (i + 1) as f64);
            *fused.entry(id).or_insert(0.0) += contribution;
        }
    }

    let mut ranked: Vec<(i64, f64)> = fused.into_iter().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| b.0.cmp(&a.0)));
    ranked.into_iter().map(|(id, _)| id).collect()
}
