//! in-memory fakes for the engine seams
//!
//! the mocks implement the provider traits over plain vectors so the
//! orchestrator tests exercise the real fan-out / fusion / materialization
//! code with no network in the loop. `MockStore` mirrors the metadata-store
//! contract: order-preserving joins, stable object filters and evenly
//! sampled range expansion.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::metadata::sample_evenly;
use crate::providers::{
    CaptionSegment, Embedder, EmbeddingError, FrameRange, FtsSource, KeyframeQuery, KeyframeRow,
    MetadataStore, ScoredId, StoreError, TranslateError, Translator, VectorIndex,
    VectorSearchError,
};
use crate::request::{Cmp, ObjFilter};
use crate::search::SearchEngine;

#[derive(Default, Clone)]
pub struct MockIndex {
    pub total: u64,
    /// hits returned by `search`, best first
    pub hits: Vec<ScoredId>,
    /// ids with a stored embedding (`search_by_id` anchors)
    pub known_ids: Vec<i64>,
    pub fail_search: bool,
    pub fail_stats: bool,
}

impl MockIndex {
    pub fn with_total(total: u64) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }
}

impl VectorIndex for MockIndex {
    async fn search(
        &self,
        _embedding: &[f32],
        top_k: usize,
        exclude_ids: &[i64],
    ) -> Result<Vec<ScoredId>, VectorSearchError> {
        if self.fail_search {
            return Err(VectorSearchError::Parse("mock search failure".into()));
        }
        Ok(self
            .hits
            .iter()
            .filter(|h| !exclude_ids.contains(&h.id))
            .take(top_k)
            .copied()
            .collect())
    }

    async fn search_by_id(
        &self,
        imgid: i64,
        page: u64,
        size: u64,
        exclude_ids: &[i64],
    ) -> Result<Vec<ScoredId>, VectorSearchError> {
        if self.fail_search {
            return Err(VectorSearchError::Parse("mock search failure".into()));
        }
        if !self.known_ids.contains(&imgid) {
            return Err(VectorSearchError::NotFound(imgid));
        }
        let skip = (page.saturating_sub(1) * size) as usize;
        Ok(self
            .hits
            .iter()
            .filter(|h| h.id != imgid && !exclude_ids.contains(&h.id))
            .skip(skip)
            .take(size as usize)
            .copied()
            .collect())
    }

    async fn size(&self) -> Result<u64, VectorSearchError> {
        if self.fail_stats {
            return Err(VectorSearchError::Parse("mock stats failure".into()));
        }
        Ok(self.total)
    }

    fn name(&self) -> &'static str {
        "mock-index"
    }
}

fn cmp_holds(cmp: Cmp, actual: i64, wanted: i64) -> bool {
    match cmp {
        Cmp::Eq => actual == wanted,
        Cmp::Neq => actual != wanted,
        Cmp::Gt => actual > wanted,
        Cmp::Gte => actual >= wanted,
        Cmp::Lt => actual < wanted,
        Cmp::Lte => actual <= wanted,
    }
}

#[derive(Default, Clone)]
pub struct MockStore {
    /// the whole keyframe collection
    pub rows: Vec<KeyframeRow>,
    /// asr caption hits, score descending
    pub segments: Vec<CaptionSegment>,
    /// ocr full-text hits, score descending
    pub ocr_hits: Vec<(i64, f64)>,
    /// key → detected objects
    pub object_counts: HashMap<i64, Vec<(String, i64)>>,
    /// when set, `get_by_keys` appends this row the caller never asked for
    pub inject_unrequested: Option<KeyframeRow>,
    pub fail_fts: bool,
}

impl MockStore {
    fn in_scope(&self, row: &KeyframeRow, query: &KeyframeQuery) -> bool {
        if let Some(kf_nums) = query.keyframe_nums.as_deref() {
            if !kf_nums.is_empty() && !kf_nums.contains(&row.keyframe_num) {
                return false;
            }
        }
        let groups = query.group_nums.as_deref().unwrap_or(&[]);
        let videos = query.video_nums.as_deref().unwrap_or(&[]);
        if !groups.is_empty() && !videos.is_empty() {
            groups
                .iter()
                .zip(videos)
                .any(|(g, v)| row.group_num == *g && (*v == -1 || row.video_num == *v))
        } else if !groups.is_empty() {
            groups.contains(&row.group_num)
        } else if !videos.is_empty() {
            videos.contains(&row.video_num)
        } else {
            true
        }
    }
}

impl MetadataStore for MockStore {
    async fn get_by_keys(&self, query: KeyframeQuery) -> Result<Vec<KeyframeRow>, StoreError> {
        let page = query.page.unwrap_or(1).max(1);
        let size = query.size.unwrap_or(50).clamp(1, 200) as usize;

        let selected: Vec<KeyframeRow> = match &query.keys {
            Some(keys) => keys
                .iter()
                .filter_map(|k| self.rows.iter().find(|r| r.key == *k))
                .filter(|r| self.in_scope(r, &query))
                .cloned()
                .collect(),
            None => {
                let mut rows: Vec<KeyframeRow> = self
                    .rows
                    .iter()
                    .filter(|r| self.in_scope(r, &query))
                    .cloned()
                    .collect();
                rows.sort_by_key(|r| (r.group_num, r.video_num, r.keyframe_num));
                rows
            }
        };

        let skip = page.saturating_sub(1).saturating_mul(size as u64) as usize;
        let mut rows: Vec<KeyframeRow> = selected.into_iter().skip(skip).take(size).collect();
        if let Some(extra) = &self.inject_unrequested {
            rows.push(extra.clone());
        }
        Ok(rows)
    }

    async fn filter_by_objects(
        &self,
        ids: Vec<i64>,
        filters: &[ObjFilter],
    ) -> Result<Vec<i64>, StoreError> {
        if filters.is_empty() {
            return Ok(ids);
        }
        Ok(ids
            .into_iter()
            .filter(|id| {
                let objects = self.object_counts.get(id).cloned().unwrap_or_default();
                filters.iter().all(|f| {
                    objects
                        .iter()
                        .any(|(name, count)| *name == f.name && cmp_holds(f.cmp, *count, f.count))
                })
            })
            .collect())
    }

    async fn fts_ids(
        &self,
        source: FtsSource,
        _text: &str,
        limit: u64,
    ) -> Result<Vec<(i64, f64)>, StoreError> {
        if self.fail_fts {
            return Err(StoreError::Malformed("mock fts failure".into()));
        }
        match source {
            FtsSource::Ocr => Ok(self
                .ocr_hits
                .iter()
                .take(limit as usize)
                .cloned()
                .collect()),
            FtsSource::Asr => Ok(Vec::new()),
        }
    }

    async fn fts_segments(
        &self,
        source: FtsSource,
        _text: &str,
        limit: u64,
    ) -> Result<Vec<CaptionSegment>, StoreError> {
        if self.fail_fts {
            return Err(StoreError::Malformed("mock fts failure".into()));
        }
        match source {
            FtsSource::Asr => Ok(self
                .segments
                .iter()
                .take(limit.min(1000) as usize)
                .cloned()
                .collect()),
            FtsSource::Ocr => Ok(Vec::new()),
        }
    }

    async fn keys_in_time_ranges(
        &self,
        ranges: &[FrameRange],
        per_range_limit: usize,
    ) -> Result<Vec<i64>, StoreError> {
        let mut out = Vec::new();
        for range in ranges {
            let mut in_range: Vec<&KeyframeRow> = self
                .rows
                .iter()
                .filter(|r| {
                    r.group_num == range.group_num
                        && r.video_num == range.video_num
                        && (range.kf_start..=range.kf_end).contains(&r.keyframe_num)
                })
                .collect();
            in_range.sort_by_key(|r| r.keyframe_num);
            for row in sample_evenly(in_range, per_range_limit) {
                if !out.contains(&row.key) {
                    out.push(row.key);
                }
            }
        }
        Ok(out)
    }

    fn name(&self) -> &'static str {
        "mock-store"
    }
}

#[derive(Clone)]
pub struct MockEmbedder {
    pub vector: Vec<f32>,
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self {
            vector: vec![0.1; 8],
        }
    }
}

impl Embedder for MockEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.vector.clone())
    }

    fn name(&self) -> &'static str {
        "mock-embedder"
    }
}

/// identity translator: the tests feed english queries straight through
#[derive(Clone, Copy)]
pub struct MockTranslator;

impl Translator for MockTranslator {
    async fn translate(&self, text: &str) -> Result<String, TranslateError> {
        Ok(text.to_string())
    }

    fn name(&self) -> &'static str {
        "mock-translator"
    }
}

pub async fn engine(
    index: MockIndex,
    store: MockStore,
) -> SearchEngine<MockIndex, MockStore, MockEmbedder, MockTranslator> {
    SearchEngine::new(
        index,
        store,
        MockEmbedder::default(),
        MockTranslator,
        PathBuf::from("/data"),
    )
    .await
    .expect("mock engine construction")
}
