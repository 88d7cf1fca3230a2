//! hybrid keyframe retrieval: channel fan-out, rank fusion, materialization
//!
//! a unified query can activate up to three retrieval channels, and they run
//! concurrently — no channel ever waits on another:
//!
//! ### 1. dense vector channel (ANN)
//! - the free-text query is translated to english, embedded into the
//!   1024-dim space of the archive's multimodal model, and searched against
//!   milvus with cosine similarity
//! - `exclude_ids` applies here and only here; the FTS channels may still
//!   surface an excluded id (this is the contract, not an oversight)
//! - the candidate pool is oversampled (`page·size·oversample`) so that the
//!   post-filters still leave a full page
//!
//! ### 2. speech caption channel (FTS over ASR)
//! - caption hits are *time segments*; each one is projected onto a
//!   keyframe-number range at the archive's fixed extraction rate and the
//!   range is expanded into at most 10 evenly spaced keyframes
//!
//! ### 3. on-screen text channel (FTS over OCR)
//! - straight full-text hits against the keyframe records
//!
//! ## fusion and materialization
//!
//! channel outputs are fused by weighted reciprocal rank fusion (see
//! [`crate::fusion`]), object predicates run as a stable post-filter, and
//! the metadata store materializes the final page in fused-rank order with
//! the group/video scope applied. `total_page` is derived from the
//! *collection* size, never from the query's result set — empty queries
//! still paginate the whole archive ("browse mode" compatibility).
//!
//! ## failure policy
//!
//! a channel that fails or times out contributes an empty ranking and the
//! request continues; only when every *active* channel has failed does the
//! request surface `Unavailable`. materialization failure is always fatal.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use actix_web::{web, HttpResponse, Result as ActixResult};
use serde::Serialize;
use tokio::time::timeout;

use crate::error::SearchError;
use crate::fusion::{self, ChannelRanking, DEFAULT_RRF_K};
use crate::path::keyframe_path;
use crate::providers::{
    Embedder, FrameRange, FtsSource, KeyframeQuery, KeyframeRow, MetadataStore, Translator,
    VectorIndex, VectorSearchError,
};
use crate::request::{ImageSearchRequest, UnifiedSearch, UnifiedSearchRequest};
use crate::AppEngine;

/// per-call budgets for the downstream dependencies; a channel that blows
/// its budget contributes an empty ranking instead of failing the request
pub const STORE_TIMEOUT: Duration = Duration::from_secs(5);
pub const VECTOR_TIMEOUT: Duration = Duration::from_secs(5);
pub const EMBED_TIMEOUT: Duration = Duration::from_secs(3);

/// keyframes were extracted at a fixed rate; caption timestamps project onto
/// keyframe numbers through it
// TODO: read per-video fps from metadata once the ingestion pipeline records it
const KEYFRAME_FPS: f64 = 30.0;

/// an asr segment expands into at most this many keyframes
const ASR_PER_RANGE_LIMIT: usize = 10;
/// caption hits considered per asr query
const ASR_SEGMENT_LIMIT: u64 = 1000;
/// ocr hits considered per query
const OCR_HIT_LIMIT: u64 = 5000;
/// milvus rejects larger topk values
const MAX_VECTOR_TOP_K: usize = 16_384;

#[derive(Debug, Serialize)]
pub struct KeyframeHit {
    pub id: i64,
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct SearchPage {
    pub total_page: u64,
    pub results: Vec<KeyframeHit>,
}

/// outcome of one retrieval channel for a single request
enum Channel {
    /// the request did not activate this channel
    Inactive,
    /// ranked candidate ids, best first
    Ranked(Vec<i64>),
    /// the channel failed or timed out; recovered to an empty ranking
    Failed,
}

impl Channel {
    fn ids(&self) -> &[i64] {
        match self {
            Channel::Ranked(ids) => ids,
            _ => &[],
        }
    }
}

/// the process-wide search engine: shared read-only handles to the vector
/// index and metadata store plus the adapters in front of the embedding and
/// translation services. per-request state lives on the request task.
pub struct SearchEngine<V, M, E, T> {
    pub(crate) vector: V,
    pub(crate) store: M,
    pub(crate) embedder: E,
    pub(crate) translator: T,
    pub(crate) data_root: PathBuf,
    /// collection size, fetched once at startup; `total_page` derives from
    /// this rather than from any per-query result set
    pub(crate) total_keyframes: u64,
}

impl<V, M, E, T> SearchEngine<V, M, E, T>
where
    V: VectorIndex,
    M: MetadataStore,
    E: Embedder,
    T: Translator,
{
    pub async fn new(
        vector: V,
        store: M,
        embedder: E,
        translator: T,
        data_root: PathBuf,
    ) -> Result<Self, SearchError> {
        let total_keyframes = vector
            .size()
            .await
            .map_err(|e| SearchError::Unavailable(format!("vector index stats: {}", e)))?;
        Ok(Self {
            vector,
            store,
            embedder,
            translator,
            data_root,
            total_keyframes,
        })
    }

    pub fn total_keyframes(&self) -> u64 {
        self.total_keyframes
    }

    pub(crate) fn total_pages(&self, size: u64) -> u64 {
        self.total_keyframes.div_ceil(size.max(1))
    }

    /// the unified search algorithm: fan out, fuse, filter, materialize
    pub async fn unified(&self, req: &UnifiedSearch) -> Result<SearchPage, SearchError> {
        let (vector, asr, ocr) = tokio::join!(
            self.vector_channel(req),
            self.asr_channel(req.asr.as_deref()),
            self.ocr_channel(req.ocr.as_deref()),
        );

        let channels = [&vector, &asr, &ocr];
        let active = channels
            .iter()
            .filter(|c| !matches!(c, Channel::Inactive))
            .count();
        let failed = channels
            .iter()
            .filter(|c| matches!(c, Channel::Failed))
            .count();
        if active > 0 && failed == active {
            return Err(SearchError::Unavailable(
                "all retrieval channels failed".into(),
            ));
        }

        let ranked = fusion::fuse(
            &[
                ChannelRanking::new(vector.ids().to_vec(), req.w_vec),
                ChannelRanking::new(asr.ids().to_vec(), req.w_asr),
                ChannelRanking::new(ocr.ids().to_vec(), req.w_ocr),
            ],
            DEFAULT_RRF_K,
        );

        logfire::info!(
            "channels fused",
            candidates = ranked.len() as i64,
            vector_hits = vector.ids().len() as i64,
            asr_hits = asr.ids().len() as i64,
            ocr_hits = ocr.ids().len() as i64
        );

        let ranked = if req.obj_filters.is_empty() {
            ranked
        } else {
            timeout(
                STORE_TIMEOUT,
                self.store.filter_by_objects(ranked, &req.obj_filters),
            )
            .await
            .map_err(|_| SearchError::Unavailable("object filter timed out".into()))?
            .map_err(|e| SearchError::Unavailable(format!("object filter: {}", e)))?
        };

        let results = self.materialize(ranked, req).await?;
        Ok(SearchPage {
            total_page: self.total_pages(req.size),
            results,
        })
    }

    /// resolve fused candidates to display rows through the metadata store;
    /// the store honors the key order and applies scope + page window
    async fn materialize(
        &self,
        ranked: Vec<i64>,
        req: &UnifiedSearch,
    ) -> Result<Vec<KeyframeHit>, SearchError> {
        if ranked.is_empty() {
            return Ok(Vec::new());
        }

        let query = KeyframeQuery {
            keys: Some(ranked.clone()),
            group_nums: (!req.group_nums.is_empty()).then(|| req.group_nums.clone()),
            video_nums: (!req.video_nums.is_empty()).then(|| req.video_nums.clone()),
            keyframe_nums: None,
            page: Some(req.page),
            size: Some(req.size),
        };
        let rows = timeout(STORE_TIMEOUT, self.store.get_by_keys(query))
            .await
            .map_err(|_| SearchError::Unavailable("metadata store timed out".into()))?
            .map_err(|e| SearchError::Unavailable(format!("metadata store: {}", e)))?;

        self.rows_to_hits(rows, &ranked)
    }

    /// map store rows to `{id, path}` hits, checking the store honored the
    /// join: a row we never asked for is an invariant violation
    pub(crate) fn rows_to_hits(
        &self,
        rows: Vec<KeyframeRow>,
        requested: &[i64],
    ) -> Result<Vec<KeyframeHit>, SearchError> {
        let requested: HashSet<i64> = requested.iter().copied().collect();
        rows.into_iter()
            .map(|row| {
                if !requested.contains(&row.key) {
                    logfire::error!(
                        "metadata store returned unrequested key",
                        key = row.key,
                        group_num = row.group_num,
                        video_num = row.video_num
                    );
                    return Err(SearchError::Internal(format!(
                        "store returned key {} that was never requested",
                        row.key
                    )));
                }
                Ok(KeyframeHit {
                    id: row.key,
                    path: keyframe_path(&self.data_root, &row)
                        .to_string_lossy()
                        .into_owned(),
                })
            })
            .collect()
    }

    /// translate → embed → ANN search; any failure recovers to `Failed`
    async fn vector_channel(&self, req: &UnifiedSearch) -> Channel {
        let Some(query) = req.query.as_deref() else {
            return Channel::Inactive;
        };

        let english = match timeout(EMBED_TIMEOUT, self.translator.translate(query)).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                let error = e.to_string();
                logfire::warn!("query translation failed", error = error);
                return Channel::Failed;
            }
            Err(_) => {
                logfire::warn!("query translation timed out");
                return Channel::Failed;
            }
        };

        let embedding = match timeout(EMBED_TIMEOUT, self.embedder.embed(&english)).await {
            Ok(Ok(embedding)) => embedding,
            Ok(Err(e)) => {
                let error = e.to_string();
                logfire::warn!("embedding generation failed", error = error);
                return Channel::Failed;
            }
            Err(_) => {
                logfire::warn!("embedding generation timed out");
                return Channel::Failed;
            }
        };

        let top_k = req
            .page
            .saturating_mul(req.size)
            .max(req.size)
            .saturating_mul(req.oversample)
            .min(MAX_VECTOR_TOP_K as u64) as usize;
        match timeout(
            VECTOR_TIMEOUT,
            self.vector.search(&embedding, top_k, &req.exclude_ids),
        )
        .await
        {
            Ok(Ok(mut hits)) => {
                // the metric is cosine similarity: order by distance descending
                hits.sort_by(|a, b| b.distance.total_cmp(&a.distance));
                Channel::Ranked(hits.into_iter().map(|h| h.id).collect())
            }
            Ok(Err(e)) => {
                let error = e.to_string();
                logfire::warn!("vector search failed", error = error);
                Channel::Failed
            }
            Err(_) => {
                logfire::warn!("vector search timed out");
                Channel::Failed
            }
        }
    }

    /// caption FTS → time-range projection → even keyframe expansion
    async fn asr_channel(&self, asr: Option<&str>) -> Channel {
        let Some(text) = asr else {
            return Channel::Inactive;
        };

        let segments = match timeout(
            STORE_TIMEOUT,
            self.store
                .fts_segments(FtsSource::Asr, text, ASR_SEGMENT_LIMIT),
        )
        .await
        {
            Ok(Ok(segments)) => segments,
            Ok(Err(e)) => {
                let error = e.to_string();
                logfire::warn!("asr caption search failed", error = error);
                return Channel::Failed;
            }
            Err(_) => {
                logfire::warn!("asr caption search timed out");
                return Channel::Failed;
            }
        };

        if let Some(first) = segments.first() {
            log::debug!(
                "asr caption hits: {} (top score {}, g{} v{})",
                segments.len(),
                first.score,
                first.group_num,
                first.video_num
            );
        }

        let ranges: Vec<FrameRange> = segments
            .iter()
            .map(|s| FrameRange {
                group_num: s.group_num,
                video_num: s.video_num,
                kf_start: (s.start * KEYFRAME_FPS).floor() as i64,
                kf_end: (s.end * KEYFRAME_FPS).ceil() as i64,
            })
            .collect();

        match timeout(
            STORE_TIMEOUT,
            self.store.keys_in_time_ranges(&ranges, ASR_PER_RANGE_LIMIT),
        )
        .await
        {
            Ok(Ok(ids)) => Channel::Ranked(ids),
            Ok(Err(e)) => {
                let error = e.to_string();
                logfire::warn!("asr range expansion failed", error = error);
                Channel::Failed
            }
            Err(_) => {
                logfire::warn!("asr range expansion timed out");
                Channel::Failed
            }
        }
    }

    /// straight FTS over the on-screen text of keyframe records
    async fn ocr_channel(&self, ocr: Option<&str>) -> Channel {
        let Some(text) = ocr else {
            return Channel::Inactive;
        };

        match timeout(
            STORE_TIMEOUT,
            self.store.fts_ids(FtsSource::Ocr, text, OCR_HIT_LIMIT),
        )
        .await
        {
            Ok(Ok(hits)) => Channel::Ranked(hits.into_iter().map(|(id, _)| id).collect()),
            Ok(Err(e)) => {
                let error = e.to_string();
                logfire::warn!("ocr search failed", error = error);
                Channel::Failed
            }
            Err(_) => {
                logfire::warn!("ocr search timed out");
                Channel::Failed
            }
        }
    }

    /// visually-similar search: the index ranks, the store materializes
    pub async fn image_search(&self, req: &ImageSearchRequest) -> Result<SearchPage, SearchError> {
        let mut hits = timeout(
            VECTOR_TIMEOUT,
            self.vector.search_by_id(req.imgid, req.page, req.size, &[]),
        )
        .await
        .map_err(|_| SearchError::Unavailable("vector index timed out".into()))?
        .map_err(|e| match e {
            VectorSearchError::NotFound(id) => SearchError::NotFound(id),
            other => SearchError::Unavailable(format!("vector index: {}", other)),
        })?;

        hits.sort_by(|a, b| b.distance.total_cmp(&a.distance));
        let ranked: Vec<i64> = hits.into_iter().map(|h| h.id).collect();

        let results = if ranked.is_empty() {
            Vec::new()
        } else {
            // the index already applied the page window; materialize the whole
            // ranked window as page 1
            let query = KeyframeQuery {
                keys: Some(ranked.clone()),
                page: Some(1),
                size: Some(req.size),
                ..Default::default()
            };
            let rows = timeout(STORE_TIMEOUT, self.store.get_by_keys(query))
                .await
                .map_err(|_| SearchError::Unavailable("metadata store timed out".into()))?
                .map_err(|e| SearchError::Unavailable(format!("metadata store: {}", e)))?;
            self.rows_to_hits(rows, &ranked)?
        };

        Ok(SearchPage {
            total_page: self.total_pages(req.size),
            results,
        })
    }
}

async fn run_unified(
    request: UnifiedSearchRequest,
    engine: &AppEngine,
) -> Result<SearchPage, SearchError> {
    let req = request.normalize()?;

    let _span = logfire::span!(
        "unified_search",
        query = req.query.clone().unwrap_or_default(),
        asr = req.asr.clone().unwrap_or_default(),
        ocr = req.ocr.clone().unwrap_or_default(),
        page = req.page as i64,
        size = req.size as i64
    )
    .entered();

    logfire::info!(
        "search request received",
        query = req.query.clone().unwrap_or_default(),
        asr = req.asr.clone().unwrap_or_default(),
        ocr = req.ocr.clone().unwrap_or_default(),
        obj_filters = req.obj_filters.len() as i64,
        page = req.page as i64,
        size = req.size as i64
    );

    let page = engine.unified(&req).await?;

    logfire::info!(
        "search completed",
        results_count = page.results.len() as i64,
        total_page = page.total_page as i64
    );

    Ok(page)
}

/// POST /keyframe/search handler (JSON body in, JSON out)
pub async fn search(
    body: web::Json<UnifiedSearchRequest>,
    engine: web::Data<AppEngine>,
) -> ActixResult<HttpResponse> {
    let page = run_unified(body.into_inner(), engine.get_ref()).await?;
    Ok(HttpResponse::Ok().json(page))
}

/// GET /keyframe/ handler for query-param searches and shareable links
pub async fn search_get(
    query: web::Query<UnifiedSearchRequest>,
    engine: web::Data<AppEngine>,
) -> ActixResult<HttpResponse> {
    let page = run_unified(query.into_inner(), engine.get_ref()).await?;
    Ok(HttpResponse::Ok().json(page))
}
