//! provider abstractions for the retrieval backends
//!
//! these traits are the seams between the search engine and its remote
//! dependencies: the embedding model, the query translator, the ANN vector
//! index and the keyframe metadata store. implementations can be swapped
//! (e.g. milvus → another vector service) without changing the orchestration
//! logic, and the engine tests run entirely against in-memory fakes.
//!
//! ## design notes
//!
//! we use `async fn`-style traits via return-position `impl Future`
//! (stabilized in rust 1.75). the explicit `Send` bound keeps the futures
//! usable from the multi-threaded actix workers.

use std::future::Future;
use thiserror::Error;

use crate::request::ObjFilter;

/// errors that can occur when generating embeddings
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("failed to send request: {0}")]
    Request(#[from] reqwest::Error),

    #[error("api error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("no embedding returned from provider")]
    EmptyResponse,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// a provider that can generate embeddings for text
///
/// implementations should be cheap to clone (wrap expensive resources in Arc).
pub trait Embedder: Send + Sync {
    /// generate an embedding vector for the given (english) text
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>, EmbeddingError>> + Send;

    /// human-readable name for logging/debugging
    fn name(&self) -> &'static str;
}

/// errors that can occur when translating a query
#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("failed to send request: {0}")]
    Request(#[from] reqwest::Error),

    #[error("api error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("unexpected response shape: {0}")]
    Parse(String),
}

/// a provider that can turn arbitrary-language text into english
///
/// the embedding model only understands english, so every query passes
/// through here first.
pub trait Translator: Send + Sync {
    fn translate(&self, text: &str) -> impl Future<Output = Result<String, TranslateError>> + Send;

    /// human-readable name for logging/debugging
    fn name(&self) -> &'static str;
}

/// errors that can occur during vector search
#[derive(Debug, Error)]
pub enum VectorSearchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("api error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("vector id {0} not found")]
    NotFound(i64),

    #[error("parse error: {0}")]
    Parse(String),
}

/// a single ANN hit: keyframe key plus cosine similarity (higher = closer)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredId {
    pub id: i64,
    pub distance: f32,
}

/// the dense-vector index over keyframe embeddings
pub trait VectorIndex: Send + Sync {
    /// top-k ANN search, best first; `exclude_ids` is filtered server-side
    fn search(
        &self,
        embedding: &[f32],
        top_k: usize,
        exclude_ids: &[i64],
    ) -> impl Future<Output = Result<Vec<ScoredId>, VectorSearchError>> + Send;

    /// search by an indexed id's own embedding, returning the `size`-sized
    /// window at offset `(page-1)·size` of the ranking. the id itself is
    /// always excluded. fails with `NotFound` when the id is not indexed.
    fn search_by_id(
        &self,
        imgid: i64,
        page: u64,
        size: u64,
        exclude_ids: &[i64],
    ) -> impl Future<Output = Result<Vec<ScoredId>, VectorSearchError>> + Send;

    /// total number of indexed vectors
    fn size(&self) -> impl Future<Output = Result<u64, VectorSearchError>> + Send;

    /// human-readable name for logging/debugging
    fn name(&self) -> &'static str;
}

/// errors from the metadata store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store query failed: {0}")]
    Backend(#[from] mongodb::error::Error),

    #[error("malformed document: {0}")]
    Malformed(String),
}

/// one keyframe record from the metadata store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyframeRow {
    pub key: i64,
    pub group_num: i64,
    pub video_num: i64,
    pub keyframe_num: i64,
}

/// an ASR caption hit as a time segment within one video
#[derive(Debug, Clone, PartialEq)]
pub struct CaptionSegment {
    pub group_num: i64,
    pub video_num: i64,
    /// seconds from the start of the video, `0 <= start <= end`
    pub start: f64,
    pub end: f64,
    pub score: f64,
}

/// an inclusive keyframe-number window within one video
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRange {
    pub group_num: i64,
    pub video_num: i64,
    pub kf_start: i64,
    pub kf_end: i64,
}

/// which text corpus a full-text query runs against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FtsSource {
    /// speech transcript fragments (`speech_captions` collection)
    Asr,
    /// on-screen text attached to keyframe records
    Ocr,
}

/// filter and pagination arguments for [`MetadataStore::get_by_keys`]
#[derive(Debug, Clone, Default)]
pub struct KeyframeQuery {
    /// when set, the result keeps this exact key order (unknown keys dropped);
    /// when absent, rows come back in `(group, video, keyframe)` order
    pub keys: Option<Vec<i64>>,
    /// positional with `video_nums` when both have equal length; a video of
    /// `-1` means any video in that group
    pub group_nums: Option<Vec<i64>>,
    pub video_nums: Option<Vec<i64>>,
    pub keyframe_nums: Option<Vec<i64>>,
    /// 1-based; defaults to 1
    pub page: Option<u64>,
    /// clamped to [1, 200] by the store
    pub size: Option<u64>,
}

/// the keyframe document store: batch lookup, object predicates, full-text
/// search over captions/OCR, and time-range expansion
pub trait MetadataStore: Send + Sync {
    /// paged lookup; see [`KeyframeQuery`] for the ordering contract
    fn get_by_keys(
        &self,
        query: KeyframeQuery,
    ) -> impl Future<Output = Result<Vec<KeyframeRow>, StoreError>> + Send;

    /// stable post-filter: keeps ids whose keyframe satisfies every predicate,
    /// preserving the input order. empty `filters` is the identity.
    fn filter_by_objects(
        &self,
        ids: Vec<i64>,
        filters: &[ObjFilter],
    ) -> impl Future<Output = Result<Vec<i64>, StoreError>> + Send;

    /// full-text search returning `(key, score)` pairs, score descending
    fn fts_ids(
        &self,
        source: FtsSource,
        text: &str,
        limit: u64,
    ) -> impl Future<Output = Result<Vec<(i64, f64)>, StoreError>> + Send;

    /// full-text search returning caption time segments (ASR in practice)
    fn fts_segments(
        &self,
        source: FtsSource,
        text: &str,
        limit: u64,
    ) -> impl Future<Output = Result<Vec<CaptionSegment>, StoreError>> + Send;

    /// evenly-spaced keyframe keys inside each range, de-duplicated across
    /// ranges preserving first-seen order
    fn keys_in_time_ranges(
        &self,
        ranges: &[FrameRange],
        per_range_limit: usize,
    ) -> impl Future<Output = Result<Vec<i64>, StoreError>> + Send;

    /// human-readable name for logging/debugging
    fn name(&self) -> &'static str;
}
