//! temporal neighbors and image-by-id search
//!
//! keys are dense within a video, so the ±k window around a keyframe id is a
//! plain key-range fetch; rows from an adjacent video that bleed into the
//! window are dropped by comparing against the anchor's `(group, video)`.

use actix_web::{web, HttpResponse, Result as ActixResult};
use serde::Serialize;
use tokio::time::timeout;

use crate::error::SearchError;
use crate::providers::{Embedder, KeyframeQuery, KeyframeRow, MetadataStore, Translator, VectorIndex};
use crate::request::{ImageSearchRequest, NeighborsRequest};
use crate::search::{KeyframeHit, SearchEngine, STORE_TIMEOUT};
use crate::AppEngine;

#[derive(Debug, Serialize)]
pub struct NeighborsResponse {
    pub frames: Vec<KeyframeHit>,
}

impl<V, M, E, T> SearchEngine<V, M, E, T>
where
    V: VectorIndex,
    M: MetadataStore,
    E: Embedder,
    T: Translator,
{
    /// same-video ±k keyframe window around `imgid`, in key order
    pub async fn neighbors(&self, imgid: i64, k: u64) -> Result<Vec<KeyframeHit>, SearchError> {
        let k = k as i64;
        let keys: Vec<i64> = (imgid.saturating_sub(k)..=imgid.saturating_add(k))
            .filter(|key| *key >= 0)
            .collect();
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let query = KeyframeQuery {
            keys: Some(keys.clone()),
            page: Some(1),
            size: Some(keys.len() as u64),
            ..Default::default()
        };
        let rows = timeout(STORE_TIMEOUT, self.store.get_by_keys(query))
            .await
            .map_err(|_| SearchError::Unavailable("metadata store timed out".into()))?
            .map_err(|e| SearchError::Unavailable(format!("metadata store: {}", e)))?;

        // the anchor is the requested keyframe itself; without it there is
        // nothing to orient the window around
        let Some(anchor) = rows.iter().find(|r| r.key == imgid) else {
            return Ok(Vec::new());
        };
        let (group_num, video_num) = (anchor.group_num, anchor.video_num);

        let kept: Vec<KeyframeRow> = rows
            .into_iter()
            .filter(|r| r.group_num == group_num && r.video_num == video_num)
            .collect();
        self.rows_to_hits(kept, &keys)
    }
}

/// GET /keyframe/neighbors handler
pub async fn get_neighbors(
    query: web::Query<NeighborsRequest>,
    engine: web::Data<AppEngine>,
) -> ActixResult<HttpResponse> {
    query.validate()?;
    let frames = engine.neighbors(query.imgid, query.k).await?;
    Ok(HttpResponse::Ok().json(NeighborsResponse { frames }))
}

/// GET /keyframe/imgsearch handler
pub async fn image_search(
    query: web::Query<ImageSearchRequest>,
    engine: web::Data<AppEngine>,
) -> ActixResult<HttpResponse> {
    query.validate()?;
    let page = engine.image_search(&query).await?;
    Ok(HttpResponse::Ok().json(page))
}
