//! milvus vector index client
//!
//! implements the `VectorIndex` trait over the milvus restful v2 api. the
//! `keyframe` collection stores `{id: int64, embedding: float32[1024]}` with
//! a COSINE metric, so the `distance` field in responses is a similarity in
//! `[-1, 1]` (higher = closer) and hits come back best-first. an L2 deployment
//! would invert that ordering; the engine sorts explicitly on similarity to
//! keep the metric assumption in one place.

use crate::providers::{ScoredId, VectorIndex, VectorSearchError};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

/// envelope shared by every milvus v2 response
#[derive(Debug, Deserialize)]
struct MilvusResponse {
    code: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

/// milvus vector database client
#[derive(Clone)]
pub struct MilvusIndex {
    client: Client,
    base_url: String,
    token: Option<String>,
    collection: String,
}

impl MilvusIndex {
    pub fn new(base_url: String, token: Option<String>, collection: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
            token,
            collection,
        }
    }

    fn endpoint(&self, op: &str) -> String {
        format!("{}/v2/vectordb/{}", self.base_url.trim_end_matches('/'), op)
    }

    async fn post(
        &self,
        op: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, VectorSearchError> {
        let mut builder = self.client.post(self.endpoint(op)).json(&body);
        if let Some(token) = &self.token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }

        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(VectorSearchError::Api { status, body });
        }

        let parsed: MilvusResponse = response
            .json()
            .await
            .map_err(|e| VectorSearchError::Parse(format!("failed to parse response: {}", e)))?;

        if parsed.code != 0 {
            return Err(VectorSearchError::Api {
                status: 200,
                body: parsed
                    .message
                    .unwrap_or_else(|| format!("milvus error code {}", parsed.code)),
            });
        }

        parsed
            .data
            .ok_or_else(|| VectorSearchError::Parse("response missing data".into()))
    }

    /// `id not in [...]` filter expression, or None when nothing is excluded
    fn exclude_expr(exclude_ids: &[i64]) -> Option<String> {
        if exclude_ids.is_empty() {
            return None;
        }
        let ids = exclude_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        Some(format!("id not in [{}]", ids))
    }

    fn parse_hits(data: &serde_json::Value) -> Result<Vec<ScoredId>, VectorSearchError> {
        let rows = data
            .as_array()
            .ok_or_else(|| VectorSearchError::Parse("search data is not an array".into()))?;

        rows.iter()
            .map(|row| {
                // ids may arrive as a json number or a quoted string
                let id = row
                    .get("id")
                    .and_then(|v| v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
                    .ok_or_else(|| VectorSearchError::Parse("hit missing id".into()))?;
                let distance = row.get("distance").and_then(|v| v.as_f64()).unwrap_or(0.0);
                Ok(ScoredId {
                    id,
                    distance: distance as f32,
                })
            })
            .collect()
    }

    /// fetch the stored embedding for one id; `NotFound` when it is not indexed
    async fn fetch_embedding(&self, imgid: i64) -> Result<Vec<f32>, VectorSearchError> {
        let body = json!({
            "collectionName": self.collection,
            "filter": format!("id == {}", imgid),
            "outputFields": ["embedding"],
            "limit": 1,
        });

        let data = self.post("entities/query", body).await?;
        let rows = data
            .as_array()
            .ok_or_else(|| VectorSearchError::Parse("query data is not an array".into()))?;
        let row = rows.first().ok_or(VectorSearchError::NotFound(imgid))?;

        row.get("embedding")
            .and_then(|v| v.as_array())
            .ok_or_else(|| VectorSearchError::Parse("query row missing embedding".into()))?
            .iter()
            .map(|v| {
                v.as_f64()
                    .map(|f| f as f32)
                    .ok_or_else(|| VectorSearchError::Parse("non-numeric embedding value".into()))
            })
            .collect()
    }
}

impl VectorIndex for MilvusIndex {
    async fn search(
        &self,
        embedding: &[f32],
        top_k: usize,
        exclude_ids: &[i64],
    ) -> Result<Vec<ScoredId>, VectorSearchError> {
        let mut body = json!({
            "collectionName": self.collection,
            "data": [embedding],
            "annsField": "embedding",
            "limit": top_k,
            "outputFields": ["id"],
        });
        if let Some(expr) = Self::exclude_expr(exclude_ids) {
            body["filter"] = json!(expr);
        }

        log::debug!(
            "milvus vector search: top_k={} excluded={}",
            top_k,
            exclude_ids.len()
        );

        let data = self.post("entities/search", body).await?;
        Self::parse_hits(&data)
    }

    async fn search_by_id(
        &self,
        imgid: i64,
        page: u64,
        size: u64,
        exclude_ids: &[i64],
    ) -> Result<Vec<ScoredId>, VectorSearchError> {
        let embedding = self.fetch_embedding(imgid).await?;

        let mut excludes = exclude_ids.to_vec();
        if !excludes.contains(&imgid) {
            excludes.push(imgid);
        }

        // the offset/limit pair is the `size`-sized window at position
        // `(page-1)·size` of the full ranking
        let offset = page.saturating_sub(1).saturating_mul(size);
        let mut body = json!({
            "collectionName": self.collection,
            "data": [embedding],
            "annsField": "embedding",
            "limit": size,
            "offset": offset,
            "outputFields": ["id"],
        });
        if let Some(expr) = Self::exclude_expr(&excludes) {
            body["filter"] = json!(expr);
        }

        let data = self.post("entities/search", body).await?;
        Self::parse_hits(&data)
    }

    async fn size(&self) -> Result<u64, VectorSearchError> {
        let body = json!({ "collectionName": self.collection });
        let data = self.post("collections/get_stats", body).await?;

        data.get("rowCount")
            .and_then(|v| {
                v.as_u64()
                    .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
            })
            .ok_or_else(|| VectorSearchError::Parse("stats missing rowCount".into()))
    }

    fn name(&self) -> &'static str {
        "milvus"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exclude_expr() {
        assert_eq!(MilvusIndex::exclude_expr(&[]), None);
        assert_eq!(
            MilvusIndex::exclude_expr(&[3, 7]),
            Some("id not in [3, 7]".to_string())
        );
    }

    #[test]
    fn test_parse_hits_accepts_numeric_and_string_ids() {
        let data = json!([
            { "id": 7, "distance": 0.92 },
            { "id": "3", "distance": 0.81 },
        ]);
        let hits = MilvusIndex::parse_hits(&data).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, 7);
        assert!((hits[0].distance - 0.92).abs() < 1e-6);
        assert_eq!(hits[1].id, 3);
    }

    #[test]
    fn test_parse_hits_rejects_missing_id() {
        let data = json!([{ "distance": 0.5 }]);
        assert!(MilvusIndex::parse_hits(&data).is_err());
    }
}
