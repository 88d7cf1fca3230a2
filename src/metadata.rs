//! mongodb metadata store
//!
//! keyframe records live in the `keyframes` collection, speech transcripts
//! in `speech_captions`. three things make this store more than a lookup
//! table:
//!
//! - the order-preserving join for ranked key lists: materialization must
//!   return rows in exactly the fused-rank order the engine computed, which
//!   is done server-side with an `$indexOfArray` pipeline
//! - the full-text fallback chain: atlas `$search` when the deployment has
//!   it, then `$text` ordered by `$meta: "textScore"`, then a
//!   case-insensitive literal substring scan scored at a constant 1.0;
//!   the first strategy with a non-empty result wins
//! - evenly-spaced sampling of keyframes inside caption time ranges:
//!   `$bucketAuto` server-side, with client-side linspace sampling over the
//!   sorted list when the server rejects the aggregation

use std::collections::HashSet;

use futures::TryStreamExt;
use mongodb::bson::{doc, Bson, Document};
use mongodb::{Client, Collection, Database};

use crate::providers::{
    CaptionSegment, FrameRange, FtsSource, KeyframeQuery, KeyframeRow, MetadataStore, StoreError,
};
use crate::request::ObjFilter;

/// hard cap on one page of materialized rows
const MAX_PAGE_SIZE: u64 = 200;
/// segment responses are bounded regardless of the caller's limit
const MAX_SEGMENTS: u64 = 1000;
/// atlas search index name
const ATLAS_INDEX: &str = "default";

#[derive(Clone)]
pub struct MongoMetadataStore {
    keyframes: Collection<Document>,
    captions: Collection<Document>,
}

impl MongoMetadataStore {
    pub async fn connect(uri: &str, db_name: &str) -> Result<Self, StoreError> {
        let client = Client::with_uri_str(uri).await?;
        Ok(Self::new(&client.database(db_name)))
    }

    pub fn new(db: &Database) -> Self {
        Self {
            keyframes: db.collection("keyframes"),
            captions: db.collection("speech_captions"),
        }
    }

    /// collection and text field for a full-text source
    fn fts_collection(&self, source: FtsSource) -> (&Collection<Document>, &'static str) {
        match source {
            FtsSource::Asr => (&self.captions, "text"),
            FtsSource::Ocr => (&self.keyframes, "ocr"),
        }
    }

    /// client-side fallback for range sampling when `$bucketAuto` fails
    async fn sample_range_client_side(
        &self,
        query: Document,
        per_range_limit: usize,
    ) -> Result<Vec<Document>, StoreError> {
        let all: Vec<Document> = self
            .keyframes
            .find(query)
            .projection(doc! { "_id": 0, "key": 1, "keyframe_num": 1 })
            .sort(doc! { "keyframe_num": 1 })
            .await?
            .try_collect()
            .await?;
        Ok(sample_evenly(all, per_range_limit))
    }
}

/// pick `limit` elements at evenly spaced indices over an ordered list
pub(crate) fn sample_evenly<T>(items: Vec<T>, limit: usize) -> Vec<T> {
    if limit == 0 || items.len() <= limit {
        return items;
    }
    if limit == 1 {
        return items.into_iter().take(1).collect();
    }
    let last = items.len() - 1;
    let mut picked = vec![false; items.len()];
    for i in 0..limit {
        // linspace over 0..=last; exact .5 midpoints round to even, matching
        // the ingestion side's sampling of these ranges
        let ix = (i as f64 * last as f64 / (limit - 1) as f64).round_ties_even() as usize;
        picked[ix] = true;
    }
    items
        .into_iter()
        .zip(picked)
        .filter_map(|(item, keep)| keep.then_some(item))
        .collect()
}

fn bson_i64(doc: &Document, field: &str) -> Result<i64, StoreError> {
    match doc.get(field) {
        Some(Bson::Int64(v)) => Ok(*v),
        Some(Bson::Int32(v)) => Ok(i64::from(*v)),
        Some(Bson::Double(v)) => Ok(*v as i64),
        other => Err(StoreError::Malformed(format!(
            "field '{}' is not numeric: {:?}",
            field, other
        ))),
    }
}

fn bson_f64(doc: &Document, field: &str) -> f64 {
    match doc.get(field) {
        Some(Bson::Double(v)) => *v,
        Some(Bson::Int64(v)) => *v as f64,
        Some(Bson::Int32(v)) => f64::from(*v),
        _ => 0.0,
    }
}

fn row_from_doc(doc: &Document) -> Result<KeyframeRow, StoreError> {
    Ok(KeyframeRow {
        key: bson_i64(doc, "key")?,
        group_num: bson_i64(doc, "group_num")?,
        video_num: bson_i64(doc, "video_num")?,
        keyframe_num: bson_i64(doc, "keyframe_num")?,
    })
}

/// case-insensitive literal substring match on one text field
fn substring_query(field: &str, text: &str) -> Document {
    let mut pred = Document::new();
    pred.insert("$regex", regex::escape(text));
    pred.insert("$options", "i");
    let mut q = Document::new();
    q.insert(field, pred);
    q
}

fn ids_from_docs(docs: &[Document]) -> Vec<(i64, f64)> {
    docs.iter()
        .filter_map(|d| bson_i64(d, "key").ok().map(|k| (k, bson_f64(d, "score"))))
        .collect()
}

fn segment_from_doc(doc: &Document) -> Option<CaptionSegment> {
    Some(CaptionSegment {
        group_num: bson_i64(doc, "group_num").ok()?,
        video_num: bson_i64(doc, "video_num").ok()?,
        start: bson_f64(doc, "start"),
        end: bson_f64(doc, "end"),
        score: bson_f64(doc, "score"),
    })
}

/// the structural-scope `$match` document for a keyframe query
fn scope_match(query: &KeyframeQuery) -> Document {
    let mut q = Document::new();

    if let Some(kf_nums) = query.keyframe_nums.as_deref() {
        if !kf_nums.is_empty() {
            q.insert("keyframe_num", doc! { "$in": kf_nums.to_vec() });
        }
    }

    let groups = query.group_nums.as_deref().unwrap_or(&[]);
    let videos = query.video_nums.as_deref().unwrap_or(&[]);
    if !groups.is_empty() && !videos.is_empty() {
        // positional (group, video) pairs; a video of -1 widens to the group
        let pairs: Vec<Document> = groups
            .iter()
            .zip(videos)
            .map(|(g, v)| {
                if *v != -1 {
                    doc! { "group_num": *g, "video_num": *v }
                } else {
                    doc! { "group_num": *g }
                }
            })
            .collect();
        q.insert("$and", vec![doc! { "$or": pairs }]);
    } else if !groups.is_empty() {
        q.insert("group_num", doc! { "$in": groups.to_vec() });
    } else if !videos.is_empty() {
        q.insert("video_num", doc! { "$in": videos.to_vec() });
    }

    q
}

impl MetadataStore for MongoMetadataStore {
    async fn get_by_keys(&self, query: KeyframeQuery) -> Result<Vec<KeyframeRow>, StoreError> {
        let page = query.page.unwrap_or(1).max(1);
        let size = query.size.unwrap_or(50).clamp(1, MAX_PAGE_SIZE);
        let skip = page.saturating_sub(1).saturating_mul(size);

        let mut pipeline = vec![doc! { "$match": scope_match(&query) }];

        if let Some(keys) = &query.keys {
            // ranked materialization: keep the caller's key order exactly
            pipeline.push(doc! { "$match": { "key": { "$in": keys.clone() } } });
            pipeline.push(doc! {
                "$addFields": { "__order": { "$indexOfArray": [keys.clone(), "$key"] } }
            });
            pipeline.push(doc! { "$match": { "__order": { "$ne": -1 } } });
            pipeline.push(doc! { "$sort": { "__order": 1 } });
        } else {
            pipeline.push(doc! { "$sort": { "group_num": 1, "video_num": 1, "keyframe_num": 1 } });
        }

        pipeline.push(doc! { "$skip": skip as i64 });
        pipeline.push(doc! { "$limit": size as i64 });
        pipeline.push(doc! {
            "$project": { "_id": 0, "key": 1, "group_num": 1, "video_num": 1, "keyframe_num": 1 }
        });

        let docs: Vec<Document> = self
            .keyframes
            .aggregate(pipeline)
            .await?
            .try_collect()
            .await?;
        docs.iter().map(row_from_doc).collect()
    }

    async fn filter_by_objects(
        &self,
        ids: Vec<i64>,
        filters: &[ObjFilter],
    ) -> Result<Vec<i64>, StoreError> {
        if filters.is_empty() || ids.is_empty() {
            return Ok(ids);
        }

        let conds: Vec<Document> = filters
            .iter()
            .map(|f| {
                let mut count_pred = Document::new();
                count_pred.insert(f.cmp.mongo_op(), f.count);
                doc! {
                    "objects": {
                        "$elemMatch": { "name": f.name.as_str(), "count": count_pred }
                    }
                }
            })
            .collect();

        let q = doc! { "key": { "$in": ids.clone() }, "$and": conds };
        let docs: Vec<Document> = self
            .keyframes
            .find(q)
            .projection(doc! { "_id": 0, "key": 1 })
            .await?
            .try_collect()
            .await?;

        let keep: HashSet<i64> = docs.iter().filter_map(|d| bson_i64(d, "key").ok()).collect();
        Ok(ids.into_iter().filter(|id| keep.contains(id)).collect())
    }

    async fn fts_ids(
        &self,
        source: FtsSource,
        text: &str,
        limit: u64,
    ) -> Result<Vec<(i64, f64)>, StoreError> {
        let (col, field) = self.fts_collection(source);

        // 1) atlas search, when the deployment has it
        let pipeline = vec![
            doc! { "$search": { "index": ATLAS_INDEX, "text": { "path": field, "query": text } } },
            doc! { "$limit": limit as i64 },
            doc! { "$project": { "_id": 0, "key": 1, "score": { "$meta": "searchScore" } } },
        ];
        if let Ok(cursor) = col.aggregate(pipeline).await {
            if let Ok(docs) = cursor.try_collect::<Vec<Document>>().await {
                let hits = ids_from_docs(&docs);
                if !hits.is_empty() {
                    return Ok(hits);
                }
            }
        }

        // 2) `$text` with meta-score ordering
        let found = col
            .find(doc! { "$text": { "$search": text } })
            .projection(doc! { "_id": 0, "key": 1, "score": { "$meta": "textScore" } })
            .sort(doc! { "score": { "$meta": "textScore" } })
            .limit(limit as i64)
            .await;
        if let Ok(cursor) = found {
            if let Ok(docs) = cursor.try_collect::<Vec<Document>>().await {
                let hits = ids_from_docs(&docs);
                if !hits.is_empty() {
                    return Ok(hits);
                }
            }
        }

        // 3) literal substring scan, constant score
        let docs: Vec<Document> = col
            .find(substring_query(field, text))
            .projection(doc! { "_id": 0, "key": 1 })
            .limit(limit as i64)
            .await?
            .try_collect()
            .await?;
        Ok(docs
            .iter()
            .filter_map(|d| bson_i64(d, "key").ok())
            .map(|k| (k, 1.0))
            .collect())
    }

    async fn fts_segments(
        &self,
        source: FtsSource,
        text: &str,
        limit: u64,
    ) -> Result<Vec<CaptionSegment>, StoreError> {
        let (col, field) = self.fts_collection(source);
        let limit = limit.min(MAX_SEGMENTS);
        let segment_fields =
            doc! { "_id": 0, "group_num": 1, "video_num": 1, "start": 1, "end": 1 };

        // 1) atlas search
        let mut projection = segment_fields.clone();
        projection.insert("score", doc! { "$meta": "searchScore" });
        let pipeline = vec![
            doc! { "$search": { "index": ATLAS_INDEX, "text": { "path": field, "query": text } } },
            doc! { "$limit": limit as i64 },
            doc! { "$project": projection },
        ];
        if let Ok(cursor) = col.aggregate(pipeline).await {
            if let Ok(docs) = cursor.try_collect::<Vec<Document>>().await {
                let segments: Vec<CaptionSegment> =
                    docs.iter().filter_map(segment_from_doc).collect();
                if !segments.is_empty() {
                    return Ok(segments);
                }
            }
        }

        // 2) `$text` with meta-score ordering
        let mut projection = segment_fields.clone();
        projection.insert("score", doc! { "$meta": "textScore" });
        let found = col
            .find(doc! { "$text": { "$search": text } })
            .projection(projection)
            .sort(doc! { "score": { "$meta": "textScore" } })
            .limit(limit as i64)
            .await;
        if let Ok(cursor) = found {
            if let Ok(docs) = cursor.try_collect::<Vec<Document>>().await {
                let segments: Vec<CaptionSegment> =
                    docs.iter().filter_map(segment_from_doc).collect();
                if !segments.is_empty() {
                    return Ok(segments);
                }
            }
        }

        // 3) literal substring scan, constant score
        let docs: Vec<Document> = col
            .find(substring_query(field, text))
            .projection(segment_fields)
            .limit(limit as i64)
            .await?
            .try_collect()
            .await?;
        Ok(docs
            .iter()
            .filter_map(segment_from_doc)
            .map(|mut s| {
                s.score = 1.0;
                s
            })
            .collect())
    }

    async fn keys_in_time_ranges(
        &self,
        ranges: &[FrameRange],
        per_range_limit: usize,
    ) -> Result<Vec<i64>, StoreError> {
        let mut out: Vec<i64> = Vec::new();
        let mut seen: HashSet<i64> = HashSet::new();

        for range in ranges {
            let q = doc! {
                "group_num": range.group_num,
                "video_num": range.video_num,
                "keyframe_num": { "$gte": range.kf_start, "$lte": range.kf_end },
            };

            let n = self.keyframes.count_documents(q.clone()).await.unwrap_or(0);
            if n == 0 {
                continue;
            }
            let buckets = n.min(per_range_limit as u64).max(1) as i32;

            let pipeline = vec![
                doc! { "$match": q.clone() },
                doc! { "$sort": { "keyframe_num": 1 } },
                doc! { "$bucketAuto": {
                    "groupBy": "$keyframe_num",
                    "buckets": buckets,
                    "output": { "doc": { "$first": "$$ROOT" } },
                } },
                doc! { "$replaceRoot": { "newRoot": "$doc" } },
                doc! { "$project": { "_id": 0, "key": 1, "keyframe_num": 1 } },
                doc! { "$sort": { "keyframe_num": 1 } },
            ];

            let sampled: Vec<Document> = match self.keyframes.aggregate(pipeline).await {
                Ok(cursor) => match cursor.try_collect().await {
                    Ok(docs) => docs,
                    Err(_) => self.sample_range_client_side(q, per_range_limit).await?,
                },
                Err(_) => self.sample_range_client_side(q, per_range_limit).await?,
            };

            for doc in &sampled {
                if let Ok(key) = bson_i64(doc, "key") {
                    if seen.insert(key) {
                        out.push(key);
                    }
                }
            }
        }

        Ok(out)
    }

    fn name(&self) -> &'static str {
        "mongodb"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Cmp;

    #[test]
    fn test_sample_evenly_short_lists_pass_through() {
        assert_eq!(sample_evenly(vec![1, 2, 3], 10), vec![1, 2, 3]);
        assert_eq!(sample_evenly(Vec::<i64>::new(), 3), Vec::<i64>::new());
    }

    #[test]
    fn test_sample_evenly_spacing() {
        // midpoint index 4.5 rounds to even: 4, not 5
        let items: Vec<i64> = (0..10).collect();
        assert_eq!(sample_evenly(items, 3), vec![0, 4, 9]);

        let items: Vec<i64> = (0..10).collect();
        assert_eq!(sample_evenly(items, 5), vec![0, 2, 4, 7, 9]);
    }

    #[test]
    fn test_sample_evenly_single_pick() {
        let items: Vec<i64> = (0..10).collect();
        assert_eq!(sample_evenly(items, 1), vec![0]);
    }

    #[test]
    fn test_scope_match_positional_pairs() {
        let query = KeyframeQuery {
            group_nums: Some(vec![1, 2]),
            video_nums: Some(vec![3, -1]),
            ..Default::default()
        };
        let q = scope_match(&query);
        let ands = q.get_array("$and").unwrap();
        let or = ands[0].as_document().unwrap().get_array("$or").unwrap();
        assert_eq!(
            or[0].as_document().unwrap(),
            &doc! { "group_num": 1_i64, "video_num": 3_i64 }
        );
        // -1 widens to the whole group
        assert_eq!(or[1].as_document().unwrap(), &doc! { "group_num": 2_i64 });
    }

    #[test]
    fn test_scope_match_single_list_is_in_filter() {
        let query = KeyframeQuery {
            group_nums: Some(vec![4, 5]),
            ..Default::default()
        };
        let q = scope_match(&query);
        assert_eq!(q, doc! { "group_num": { "$in": [4_i64, 5_i64] } });
    }

    #[test]
    fn test_row_from_doc_accepts_int32_and_int64() {
        let doc = doc! { "key": 9_i64, "group_num": 1_i32, "video_num": 2_i32, "keyframe_num": 3_i64 };
        let row = row_from_doc(&doc).unwrap();
        assert_eq!(row.key, 9);
        assert_eq!(row.group_num, 1);
        assert_eq!(row.keyframe_num, 3);
    }

    #[test]
    fn test_substring_query_escapes_regex_metacharacters() {
        let q = substring_query("text", "what? (exit)");
        let pred = q.get_document("text").unwrap();
        assert_eq!(pred.get_str("$regex").unwrap(), r"what\? \(exit\)");
        assert_eq!(pred.get_str("$options").unwrap(), "i");
    }

    #[test]
    fn test_mongo_op_mapping() {
        assert_eq!(Cmp::Eq.mongo_op(), "$eq");
        assert_eq!(Cmp::Neq.mongo_op(), "$ne");
        assert_eq!(Cmp::Gte.mongo_op(), "$gte");
    }
}
