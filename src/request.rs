//! request types for the keyframe api
//!
//! the same search shape arrives two ways: as a JSON body on
//! `POST /keyframe/search` and as query parameters on `GET /keyframe/`.
//! two encodings are dynamic at that boundary:
//!
//! - `obj_filters` is either a structured array of `{name, cmp, count}` or
//!   the compact string form `"person:gte:2,car:eq:1"`
//! - `exclude_ids` / `group_nums` / `video_nums` are either int arrays or a
//!   comma-separated (or JSON-array) string
//!
//! everything is normalized here into [`UnifiedSearch`], so the engine only
//! ever sees one representation. all validation failures surface as
//! `BadRequest` before any backend I/O.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::SearchError;

/// longest accepted free-text query
const MAX_QUERY_LEN: usize = 1000;
/// generous but finite page bound; keeps `page·size·oversample` far away
/// from u64 overflow
const MAX_PAGE: u64 = 100_000;
const MAX_OVERSAMPLE: u64 = 1000;
/// widest accepted neighbor window half-width
const MAX_NEIGHBOR_SPAN: u64 = 500;

/// comparison operator of an object-count predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cmp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Cmp {
    /// the mongodb comparison operator for this predicate
    pub fn mongo_op(self) -> &'static str {
        match self {
            Cmp::Eq => "$eq",
            Cmp::Neq => "$ne",
            Cmp::Gt => "$gt",
            Cmp::Gte => "$gte",
            Cmp::Lt => "$lt",
            Cmp::Lte => "$lte",
        }
    }
}

impl FromStr for Cmp {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "eq" => Ok(Cmp::Eq),
            "neq" => Ok(Cmp::Neq),
            "gt" => Ok(Cmp::Gt),
            "gte" => Ok(Cmp::Gte),
            "lt" => Ok(Cmp::Lt),
            "lte" => Ok(Cmp::Lte),
            other => Err(SearchError::BadRequest(format!(
                "unknown comparison operator '{}'",
                other
            ))),
        }
    }
}

/// one object-count predicate; a keyframe passes when at least one of its
/// detected objects matches `name` with a count satisfying `cmp count`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjFilter {
    pub name: String,
    pub cmp: Cmp,
    pub count: i64,
}

/// `obj_filters` as it arrives on the wire
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ObjFiltersParam {
    Structured(Vec<ObjFilter>),
    Compact(String),
}

/// an int-list parameter as it arrives on the wire
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum IdListParam {
    List(Vec<i64>),
    Text(String),
}

fn parse_obj_filter_token(token: &str) -> Result<ObjFilter, SearchError> {
    let mut parts = token.splitn(3, ':');
    let (name, cmp, count) = match (parts.next(), parts.next(), parts.next()) {
        (Some(name), Some(cmp), Some(count)) if !name.trim().is_empty() => (name, cmp, count),
        _ => {
            return Err(SearchError::BadRequest(format!(
                "invalid object filter '{}', expected name:cmp:count",
                token
            )))
        }
    };
    let count: i64 = count.trim().parse().map_err(|_| {
        SearchError::BadRequest(format!("invalid object count '{}' in '{}'", count, token))
    })?;
    Ok(ObjFilter {
        name: name.trim().to_string(),
        cmp: cmp.trim().parse()?,
        count,
    })
}

/// parse the compact `"name:cmp:count,..."` form; a leading `[` switches to
/// JSON so shareable links can also carry the structured array
pub fn parse_obj_filters(raw: &str) -> Result<Vec<ObjFilter>, SearchError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    if raw.starts_with('[') {
        return serde_json::from_str(raw).map_err(|e| {
            SearchError::BadRequest(format!("invalid obj_filters array: {}", e))
        });
    }
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(parse_obj_filter_token)
        .collect()
}

fn parse_id_list(raw: &str) -> Result<Vec<i64>, SearchError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    if raw.starts_with('[') {
        return serde_json::from_str(raw)
            .map_err(|e| SearchError::BadRequest(format!("invalid id list: {}", e)));
    }
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| {
            t.parse()
                .map_err(|_| SearchError::BadRequest(format!("invalid id '{}'", t)))
        })
        .collect()
}

fn normalize_obj_filters(param: Option<ObjFiltersParam>) -> Result<Vec<ObjFilter>, SearchError> {
    match param {
        None => Ok(Vec::new()),
        Some(ObjFiltersParam::Structured(filters)) => Ok(filters),
        Some(ObjFiltersParam::Compact(raw)) => parse_obj_filters(&raw),
    }
}

fn normalize_id_list(param: Option<IdListParam>) -> Result<Vec<i64>, SearchError> {
    match param {
        None => Ok(Vec::new()),
        Some(IdListParam::List(ids)) => Ok(ids),
        Some(IdListParam::Text(raw)) => parse_id_list(&raw),
    }
}

/// treat empty / whitespace-only text inputs as absent
fn normalize_text(text: Option<String>) -> Option<String> {
    text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
}

fn default_page() -> u64 {
    1
}

fn default_size() -> u64 {
    100
}

fn default_oversample() -> u64 {
    10
}

fn default_w_vec() -> f64 {
    1.0
}

fn default_w_asr() -> f64 {
    1.0
}

fn default_w_ocr() -> f64 {
    0.5
}

/// unified search input as deserialized from either transport
#[derive(Debug, Clone, Deserialize)]
pub struct UnifiedSearchRequest {
    /// free-text query for the dense vector channel
    #[serde(default)]
    pub query: Option<String>,
    /// full-text query over speech captions
    #[serde(default)]
    pub asr: Option<String>,
    /// full-text query over on-screen text
    #[serde(default)]
    pub ocr: Option<String>,
    #[serde(default)]
    pub obj_filters: Option<ObjFiltersParam>,
    /// vector-channel exclusion only; FTS channels may still surface these ids
    #[serde(default)]
    pub exclude_ids: Option<IdListParam>,
    #[serde(default)]
    pub group_nums: Option<IdListParam>,
    #[serde(default)]
    pub video_nums: Option<IdListParam>,
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_size")]
    pub size: u64,
    /// candidate multiplier for the vector channel
    #[serde(default = "default_oversample")]
    pub oversample: u64,
    #[serde(default = "default_w_vec")]
    pub w_vec: f64,
    #[serde(default = "default_w_asr")]
    pub w_asr: f64,
    #[serde(default = "default_w_ocr")]
    pub w_ocr: f64,
}

/// fully validated, normalized search input; what the engine consumes
#[derive(Debug, Clone)]
pub struct UnifiedSearch {
    pub query: Option<String>,
    pub asr: Option<String>,
    pub ocr: Option<String>,
    pub obj_filters: Vec<ObjFilter>,
    pub exclude_ids: Vec<i64>,
    pub group_nums: Vec<i64>,
    pub video_nums: Vec<i64>,
    pub page: u64,
    pub size: u64,
    pub oversample: u64,
    pub w_vec: f64,
    pub w_asr: f64,
    pub w_ocr: f64,
}

fn check_weight(name: &str, value: f64) -> Result<(), SearchError> {
    if !value.is_finite() || value < 0.0 {
        return Err(SearchError::BadRequest(format!(
            "{} must be a non-negative number",
            name
        )));
    }
    Ok(())
}

impl UnifiedSearchRequest {
    pub fn normalize(self) -> Result<UnifiedSearch, SearchError> {
        if !(1..=MAX_PAGE).contains(&self.page) {
            return Err(SearchError::BadRequest(format!(
                "page must be in [1, {}]",
                MAX_PAGE
            )));
        }
        if !(1..=500).contains(&self.size) {
            return Err(SearchError::BadRequest("size must be in [1, 500]".into()));
        }
        if !(1..=MAX_OVERSAMPLE).contains(&self.oversample) {
            return Err(SearchError::BadRequest(format!(
                "oversample must be in [1, {}]",
                MAX_OVERSAMPLE
            )));
        }
        check_weight("w_vec", self.w_vec)?;
        check_weight("w_asr", self.w_asr)?;
        check_weight("w_ocr", self.w_ocr)?;

        let query = normalize_text(self.query);
        if let Some(q) = &query {
            if q.chars().count() > MAX_QUERY_LEN {
                return Err(SearchError::BadRequest(format!(
                    "query exceeds {} characters",
                    MAX_QUERY_LEN
                )));
            }
        }

        Ok(UnifiedSearch {
            query,
            asr: normalize_text(self.asr),
            ocr: normalize_text(self.ocr),
            obj_filters: normalize_obj_filters(self.obj_filters)?,
            exclude_ids: normalize_id_list(self.exclude_ids)?,
            group_nums: normalize_id_list(self.group_nums)?,
            video_nums: normalize_id_list(self.video_nums)?,
            page: self.page,
            size: self.size,
            oversample: self.oversample,
            w_vec: self.w_vec,
            w_asr: self.w_asr,
            w_ocr: self.w_ocr,
        })
    }
}

/// `GET /keyframe/imgsearch` parameters
#[derive(Debug, Clone, Deserialize)]
pub struct ImageSearchRequest {
    pub imgid: i64,
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_size")]
    pub size: u64,
}

impl ImageSearchRequest {
    pub fn validate(&self) -> Result<(), SearchError> {
        if !(1..=MAX_PAGE).contains(&self.page) {
            return Err(SearchError::BadRequest(format!(
                "page must be in [1, {}]",
                MAX_PAGE
            )));
        }
        if !(1..=500).contains(&self.size) {
            return Err(SearchError::BadRequest("size must be in [1, 500]".into()));
        }
        Ok(())
    }
}

fn default_k() -> u64 {
    10
}

/// `GET /keyframe/neighbors` parameters
#[derive(Debug, Clone, Deserialize)]
pub struct NeighborsRequest {
    pub imgid: i64,
    /// window half-width: keys `imgid-k ..= imgid+k` are considered
    #[serde(default = "default_k")]
    pub k: u64,
}

impl NeighborsRequest {
    pub fn validate(&self) -> Result<(), SearchError> {
        if self.k > MAX_NEIGHBOR_SPAN {
            return Err(SearchError::BadRequest(format!(
                "k must be at most {}",
                MAX_NEIGHBOR_SPAN
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_request() -> UnifiedSearchRequest {
        serde_json::from_str("{}").unwrap()
    }

    #[test]
    fn test_defaults() {
        let req = base_request().normalize().unwrap();
        assert_eq!(req.page, 1);
        assert_eq!(req.size, 100);
        assert_eq!(req.oversample, 10);
        assert_eq!(req.w_vec, 1.0);
        assert_eq!(req.w_asr, 1.0);
        assert_eq!(req.w_ocr, 0.5);
        assert!(req.query.is_none());
        assert!(req.obj_filters.is_empty());
        assert!(req.exclude_ids.is_empty());
    }

    #[test]
    fn test_compact_obj_filters() {
        let filters = parse_obj_filters("person:gte:2, car:eq:1").unwrap();
        assert_eq!(
            filters,
            vec![
                ObjFilter {
                    name: "person".into(),
                    cmp: Cmp::Gte,
                    count: 2
                },
                ObjFilter {
                    name: "car".into(),
                    cmp: Cmp::Eq,
                    count: 1
                },
            ]
        );
    }

    #[test]
    fn test_structured_obj_filters_from_json_body() {
        let req: UnifiedSearchRequest =
            serde_json::from_str(r#"{"obj_filters": [{"name": "dog", "cmp": "lt", "count": 3}]}"#)
                .unwrap();
        let req = req.normalize().unwrap();
        assert_eq!(req.obj_filters[0].name, "dog");
        assert_eq!(req.obj_filters[0].cmp, Cmp::Lt);
    }

    #[test]
    fn test_obj_filters_string_form_in_json_body() {
        let req: UnifiedSearchRequest =
            serde_json::from_str(r#"{"obj_filters": "person:gt:0"}"#).unwrap();
        let req = req.normalize().unwrap();
        assert_eq!(req.obj_filters.len(), 1);
        assert_eq!(req.obj_filters[0].cmp, Cmp::Gt);
    }

    #[test]
    fn test_malformed_obj_filter_is_bad_request() {
        assert!(matches!(
            parse_obj_filters("person:gte"),
            Err(SearchError::BadRequest(_))
        ));
        assert!(matches!(
            parse_obj_filters("person:between:2"),
            Err(SearchError::BadRequest(_))
        ));
        assert!(matches!(
            parse_obj_filters("person:gte:two"),
            Err(SearchError::BadRequest(_))
        ));
    }

    #[test]
    fn test_id_list_accepts_csv_and_json() {
        assert_eq!(parse_id_list("1, 2,3").unwrap(), vec![1, 2, 3]);
        assert_eq!(parse_id_list("[4, 5]").unwrap(), vec![4, 5]);
        assert!(parse_id_list("").unwrap().is_empty());
        assert!(matches!(
            parse_id_list("1,x"),
            Err(SearchError::BadRequest(_))
        ));
    }

    #[test]
    fn test_page_and_size_bounds() {
        let mut req = base_request();
        req.page = 0;
        assert!(req.normalize().is_err());

        let mut req = base_request();
        req.page = u64::MAX;
        assert!(req.normalize().is_err());

        let mut req = base_request();
        req.size = 0;
        assert!(req.normalize().is_err());

        let mut req = base_request();
        req.size = 501;
        assert!(req.normalize().is_err());
    }

    #[test]
    fn test_oversample_bounds() {
        let mut req = base_request();
        req.oversample = 0;
        assert!(req.normalize().is_err());

        let mut req = base_request();
        req.oversample = u64::MAX;
        assert!(req.normalize().is_err());
    }

    #[test]
    fn test_neighbor_span_bound() {
        let req = NeighborsRequest { imgid: 10, k: 501 };
        assert!(req.validate().is_err());
        let req = NeighborsRequest { imgid: 10, k: 10 };
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_negative_weight_is_rejected() {
        let mut req = base_request();
        req.w_ocr = -0.1;
        assert!(req.normalize().is_err());
    }

    #[test]
    fn test_blank_query_is_treated_as_absent() {
        let mut req = base_request();
        req.query = Some("   ".into());
        assert!(req.normalize().unwrap().query.is_none());
    }

    #[test]
    fn test_overlong_query_is_rejected() {
        let mut req = base_request();
        req.query = Some("x".repeat(1001));
        assert!(req.normalize().is_err());
    }
}
