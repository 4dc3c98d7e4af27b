use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::{Value, json};
use tracing::debug;

use crate::config::IndexConfig;
use crate::error::{LexMatchError, Result, classify_http_error};
use crate::models::{
    IndexedDocument, SearchDocument, SearchFilter, SearchHit, SearchQuery, normalize_place,
};

use super::SearchIndex;

pub const PROFILE_VECTOR_NAME: &str = "profile";

const KEYWORD_FIELDS: [&str; 5] = [
    "profile_id",
    "area_tags",
    "languages",
    "city_norm",
    "country_norm",
];
const BOOL_FIELDS: [&str; 3] = ["verified", "active", "has_active_slot"];

/// Qdrant-backed index over the REST API.
///
/// Each profile is one point whose id is derived from the profile id, so
/// repeated writes overwrite instead of duplicating. Documents without an
/// embedding are stored without a vector; a vector query that comes back
/// short is topped up with them from a filtered scroll.
#[derive(Clone)]
pub struct QdrantSearchIndex {
    base_url: String,
    collection: String,
    dim: usize,
    http: Client,
}

impl std::fmt::Debug for QdrantSearchIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QdrantSearchIndex")
            .field("base_url", &self.base_url)
            .field("collection", &self.collection)
            .field("dim", &self.dim)
            .finish_non_exhaustive()
    }
}

impl QdrantSearchIndex {
    pub fn new(config: &IndexConfig, dim: usize) -> Result<Self> {
        let base_url = config
            .qdrant_url
            .as_deref()
            .ok_or_else(|| LexMatchError::Config("qdrant url is not configured".to_string()))?;

        let mut headers = HeaderMap::new();
        if let Some(key) = &config.qdrant_api_key {
            let value = HeaderValue::from_str(key)
                .map_err(|e| LexMatchError::Config(format!("invalid qdrant api key: {e}")))?;
            headers.insert("api-key", value);
        }
        let http = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            base_url: normalize_base_url(base_url),
            collection: config.collection.clone(),
            dim,
            http,
        })
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.base_url, self.collection)
    }

    fn send(&self, op: &str, request: RequestBuilder) -> Result<Response> {
        let response = request
            .send()
            .map_err(|err| classify_http_error(err, "qdrant"))?;
        if response.status().is_success() {
            return Ok(response);
        }
        Err(status_error(op, response.status()))
    }

    fn post_points(&self, op: &str, body: &Value, timeout: Option<Duration>) -> Result<Value> {
        let url = format!("{}/points/{op}", self.collection_url());
        let mut request = self.http.post(url).json(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout.max(Duration::from_millis(1)));
        }
        Ok(self.send(op, request)?.json::<Value>()?)
    }

    fn create_payload_indexes(&self) -> Result<()> {
        let url = format!("{}/index?wait=true", self.collection_url());
        let schemas = KEYWORD_FIELDS
            .iter()
            .map(|field| (*field, "keyword"))
            .chain(BOOL_FIELDS.iter().map(|field| (*field, "bool")))
            .chain([("hourly_rate", "float"), ("qualified_since", "integer")]);
        for (field, schema) in schemas {
            self.send(
                "create payload index",
                self.http
                    .put(&url)
                    .json(&json!({ "field_name": field, "field_schema": schema })),
            )?;
        }
        Ok(())
    }
}

impl SearchIndex for QdrantSearchIndex {
    fn backend(&self) -> &'static str {
        "qdrant"
    }

    fn ensure_ready(&self) -> Result<()> {
        let url = self.collection_url();
        let exists = self
            .http
            .get(&url)
            .send()
            .map_err(|err| classify_http_error(err, "qdrant"))?;
        if exists.status().is_success() {
            return Ok(());
        }
        if exists.status() != StatusCode::NOT_FOUND {
            return Err(status_error("collection check", exists.status()));
        }

        self.send(
            "collection create",
            self.http.put(&url).json(&collection_schema(self.dim)),
        )?;
        self.create_payload_indexes()?;
        debug!(collection = %self.collection, dim = self.dim, "created qdrant collection");
        Ok(())
    }

    fn index(&self, doc: &SearchDocument) -> Result<()> {
        self.bulk_index(std::slice::from_ref(doc))
    }

    fn delete(&self, id: &str) -> Result<()> {
        let url = format!("{}/points/delete?wait=true", self.collection_url());
        self.send(
            "delete",
            self.http
                .post(url)
                .json(&json!({ "points": [point_id_for_profile(id)] })),
        )?;
        Ok(())
    }

    fn bulk_index(&self, docs: &[SearchDocument]) -> Result<()> {
        if docs.is_empty() {
            return Ok(());
        }
        let points = docs
            .iter()
            .map(|doc| point_for_document(doc, self.dim))
            .collect::<Result<Vec<_>>>()?;
        let url = format!("{}/points?wait=true", self.collection_url());
        self.send(
            "upsert",
            self.http.put(url).json(&json!({ "points": points })),
        )?;
        Ok(())
    }

    fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        if query.limit == 0 {
            return Ok(Vec::new());
        }
        let Some(vector) = &query.vector else {
            let body = build_scroll_points_request(query.limit, &query.filter);
            let value = self.post_points("scroll", &body, query.timeout)?;
            return parse_points_response(&value, false);
        };

        let body = build_search_points_request(vector, query.limit, &query.filter);
        let value = self.post_points("search", &body, query.timeout)?;
        let mut hits = parse_points_response(&value, true)?;
        if hits.len() < query.limit {
            let body =
                build_shortfall_scroll_request(query.limit - hits.len(), &query.filter, &hits);
            let value = self.post_points("scroll", &body, query.timeout)?;
            let filler = parse_points_response(&value, false)?;
            debug!(scored = hits.len(), filler = filler.len(), "vector search topped up");
            hits.extend(filler);
        }
        Ok(hits)
    }

    fn count(&self, filter: &SearchFilter) -> Result<u64> {
        let url = format!("{}/points/count", self.collection_url());
        let mut body = json!({ "exact": true });
        if let Some(filter) = search_filter_to_qdrant_filter(filter) {
            body["filter"] = filter;
        }
        let value = self
            .send("count", self.http.post(url).json(&body))?
            .json::<Value>()?;
        value
            .pointer("/result/count")
            .and_then(Value::as_u64)
            .ok_or_else(|| LexMatchError::Internal("invalid qdrant count response".to_string()))
    }

    fn get(&self, id: &str) -> Result<Option<IndexedDocument>> {
        let url = format!("{}/points/{}", self.collection_url(), point_id_for_profile(id));
        let response = self
            .http
            .get(url)
            .send()
            .map_err(|err| classify_http_error(err, "qdrant"))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(status_error("get", response.status()));
        }
        let value = response.json::<Value>()?;
        let Some(payload) = value.pointer("/result/payload") else {
            return Ok(None);
        };
        indexed_document_from_payload(payload).map(Some)
    }
}

pub(crate) fn point_id_for_profile(profile_id: &str) -> u64 {
    let hash = blake3::hash(profile_id.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_be_bytes(bytes)
}

pub(crate) fn collection_schema(dim: usize) -> Value {
    json!({
        "vectors": {
            PROFILE_VECTOR_NAME: {
                "size": dim,
                "distance": "Cosine"
            }
        }
    })
}

/// The full document is kept under `doc` for reads; the flat fields mirror
/// the filterable attributes in normalized form.
pub(crate) fn payload_for_document(doc: &SearchDocument) -> Result<Value> {
    let mut stored = doc.clone();
    stored.embedding = None;
    let area_tags = doc.area_tags().collect::<std::collections::BTreeSet<_>>();
    Ok(json!({
        "profile_id": doc.id,
        "fingerprint": doc.fingerprint(),
        "doc": serde_json::to_value(&stored)?,
        "area_tags": area_tags,
        "languages": doc.languages,
        "city_norm": doc.location.city.as_deref().map(normalize_place),
        "country_norm": doc.location.country.as_deref().map(normalize_place),
        "verified": doc.verified,
        "active": doc.active,
        "has_active_slot": doc.availability.has_active_slot(),
        "hourly_rate": doc.hourly_rate,
        "qualified_since": doc.qualified_since,
    }))
}

pub(crate) fn point_for_document(doc: &SearchDocument, dim: usize) -> Result<Value> {
    let vector = match doc.embedding.as_ref().filter(|vector| vector.len() == dim) {
        Some(vector) => json!({ PROFILE_VECTOR_NAME: vector }),
        None => json!({}),
    };
    Ok(json!({
        "id": point_id_for_profile(&doc.id),
        "vector": vector,
        "payload": payload_for_document(doc)?,
    }))
}

pub(crate) fn build_search_points_request(
    vector: &[f32],
    limit: usize,
    filter: &SearchFilter,
) -> Value {
    let mut body = json!({
        "vector": { "name": PROFILE_VECTOR_NAME, "vector": vector },
        "limit": limit.max(1),
        "with_payload": true,
    });
    if let Some(value) = search_filter_to_qdrant_filter(filter) {
        body["filter"] = value;
    }
    body
}

pub(crate) fn build_scroll_points_request(limit: usize, filter: &SearchFilter) -> Value {
    let mut body = json!({
        "limit": limit.max(1),
        "with_payload": true,
        "with_vector": false,
    });
    if let Some(value) = search_filter_to_qdrant_filter(filter) {
        body["filter"] = value;
    }
    body
}

/// Scroll for the documents a short vector search left out: same filter,
/// minus every point already returned.
pub(crate) fn build_shortfall_scroll_request(
    limit: usize,
    filter: &SearchFilter,
    returned: &[SearchHit],
) -> Value {
    let mut body = build_scroll_points_request(limit, filter);
    if returned.is_empty() {
        return body;
    }
    let ids = returned
        .iter()
        .map(|hit| point_id_for_profile(&hit.doc.id))
        .collect::<Vec<_>>();
    let exclude = json!([{ "has_id": ids }]);
    match body.get_mut("filter") {
        Some(filter) => filter["must_not"] = exclude,
        None => body["filter"] = json!({ "must_not": exclude }),
    }
    body
}

pub(crate) fn search_filter_to_qdrant_filter(filter: &SearchFilter) -> Option<Value> {
    let mut must = Vec::<Value>::new();

    let areas = filter.area_tags();
    if !areas.is_empty() {
        must.push(json!({ "key": "area_tags", "match": { "any": areas } }));
    }
    if let Some(language) = filter.normalized_language() {
        must.push(json!({ "key": "languages", "match": { "value": language } }));
    }
    if let Some(city) = &filter.city {
        must.push(json!({ "key": "city_norm", "match": { "value": normalize_place(city) } }));
    }
    if let Some(country) = &filter.country {
        must.push(json!({ "key": "country_norm", "match": { "value": normalize_place(country) } }));
    }
    if let Some(verified) = filter.verified {
        must.push(json!({ "key": "verified", "match": { "value": verified } }));
    }
    if let Some(active) = filter.active {
        must.push(json!({ "key": "active", "match": { "value": active } }));
    }
    if filter.require_available {
        must.push(json!({ "key": "has_active_slot", "match": { "value": true } }));
    }
    if filter.min_hourly_rate.is_some() || filter.max_hourly_rate.is_some() {
        let mut range = serde_json::Map::new();
        if let Some(min) = filter.min_hourly_rate {
            range.insert("gte".to_string(), json!(min));
        }
        if let Some(max) = filter.max_hourly_rate {
            range.insert("lte".to_string(), json!(max));
        }
        must.push(json!({ "key": "hourly_rate", "range": range }));
    }
    if let Some(year) = filter.qualified_no_later_than {
        must.push(json!({ "key": "qualified_since", "range": { "lte": year } }));
    }

    if must.is_empty() {
        return None;
    }
    Some(json!({ "must": must }))
}

/// Parses `points/search` (`result` is an array) and `points/scroll`
/// (`result.points`) responses into hits in the trait's ordering.
pub(crate) fn parse_points_response(response: &Value, scored: bool) -> Result<Vec<SearchHit>> {
    let points = response
        .get("result")
        .and_then(|result| result.as_array().or_else(|| result.get("points")?.as_array()))
        .ok_or_else(|| LexMatchError::Internal("invalid qdrant search response".to_string()))?;

    let mut hits = Vec::<SearchHit>::new();
    for point in points {
        let Some(payload) = point.get("payload") else {
            continue;
        };
        let Some(doc) = payload.get("doc") else {
            continue;
        };
        let doc = serde_json::from_value::<SearchDocument>(doc.clone())?;
        let similarity = scored
            .then(|| point.get("score").and_then(Value::as_f64))
            .flatten()
            .map(|score| score as f32);
        hits.push(SearchHit { doc, similarity });
    }

    hits.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.doc.id.cmp(&b.doc.id))
    });
    Ok(hits)
}

pub(crate) fn indexed_document_from_payload(payload: &Value) -> Result<IndexedDocument> {
    let doc = payload
        .get("doc")
        .cloned()
        .ok_or_else(|| LexMatchError::Internal("qdrant point has no document".to_string()))?;
    let doc = serde_json::from_value::<SearchDocument>(doc)?;
    let fingerprint = payload
        .get("fingerprint")
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .unwrap_or_default();
    Ok(IndexedDocument { doc, fingerprint })
}

/// 5xx and 429 are worth retrying; other statuses mean the request itself is wrong.
fn status_error(op: &str, status: StatusCode) -> LexMatchError {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        LexMatchError::IndexUnavailable(format!("qdrant {op} failed with status {status}"))
    } else {
        LexMatchError::Internal(format!("qdrant {op} failed with status {status}"))
    }
}

fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}
