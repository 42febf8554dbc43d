//! Qdrant hybrid-query client.
//!
//! One request per query: two prefetches (dense and BM25 sparse, both with
//! server-side inference from the query text) fused by reciprocal rank
//! fusion. Metadata predicates become `must` conditions on the payload.

use async_trait::async_trait;
use pubrag_core::config::{FilterFields, SearchConfig};
use pubrag_core::error::{PubragError, Result};
use pubrag_core::traits::search::{
    Collection, IndexRecord, SearchFilter, SearchHit, SearchRequest, VectorSearch,
};
use serde_json::{Value, json};

const CLIENT_TIMEOUT_SECS: u64 = 60;

pub struct QdrantSearch {
    base_url: String,
    api_key: String,
    abstract_collection: String,
    body_collection: String,
    dense_vector: String,
    dense_model: String,
    sparse_vector: String,
    sparse_model: String,
    fields: FilterFields,
    client: reqwest::Client,
}

impl QdrantSearch {
    /// API key: `search.api_key` > `QDRANT_API_KEY` > none.
    pub fn new(config: &SearchConfig) -> Result<Self> {
        let api_key = if !config.api_key.is_empty() {
            config.api_key.clone()
        } else {
            std::env::var("QDRANT_API_KEY").unwrap_or_default()
        };
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(CLIENT_TIMEOUT_SECS))
            .build()
            .map_err(|e| PubragError::Http(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key,
            abstract_collection: config.abstract_collection.clone(),
            body_collection: config.body_collection.clone(),
            dense_vector: config.dense_vector.clone(),
            dense_model: config.dense_model.clone(),
            sparse_vector: config.sparse_vector.clone(),
            sparse_model: config.sparse_model.clone(),
            fields: config.fields.clone(),
            client,
        })
    }

    fn collection_name(&self, collection: Collection) -> &str {
        match collection {
            Collection::Abstracts => &self.abstract_collection,
            Collection::Bodies => &self.body_collection,
        }
    }

    fn apply_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.is_empty() {
            req
        } else {
            req.header("api-key", &self.api_key)
        }
    }

    /// Payload filter, or `None` when the predicate is empty.
    fn filter_json(&self, filter: &SearchFilter) -> Option<Value> {
        let mut must: Vec<Value> = Vec::new();

        if !filter.doc_ids.is_empty() {
            must.push(json!({ "key": self.fields.doc_id, "match": { "any": filter.doc_ids } }));
        }
        if let Some(range) = &filter.year_range {
            let mut bounds = serde_json::Map::new();
            if let Some(from) = range.from {
                bounds.insert("gte".into(), json!(from));
            }
            if let Some(to) = range.to {
                bounds.insert("lte".into(), json!(to));
            }
            if !bounds.is_empty() {
                must.push(json!({ "key": self.fields.year, "range": bounds }));
            }
        }
        if let Some(author) = &filter.first_author {
            must.push(json!({ "key": self.fields.first_author, "match": { "value": author } }));
        }
        if !filter.publication_types.is_empty() {
            must.push(json!({
                "key": self.fields.publication_type,
                "match": { "any": filter.publication_types }
            }));
        }
        if let Some(journal) = &filter.journal {
            must.push(json!({ "key": self.fields.journal, "match": { "value": journal } }));
        }
        if !filter.controlled_terms.is_empty() {
            must.push(json!({
                "key": self.fields.controlled_terms,
                "match": { "any": filter.controlled_terms }
            }));
        }
        for (key, flag) in [(&self.fields.is_human, filter.is_human), (&self.fields.is_animal, filter.is_animal)] {
            if let Some(flag) = flag {
                must.push(json!({ "key": key, "match": { "value": flag } }));
            }
        }

        if must.is_empty() {
            None
        } else {
            Some(json!({ "must": must }))
        }
    }

    fn query_body(&self, request: &SearchRequest) -> Value {
        let filter = self.filter_json(&request.filter);
        let prefetch = |vector: &str, model: &str| {
            let mut p = json!({
                "query": { "text": request.text, "model": model },
                "using": vector,
                "limit": request.limit,
            });
            if let Some(f) = &filter {
                p["filter"] = f.clone();
            }
            p
        };

        let mut body = json!({
            "prefetch": [
                prefetch(&self.dense_vector, &self.dense_model),
                prefetch(&self.sparse_vector, &self.sparse_model),
            ],
            "query": { "fusion": "rrf" },
            "limit": request.limit,
            "with_payload": true,
        });
        if let Some(f) = filter {
            body["filter"] = f;
        }
        body
    }
}

/// Service status → error class. A rejected request (bad filter, unknown
/// payload index) is a validation error and is not retried.
fn status_error(collection: &str, status: reqwest::StatusCode, text: &str) -> PubragError {
    match status.as_u16() {
        429 => PubragError::RateLimited(format!("qdrant {collection}: {text}")),
        400 | 422 => PubragError::Validation(format!("qdrant {collection} rejected query: {text}")),
        s if s >= 500 => PubragError::Http(format!("qdrant {collection} error {status}: {text}")),
        _ => PubragError::Search(format!("qdrant {collection} error {status}: {text}")),
    }
}

/// Read `result.points[]` (or a bare `result[]`) into hits. Points whose
/// payload has no document id are skipped.
fn parse_points(json: &Value) -> Vec<SearchHit> {
    let points = json["result"]["points"]
        .as_array()
        .or_else(|| json["result"].as_array());
    let Some(points) = points else {
        return Vec::new();
    };

    points
        .iter()
        .filter_map(|p| {
            let record = IndexRecord::from_payload(&p["payload"])?;
            let id = match &p["id"] {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                _ => record.doc_id.clone(),
            };
            Some(SearchHit {
                id,
                score: p["score"].as_f64().unwrap_or(0.0) as f32,
                record,
            })
        })
        .collect()
}

#[async_trait]
impl VectorSearch for QdrantSearch {
    fn name(&self) -> &str {
        "qdrant"
    }

    async fn query(&self, collection: Collection, request: &SearchRequest) -> Result<Vec<SearchHit>> {
        let name = self.collection_name(collection);
        let url = format!("{}/collections/{}/points/query", self.base_url, name);
        let body = self.query_body(request);

        let req = self.client.post(&url).json(&body);
        let resp = self.apply_auth(req).send().await.map_err(|e| {
            if e.is_timeout() {
                PubragError::Timeout {
                    operation: format!("qdrant {name} query"),
                    after_ms: CLIENT_TIMEOUT_SECS * 1000,
                }
            } else {
                PubragError::Http(format!("qdrant connection failed ({url}): {e}"))
            }
        })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(status_error(name, status, &text));
        }

        let json: Value = resp
            .json()
            .await
            .map_err(|e| PubragError::Search(format!("qdrant {name}: bad response: {e}")))?;
        let hits = parse_points(&json);
        tracing::debug!("qdrant {name}: {} hits for limit {}", hits.len(), request.limit);
        Ok(hits)
    }

    async fn health_check(&self) -> Result<bool> {
        for name in [&self.abstract_collection, &self.body_collection] {
            let url = format!("{}/collections/{}", self.base_url, name);
            match self.apply_auth(self.client.get(&url)).send().await {
                Ok(r) if r.status().is_success() => {}
                Ok(r) => {
                    tracing::warn!("⚠️ qdrant collection {name}: {}", r.status());
                    return Ok(false);
                }
                Err(e) => {
                    tracing::warn!("⚠️ qdrant unreachable: {e}");
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pubrag_core::types::YearRange;

    fn client() -> QdrantSearch {
        QdrantSearch::new(&SearchConfig::default()).unwrap()
    }

    #[test]
    fn test_empty_filter_is_omitted() {
        let q = client();
        let req = SearchRequest { text: "epistaxis".into(), filter: SearchFilter::default(), limit: 100 };
        let body = q.query_body(&req);
        assert!(body.get("filter").is_none());
        assert_eq!(body["query"]["fusion"], "rrf");
        assert_eq!(body["prefetch"].as_array().map(Vec::len), Some(2));
        assert_eq!(body["prefetch"][0]["using"], "dense");
        assert_eq!(body["prefetch"][1]["using"], "bm25");
        assert_eq!(body["prefetch"][1]["query"]["model"], "qdrant/bm25");
        assert_eq!(body["with_payload"], true);
    }

    #[test]
    fn test_filter_conditions() {
        let q = client();
        let filter = SearchFilter {
            doc_ids: vec!["P1".into(), "P2".into()],
            year_range: Some(YearRange { from: Some(2018), to: None }),
            first_author: Some("Shovlin".into()),
            publication_types: vec!["Review".into()],
            ..Default::default()
        };
        let f = q.filter_json(&filter).unwrap();
        let must = f["must"].as_array().unwrap();
        assert_eq!(must.len(), 4);
        assert_eq!(must[0]["key"], "doc_id");
        assert_eq!(must[0]["match"]["any"], json!(["P1", "P2"]));
        assert_eq!(must[1]["range"], json!({ "gte": 2018 }));
        assert!(must[1]["range"].get("lte").is_none());
        assert_eq!(must[2]["match"]["value"], "Shovlin");

        let req = SearchRequest { text: "x".into(), filter, limit: 40 };
        let body = q.query_body(&req);
        assert_eq!(body["prefetch"][0]["filter"], body["filter"]);
    }

    #[test]
    fn test_population_journal_and_term_conditions() {
        let q = client();
        let filter = SearchFilter {
            journal: Some("Blood".into()),
            controlled_terms: vec!["Bevacizumab".into()],
            is_human: Some(true),
            is_animal: Some(false),
            ..Default::default()
        };
        let f = q.filter_json(&filter).unwrap();
        assert_eq!(
            f["must"],
            json!([
                { "key": "journal", "match": { "value": "Blood" } },
                { "key": "controlled_vocabulary_terms", "match": { "any": ["Bevacizumab"] } },
                { "key": "is_human", "match": { "value": true } },
                { "key": "is_animal", "match": { "value": false } }
            ])
        );
    }

    #[test]
    fn test_parse_points() {
        let json = json!({
            "result": { "points": [
                { "id": 7, "score": 0.8, "payload": { "doc_id": "P1", "text": "a", "year": 2020 } },
                { "id": "uuid-1", "score": 0.5, "payload": { "metadata": { "pmid": "P2" }, "page_content": "b" } },
                { "id": 9, "score": 0.4, "payload": { "text": "no id" } }
            ]},
            "status": "ok"
        });
        let hits = parse_points(&json);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "7");
        assert_eq!(hits[0].record.meta.year, Some(2020));
        assert_eq!(hits[1].record.doc_id, "P2");
        assert!(parse_points(&json!({ "status": "error" })).is_empty());
    }

    #[test]
    fn test_status_classification() {
        let e = status_error("abstract_index", reqwest::StatusCode::BAD_REQUEST, "bad filter");
        assert!(matches!(e, PubragError::Validation(_)));
        assert!(!e.is_transient());
        assert!(status_error("x", reqwest::StatusCode::SERVICE_UNAVAILABLE, "").is_transient());
        assert!(status_error("x", reqwest::StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(matches!(
            status_error("x", reqwest::StatusCode::NOT_FOUND, ""),
            PubragError::Search(_)
        ));
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let config = SearchConfig { url: "http://127.0.0.1:9".into(), ..Default::default() };
        let q = QdrantSearch::new(&config).unwrap();
        assert!(!q.health_check().await.unwrap());
        let req = SearchRequest { text: "x".into(), filter: SearchFilter::default(), limit: 1 };
        let err = q.query(Collection::Abstracts, &req).await.unwrap_err();
        assert!(err.is_transient());
    }
}
